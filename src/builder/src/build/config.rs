//! Build configuration.
//!
//! `BuildConfig` is built once from the build description and is the only
//! place raw configuration is interpreted. Validation runs in a fixed order
//! and finishes before anything is written:
//!
//! 1. layer declarations are parsed
//! 2. the base image reference is classified (remote references rejected)
//! 3. structural checks (source rootfs, target platform)
//! 4. the base image is resolved (read-only filesystem access)

use std::path::{Path, PathBuf};

use a3s_oci_core::config::{ImageMetadata, ImageSpecFile, InstallerConfig};
use a3s_oci_core::error::{OciError, Result};
use a3s_oci_core::layer::{parse_layers, LayerMode, LayerSpec};
use a3s_oci_core::outcome::Outcome;
use a3s_oci_core::platform::TargetPlatform;
use chrono::{DateTime, SecondsFormat, Utc};

use super::resolve::{resolve_base_image, BaseImageRef, BuildOutputLocator};

/// A base image that passed resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBase {
    pub reference: BaseImageRef,
    pub dir: PathBuf,
}

/// Validated, immutable build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub name: String,
    pub tag: Option<String>,
    pub mode: LayerMode,
    /// Declared layers in stacking order (empty in single mode)
    pub layers: Vec<LayerSpec>,
    pub base: Option<ResolvedBase>,
    pub rootfs: Option<PathBuf>,
    pub output: PathBuf,
    pub platform: TargetPlatform,
    pub image: ImageMetadata,
    /// RFC 3339 creation time written to the config blob and history
    pub created: String,
    /// Layer cache directory, `None` when caching is disabled
    pub cache_dir: Option<PathBuf>,
    pub installer: Option<InstallerConfig>,
}

/// Command-line overrides applied on top of the build description.
#[derive(Debug, Clone, Default)]
pub struct BuildOverrides {
    pub output: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub no_cache: bool,
    pub rootfs: Option<PathBuf>,
    pub arch: Option<String>,
    pub package_arch: Option<String>,
    pub base_image: Option<String>,
    pub search_dirs: Vec<PathBuf>,
}

impl BuildOverrides {
    pub fn apply(&self, spec: &mut ImageSpecFile) {
        if let Some(ref output) = self.output {
            spec.output = Some(output.clone());
        }
        if let Some(ref dir) = self.cache_dir {
            spec.cache.dir = Some(dir.clone());
        }
        if self.no_cache {
            spec.cache.enabled = false;
        }
        if let Some(ref rootfs) = self.rootfs {
            spec.rootfs = Some(rootfs.clone());
        }
        if let Some(ref arch) = self.arch {
            spec.platform.arch = arch.clone();
        }
        if let Some(ref package_arch) = self.package_arch {
            spec.platform.package_arch = Some(package_arch.clone());
        }
        if let Some(ref base) = self.base_image {
            spec.base_image = base.clone();
        }
        spec.search_dirs.extend(self.search_dirs.iter().cloned());
    }
}

/// Default layer cache location for a package architecture.
pub fn default_cache_dir(package_arch: &str) -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("a3s-oci").join("layers").join(package_arch))
}

/// Resolve the image creation time.
///
/// An explicit value must be RFC 3339. Otherwise `SOURCE_DATE_EPOCH` is used
/// when set, and the Unix epoch when not, so rebuilds produce the same config.
pub fn resolve_created(explicit: Option<&str>, source_date_epoch: Option<&str>) -> Result<String> {
    if let Some(created) = explicit {
        let parsed = DateTime::parse_from_rfc3339(created).map_err(|e| {
            OciError::config(format!("invalid image.created '{}': {}", created, e))
        })?;
        return Ok(parsed
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true));
    }

    let seconds = match source_date_epoch {
        Some(raw) => raw.trim().parse::<i64>().map_err(|_| {
            OciError::config(format!("invalid SOURCE_DATE_EPOCH '{}'", raw))
        })?,
        None => 0,
    };
    let time = DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| OciError::config(format!("timestamp {} out of range", seconds)))?;
    Ok(time.to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl BuildConfig {
    /// Validate a build description and resolve its base image.
    pub fn from_spec(spec: &ImageSpecFile, locator: &dyn BuildOutputLocator) -> Result<Outcome<Self>> {
        let source_date_epoch = std::env::var("SOURCE_DATE_EPOCH").ok();
        Self::from_spec_with_epoch(spec, locator, source_date_epoch.as_deref())
    }

    pub(crate) fn from_spec_with_epoch(
        spec: &ImageSpecFile,
        locator: &dyn BuildOutputLocator,
        source_date_epoch: Option<&str>,
    ) -> Result<Outcome<Self>> {
        let mut warnings = Vec::new();

        // 1. Layer declarations
        let layers = parse_layers(&spec.layers, spec.mode)?.drain_into(&mut warnings);

        // 2. Base image classification
        let base_ref = BaseImageRef::parse(&spec.base_image)?;

        // 3. Structural checks
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(OciError::config("image name is empty"));
        }

        let needs_rootfs =
            spec.mode == LayerMode::Single || layers.iter().any(|l| l.kind.copies_from_rootfs());
        let rootfs = spec.rootfs.clone();
        if needs_rootfs {
            match rootfs {
                None => {
                    return Err(OciError::config_with_hint(
                        "a source rootfs is required",
                        "set rootfs in the build description or pass --rootfs",
                    ))
                }
                Some(ref dir) if !dir.is_dir() => {
                    return Err(OciError::config(format!(
                        "source rootfs {} is not a directory",
                        dir.display()
                    )))
                }
                _ => {}
            }
        }

        let output = spec.output.clone().ok_or_else(|| {
            OciError::config_with_hint(
                "no output directory configured",
                "set output in the build description or pass --output",
            )
        })?;

        let platform = TargetPlatform::with_overrides(
            &spec.platform.arch,
            spec.platform.variant.as_deref(),
            spec.platform.package_arch.as_deref(),
            &spec.platform.os,
        )?;

        let created = resolve_created(spec.image.created.as_deref(), source_date_epoch)?;

        let cache_dir = if spec.cache.enabled {
            spec.cache
                .dir
                .clone()
                .or_else(|| default_cache_dir(&platform.package_arch))
        } else {
            None
        };

        // 4. Base image resolution
        let base = match base_ref {
            Some(reference) => {
                let dir = resolve_base_image(&reference, locator)?;
                Some(ResolvedBase { reference, dir })
            }
            None => None,
        };

        let config = Self {
            name: name.to_string(),
            tag: spec.tag.clone().filter(|t| !t.is_empty()),
            mode: spec.mode,
            layers,
            base,
            rootfs,
            output,
            platform,
            image: spec.image.clone(),
            created,
            cache_dir,
            installer: spec.installer.clone(),
        };

        tracing::debug!(
            name = %config.name,
            mode = %config.mode,
            layers = config.layers.len(),
            platform = %config.platform,
            "Build configuration ready"
        );

        Ok(Outcome::with_warnings(config, warnings))
    }

    /// Whether any declared layer installs packages.
    pub fn needs_installer(&self) -> bool {
        self.layers
            .iter()
            .any(|l| l.kind == a3s_oci_core::layer::LayerKind::Packages)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}
