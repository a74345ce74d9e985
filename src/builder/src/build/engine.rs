//! Build engine.
//!
//! Drives one image build: load the base image, resolve every declared
//! layer through the cache (populating on a miss), then assemble. Layers
//! are processed strictly in declaration order.

use std::path::{Path, PathBuf};

use a3s_oci_core::error::{OciError, Result};
use a3s_oci_core::layer::{LayerKind, LayerMode, LayerSpec};
use a3s_oci_core::outcome::{Outcome, Warning, WarningKind};

use super::assemble::{assemble, BuildResult, LayerInput};
use super::config::BuildConfig;
use super::installer::PackageInstaller;
use super::populate::{populate_layer, PopulateContext};
use crate::cache::LayerCache;
use crate::oci::image::BaseImage;

/// Name of the layer built from the whole source rootfs in single mode.
pub const ROOTFS_LAYER: &str = "rootfs";

/// A layer whose root is ready to be archived.
#[derive(Debug, Clone)]
pub struct ResolvedLayer {
    pub spec: LayerSpec,
    /// Cache key; `None` for the uncached rootfs layer
    pub content_key: Option<String>,
    pub root_path: PathBuf,
    pub from_cache: bool,
}

impl ResolvedLayer {
    fn into_input(self) -> LayerInput {
        LayerInput {
            created_by: format!("a3s-oci: {}", self.spec),
            name: self.spec.name,
            root: self.root_path,
            from_cache: self.from_cache,
        }
    }
}

/// Build the image described by `config`.
///
/// `installer` is required when any layer installs packages.
pub fn build(
    config: &BuildConfig,
    installer: Option<&dyn PackageInstaller>,
) -> Result<Outcome<BuildResult>> {
    if config.needs_installer() && installer.is_none() {
        return Err(OciError::config_with_hint(
            "packages layers need a package installer",
            "configure installer.program in the build description",
        ));
    }

    tracing::info!(
        name = %config.name,
        mode = %config.mode,
        platform = %config.platform,
        output = %config.output.display(),
        "Building image"
    );

    let base = match config.base {
        Some(ref b) => Some(BaseImage::from_path(&b.dir, Some(&config.platform))?),
        None => None,
    };

    // Uncached layer roots live here until assembly is done.
    let scratch = tempfile::Builder::new().prefix("a3s-oci-").tempdir()?;
    let mut warnings = Vec::new();
    let resolved = match config.mode {
        LayerMode::Single => vec![rootfs_layer(config)?],
        LayerMode::Multi => {
            resolve_layers(config, installer, scratch.path())?.drain_into(&mut warnings)
        }
    };

    let inputs: Vec<LayerInput> = resolved.into_iter().map(ResolvedLayer::into_input).collect();
    let result = assemble(config, base.as_ref(), &inputs)?;
    Ok(Outcome::with_warnings(result, warnings))
}

fn rootfs_layer(config: &BuildConfig) -> Result<ResolvedLayer> {
    let rootfs = config
        .rootfs
        .clone()
        .ok_or_else(|| OciError::config("single mode needs a source rootfs"))?;
    Ok(ResolvedLayer {
        spec: LayerSpec {
            name: ROOTFS_LAYER.to_string(),
            kind: LayerKind::Directories,
            items: vec!["/".to_string()],
        },
        content_key: None,
        root_path: rootfs,
        from_cache: false,
    })
}

/// Open the layer cache, degrading to no cache when it cannot be created.
fn open_cache(config: &BuildConfig, warnings: &mut Vec<Warning>) -> Option<LayerCache> {
    let dir = config.cache_dir.as_ref()?;
    match LayerCache::new(dir) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warnings.push(Warning::new(
                WarningKind::CacheDegradation,
                format!("layer cache disabled: {}", e),
            ));
            None
        }
    }
}

fn resolve_layers(
    config: &BuildConfig,
    installer: Option<&dyn PackageInstaller>,
    scratch: &Path,
) -> Result<Outcome<Vec<ResolvedLayer>>> {
    let mut warnings = Vec::new();
    let cache = open_cache(config, &mut warnings);
    let ctx = PopulateContext {
        source_rootfs: config.rootfs.as_deref(),
        installer,
        max_unresolved: config.installer.as_ref().and_then(|i| i.max_unresolved),
    };

    let mut resolved = Vec::with_capacity(config.layers.len());
    for (position, spec) in config.layers.iter().enumerate() {
        let versions = match (spec.kind, installer) {
            (LayerKind::Packages, Some(installer)) => installer.resolve_versions(&spec.items)?,
            _ => Vec::new(),
        };
        let key = LayerCache::compute_key(spec, &versions, &config.platform);

        if let Some(ref cache) = cache {
            if let Some(root) = cache.lookup(&key, spec).drain_into(&mut warnings) {
                resolved.push(ResolvedLayer {
                    spec: spec.clone(),
                    content_key: Some(key),
                    root_path: root,
                    from_cache: true,
                });
                continue;
            }
        }

        let root = scratch.join(format!("{:03}-{}", position, spec.name));
        populate_layer(spec, &root, &ctx)?.drain_into(&mut warnings);

        let root_path = match cache {
            Some(ref cache) => match cache.store(&key, spec, &root) {
                Ok(cached) => cached,
                Err(e) => {
                    warnings.push(Warning::new(
                        WarningKind::CacheDegradation,
                        format!("layer '{}' not cached: {}", spec.name, e),
                    ));
                    root
                }
            },
            None => root,
        };

        resolved.push(ResolvedLayer {
            spec: spec.clone(),
            content_key: Some(key),
            root_path,
            from_cache: false,
        });
    }

    Ok(Outcome::with_warnings(resolved, warnings))
}
