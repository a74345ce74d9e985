use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{OciError, Result};
use crate::layer::LayerMode;

/// Build description file
///
/// Read once from YAML (or JSON, by extension) and interpreted by the
/// builder's `BuildConfig`. Nothing else reads raw configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSpecFile {
    /// Image name
    pub name: String,

    /// Reference name recorded in index.json
    pub tag: Option<String>,

    /// Single rootfs layer or explicit layer list
    pub mode: LayerMode,

    /// Layer declarations (`name:kind:content`), in stacking order
    pub layers: Vec<String>,

    /// Base image reference (empty for none)
    pub base_image: String,

    /// Fully built source rootfs
    pub rootfs: Option<PathBuf>,

    /// Output OCI directory
    pub output: Option<PathBuf>,

    /// Target platform
    pub platform: PlatformSpec,

    /// Image config metadata
    pub image: ImageMetadata,

    /// Layer cache settings
    pub cache: CacheConfig,

    /// Roots searched for named build outputs
    pub search_dirs: Vec<PathBuf>,

    /// Package installer (required for `packages` layers)
    pub installer: Option<InstallerConfig>,
}

impl Default for ImageSpecFile {
    fn default() -> Self {
        Self {
            name: "image".to_string(),
            tag: None,
            mode: LayerMode::Single,
            layers: Vec::new(),
            base_image: String::new(),
            rootfs: None,
            output: None,
            platform: PlatformSpec::default(),
            image: ImageMetadata::default(),
            cache: CacheConfig::default(),
            search_dirs: Vec::new(),
            installer: None,
        }
    }
}

impl ImageSpecFile {
    /// Load a build description, choosing the format by file extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OciError::config_with_hint(
                format!("failed to read {}: {}", path.display(), e),
                "pass the build description with -f <file>",
            )
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Target platform as written in the build description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSpec {
    /// Machine or OCI architecture name
    pub arch: String,

    /// OCI variant (e.g. "v7")
    pub variant: Option<String>,

    /// Package-feed architecture (defaults to the machine arch)
    pub package_arch: Option<String>,

    pub os: String,
}

impl Default for PlatformSpec {
    fn default() -> Self {
        Self {
            arch: std::env::consts::ARCH.to_string(),
            variant: None,
            package_arch: None,
            os: "linux".to_string(),
        }
    }
}

/// Image config metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMetadata {
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Ports as `<port>/<proto>`
    pub exposed_ports: Vec<String>,
    pub author: Option<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    /// RFC 3339 creation time; SOURCE_DATE_EPOCH or the Unix epoch when unset
    pub created: Option<String>,
}

/// Layer cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Cache root (defaults to the user cache dir, scoped by package arch)
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

/// External package installer command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Installer program
    pub program: String,

    /// Arguments; `{root}` and `{packages}` are substituted
    pub args: Vec<String>,

    /// Output fragments that mark an unresolved dependency (case-insensitive)
    pub unresolved_patterns: Vec<String>,

    /// Optional program printing `name version` lines for the requested packages
    pub query_program: Option<String>,

    /// Arguments for the query program; `{packages}` is substituted
    pub query_args: Vec<String>,

    /// Unresolved dependencies tolerated per layer before it fails
    pub max_unresolved: Option<usize>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: vec!["{root}".to_string(), "{packages}".to_string()],
            unresolved_patterns: vec![
                "nothing provides".to_string(),
                "cannot satisfy".to_string(),
                "unresolved dependency".to_string(),
                "unable to locate package".to_string(),
            ],
            query_program: None,
            query_args: vec!["{packages}".to_string()],
            max_unresolved: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_spec_file() {
        let spec = ImageSpecFile::default();
        assert_eq!(spec.mode, LayerMode::Single);
        assert!(spec.layers.is_empty());
        assert!(spec.base_image.is_empty());
        assert!(spec.cache.enabled);
        assert_eq!(spec.platform.os, "linux");
    }

    #[test]
    fn test_from_yaml_multi() {
        let yaml = r#"
name: app-image
tag: latest
mode: multi
layers:
  - "base:packages:base-files+busybox"
  - "app:directories:/opt/app"
base_image: base-image
rootfs: /work/rootfs
platform:
  arch: aarch64
image:
  entrypoint: ["/opt/app/run"]
  env:
    PATH: /usr/bin:/bin
  exposed_ports: ["8080/tcp"]
cache:
  enabled: false
"#;
        let spec = ImageSpecFile::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "app-image");
        assert_eq!(spec.tag.as_deref(), Some("latest"));
        assert_eq!(spec.mode, LayerMode::Multi);
        assert_eq!(spec.layers.len(), 2);
        assert_eq!(spec.platform.arch, "aarch64");
        assert_eq!(spec.platform.os, "linux");
        assert_eq!(
            spec.image.entrypoint,
            Some(vec!["/opt/app/run".to_string()])
        );
        assert_eq!(spec.image.env.get("PATH").unwrap(), "/usr/bin:/bin");
        assert!(!spec.cache.enabled);
    }

    #[test]
    fn test_from_yaml_bad_mode() {
        let err = ImageSpecFile::from_yaml("mode: triple").unwrap_err();
        assert!(matches!(err, OciError::SerializationError(_)));
    }

    #[test]
    fn test_from_file_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("image.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(br#"{"name":"j","platform":{"arch":"x86_64"}}"#)
            .unwrap();

        let spec = ImageSpecFile::from_file(&path).unwrap();
        assert_eq!(spec.name, "j");
        assert_eq!(spec.platform.arch, "x86_64");
    }

    #[test]
    fn test_from_file_missing() {
        let err = ImageSpecFile::from_file(Path::new("/nonexistent/image.yaml")).unwrap_err();
        assert!(matches!(err, OciError::ConfigError { .. }));
    }

    #[test]
    fn test_installer_defaults() {
        let yaml = "installer:\n  program: opkg-install\n";
        let spec = ImageSpecFile::from_yaml(yaml).unwrap();
        let installer = spec.installer.unwrap();
        assert_eq!(installer.program, "opkg-install");
        assert_eq!(installer.args, vec!["{root}", "{packages}"]);
        assert!(!installer.unresolved_patterns.is_empty());
        assert!(installer.max_unresolved.is_none());
    }
}
