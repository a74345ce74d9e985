//! OCI image layout documents.
//!
//! Typed shapes for `oci-layout`, `index.json`, manifests, and image
//! configs, plus the helpers that read and write them. Maps are `BTreeMap`
//! so every document serializes the same way on every run.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use a3s_oci_core::error::{OciError, Result};
use serde::{Deserialize, Serialize};

pub const MEDIA_TYPE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Annotation carrying the tag of a manifest entry in `index.json`.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

pub const OCI_LAYOUT_FILE: &str = "oci-layout";
pub const INDEX_FILE: &str = "index.json";
pub const IMAGE_LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciLayout {
    pub image_layout_version: String,
}

impl Default for OciLayout {
    fn default() -> Self {
        Self {
            image_layout_version: IMAGE_LAYOUT_VERSION.to_string(),
        }
    }
}

/// Platform of a manifest entry in an image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// `arch` or `arch/variant`.
    pub fn label(&self) -> String {
        match self.variant {
            Some(ref v) => format!("{}/{}", self.architecture, v),
            None => self.architecture.clone(),
        }
    }
}

/// Content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn new(media_type: &str, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: digest.into(),
            size,
            platform: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn ref_name(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_REF_NAME).map(String::as_str)
    }
}

/// `index.json`: an image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Index {
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_INDEX.to_string()),
            manifests,
            annotations: BTreeMap::new(),
        }
    }

    /// Insert `entry`, replacing any entry with the same ref name or digest.
    /// An untagged entry replaces the other untagged entries.
    pub fn upsert(&mut self, entry: Descriptor) {
        self.manifests
            .retain(|m| m.digest != entry.digest && m.ref_name() != entry.ref_name());
        self.manifests.push(entry);
    }
}

/// Image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_MANIFEST.to_string()),
            config,
            layers,
            annotations: BTreeMap::new(),
        }
    }

    /// Digests of every blob this manifest references, config first.
    pub fn referenced_digests(&self) -> Vec<String> {
        std::iter::once(self.config.digest.clone())
            .chain(self.layers.iter().map(|l| l.digest.clone()))
            .collect()
    }
}

/// Image config blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfigBlob {
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub os: String,
    pub config: RuntimeConfig,
    pub rootfs: RootFs,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Execution defaults inside the image config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, EmptyObject>,
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyObject {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

/// Serialize a document the same way every time.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

/// Whether `dir` has an `index.json`.
pub fn has_index(dir: &Path) -> bool {
    dir.join(INDEX_FILE).is_file()
}

/// Read and parse `<dir>/index.json`.
pub fn read_index(dir: &Path) -> Result<Index> {
    let path = dir.join(INDEX_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        OciError::IoError(std::io::Error::new(
            e.kind(),
            format!("failed to read {}: {}", path.display(), e),
        ))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        OciError::SerializationError(format!("failed to parse {}: {}", path.display(), e))
    })
}

/// Write `<dir>/oci-layout`.
pub fn write_oci_layout(dir: &Path) -> Result<()> {
    let bytes = serde_json::to_vec(&OciLayout::default())?;
    write_atomic(&dir.join(OCI_LAYOUT_FILE), &bytes)
}

/// Write `<dir>/index.json`. Completes an OCI directory, so callers write it last.
pub fn write_index(dir: &Path, index: &Index) -> Result<()> {
    write_atomic(&dir.join(INDEX_FILE), &to_canonical_json(index)?)
}

/// Replace `path` with `bytes` through a temporary file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        OciError::IoError(std::io::Error::new(
            e.error.kind(),
            format!("failed to write {}: {}", path.display(), e.error),
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(digest: &str, tag: Option<&str>) -> Descriptor {
        let mut d = Descriptor::new(MEDIA_TYPE_MANIFEST, digest, 100);
        if let Some(tag) = tag {
            d.annotations
                .insert(ANNOTATION_REF_NAME.to_string(), tag.to_string());
        }
        d
    }

    #[test]
    fn test_oci_layout_serialization() {
        let json = serde_json::to_string(&OciLayout::default()).unwrap();
        assert_eq!(json, r#"{"imageLayoutVersion":"1.0.0"}"#);
    }

    #[test]
    fn test_descriptor_omits_empty_fields() {
        let d = Descriptor::new(MEDIA_TYPE_LAYER_GZIP, "sha256:abc", 42);
        let v: serde_json::Value = serde_json::to_value(&d).unwrap();
        assert_eq!(v["mediaType"], MEDIA_TYPE_LAYER_GZIP);
        assert_eq!(v["size"], 42);
        assert!(v.get("platform").is_none());
        assert!(v.get("annotations").is_none());
    }

    #[test]
    fn test_index_upsert_replaces_same_tag() {
        let mut index = Index::new(vec![entry("sha256:a", Some("v1")), entry("sha256:b", Some("v2"))]);
        index.upsert(entry("sha256:c", Some("v1")));

        let digests: Vec<_> = index.manifests.iter().map(|m| m.digest.as_str()).collect();
        assert_eq!(digests, vec!["sha256:b", "sha256:c"]);
    }

    #[test]
    fn test_index_upsert_replaces_same_digest() {
        let mut index = Index::new(vec![entry("sha256:a", None)]);
        index.upsert(entry("sha256:a", None));
        assert_eq!(index.manifests.len(), 1);
    }

    #[test]
    fn test_index_upsert_untagged_keeps_tagged() {
        let mut index = Index::new(vec![entry("sha256:a", Some("v1")), entry("sha256:b", None)]);
        index.upsert(entry("sha256:c", None));

        let digests: Vec<_> = index.manifests.iter().map(|m| m.digest.as_str()).collect();
        assert_eq!(digests, vec!["sha256:a", "sha256:c"]);
    }

    #[test]
    fn test_manifest_referenced_digests() {
        let manifest = Manifest::new(
            Descriptor::new(MEDIA_TYPE_CONFIG, "sha256:cfg", 10),
            vec![
                Descriptor::new(MEDIA_TYPE_LAYER_GZIP, "sha256:l1", 1),
                Descriptor::new(MEDIA_TYPE_LAYER_GZIP, "sha256:l2", 2),
            ],
        );
        assert_eq!(
            manifest.referenced_digests(),
            vec!["sha256:cfg", "sha256:l1", "sha256:l2"]
        );
    }

    #[test]
    fn test_runtime_config_pascal_case() {
        let mut config = RuntimeConfig {
            working_dir: Some("/app".to_string()),
            ..Default::default()
        };
        config
            .exposed_ports
            .insert("8080/tcp".to_string(), EmptyObject {});
        let v = serde_json::to_value(&config).unwrap();
        assert_eq!(v["WorkingDir"], "/app");
        assert_eq!(v["ExposedPorts"]["8080/tcp"], serde_json::json!({}));
        assert!(v.get("Env").is_none());
    }

    #[test]
    fn test_write_and_read_index() {
        let tmp = TempDir::new().unwrap();
        let index = Index::new(vec![entry("sha256:a", Some("latest"))]);

        write_oci_layout(tmp.path()).unwrap();
        write_index(tmp.path(), &index).unwrap();

        assert!(has_index(tmp.path()));
        assert_eq!(read_index(tmp.path()).unwrap(), index);
        let layout = std::fs::read_to_string(tmp.path().join(OCI_LAYOUT_FILE)).unwrap();
        assert!(layout.contains("1.0.0"));
    }

    #[test]
    fn test_read_index_invalid_json() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(INDEX_FILE), "not json").unwrap();
        let err = read_index(tmp.path()).unwrap_err();
        assert!(matches!(err, OciError::SerializationError(_)));
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        write_atomic(&tmp.path().join("file"), b"one").unwrap();
        write_atomic(&tmp.path().join("file"), b"two").unwrap();

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["file"]);
        assert_eq!(std::fs::read(tmp.path().join("file")).unwrap(), b"two");
    }
}
