//! Base image loading.
//!
//! Reads an existing OCI layout (the base an image is stacked on) and
//! exposes what the assembler needs from it: the layer descriptors in
//! order, their diff IDs, the history, and the runtime config to inherit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use a3s_oci_core::error::{OciError, Result};
use a3s_oci_core::platform::TargetPlatform;
use oci_spec::image::{Descriptor as OciDescriptor, ImageConfiguration, ImageManifest};

use super::blobs::BlobStore;
use super::layout::{self, Descriptor, HistoryEntry, Index};

/// Check that `dir` holds a usable OCI layout: an `index.json` that parses
/// and lists at least one manifest.
pub fn verify_layout(dir: &Path) -> Result<Index> {
    if !dir.is_dir() {
        return Err(OciError::Other(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    if !layout::has_index(dir) {
        return Err(OciError::Other(format!(
            "missing index.json in {}",
            dir.display()
        )));
    }
    let index = layout::read_index(dir)?;
    if index.manifests.is_empty() {
        return Err(OciError::Other(format!(
            "index.json in {} lists no manifests",
            dir.display()
        )));
    }
    Ok(index)
}

/// Pick the manifest entry of `index` for `platform`.
///
/// Entries without a platform match anything; when none matches the first
/// entry is not silently used for a platform-tagged index.
pub fn select_manifest<'a>(
    index: &'a Index,
    platform: Option<&TargetPlatform>,
) -> Option<&'a Descriptor> {
    let Some(platform) = platform else {
        return index.manifests.first();
    };
    let tagged = index.manifests.iter().any(|m| m.platform.is_some());
    if !tagged {
        return index.manifests.first();
    }
    index.manifests.iter().find(|m| match m.platform {
        Some(ref p) => p.os == platform.os && platform.matches(&p.architecture, p.variant.as_deref()),
        None => false,
    })
}

/// Runtime defaults inherited from a base image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseImageConfig {
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub exposed_ports: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl BaseImageConfig {
    fn from_oci_config(oci_config: &ImageConfiguration) -> Self {
        let config = oci_config.config();

        let entrypoint = config.as_ref().and_then(|c| c.entrypoint().clone());
        let cmd = config.as_ref().and_then(|c| c.cmd().clone());
        let working_dir = config.as_ref().and_then(|c| c.working_dir().clone());
        let user = config.as_ref().and_then(|c| c.user().clone());

        let env = config
            .as_ref()
            .and_then(|c| c.env().as_ref())
            .map(|env_list| {
                env_list
                    .iter()
                    .filter_map(|e| {
                        e.split_once('=')
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let exposed_ports = config
            .as_ref()
            .and_then(|c| c.exposed_ports().as_ref())
            .map(|ports| ports.iter().cloned().collect())
            .unwrap_or_default();

        let labels = config
            .as_ref()
            .and_then(|c| c.labels().clone())
            .map(|l| l.into_iter().collect())
            .unwrap_or_default();

        Self {
            entrypoint,
            cmd,
            env,
            working_dir,
            user,
            exposed_ports,
            labels,
        }
    }
}

/// Layer descriptor of a base manifest, as the assembler copies it.
fn layer_descriptor(layer: &OciDescriptor) -> Result<Descriptor> {
    let size = u64::try_from(layer.size()).map_err(|_| {
        OciError::SerializationError(format!("layer {} has a negative size", layer.digest()))
    })?;
    let mut descriptor = Descriptor::new(
        &layer.media_type().to_string(),
        layer.digest().to_string(),
        size,
    );
    if let Some(annotations) = layer.annotations() {
        descriptor.annotations = annotations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
    Ok(descriptor)
}

/// A base image loaded from an OCI layout.
#[derive(Debug)]
pub struct BaseImage {
    root_dir: PathBuf,
    blobs: BlobStore,
    manifest_digest: String,
    layers: Vec<Descriptor>,
    config: BaseImageConfig,
    diff_ids: Vec<String>,
    history: Vec<HistoryEntry>,
}

impl BaseImage {
    /// Load the manifest for `platform` from the layout at `path`.
    pub fn from_path(path: &Path, platform: Option<&TargetPlatform>) -> Result<Self> {
        let root_dir = path.to_path_buf();
        let index = verify_layout(&root_dir)?;
        let blobs = BlobStore::open(&root_dir)?;

        let descriptor = select_manifest(&index, platform).ok_or_else(|| {
            OciError::AssemblyError(format!(
                "base image {} has no manifest for {}",
                root_dir.display(),
                platform.map(|p| p.to_string()).unwrap_or_default()
            ))
        })?;
        let manifest_digest = descriptor.digest.clone();

        let manifest: ImageManifest = serde_json::from_slice(&blobs.read(&manifest_digest)?)
            .map_err(|e| {
                OciError::SerializationError(format!("failed to parse base manifest: {}", e))
            })?;
        let layers = manifest
            .layers()
            .iter()
            .map(layer_descriptor)
            .collect::<Result<Vec<_>>>()?;

        let config_digest = manifest.config().digest().to_string();
        let oci_config: ImageConfiguration = serde_json::from_slice(&blobs.read(&config_digest)?)
            .map_err(|e| {
                OciError::SerializationError(format!("failed to parse base config: {}", e))
            })?;

        let diff_ids = oci_config.rootfs().diff_ids().clone();
        if diff_ids.len() != layers.len() {
            return Err(OciError::AssemblyError(format!(
                "base image {} lists {} diff_ids for {} layers",
                root_dir.display(),
                diff_ids.len(),
                layers.len()
            )));
        }

        let history = oci_config
            .history()
            .iter()
            .map(|h| HistoryEntry {
                created: h.created().clone(),
                created_by: h.created_by().clone(),
                author: h.author().clone(),
                comment: h.comment().clone(),
                empty_layer: h.empty_layer().unwrap_or(false),
            })
            .collect();

        tracing::debug!(
            path = %root_dir.display(),
            manifest = %manifest_digest,
            layers = layers.len(),
            "Loaded base image"
        );

        Ok(Self {
            root_dir,
            blobs,
            manifest_digest,
            config: BaseImageConfig::from_oci_config(&oci_config),
            layers,
            diff_ids,
            history,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn manifest_digest(&self) -> &str {
        &self.manifest_digest
    }

    /// Layer descriptors, bottom to top.
    pub fn layers(&self) -> &[Descriptor] {
        &self.layers
    }

    pub fn diff_ids(&self) -> &[String] {
        &self.diff_ids
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn config(&self) -> &BaseImageConfig {
        &self.config
    }
}
