//! Image assembly.
//!
//! Writes the blobs, config, manifest, and `index.json` of one
//! single-architecture image. Base layers are copied byte for byte; new
//! layers are archived from their populated roots. `index.json` is written
//! last, so a layout is never marked complete before every blob it
//! references is in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use a3s_oci_core::error::{OciError, Result};

use super::config::BuildConfig;
use super::layer::write_layer;
use crate::oci::blobs::BlobStore;
use crate::oci::image::{BaseImage, BaseImageConfig};
use crate::oci::layout::{
    self, Descriptor, EmptyObject, HistoryEntry, ImageConfigBlob, Index, Manifest, RootFs,
    RuntimeConfig, ANNOTATION_REF_NAME, MEDIA_TYPE_CONFIG, MEDIA_TYPE_LAYER_GZIP,
    MEDIA_TYPE_MANIFEST,
};

/// A populated layer root ready to be archived.
#[derive(Debug, Clone)]
pub struct LayerInput {
    pub name: String,
    pub root: PathBuf,
    /// History `created_by` text
    pub created_by: String,
    pub from_cache: bool,
}

/// One layer of a finished image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerReport {
    pub name: String,
    pub digest: String,
    pub size: u64,
    pub from_cache: bool,
    /// Copied unchanged from the base image
    pub base: bool,
}

/// A finished single-architecture image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub output: PathBuf,
    pub manifest_digest: String,
    pub manifest_size: u64,
    pub config_digest: String,
    /// Layers bottom to top, base layers first
    pub layers: Vec<LayerReport>,
}

/// Assemble the image described by `config` into `config.output`.
pub fn assemble(
    config: &BuildConfig,
    base: Option<&BaseImage>,
    layers: &[LayerInput],
) -> Result<BuildResult> {
    let base_layers = base.map(|b| b.layers().len()).unwrap_or(0);
    if base_layers + layers.len() == 0 {
        return Err(OciError::AssemblyError(
            "image has no layers".to_string(),
        ));
    }

    let output = config.output.clone();
    let existing = if layout::has_index(&output) {
        Some(layout::read_index(&output).map_err(|e| {
            OciError::AssemblyError(format!(
                "cannot extend {}: {}",
                output.display(),
                e
            ))
        })?)
    } else {
        None
    };

    let store = BlobStore::create(&output)?;
    let mut descriptors = Vec::new();
    let mut diff_ids = Vec::new();
    let mut history = Vec::new();
    let mut reports = Vec::new();

    if let Some(base) = base {
        for (i, layer) in base.layers().iter().enumerate() {
            copy_base_blob(&store, base, &layer.digest)?;
            reports.push(LayerReport {
                name: format!("base[{}]", i),
                digest: layer.digest.clone(),
                size: layer.size,
                from_cache: false,
                base: true,
            });
        }
        descriptors.extend(base.layers().iter().cloned());
        diff_ids.extend(base.diff_ids().iter().cloned());
        history.extend(base.history().iter().cloned());
    }

    for layer in layers {
        let blob = write_layer(&layer.root, &store)?;
        tracing::info!(
            layer = %layer.name,
            digest = %blob.digest,
            size = blob.size,
            from_cache = layer.from_cache,
            "Layer written"
        );
        descriptors.push(Descriptor::new(MEDIA_TYPE_LAYER_GZIP, blob.digest.clone(), blob.size));
        diff_ids.push(blob.diff_id);
        history.push(HistoryEntry {
            created: Some(config.created.clone()),
            created_by: Some(layer.created_by.clone()),
            author: config.image.author.clone(),
            comment: None,
            empty_layer: false,
        });
        reports.push(LayerReport {
            name: layer.name.clone(),
            digest: blob.digest,
            size: blob.size,
            from_cache: layer.from_cache,
            base: false,
        });
    }

    let image_config = ImageConfigBlob {
        created: config.created.clone(),
        author: config.image.author.clone(),
        architecture: config.platform.architecture.clone(),
        variant: config.platform.variant.clone(),
        os: config.platform.os.clone(),
        config: runtime_config(config, base.map(BaseImage::config)),
        rootfs: RootFs {
            fs_type: "layers".to_string(),
            diff_ids,
        },
        history,
    };
    let (config_digest, config_size) = store.put_bytes(&layout::to_canonical_json(&image_config)?)?;

    let manifest = Manifest::new(
        Descriptor::new(MEDIA_TYPE_CONFIG, config_digest.clone(), config_size),
        descriptors,
    );
    for digest in manifest.referenced_digests() {
        if !store.contains(&digest) {
            return Err(OciError::AssemblyError(format!(
                "manifest references missing blob {}",
                digest
            )));
        }
    }
    let (manifest_digest, manifest_size) = store.put_bytes(&layout::to_canonical_json(&manifest)?)?;

    let mut entry = Descriptor::new(MEDIA_TYPE_MANIFEST, manifest_digest.clone(), manifest_size);
    if let Some(ref tag) = config.tag {
        entry
            .annotations
            .insert(ANNOTATION_REF_NAME.to_string(), tag.clone());
    }
    let mut index = existing.unwrap_or_else(|| Index::new(Vec::new()));
    index.upsert(entry);

    layout::write_oci_layout(&output)?;
    layout::write_index(&output, &index)?;

    tracing::info!(
        output = %output.display(),
        manifest = %manifest_digest,
        layers = reports.len(),
        "Image assembled"
    );

    Ok(BuildResult {
        output,
        manifest_digest,
        manifest_size,
        config_digest,
        layers: reports,
    })
}

fn copy_base_blob(store: &BlobStore, base: &BaseImage, digest: &str) -> Result<()> {
    if !base.blobs().contains(digest) {
        return Err(OciError::AssemblyError(format!(
            "base image {} is missing blob {}",
            base.root_dir().display(),
            digest
        )));
    }
    store.copy_from(base.blobs(), digest).map_err(|e| {
        OciError::AssemblyError(format!("failed to copy base blob {}: {}", digest, e))
    })?;
    Ok(())
}

/// Base runtime config overridden key by key with the build's metadata.
fn runtime_config(config: &BuildConfig, base: Option<&BaseImageConfig>) -> RuntimeConfig {
    let image = &config.image;
    let base = base.cloned().unwrap_or_default();

    let mut env: BTreeMap<String, String> = base.env;
    env.extend(image.env.clone());

    let mut labels = base.labels;
    labels.extend(image.labels.clone());

    let exposed_ports = base
        .exposed_ports
        .into_iter()
        .chain(image.exposed_ports.iter().cloned())
        .map(|p| (p, EmptyObject {}))
        .collect();

    RuntimeConfig {
        user: image.user.clone().or(base.user),
        env: env.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
        entrypoint: image.entrypoint.clone().or(base.entrypoint),
        cmd: image.cmd.clone().or(base.cmd),
        working_dir: image.working_dir.clone().or(base.working_dir),
        labels,
        exposed_ports,
    }
}

/// Read the config blob of the manifest `digest` in the layout at `dir`.
pub fn read_image_config(dir: &Path, digest: &str) -> Result<ImageConfigBlob> {
    let store = BlobStore::open(dir)?;
    let manifest: Manifest = serde_json::from_slice(&store.read(digest)?)?;
    Ok(serde_json::from_slice(&store.read(&manifest.config.digest)?)?)
}
