//! Multi-architecture image index.
//!
//! Merges several single-architecture OCI layouts into one layout whose
//! `index.json` lists a platform-tagged manifest per architecture, and
//! reads such indexes back (platform listing, selection, extraction).
//!
//! The merge runs in fixed phases:
//!
//! ```text
//! Init -> CollectPerPlatform -> MergeBlobs -> EmitIndex -> Done
//! ```
//!
//! Collection reads every source before anything is written. A missing or
//! invalid source directory aborts the merge; a source whose index lists no
//! manifests is skipped with a warning. Nothing is created in the output
//! directory unless at least one manifest was collected.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use a3s_oci_core::error::{OciError, Result};
use a3s_oci_core::outcome::{Outcome, Warning, WarningKind};
use a3s_oci_core::platform::{
    arch_variant, normalize_arch_to_oci, TargetPlatform, KNOWN_OCI_ARCHES,
};

use super::blobs::BlobStore;
use super::image::select_manifest;
use super::layout::{self, Descriptor, Index, Manifest, Platform};

/// One per-architecture input to a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSource {
    /// Architecture as the build system names it (e.g. `aarch64`).
    pub arch: String,
    /// OCI architecture name; derived from `arch` when absent.
    pub oci_arch: Option<String>,
    pub dir: PathBuf,
}

impl PlatformSource {
    pub fn new(arch: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            arch: arch.into(),
            oci_arch: None,
            dir: dir.into(),
        }
    }

    pub fn platform(&self) -> Platform {
        let architecture = self
            .oci_arch
            .clone()
            .unwrap_or_else(|| normalize_arch_to_oci(&self.arch));
        Platform {
            architecture,
            os: "linux".to_string(),
            variant: arch_variant(&self.arch).map(String::from),
        }
    }
}

impl FromStr for PlatformSource {
    type Err = OciError;

    /// `<arch>=<dir>[,<oci-arch>]`
    fn from_str(s: &str) -> Result<Self> {
        let (arch, rest) = s.split_once('=').ok_or_else(|| {
            OciError::config_with_hint(
                format!("invalid platform '{}'", s),
                "expected <arch>=<dir>[,<oci-arch>]",
            )
        })?;
        // Only a known OCI architecture counts as a suffix; commas may
        // appear in the directory itself.
        let (dir, oci_arch) = match rest.rsplit_once(',') {
            Some((dir, oci)) if KNOWN_OCI_ARCHES.contains(&oci) => (dir, Some(oci.to_string())),
            _ => (rest, None),
        };
        if arch.is_empty() || dir.is_empty() {
            return Err(OciError::config_with_hint(
                format!("invalid platform '{}'", s),
                "expected <arch>=<dir>[,<oci-arch>]",
            ));
        }
        Ok(Self {
            arch: arch.to_string(),
            oci_arch,
            dir: PathBuf::from(dir),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergePhase {
    Init,
    CollectPerPlatform,
    MergeBlobs,
    EmitIndex,
    Done,
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergePhase::Init => "init",
            MergePhase::CollectPerPlatform => "collect",
            MergePhase::MergeBlobs => "merge-blobs",
            MergePhase::EmitIndex => "emit-index",
            MergePhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// A manifest picked from one source, with every blob it needs.
struct Collected {
    arch: String,
    source: BlobStore,
    entry: Descriptor,
    blobs: Vec<String>,
}

/// Summary of a finished merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Entries written to `index.json`, in processing order.
    pub entries: Vec<Descriptor>,
    pub blobs_copied: usize,
    pub blobs_skipped: usize,
    /// Architectures whose source listed no manifests.
    pub skipped_platforms: Vec<String>,
}

/// Read one source: its first manifest and the digests it references.
fn collect_source(source: &PlatformSource) -> Result<Outcome<Option<Collected>>> {
    let dir = &source.dir;
    if !dir.is_dir() {
        return Err(OciError::ResolutionError {
            target: format!("OCI directory for {}", source.arch),
            searched: vec![dir.display().to_string()],
        });
    }

    let index = layout::read_index(dir).map_err(|e| {
        OciError::IndexMergeError(format!(
            "{} ({}): invalid OCI layout: {}",
            source.arch,
            dir.display(),
            e
        ))
    })?;

    let mut outcome = Outcome::ok(None);
    let entry = match index.manifests.len() {
        0 => {
            outcome.push(Warning::new(
                WarningKind::EmptyPlatform,
                format!("{} ({}) lists no manifests; skipped", source.arch, dir.display()),
            ));
            return Ok(outcome);
        }
        1 => index.manifests[0].clone(),
        n => {
            outcome.push(Warning::new(
                WarningKind::ExtraManifests,
                format!(
                    "{} ({}) lists {} manifests; using the first",
                    source.arch,
                    dir.display(),
                    n
                ),
            ));
            index.manifests[0].clone()
        }
    };

    let invalid = |e: OciError| {
        OciError::IndexMergeError(format!("{} ({}): {}", source.arch, dir.display(), e))
    };
    let store = BlobStore::open(dir).map_err(invalid)?;
    let manifest_bytes = store.read(&entry.digest).map_err(invalid)?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| invalid(OciError::SerializationError(e.to_string())))?;

    let mut blobs = vec![entry.digest.clone()];
    blobs.extend(manifest.referenced_digests());
    for digest in &blobs {
        if !store.contains(digest) {
            return Err(invalid(OciError::Other(format!("missing blob {}", digest))));
        }
    }

    outcome.value = Some(Collected {
        arch: source.arch.clone(),
        source: store,
        entry: Descriptor {
            platform: Some(source.platform()),
            annotations: Default::default(),
            ..entry
        },
        blobs,
    });
    Ok(outcome)
}

/// Merge per-architecture layouts into a multi-architecture layout at `output`.
pub fn merge_platform_images(
    sources: &[PlatformSource],
    output: &Path,
) -> Result<Outcome<MergeReport>> {
    let mut phase = MergePhase::Init;
    tracing::info!(phase = %phase, platforms = sources.len(), output = %output.display(), "Merging platform images");
    if sources.is_empty() {
        return Err(OciError::IndexMergeError(
            "no platforms given".to_string(),
        ));
    }

    phase = MergePhase::CollectPerPlatform;
    let mut warnings = Vec::new();
    let mut report = MergeReport::default();
    let mut collected = Vec::new();
    for source in sources {
        tracing::debug!(phase = %phase, arch = %source.arch, dir = %source.dir.display(), "Reading platform image");
        match collect_source(source)?.drain_into(&mut warnings) {
            Some(c) => collected.push(c),
            None => report.skipped_platforms.push(source.arch.clone()),
        }
    }

    if collected.is_empty() {
        return Err(OciError::IndexMergeError(
            "no manifests collected".to_string(),
        ));
    }

    phase = MergePhase::MergeBlobs;
    let merged = BlobStore::create(output)?;
    for c in &collected {
        for digest in &c.blobs {
            let copied = merged.copy_from(&c.source, digest).map_err(|e| {
                OciError::IndexMergeError(format!("{}: failed to copy {}: {}", c.arch, digest, e))
            })?;
            if copied {
                report.blobs_copied += 1;
            } else {
                report.blobs_skipped += 1;
            }
        }
        tracing::debug!(phase = %phase, arch = %c.arch, blobs = c.blobs.len(), "Merged platform blobs");
    }

    phase = MergePhase::EmitIndex;
    report.entries = collected.into_iter().map(|c| c.entry).collect();
    layout::write_oci_layout(output)?;
    layout::write_index(output, &Index::new(report.entries.clone()))?;

    phase = MergePhase::Done;
    tracing::info!(
        phase = %phase,
        manifests = report.entries.len(),
        blobs_copied = report.blobs_copied,
        blobs_skipped = report.blobs_skipped,
        "Wrote multi-architecture index"
    );

    Ok(Outcome::with_warnings(report, warnings))
}

/// Whether the layout's index lists at least one platform-tagged manifest.
pub fn is_image_index(dir: &Path) -> Result<bool> {
    let index = layout::read_index(dir)?;
    Ok(index.manifests.iter().any(|m| m.platform.is_some()))
}

/// Platforms (`arch` or `arch/variant`) of every tagged manifest entry.
pub fn list_platforms(dir: &Path) -> Result<Vec<String>> {
    let index = layout::read_index(dir)?;
    Ok(index
        .manifests
        .iter()
        .filter_map(|m| m.platform.as_ref().map(Platform::label))
        .collect())
}

/// The manifest entry for `arch` (machine or OCI name).
pub fn select_platform_manifest(dir: &Path, arch: &str) -> Result<Descriptor> {
    let index = layout::read_index(dir)?;
    let target = TargetPlatform::new(arch)?;
    select_manifest(&index, Some(&target))
        .cloned()
        .ok_or_else(|| OciError::ResolutionError {
            target: format!("platform {} in {}", target, dir.display()),
            searched: index
                .manifests
                .iter()
                .filter_map(|m| m.platform.as_ref().map(Platform::label))
                .collect(),
        })
}

/// Write a single-architecture layout at `output` holding `entry` and its blobs.
///
/// Returns the number of blobs copied.
pub fn extract_platform(dir: &Path, output: &Path, entry: &Descriptor) -> Result<usize> {
    let source = BlobStore::open(dir)?;
    let manifest: Manifest = serde_json::from_slice(&source.read(&entry.digest)?)?;

    let mut blobs = vec![entry.digest.clone()];
    blobs.extend(manifest.referenced_digests());
    for digest in &blobs {
        if !source.contains(digest) {
            return Err(OciError::Other(format!(
                "missing blob {} in {}",
                digest,
                dir.display()
            )));
        }
    }

    let target = BlobStore::create(output)?;
    let mut copied = 0;
    for digest in &blobs {
        if target.copy_from(&source, digest)? {
            copied += 1;
        }
    }

    let single = Descriptor {
        platform: None,
        ..entry.clone()
    };
    layout::write_oci_layout(output)?;
    layout::write_index(output, &Index::new(vec![single]))?;

    tracing::info!(
        manifest = %entry.digest,
        output = %output.display(),
        copied,
        "Extracted platform image"
    );
    Ok(copied)
}
