//! Base image resolution.
//!
//! A base image reference is classified without touching the filesystem,
//! then located by trying an ordered list of candidate directories. The
//! first candidate holding a valid OCI layout wins; if none does, the error
//! lists every location tried and why it was rejected.

use std::fmt;
use std::path::{Path, PathBuf};

use a3s_oci_core::error::{OciError, Result};

use crate::oci::image::verify_layout;

/// How a base image reference is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseImageKind {
    /// A named build unit whose OCI output is looked up by a locator.
    BuildOutput,
    /// An absolute path to an OCI layout.
    LocalPath,
    /// A registry reference; never fetched here.
    Remote,
}

impl fmt::Display for BaseImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseImageKind::BuildOutput => f.write_str("build-output"),
            BaseImageKind::LocalPath => f.write_str("local-path"),
            BaseImageKind::Remote => f.write_str("remote"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImageRef {
    pub kind: BaseImageKind,
    pub locator: String,
}

impl BaseImageRef {
    /// Classify a raw reference. Empty means no base image.
    ///
    /// - leading `/`: local path
    /// - any other `/`, or a `.` before the first `:`: remote
    /// - anything else: build output name
    pub fn classify(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let kind = if raw.starts_with('/') {
            BaseImageKind::LocalPath
        } else {
            let host_part = raw.split(':').next().unwrap_or(raw);
            if raw.contains('/') || host_part.contains('.') {
                BaseImageKind::Remote
            } else {
                BaseImageKind::BuildOutput
            }
        };

        Some(Self {
            kind,
            locator: raw.to_string(),
        })
    }

    /// Classify and reject remote references.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        match Self::classify(raw) {
            Some(r) if r.kind == BaseImageKind::Remote => Err(OciError::config_with_hint(
                format!("remote base image '{}' is not fetched by the builder", r.locator),
                "pre-fetch the image to a local OCI directory with a pinned digest and \
                 pass that directory (absolute path) or its build output name as base_image",
            )),
            other => Ok(other),
        }
    }
}

impl fmt::Display for BaseImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.locator, self.kind)
    }
}

/// Finds the deploy directory of a named build unit.
pub trait BuildOutputLocator {
    /// Candidate OCI directories for `unit`, most specific first.
    fn candidates(&self, unit: &str) -> Vec<PathBuf>;
}

/// Looks for `<dir>/<unit>-<machine>-oci`, `<dir>/<unit>-oci`, and
/// `<dir>/<unit>` under each search directory in turn.
#[derive(Debug, Clone, Default)]
pub struct DeployDirLocator {
    pub search_dirs: Vec<PathBuf>,
    pub machine: Option<String>,
}

impl DeployDirLocator {
    pub fn new(search_dirs: Vec<PathBuf>, machine: Option<String>) -> Self {
        Self {
            search_dirs,
            machine,
        }
    }
}

impl BuildOutputLocator for DeployDirLocator {
    fn candidates(&self, unit: &str) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for dir in &self.search_dirs {
            if let Some(ref machine) = self.machine {
                out.push(dir.join(format!("{}-{}-oci", unit, machine)));
            }
            out.push(dir.join(format!("{}-oci", unit)));
            out.push(dir.join(unit));
        }
        out
    }
}

/// Locate the OCI layout a base image reference points to.
pub fn resolve_base_image(
    reference: &BaseImageRef,
    locator: &dyn BuildOutputLocator,
) -> Result<PathBuf> {
    let candidates = match reference.kind {
        BaseImageKind::LocalPath => vec![PathBuf::from(&reference.locator)],
        BaseImageKind::BuildOutput => locator.candidates(&reference.locator),
        BaseImageKind::Remote => {
            return Err(OciError::config(format!(
                "remote base image '{}' cannot be resolved locally",
                reference.locator
            )))
        }
    };

    let mut searched = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match check_candidate(&candidate) {
            Ok(()) => {
                tracing::info!(
                    base = %reference.locator,
                    path = %candidate.display(),
                    "Resolved base image"
                );
                return Ok(candidate);
            }
            Err(reason) => {
                tracing::debug!(path = %candidate.display(), reason = %reason, "Base image candidate rejected");
                searched.push(format!("{} [{}]", candidate.display(), reason));
            }
        }
    }

    Err(OciError::ResolutionError {
        target: format!("base image '{}'", reference.locator),
        searched,
    })
}

fn check_candidate(dir: &Path) -> std::result::Result<(), String> {
    if !dir.exists() {
        return Err("not found".to_string());
    }
    verify_layout(dir).map(|_| ()).map_err(|e| e.to_string())
}
