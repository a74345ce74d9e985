//! Content-keyed cache for populated layer roots.
//!
//! A layer's key is a hash of its declared inputs (name, kind, items,
//! resolved versions, target platform), never of the bytes it produces.
//! Entries live under `cache_dir/<key>-<layer>/`:
//!
//! ```text
//! <key>-<layer>/
//!   rootfs/            populated layer root
//!   .oci-layer-cache   marker: cache_key, layer_name, layer_type, created
//! ```
//!
//! An entry is assembled in a temporary directory and renamed into place
//! with its marker already written, so readers never see a partial entry.

use std::io;
use std::path::{Path, PathBuf};

use a3s_oci_core::error::{OciError, Result};
use a3s_oci_core::layer::LayerSpec;
use a3s_oci_core::outcome::{Outcome, Warning, WarningKind};
use a3s_oci_core::platform::TargetPlatform;
use sha2::{Digest, Sha256};

const MARKER_FILE: &str = ".oci-layer-cache";
const ROOTFS_DIR: &str = "rootfs";

/// Parsed `.oci-layer-cache` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMarker {
    pub cache_key: String,
    pub layer_name: String,
    pub layer_type: String,
    pub created: String,
}

impl CacheMarker {
    fn render(&self) -> String {
        format!(
            "cache_key={}\nlayer_name={}\nlayer_type={}\ncreated={}\n",
            self.cache_key, self.layer_name, self.layer_type, self.created
        )
    }

    fn parse(content: &str) -> Option<Self> {
        let mut cache_key = None;
        let mut layer_name = None;
        let mut layer_type = None;
        let mut created = None;
        for line in content.lines() {
            match line.split_once('=') {
                Some(("cache_key", v)) => cache_key = Some(v.to_string()),
                Some(("layer_name", v)) => layer_name = Some(v.to_string()),
                Some(("layer_type", v)) => layer_type = Some(v.to_string()),
                Some(("created", v)) => created = Some(v.to_string()),
                _ => {}
            }
        }
        Some(Self {
            cache_key: cache_key?,
            layer_name: layer_name?,
            layer_type: layer_type.unwrap_or_default(),
            created: created.unwrap_or_default(),
        })
    }
}

/// One cache entry, as listed by [`LayerCache::list_entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub layer_name: String,
    pub layer_type: String,
    pub created: String,
    pub size_bytes: u64,
    pub path: PathBuf,
}

/// Content-keyed cache for populated layer roots.
pub struct LayerCache {
    cache_dir: PathBuf,
}

impl LayerCache {
    /// Open a cache at the given directory, creating it if needed.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir).map_err(|e| {
            OciError::CacheError(format!(
                "Failed to create layer cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Compute the cache key of a layer.
    ///
    /// The key is a SHA256 hash over:
    /// - layer name and kind
    /// - sorted, deduplicated items
    /// - sorted resolved versions (`name version` strings)
    /// - target os, architecture, variant, and package architecture
    pub fn compute_key(spec: &LayerSpec, versions: &[String], platform: &TargetPlatform) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"oci-layer-cache-v1\n");
        hasher.update(format!("name={}\n", spec.name).as_bytes());
        hasher.update(format!("kind={}\n", spec.kind).as_bytes());

        for item in spec.normalized_items() {
            hasher.update(b"item=");
            hasher.update(item.as_bytes());
            hasher.update(b"\n");
        }

        let mut sorted_versions = versions.to_vec();
        sorted_versions.sort();
        sorted_versions.dedup();
        for version in &sorted_versions {
            hasher.update(b"version=");
            hasher.update(version.as_bytes());
            hasher.update(b"\n");
        }

        hasher.update(format!("os={}\n", platform.os).as_bytes());
        hasher.update(format!("arch={}\n", platform.architecture).as_bytes());
        hasher.update(
            format!("variant={}\n", platform.variant.as_deref().unwrap_or("")).as_bytes(),
        );
        hasher.update(format!("package_arch={}\n", platform.package_arch).as_bytes());

        hex::encode(hasher.finalize())
    }

    fn entry_dir(&self, key: &str, layer_name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}-{}", key, layer_name))
    }

    fn read_marker(entry_dir: &Path) -> io::Result<Option<CacheMarker>> {
        let content = std::fs::read_to_string(entry_dir.join(MARKER_FILE))?;
        Ok(CacheMarker::parse(&content))
    }

    fn is_valid_entry(entry_dir: &Path, key: &str) -> bool {
        matches!(Self::read_marker(entry_dir), Ok(Some(ref m)) if m.cache_key == key)
            && entry_dir.join(ROOTFS_DIR).is_dir()
    }

    /// Look up a populated root by key.
    ///
    /// Returns the cached root on a hit. An entry that exists but cannot be
    /// read or does not match is reported as a warning and treated as a miss.
    pub fn lookup(&self, key: &str, spec: &LayerSpec) -> Outcome<Option<PathBuf>> {
        let entry_dir = self.entry_dir(key, &spec.name);

        if !entry_dir.exists() {
            tracing::info!(layer = %spec.name, key = %key, "OCI Cache MISS");
            return Outcome::ok(None);
        }

        let problem = match Self::read_marker(&entry_dir) {
            Ok(Some(marker)) if marker.cache_key == key => {
                let rootfs = entry_dir.join(ROOTFS_DIR);
                if rootfs.is_dir() {
                    tracing::info!(layer = %spec.name, key = %key, path = %rootfs.display(), "OCI Cache HIT");
                    return Outcome::ok(Some(rootfs));
                }
                format!("entry {} has no rootfs", entry_dir.display())
            }
            Ok(Some(marker)) => format!(
                "entry {} records key {}",
                entry_dir.display(),
                marker.cache_key
            ),
            Ok(None) => format!("entry {} has a malformed marker", entry_dir.display()),
            Err(e) => format!("failed to read marker in {}: {}", entry_dir.display(), e),
        };

        tracing::info!(layer = %spec.name, key = %key, "OCI Cache MISS");
        let mut outcome = Outcome::ok(None);
        outcome.push(Warning::new(
            WarningKind::CacheDegradation,
            format!("layer '{}': {}; repopulating", spec.name, problem),
        ));
        outcome
    }

    /// Store a populated root under `key`.
    ///
    /// Copies `source_root` into a temporary entry, writes the marker, and
    /// renames the entry into place. Returns the cached root.
    pub fn store(&self, key: &str, spec: &LayerSpec, source_root: &Path) -> Result<PathBuf> {
        let entry_dir = self.entry_dir(key, &spec.name);
        let cache_err = |what: &str, e: &dyn std::fmt::Display| {
            OciError::CacheError(format!("{} for layer '{}': {}", what, spec.name, e))
        };

        let tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempdir_in(&self.cache_dir)
            .map_err(|e| cache_err("Failed to create temporary entry", &e))?;

        copy_dir_recursive(source_root, &tmp.path().join(ROOTFS_DIR))?;

        let marker = CacheMarker {
            cache_key: key.to_string(),
            layer_name: spec.name.clone(),
            layer_type: spec.kind.to_string(),
            created: chrono::Utc::now().to_rfc3339(),
        };
        std::fs::write(tmp.path().join(MARKER_FILE), marker.render())
            .map_err(|e| cache_err("Failed to write cache marker", &e))?;

        if entry_dir.exists() {
            if Self::is_valid_entry(&entry_dir, key) {
                tracing::debug!(layer = %spec.name, key = %key, "Cache entry already present");
                return Ok(entry_dir.join(ROOTFS_DIR));
            }
            std::fs::remove_dir_all(&entry_dir)
                .map_err(|e| cache_err("Failed to remove stale cache entry", &e))?;
        }

        if let Err(e) = std::fs::rename(tmp.path(), &entry_dir) {
            // Another build may have stored the same key meanwhile.
            if !Self::is_valid_entry(&entry_dir, key) {
                return Err(cache_err("Failed to move cache entry into place", &e));
            }
        }

        let size_bytes = dir_size(&entry_dir).unwrap_or(0);
        tracing::debug!(
            layer = %spec.name,
            key = %key,
            size_bytes,
            path = %entry_dir.display(),
            "Cached layer root"
        );

        Ok(entry_dir.join(ROOTFS_DIR))
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str, layer_name: &str) -> Result<bool> {
        let entry_dir = self.entry_dir(key, layer_name);
        if !entry_dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&entry_dir).map_err(|e| {
            OciError::CacheError(format!(
                "Failed to remove cache entry {}: {}",
                entry_dir.display(),
                e
            ))
        })?;
        Ok(true)
    }

    /// List all valid entries, sorted by directory name.
    pub fn list_entries(&self) -> Result<Vec<CacheEntry>> {
        let read_dir = std::fs::read_dir(&self.cache_dir).map_err(|e| {
            OciError::CacheError(format!(
                "Failed to read cache directory {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| {
                OciError::CacheError(format!("Failed to read directory entry: {}", e))
            })?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !path.is_dir() {
                continue;
            }
            if let Ok(Some(marker)) = Self::read_marker(&path) {
                entries.push(CacheEntry {
                    size_bytes: dir_size(&path.join(ROOTFS_DIR)).unwrap_or(0),
                    key: marker.cache_key,
                    layer_name: marker.layer_name,
                    layer_type: marker.layer_type,
                    created: marker.created,
                    path,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Remove every entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let entries = self.list_entries()?;
        for entry in &entries {
            self.invalidate(&entry.key, &entry.layer_name)?;
        }
        Ok(entries.len())
    }
}

/// Recursively copy a directory, keeping symlinks as symlinks and
/// carrying permission bits over to copied directories.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| {
        OciError::CacheError(format!(
            "Failed to create directory {}: {}",
            dst.display(),
            e
        ))
    })?;

    for entry in std::fs::read_dir(src).map_err(|e| {
        OciError::CacheError(format!(
            "Failed to read directory {}: {}",
            src.display(),
            e
        ))
    })? {
        let entry = entry.map_err(|e| {
            OciError::CacheError(format!("Failed to read directory entry: {}", e))
        })?;
        copy_entry(&entry.path(), &dst.join(entry.file_name()))?;
    }

    let perms = std::fs::metadata(src)?.permissions();
    std::fs::set_permissions(dst, perms)?;
    Ok(())
}

/// Copy one file, symlink, or directory tree to `dst`.
pub(crate) fn copy_entry(src: &Path, dst: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(src).map_err(|e| {
        OciError::CacheError(format!("Failed to stat {}: {}", src.display(), e))
    })?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = std::fs::read_link(src)?;
        if dst.symlink_metadata().is_ok() {
            std::fs::remove_file(dst)?;
        }
        make_symlink(&target, dst)?;
    } else if file_type.is_dir() {
        copy_dir_recursive(src, dst)?;
    } else if file_type.is_file() {
        std::fs::copy(src, dst).map_err(|e| {
            OciError::CacheError(format!(
                "Failed to copy {} to {}: {}",
                src.display(),
                dst.display(),
                e
            ))
        })?;
    } else {
        tracing::debug!(path = %src.display(), "Skipping special file");
    }
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::fs::copy(target, link).map(|_| ())
}

/// Calculate the total size of a directory recursively.
pub(crate) fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let meta = entry.path().symlink_metadata()?;
            if meta.is_dir() {
                total += dir_size(&entry.path())?;
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}
