//! Layer blob creation.
//!
//! Turns a populated layer root into a gzip-compressed tar blob written
//! straight into a [`BlobStore`]. The archive is reproducible: entries are
//! sorted by path, timestamps are zero, and ownership is root, so the same
//! tree always yields the same digest.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use a3s_oci_core::error::{OciError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::oci::blobs::{BlobStore, DigestWriter};

/// A layer blob written to a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBlob {
    /// `sha256:` digest of the compressed blob
    pub digest: String,
    /// `sha256:` digest of the uncompressed tar
    pub diff_id: String,
    /// Compressed size in bytes
    pub size: u64,
}

/// Archive `root` into a new layer blob in `store`.
///
/// The blob is written only if no blob with the same digest exists.
pub fn write_layer(root: &Path, store: &BlobStore) -> Result<LayerBlob> {
    let build_err = |e: io::Error| {
        OciError::AssemblyError(format!("Failed to archive {}: {}", root.display(), e))
    };

    let tmp = store.temp_file()?;
    let compressed = DigestWriter::new(tmp);
    let encoder = GzEncoder::new(compressed, Compression::default());
    let mut builder = tar::Builder::new(DigestWriter::new(encoder));
    builder.follow_symlinks(false);

    let mut entries = Vec::new();
    collect_entries(root, root, &mut entries)?;
    for relative in &entries {
        append_entry(&mut builder, &root.join(relative), relative).map_err(build_err)?;
    }

    let uncompressed = builder.into_inner().map_err(build_err)?;
    let (encoder, diff_id, _) = uncompressed.finish();
    let compressed = encoder.finish().map_err(build_err)?;
    let (tmp, digest, size) = compressed.finish();

    let written = store.commit(tmp, &digest)?;
    tracing::debug!(
        root = %root.display(),
        digest = %digest,
        size,
        entries = entries.len(),
        new_blob = written,
        "Wrote layer blob"
    );

    Ok(LayerBlob {
        digest,
        diff_id,
        size,
    })
}

/// Collect every path under `current`, relative to `root`, parents before children.
fn collect_entries(root: &Path, current: &Path, entries: &mut Vec<PathBuf>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| {
        OciError::AssemblyError(format!(
            "Failed to read directory {}: {}",
            current.display(),
            e
        ))
    })?;

    let mut children = Vec::new();
    for entry in read_dir {
        let entry = entry
            .map_err(|e| OciError::AssemblyError(format!("Failed to read entry: {}", e)))?;
        children.push(entry.path());
    }
    children.sort();

    for path in children {
        let relative = path
            .strip_prefix(root)
            .map_err(|e| OciError::AssemblyError(format!("Failed to strip prefix: {}", e)))?
            .to_path_buf();
        let is_dir = path.symlink_metadata()?.is_dir();
        entries.push(relative);
        if is_dir {
            collect_entries(root, &path, entries)?;
        }
    }

    Ok(())
}

fn append_entry<W: io::Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    relative: &Path,
) -> io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    let file_type = meta.file_type();

    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(file_mode(&meta));

    if file_type.is_symlink() {
        let target = std::fs::read_link(path)?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, relative, target)
    } else if file_type.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, relative, io::empty())
    } else if file_type.is_file() {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(meta.len());
        builder.append_data(&mut header, relative, File::open(path)?)
    } else {
        tracing::debug!(path = %path.display(), "Skipping special file in layer");
        Ok(())
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else {
        0o644
    }
}
