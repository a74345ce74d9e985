//! Content-addressed blob store (`blobs/sha256/<hex>`).
//!
//! Blobs are written to a temporary file in the same directory and renamed
//! into place, so a present blob is always complete. Writers check for an
//! existing blob first and never rewrite one.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use a3s_oci_core::error::{OciError, Result};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

const ALGORITHM: &str = "sha256";

/// Split `sha256:<hex>` and check the hex part, so a digest can never name
/// a path outside the store.
pub fn digest_hex(digest: &str) -> Result<&str> {
    let hex = digest
        .strip_prefix("sha256:")
        .ok_or_else(|| OciError::Other(format!("unsupported digest '{}'", digest)))?;
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(OciError::Other(format!("malformed digest '{}'", digest)));
    }
    Ok(hex)
}

/// Writer that hashes and counts everything passing through it.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Return the inner writer, the `sha256:` digest, and the byte count.
    pub fn finish(self) -> (W, String, u64) {
        let digest = format!("{}:{}", ALGORITHM, hex::encode(self.hasher.finalize()));
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// SHA-256 of raw bytes as `sha256:<hex>`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{}:{}", ALGORITHM, hex::encode(Sha256::digest(data)))
}

/// The `blobs/sha256` directory of one OCI layout.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open the store of `layout_dir`, creating `blobs/sha256` if needed.
    pub fn create(layout_dir: &Path) -> Result<Self> {
        let dir = layout_dir.join("blobs").join(ALGORITHM);
        std::fs::create_dir_all(&dir).map_err(|e| {
            OciError::IoError(io::Error::new(
                e.kind(),
                format!("failed to create blob directory {}: {}", dir.display(), e),
            ))
        })?;
        Ok(Self { dir })
    }

    /// Open the store of an existing layout without creating anything.
    pub fn open(layout_dir: &Path) -> Result<Self> {
        let dir = layout_dir.join("blobs").join(ALGORITHM);
        if !dir.is_dir() {
            return Err(OciError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("missing blob directory {}", dir.display()),
            )));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, digest: &str) -> Result<PathBuf> {
        Ok(self.dir.join(digest_hex(digest)?))
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.path(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn read(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.path(digest)?;
        std::fs::read(&path).map_err(|e| {
            OciError::IoError(io::Error::new(
                e.kind(),
                format!("failed to read blob {}: {}", digest, e),
            ))
        })
    }

    /// Size of a stored blob.
    pub fn size(&self, digest: &str) -> Result<u64> {
        let path = self.path(digest)?;
        Ok(std::fs::metadata(&path)?.len())
    }

    /// A temporary file inside the store, for streaming a blob whose digest
    /// is not known yet. Hand it back through [`BlobStore::commit`].
    pub fn temp_file(&self) -> Result<NamedTempFile> {
        Ok(tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.dir)?)
    }

    /// Move a finished temporary file to its digest name.
    ///
    /// Returns `false` when the blob was already present; the temporary file
    /// is then discarded.
    pub fn commit(&self, tmp: NamedTempFile, digest: &str) -> Result<bool> {
        let path = self.path(digest)?;
        if path.is_file() {
            return Ok(false);
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| {
            OciError::IoError(io::Error::new(
                e.error.kind(),
                format!("failed to store blob {}: {}", digest, e.error),
            ))
        })?;
        Ok(true)
    }

    /// Store `data`, returning its digest and size.
    pub fn put_bytes(&self, data: &[u8]) -> Result<(String, u64)> {
        let digest = sha256_digest(data);
        if !self.contains(&digest) {
            let mut tmp = self.temp_file()?;
            tmp.write_all(data)?;
            self.commit(tmp, &digest)?;
            tracing::debug!(digest = %digest, size = data.len(), "Wrote blob");
        }
        Ok((digest, data.len() as u64))
    }

    /// Copy one blob from another store unless it is already here.
    ///
    /// The content is re-hashed on the way through; a source blob whose bytes
    /// do not match its name is rejected. Returns `true` when a copy was made.
    pub fn copy_from(&self, source: &BlobStore, digest: &str) -> Result<bool> {
        if self.contains(digest) {
            return Ok(false);
        }

        let src_path = source.path(digest)?;
        let mut src = File::open(&src_path).map_err(|e| {
            OciError::IoError(io::Error::new(
                e.kind(),
                format!("missing blob {} in {}: {}", digest, source.dir.display(), e),
            ))
        })?;

        let tmp = self.temp_file()?;
        let mut writer = DigestWriter::new(tmp);
        io::copy(&mut src, &mut writer)?;
        let (tmp, actual, _) = writer.finish();

        if actual != digest {
            return Err(OciError::Other(format!(
                "blob {} in {} has digest {}",
                digest,
                source.dir.display(),
                actual
            )));
        }

        self.commit(tmp, digest)
    }

    /// Digests of every complete blob in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut digests = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') || !entry.file_type()?.is_file() {
                continue;
            }
            digests.push(format!("{}:{}", ALGORITHM, name));
        }
        digests.sort();
        Ok(digests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_digest_hex_validation() {
        let good = format!("sha256:{}", "a".repeat(64));
        assert_eq!(digest_hex(&good).unwrap().len(), 64);
        assert!(digest_hex("sha256:../../etc/passwd").is_err());
        assert!(digest_hex(&format!("sha512:{}", "a".repeat(64))).is_err());
        assert!(digest_hex("abc").is_err());
    }

    #[test]
    fn test_sha256_digest_known_value() {
        assert_eq!(
            sha256_digest(b"hello"),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_digest_writer_matches_direct_hash() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"hel").unwrap();
        writer.write_all(b"lo").unwrap();
        let (inner, digest, size) = writer.finish();
        assert_eq!(inner, b"hello");
        assert_eq!(digest, sha256_digest(b"hello"));
        assert_eq!(size, 5);
    }

    #[test]
    fn test_put_bytes_dedup() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::create(tmp.path()).unwrap();

        let (d1, s1) = store.put_bytes(b"config").unwrap();
        let (d2, _) = store.put_bytes(b"config").unwrap();
        assert_eq!(d1, d2);
        assert_eq!(s1, 6);
        assert_eq!(store.list().unwrap(), vec![d1.clone()]);
        assert_eq!(store.read(&d1).unwrap(), b"config");
    }

    #[test]
    fn test_commit_existing_blob_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::create(tmp.path()).unwrap();
        let (digest, _) = store.put_bytes(b"x").unwrap();

        let mut t = store.temp_file().unwrap();
        t.write_all(b"x").unwrap();
        assert!(!store.commit(t, &digest).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_copy_from_skips_present() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let src = BlobStore::create(a.path()).unwrap();
        let dst = BlobStore::create(b.path()).unwrap();

        let (digest, _) = src.put_bytes(b"layer bytes").unwrap();
        assert!(dst.copy_from(&src, &digest).unwrap());
        assert!(!dst.copy_from(&src, &digest).unwrap());
        assert_eq!(dst.read(&digest).unwrap(), b"layer bytes");
    }

    #[test]
    fn test_copy_from_rejects_corrupt_source() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let src = BlobStore::create(a.path()).unwrap();
        let dst = BlobStore::create(b.path()).unwrap();

        let digest = sha256_digest(b"expected");
        std::fs::write(src.path(&digest).unwrap(), b"tampered").unwrap();

        assert!(dst.copy_from(&src, &digest).is_err());
        assert!(!dst.contains(&digest));
        assert!(dst.list().unwrap().is_empty());
    }

    #[test]
    fn test_copy_from_missing_source_blob() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let src = BlobStore::create(a.path()).unwrap();
        let dst = BlobStore::create(b.path()).unwrap();

        let err = dst.copy_from(&src, &sha256_digest(b"nope")).unwrap_err();
        assert!(err.to_string().contains("missing blob"));
    }

    #[test]
    fn test_open_requires_existing_store() {
        let tmp = TempDir::new().unwrap();
        assert!(BlobStore::open(tmp.path()).is_err());
        BlobStore::create(tmp.path()).unwrap();
        assert!(BlobStore::open(tmp.path()).is_ok());
    }
}
