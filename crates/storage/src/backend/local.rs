//! Local filesystem blob store.
//!
//! Blobs are plain files named by content hash directly beneath a configured
//! root directory, accessed via `tokio::fs`.

use crate::error::{ErrorKind, Result};
use crate::{BlobStore, validate_hash};
use async_trait::async_trait;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Local filesystem blob store.
///
/// # Examples
///
/// ```no_run
/// use gorjun_storage::backend::LocalBlobStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let blobs = LocalBlobStore::new("/var/lib/gorjun/files")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}
impl LocalBlobStore {
    /// Create a blob store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or exists but is not a
    /// directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only happens once at startup; not worth an async constructor.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of the blob for `hash`.
    pub fn path(&self, hash: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_hash(hash)?))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn size(&self, hash: &str) -> Result<Option<u64>> {
        let path = self.path(hash)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => exn::bail!(Self::map_io_error(e, &path)),
        }
    }

    async fn remove(&self, hash: &str) -> Result<bool> {
        let path = self.path(hash)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(hash, path = %path.display(), "Removed blob");
                Ok(true)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => exn::bail!(Self::map_io_error(e, &path)),
        }
    }
}
