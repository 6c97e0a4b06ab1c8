//! Blob store trait and implementations.
//!
//! This module defines the `BlobStore` trait: the narrow interface the catalog
//! needs from wherever content-addressed blobs are kept.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBlobStore;
#[cfg(feature = "mock")]
pub use self::mock::MockBlobStore;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Unified interface for blob stores.
///
/// Every blob is addressed by its content hash. Hashes are validated with
/// [`validate_hash`](crate::validate_hash) before use and implementations
/// must enforce this.
///
/// # Examples
///
/// ```
/// use gorjun_storage::{BlobStore, error::Result};
///
/// async fn describe(blobs: &dyn BlobStore, hash: &str) -> Result<String> {
///     Ok(match blobs.size(hash).await? {
///         Some(size) => format!("{hash}: {size} bytes"),
///         None => format!("{hash}: missing"),
///     })
/// }
/// ```
#[async_trait]
pub trait BlobStore: Debug + Send + Sync {
    /// Size in bytes of the blob stored under `hash`, or `None` if no such
    /// blob exists.
    async fn size(&self, hash: &str) -> Result<Option<u64>>;

    /// Check whether a blob is stored under `hash`.
    async fn exists(&self, hash: &str) -> Result<bool> {
        Ok(self.size(hash).await?.is_some())
    }

    /// Remove the blob stored under `hash`.
    ///
    /// Returns `false` if there was nothing to remove; a missing blob is not
    /// an error, so removal after a crash-interrupted delete is safe to repeat.
    async fn remove(&self, hash: &str) -> Result<bool>;
}
