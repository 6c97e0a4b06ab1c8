//! In-memory blob store for testing.

use crate::error::Result;
use crate::{BlobStore, validate_hash};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory blob store for testing.
///
/// Only blob sizes are tracked; the catalog never reads blob contents.
///
/// ```
/// use gorjun_storage::backend::{MockBlobStore, BlobStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let blobs = MockBlobStore::with_blobs([("abc123", 42)]);
/// assert_eq!(blobs.size("abc123").await?, Some(42));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockBlobStore {
    blobs: RwLock<HashMap<String, u64>>,
}

impl MockBlobStore {
    /// Create a mock store pre-populated with `(hash, size)` pairs.
    ///
    /// Panics on an invalid hash; broken test setup should not pass.
    pub fn with_blobs(blobs: impl IntoIterator<Item = (impl Into<String>, u64)>) -> Self {
        let mut map = HashMap::new();
        for (hash, size) in blobs {
            let hash = hash.into();
            if validate_hash(&hash).is_err() {
                panic!("MockBlobStore::with_blobs: invalid hash {hash}");
            }
            map.insert(hash, size);
        }
        Self { blobs: RwLock::new(map) }
    }

    pub async fn insert(&self, hash: impl Into<String>, size: u64) {
        self.blobs.write().await.insert(hash.into(), size);
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn size(&self, hash: &str) -> Result<Option<u64>> {
        validate_hash(hash)?;
        Ok(self.blobs.read().await.get(hash).copied())
    }

    async fn remove(&self, hash: &str) -> Result<bool> {
        validate_hash(hash)?;
        Ok(self.blobs.write().await.remove(hash).is_some())
    }
}
