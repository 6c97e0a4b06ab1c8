//! File records and reference-counted ownership.
//!
//! A record exists for a content hash exactly as long as at least one owner
//! holds it. Writes and deletes touch the file record, its owners, the name
//! index and the owner's file list in a single transaction.

use crate::clock::{ClockHandle, format, to_nanos};
use crate::db::{Database, WriteGuard};
use crate::error::{ErrorKind, Result};
use crate::models::{FileRecord, FileRow};
use crate::{names, users};
use exn::ResultExt;
use gorjun_storage::BlobHandle;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use tracing::instrument;

/// Pseudo-owner for uploads made without an identity.
pub const PUBLIC_OWNER: &str = "public";

/// Free-form string metadata attached to a file (type, checksums, version, tags...).
pub type Attributes = BTreeMap<String, String>;

pub(crate) fn normalize_owner(owner: &str) -> &str {
    match owner.is_empty() {
        true => PUBLIC_OWNER,
        false => owner,
    }
}

/// Merge attribute maps in order; later keys override earlier ones.
fn merge(attributes: &[Attributes]) -> Attributes {
    attributes.iter().flatten().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Outcome of removing one owner from a file.
struct Release {
    remaining: u64,
    purged: bool,
}

#[derive(Debug, Clone)]
pub struct FileCatalog {
    db: Database,
    blobs: BlobHandle,
    clock: ClockHandle,
}

impl FileCatalog {
    pub fn new(db: Database, blobs: BlobHandle, clock: ClockHandle) -> Self {
        Self { db, blobs, clock }
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Record that `owner` published the blob `hash` under `name`.
    ///
    /// The first writer of a hash creates the record (timestamp, name and
    /// blob size); later writers only add themselves as owners. Attribute
    /// maps are merged in order and applied on every write, and every write
    /// appends a new entry to the name index.
    ///
    /// An empty `owner` is recorded as [`PUBLIC_OWNER`]. A blob that cannot
    /// be inspected only leaves the size unset. Any storage-layer failure
    /// rolls back the whole write.
    #[instrument(skip(self, attributes))]
    pub async fn write(&self, owner: &str, hash: &str, name: &str, attributes: &[Attributes]) -> Result<()> {
        let owner = normalize_owner(owner);
        let size = match self.blobs.size(hash).await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(hash, error = ?e, "Could not inspect blob; recording file without size");
                None
            },
        };
        self.write_inner(owner, hash, name, size, merge(attributes))
            .await
            .inspect_err(|e| tracing::warn!(hash, error = ?e, "Write not applied"))
    }

    async fn write_inner(
        &self,
        owner: &str,
        hash: &str,
        name: &str,
        size: Option<u64>,
        attributes: Attributes,
    ) -> Result<()> {
        let size = size.map(|s| i64::try_from(s).or_raise(|| ErrorKind::InvalidData("file size"))).transpose()?;
        let now = to_nanos(self.clock.now())?;
        let mut tx = self.db.update().await?;
        users::ensure(&mut tx, owner).await?;
        let created = sqlx::query(include_str!("../queries/insert_file.sql"))
            .bind(hash)
            .bind(name)
            .bind(size)
            .bind(now)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected()
            > 0;
        for (key, value) in &attributes {
            sqlx::query(include_str!("../queries/upsert_attribute.sql"))
                .bind(hash)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        users::add_file(&mut tx, owner, hash, name, now).await?;
        names::publish(&mut tx, name, hash, now).await?;
        sqlx::query(include_str!("../queries/add_owner.sql"))
            .bind(hash)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await?;
        match created {
            true => tracing::info!(owner, hash, name, "Created file record"),
            false => tracing::debug!(owner, hash, name, "Added owner to existing file record"),
        }
        Ok(())
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Remove `owner`'s claim on `hash` and return how many owners remain.
    ///
    /// When none remain, the record, its attributes and every name-index
    /// entry for the hash are purged in the same transaction. The blob on
    /// disk is left alone; see [`release`](Self::release). Deleting a pair
    /// that does not exist changes nothing and reports `0`.
    #[instrument(skip(self))]
    pub async fn delete(&self, owner: &str, hash: &str) -> Result<u64> {
        let (release, _) = self.delete_inner(normalize_owner(owner), hash).await?;
        Ok(release.remaining)
    }

    /// [`delete`](Self::delete), then remove the blob if the record was purged.
    ///
    /// Blob removal happens after the commit but before the write lock is
    /// released, so no write of the same hash can re-create the record in
    /// between. If removal fails the blob is left orphaned and the failure is
    /// only logged.
    #[instrument(skip(self))]
    pub async fn release(&self, owner: &str, hash: &str) -> Result<u64> {
        let (release, _lock) = self.delete_inner(normalize_owner(owner), hash).await?;
        if release.purged {
            match self.blobs.remove(hash).await {
                Ok(true) => tracing::debug!(hash, "Removed blob of purged file"),
                Ok(false) => tracing::warn!(hash, "Blob of purged file was already missing"),
                Err(e) => tracing::warn!(hash, error = ?e, "Could not remove blob of purged file; leaving it orphaned"),
            }
        }
        Ok(release.remaining)
    }

    /// Returns the write lock still held so the caller can finish work that
    /// must not interleave with another write.
    async fn delete_inner(&self, owner: &str, hash: &str) -> Result<(Release, WriteGuard)> {
        let mut tx = self.db.update().await?;
        users::remove_file(&mut tx, owner, hash).await?;
        sqlx::query(include_str!("../queries/remove_owner.sql"))
            .bind(hash)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let remaining = count_owners(&mut tx, hash).await?;
        let mut purged = false;
        if remaining == 0 {
            let unindexed = names::unpublish(&mut tx, hash).await?;
            purged = sqlx::query(include_str!("../queries/delete_file.sql"))
                .bind(hash)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected()
                > 0;
            if purged {
                tracing::info!(hash, unindexed, "Last owner released file; purged record");
            }
        }
        let lock = tx.commit_holding().await?;
        Ok((Release { remaining, purged }, lock))
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Display name stored for `hash`.
    pub async fn read(&self, hash: &str) -> Result<Option<String>> {
        let mut view = self.db.view().await?;
        sqlx::query_scalar(include_str!("../queries/get_file_name.sql"))
            .bind(hash)
            .fetch_optional(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Full typed record for `hash`, attributes included.
    pub async fn record(&self, hash: &str) -> Result<Option<FileRecord>> {
        let mut view = self.db.view().await?;
        let Some(row) = get_file(&mut view, hash).await? else {
            return Ok(None);
        };
        let mut record = FileRecord::try_from(row)?;
        record.attributes = get_attributes(&mut view, hash).await?;
        Ok(Some(record))
    }

    /// Attribute view of `hash` for presentation.
    ///
    /// Contains `name`, `date` (RFC 3339) and `size` when known, overlaid by
    /// the stored attributes. The `owner` key is always `"public"`, whatever
    /// the real owners are, and is present even for unknown hashes; use
    /// [`check_owner`](Self::check_owner) or [`owners`](Self::owners) for
    /// authoritative ownership.
    pub async fn info(&self, hash: &str) -> Result<Attributes> {
        let mut info = Attributes::new();
        let mut view = self.db.view().await?;
        if let Some(row) = get_file(&mut view, hash).await? {
            let record = FileRecord::try_from(row)?;
            info.insert("name".to_string(), record.name);
            info.insert("date".to_string(), format(record.created_at)?);
            if let Some(size) = record.size {
                info.insert("size".to_string(), size.to_string());
            }
            info.extend(get_attributes(&mut view, hash).await?);
        }
        info.insert("owner".to_string(), PUBLIC_OWNER.to_string());
        Ok(info)
    }

    /// Every live hash with its display name. Meant for bulk maintenance
    /// scans, not paginated browsing.
    pub async fn list(&self) -> Result<BTreeMap<String, String>> {
        let mut view = self.db.view().await?;
        let rows: Vec<(String, String)> = sqlx::query_as(include_str!("../queries/list_files.sql"))
            .fetch_all(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().collect())
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    /// Whether `owner` currently holds `hash`.
    pub async fn check_owner(&self, owner: &str, hash: &str) -> Result<bool> {
        let mut view = self.db.view().await?;
        let exists: i64 = sqlx::query_scalar(include_str!("../queries/check_owner.sql"))
            .bind(hash)
            .bind(normalize_owner(owner))
            .fetch_one(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(exists != 0)
    }

    pub async fn owners(&self, hash: &str) -> Result<Vec<String>> {
        let mut view = self.db.view().await?;
        sqlx::query_scalar(include_str!("../queries/list_owners.sql"))
            .bind(hash)
            .fetch_all(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)
    }
}

async fn count_owners(conn: &mut SqliteConnection, hash: &str) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(include_str!("../queries/count_owners.sql"))
        .bind(hash)
        .fetch_one(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    u64::try_from(count).or_raise(|| ErrorKind::InvalidData("owner count"))
}

async fn get_file(conn: &mut SqliteConnection, hash: &str) -> Result<Option<FileRow>> {
    sqlx::query_as(include_str!("../queries/get_file.sql"))
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)
}

async fn get_attributes(conn: &mut SqliteConnection, hash: &str) -> Result<Attributes> {
    let rows: Vec<(String, String)> = sqlx::query_as(include_str!("../queries/get_attributes.sql"))
        .bind(hash)
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::testing::{attrs, fixture};

    const HASH: &str = "d41d8cd98f00b204e9800998ecf8427e";

    #[test]
    fn test_merge_later_maps_win() {
        let merged = merge(&[attrs(&[("type", "raw"), ("version", "1")]), attrs(&[("version", "2")])]);
        assert_eq!(merged, attrs(&[("type", "raw"), ("version", "2")]));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", HASH, "core.deb", &[]).await.unwrap();
        assert_eq!(files.read(HASH).await.unwrap().as_deref(), Some("core.deb"));
        assert!(files.check_owner("alice", HASH).await.unwrap());
        assert!(!files.check_owner("bob", HASH).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_unknown_hash() {
        let f = fixture().await;
        assert_eq!(f.catalog.files().read(HASH).await.unwrap(), None);
        assert_eq!(f.catalog.files().record(HASH).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_owner_is_public() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("", HASH, "core.deb", &[]).await.unwrap();
        assert!(files.check_owner(PUBLIC_OWNER, HASH).await.unwrap());
        assert_eq!(files.owners(HASH).await.unwrap(), vec![PUBLIC_OWNER.to_string()]);
    }

    #[tokio::test]
    async fn test_size_is_taken_from_blob() {
        let f = fixture().await;
        f.blobs.insert(HASH, 2048).await;
        f.catalog.files().write("alice", HASH, "core.deb", &[]).await.unwrap();
        let record = f.catalog.files().record(HASH).await.unwrap().unwrap();
        assert_eq!(record.size, Some(2048));
        assert_eq!(record.created_at, f.clock.now());
    }

    #[tokio::test]
    async fn test_missing_blob_only_omits_size() {
        let f = fixture().await;
        f.catalog.files().write("alice", HASH, "core.deb", &[]).await.unwrap();
        let record = f.catalog.files().record(HASH).await.unwrap().unwrap();
        assert_eq!(record.size, None);
        assert!(!f.catalog.files().info(HASH).await.unwrap().contains_key("size"));
    }

    #[tokio::test]
    async fn test_invalid_hash_only_omits_size() {
        // The blob store rejects the hash; the catalog still records it.
        let f = fixture().await;
        f.catalog.files().write("alice", "not/a/hash", "odd", &[]).await.unwrap();
        assert_eq!(f.catalog.files().read("not/a/hash").await.unwrap().as_deref(), Some("odd"));
    }

    #[tokio::test]
    async fn test_second_writer_only_adds_owner() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", HASH, "core.deb", &[attrs(&[("type", "apt"), ("Version", "1.0")])]).await.unwrap();
        files.write("bob", HASH, "renamed.deb", &[attrs(&[("tag", "stable")])]).await.unwrap();
        assert_eq!(files.list().await.unwrap().len(), 1);
        assert_eq!(files.read(HASH).await.unwrap().as_deref(), Some("core.deb"));
        assert_eq!(files.owners(HASH).await.unwrap(), vec!["alice".to_string(), "bob".to_string()]);
        let record = files.record(HASH).await.unwrap().unwrap();
        assert_eq!(record.attributes, attrs(&[("type", "apt"), ("Version", "1.0"), ("tag", "stable")]));
    }

    #[tokio::test]
    async fn test_rewrite_by_same_owner_is_idempotent_for_ownership() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", HASH, "core.deb", &[]).await.unwrap();
        files.write("alice", HASH, "core.deb", &[]).await.unwrap();
        assert_eq!(files.owners(HASH).await.unwrap().len(), 1);
        assert_eq!(files.delete("alice", HASH).await.unwrap(), 0);
        assert_eq!(files.read(HASH).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_info_has_synthetic_owner() {
        let f = fixture().await;
        let files = f.catalog.files();
        f.blobs.insert(HASH, 10).await;
        files.write("alice", HASH, "core.deb", &[attrs(&[("type", "raw")])]).await.unwrap();
        let info = files.info(HASH).await.unwrap();
        assert_eq!(info["owner"], "public");
        assert_eq!(info["name"], "core.deb");
        assert_eq!(info["size"], "10");
        assert_eq!(info["type"], "raw");
        assert_eq!(info["date"], "2023-11-14T22:13:20Z");
    }

    #[tokio::test]
    async fn test_info_owner_cannot_be_overridden() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", HASH, "core.deb", &[attrs(&[("owner", "alice")])]).await.unwrap();
        assert_eq!(files.info(HASH).await.unwrap()["owner"], "public");
    }

    #[tokio::test]
    async fn test_info_of_unknown_hash() {
        let f = fixture().await;
        let info = f.catalog.files().info(HASH).await.unwrap();
        assert_eq!(info, attrs(&[("owner", "public")]));
    }

    #[tokio::test]
    async fn test_reference_counted_delete() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", HASH, "core.deb", &[]).await.unwrap();
        files.write("bob", HASH, "core.deb", &[]).await.unwrap();
        assert_eq!(files.delete("alice", HASH).await.unwrap(), 1);
        assert!(!files.check_owner("alice", HASH).await.unwrap());
        assert!(files.check_owner("bob", HASH).await.unwrap());
        assert_eq!(files.read(HASH).await.unwrap().as_deref(), Some("core.deb"));
        assert_eq!(files.delete("bob", HASH).await.unwrap(), 0);
        assert_eq!(files.read(HASH).await.unwrap(), None);
        assert!(files.list().await.unwrap().is_empty());
        assert!(f.catalog.names().search("core").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_non_owner_keeps_record() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", HASH, "core.deb", &[]).await.unwrap();
        assert_eq!(files.delete("mallory", HASH).await.unwrap(), 1);
        assert!(files.check_owner("alice", HASH).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_unknown_pair() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", HASH, "core.deb", &[]).await.unwrap();
        assert_eq!(files.delete("nobody", "ffffffff").await.unwrap(), 0);
        assert_eq!(files.list().await.unwrap().len(), 1);
        assert_eq!(f.catalog.users().user_files("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_removes_attributes() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", HASH, "core.deb", &[attrs(&[("type", "raw")])]).await.unwrap();
        files.delete("alice", HASH).await.unwrap();
        // A fresh upload of the same content starts from a clean record.
        files.write("bob", HASH, "again.deb", &[]).await.unwrap();
        let record = files.record(HASH).await.unwrap().unwrap();
        assert_eq!(record.name, "again.deb");
        assert!(record.attributes.is_empty());
    }

    #[tokio::test]
    async fn test_release_removes_blob_only_when_purged() {
        let f = fixture().await;
        let files = f.catalog.files();
        f.blobs.insert(HASH, 10).await;
        files.write("alice", HASH, "core.deb", &[]).await.unwrap();
        files.write("bob", HASH, "core.deb", &[]).await.unwrap();
        assert_eq!(files.release("alice", HASH).await.unwrap(), 1);
        assert_eq!(f.blobs.len().await, 1);
        assert_eq!(files.release("bob", HASH).await.unwrap(), 0);
        assert_eq!(f.blobs.len().await, 0);
    }

    #[tokio::test]
    async fn test_release_of_unknown_hash_keeps_blob() {
        let f = fixture().await;
        f.blobs.insert(HASH, 10).await;
        assert_eq!(f.catalog.files().release("alice", HASH).await.unwrap(), 0);
        assert_eq!(f.blobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_list() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", "aaaa", "a.deb", &[]).await.unwrap();
        files.write("bob", "bbbb", "b.deb", &[]).await.unwrap();
        let list = files.list().await.unwrap();
        assert_eq!(list.into_iter().collect::<Vec<_>>(), vec![
            ("aaaa".to_string(), "a.deb".to_string()),
            ("bbbb".to_string(), "b.deb".to_string()),
        ]);
    }

    use gorjun_storage::BlobStore;

    /// Blob store whose `remove` waits until the test lets it continue.
    #[derive(Debug, Default)]
    struct GatedBlobStore {
        inner: gorjun_storage::backend::MockBlobStore,
        entered: tokio::sync::Notify,
        proceed: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl BlobStore for GatedBlobStore {
        async fn size(&self, hash: &str) -> gorjun_storage::error::Result<Option<u64>> {
            self.inner.size(hash).await
        }

        async fn remove(&self, hash: &str) -> gorjun_storage::error::Result<bool> {
            self.entered.notify_one();
            self.proceed.notified().await;
            self.inner.remove(hash).await
        }
    }

    #[tokio::test]
    async fn test_write_waits_for_release_to_remove_blob() {
        let db = Database::connect_in_memory().await.unwrap();
        let blobs = std::sync::Arc::new(GatedBlobStore::default());
        blobs.inner.insert(HASH, 10).await;
        let clock = crate::ManualClock::new(time::UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap());
        let files = FileCatalog::new(db, blobs.clone(), std::sync::Arc::new(clock));
        files.write("alice", HASH, "core.deb", &[]).await.unwrap();

        let release = tokio::spawn({
            let files = files.clone();
            async move { files.release("alice", HASH).await }
        });
        blobs.entered.notified().await;

        // The record is purged and the blob removal is pending. A new upload
        // of the same content must not slip in before the removal finishes.
        let rewrite = tokio::spawn({
            let files = files.clone();
            async move { files.write("bob", HASH, "again.deb", &[]).await }
        });
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert!(!rewrite.is_finished());

        blobs.proceed.notify_one();
        assert_eq!(release.await.unwrap().unwrap(), 0);
        rewrite.await.unwrap().unwrap();
        assert_eq!(blobs.inner.len().await, 0);
        assert_eq!(files.read(HASH).await.unwrap().as_deref(), Some("again.deb"));
        assert_eq!(files.owners(HASH).await.unwrap(), vec!["bob".to_string()]);
    }

    async fn drop_owner_table(f: &crate::testing::Fixture) {
        sqlx::query("DROP TABLE file_owners").execute(f.catalog.database().pool()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_rows() {
        let f = fixture().await;
        drop_owner_table(&f).await;
        let files = f.catalog.files();
        let err = files.write("alice", HASH, "core.deb", &[attrs(&[("type", "raw")])]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Database));
        assert_eq!(files.read(HASH).await.unwrap(), None);
        assert!(files.list().await.unwrap().is_empty());
        assert!(f.catalog.users().user_files("alice").await.unwrap().is_empty());
        assert!(f.catalog.names().search("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_record_intact() {
        let f = fixture().await;
        let files = f.catalog.files();
        files.write("alice", HASH, "core.deb", &[]).await.unwrap();
        drop_owner_table(&f).await;
        let err = files.delete("alice", HASH).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Database));
        assert_eq!(files.read(HASH).await.unwrap().as_deref(), Some("core.deb"));
        assert_eq!(f.catalog.users().user_files("alice").await.unwrap()[HASH], "core.deb");
        assert_eq!(f.catalog.names().last_hash("core.deb").await.unwrap().as_deref(), Some(HASH));
    }
}
