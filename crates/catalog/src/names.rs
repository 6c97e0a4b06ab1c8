//! Name index: the time-ordered history of hashes published under each
//! display name.

use crate::db::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{Publication, PublicationRow};
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use tracing::instrument;

/// Append `hash` to the history of `name` and return the key it was stored
/// under.
///
/// Keys are strictly increasing within a name: if the clock has not moved
/// past the newest entry, the new entry goes one nanosecond after it.
pub(crate) async fn publish(conn: &mut SqliteConnection, name: &str, hash: &str, now: i64) -> Result<i64> {
    let newest: Option<i64> = sqlx::query_scalar(include_str!("../queries/last_published_at.sql"))
        .bind(name)
        .fetch_one(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    let published_at = match newest {
        Some(newest) if newest >= now => newest.checked_add(1).ok_or_raise(|| ErrorKind::InvalidData("timestamp"))?,
        _ => now,
    };
    sqlx::query(include_str!("../queries/insert_publication.sql"))
        .bind(name)
        .bind(published_at)
        .bind(hash)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(published_at)
}

/// Remove every entry for `hash`, under any name.
pub(crate) async fn unpublish(conn: &mut SqliteConnection, hash: &str) -> Result<u64> {
    let result = sqlx::query(include_str!("../queries/delete_publications.sql"))
        .bind(hash)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(result.rows_affected())
}

#[derive(Debug, Clone)]
pub struct NameIndex {
    db: Database,
}
impl From<&Database> for NameIndex {
    fn from(db: &Database) -> Self {
        Self { db: db.clone() }
    }
}

impl NameIndex {
    /// Every hash published under a name starting with `prefix`, mapped to
    /// that name.
    ///
    /// Names are scanned in byte order from the first key not less than
    /// `prefix`, stopping at the first key that no longer matches.
    #[instrument(skip(self))]
    pub async fn search(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let mut view = self.db.view().await?;
        let mut rows = sqlx::query_as::<_, (String, String)>(include_str!("../queries/search_names.sql"))
            .bind(prefix)
            .fetch(&mut *view);
        let mut found = BTreeMap::new();
        while let Some((name, hash)) = rows.try_next().await.or_raise(|| ErrorKind::Database)? {
            if !name.starts_with(prefix) {
                break;
            }
            found.insert(hash, name);
        }
        tracing::trace!(matches = found.len(), "Searched name index");
        Ok(found)
    }

    /// The most recently published hash for `name`.
    pub async fn last_hash(&self, name: &str) -> Result<Option<String>> {
        let mut view = self.db.view().await?;
        sqlx::query_scalar(include_str!("../queries/last_hash.sql"))
            .bind(name)
            .fetch_optional(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Like [`last_hash`](Self::last_hash), but only considers files whose
    /// `type` attribute is `kind`, so one repository's latest version never
    /// resolves to another repository's file of the same name.
    pub async fn last_hash_of_type(&self, name: &str, kind: &str) -> Result<Option<String>> {
        let mut view = self.db.view().await?;
        sqlx::query_scalar(include_str!("../queries/last_hash_of_type.sql"))
            .bind(name)
            .bind(kind)
            .fetch_optional(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Full history of `name`, oldest first.
    pub async fn history(&self, name: &str) -> Result<Vec<Publication>> {
        let mut view = self.db.view().await?;
        let rows: Vec<PublicationRow> = sqlx::query_as(include_str!("../queries/get_history.sql"))
            .bind(name)
            .fetch_all(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Publication::try_from).collect()
    }
}
