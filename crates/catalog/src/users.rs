//! User directory: registered public keys and each owner's own file list.

use crate::db::Database;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use tracing::instrument;

/// Make sure `name` has a user row. Owners appear implicitly on first upload.
pub(crate) async fn ensure(conn: &mut SqliteConnection, name: &str) -> Result<()> {
    sqlx::query(include_str!("../queries/ensure_user.sql"))
        .bind(name)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

/// Record the display name `owner` used for `hash`. A later upload of the
/// same hash by the same owner replaces the name.
pub(crate) async fn add_file(conn: &mut SqliteConnection, owner: &str, hash: &str, name: &str, now: i64) -> Result<()> {
    sqlx::query(include_str!("../queries/upsert_user_file.sql"))
        .bind(owner)
        .bind(hash)
        .bind(name)
        .bind(now)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

pub(crate) async fn remove_file(conn: &mut SqliteConnection, owner: &str, hash: &str) -> Result<bool> {
    let result = sqlx::query(include_str!("../queries/remove_user_file.sql"))
        .bind(owner)
        .bind(hash)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone)]
pub struct UserDirectory {
    db: Database,
}
impl From<&Database> for UserDirectory {
    fn from(db: &Database) -> Self {
        Self { db: db.clone() }
    }
}

impl UserDirectory {
    /// Register `name` with its public key.
    ///
    /// Registration is create-only: any existing user row, including one
    /// created implicitly by an upload, is rejected with
    /// [`ErrorKind::UserExists`] and left untouched.
    #[instrument(skip(self, key))]
    pub async fn register_user(&self, name: &str, key: &[u8]) -> Result<()> {
        let mut tx = self.db.update().await?;
        let registered = sqlx::query(include_str!("../queries/register_user.sql"))
            .bind(name)
            .bind(key)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        if registered == 0 {
            tracing::warn!(name, "Refusing to overwrite existing user");
            exn::bail!(ErrorKind::UserExists(name.to_string()));
        }
        tx.commit().await?;
        tracing::info!(name, "Registered user");
        Ok(())
    }

    /// Public key registered for `name`.
    pub async fn user_key(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut view = self.db.view().await?;
        let key: Option<Option<Vec<u8>>> = sqlx::query_scalar(include_str!("../queries/get_user_key.sql"))
            .bind(name)
            .fetch_optional(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(key.flatten())
    }

    /// Every hash `owner` holds, mapped to the name they uploaded it under.
    pub async fn user_files(&self, owner: &str) -> Result<BTreeMap<String, String>> {
        let mut view = self.db.view().await?;
        let rows: Vec<(String, String)> = sqlx::query_as(include_str!("../queries/list_user_files.sql"))
            .bind(crate::files::normalize_owner(owner))
            .fetch_all(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().collect())
    }

    /// Hashes `owner` uploaded under `name`, most recent first.
    pub async fn user_file(&self, owner: &str, name: &str) -> Result<Vec<String>> {
        let mut view = self.db.view().await?;
        sqlx::query_scalar(include_str!("../queries/find_user_file.sql"))
            .bind(crate::files::normalize_owner(owner))
            .bind(name)
            .fetch_all(&mut *view)
            .await
            .or_raise(|| ErrorKind::Database)
    }
}
