//! Session authentication: bearer tokens with a time-to-live and one-time
//! exchange identifiers.
//!
//! Raw bearer tokens never reach the database; records are keyed by the
//! BLAKE3 digest of the token, both when saving and when checking.

use crate::clock::{ClockHandle, from_nanos, to_nanos, within_ttl};
use crate::db::Database;
use crate::error::{ErrorKind, Result};
use crate::models::TokenRow;
use exn::ResultExt;
use time::Duration;
use tracing::instrument;

/// How long a bearer token stays valid after it was saved.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::minutes(60);

fn digest(raw: &str) -> String {
    blake3::hash(raw.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone)]
pub struct SessionAuth {
    db: Database,
    clock: ClockHandle,
    ttl: Duration,
}

impl SessionAuth {
    pub fn new(db: Database, clock: ClockHandle, ttl: Duration) -> Self {
        Self { db, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // =========================================================================
    // Bearer tokens
    // =========================================================================

    /// Bind `raw` to `name`, valid from now for the configured TTL. Saving
    /// the same token again rebinds it and restarts its lifetime.
    #[instrument(skip(self, raw))]
    pub async fn save_token(&self, name: &str, raw: &str) -> Result<()> {
        let issued_at = to_nanos(self.clock.now())?;
        let mut tx = self.db.update().await?;
        sqlx::query(include_str!("../queries/upsert_token.sql"))
            .bind(digest(raw))
            .bind(name)
            .bind(issued_at)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await?;
        tracing::debug!(name, "Saved bearer token");
        Ok(())
    }

    /// Generate a fresh random token for `name`, save it and return it.
    ///
    /// The raw value is only ever available from this return value.
    pub async fn issue_token(&self, name: &str) -> Result<String> {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        self.save_token(name, &raw).await?;
        Ok(raw)
    }

    /// User bound to `raw`, if the token is known and has not expired.
    ///
    /// Expired records are left in place; see
    /// [`purge_expired_tokens`](Self::purge_expired_tokens).
    #[instrument(skip_all)]
    pub async fn check_token(&self, raw: &str) -> Result<Option<String>> {
        let row: Option<TokenRow> = {
            let mut view = self.db.view().await?;
            sqlx::query_as(include_str!("../queries/get_token.sql"))
                .bind(digest(raw))
                .fetch_optional(&mut *view)
                .await
                .or_raise(|| ErrorKind::Database)?
        };
        let Some(row) = row else {
            tracing::trace!("Unknown bearer token");
            return Ok(None);
        };
        let issued = from_nanos(row.issued_at)?;
        if !within_ttl(issued, self.ttl, self.clock.now()) {
            tracing::debug!(name = %row.name, "Bearer token expired");
            return Ok(None);
        }
        Ok(Some(row.name))
    }

    /// Delete every token whose lifetime has elapsed and return how many were
    /// removed.
    #[instrument(skip(self))]
    pub async fn purge_expired_tokens(&self) -> Result<u64> {
        let cutoff = to_nanos(self.clock.now() - self.ttl)?;
        let mut tx = self.db.update().await?;
        let purged = sqlx::query(include_str!("../queries/purge_expired_tokens.sql"))
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        tx.commit().await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired bearer tokens");
        }
        Ok(purged)
    }

    // =========================================================================
    // One-time exchange
    // =========================================================================

    /// Bind the exchange identifier `id` to `name`, replacing any earlier
    /// binding.
    #[instrument(skip(self, id))]
    pub async fn save_auth_id(&self, name: &str, id: &str) -> Result<()> {
        let mut tx = self.db.update().await?;
        sqlx::query(include_str!("../queries/upsert_auth_id.sql"))
            .bind(id)
            .bind(name)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await
    }

    /// Consume the exchange identifier `id` and return the user it was bound
    /// to. A second call with the same identifier returns `None`.
    #[instrument(skip_all)]
    pub async fn check_auth_id(&self, id: &str) -> Result<Option<String>> {
        let mut tx = self.db.update().await?;
        let name: Option<String> = sqlx::query_scalar(include_str!("../queries/take_auth_id.sql"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await?;
        if let Some(name) = &name {
            tracing::debug!(name = %name, "Consumed auth exchange id");
        }
        Ok(name)
    }
}
