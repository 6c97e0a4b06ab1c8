use crate::auth::SessionAuth;
use crate::clock::{ClockHandle, SystemClock};
use crate::db::Database;
use crate::error::{ErrorKind, Result};
use crate::files::FileCatalog;
use crate::names::NameIndex;
use crate::users::UserDirectory;
use exn::ResultExt;
use gorjun_config::Config;
use gorjun_storage::BlobHandle;
use gorjun_storage::backend::LocalBlobStore;
use std::sync::Arc;
use time::Duration;
use tracing::instrument;

/// Handle to the whole metadata store.
///
/// Built once at startup and cloned into every request handler; clones share
/// the same database pool, write lock, blob store and clock.
#[derive(Debug, Clone)]
pub struct Catalog {
    db: Database,
    files: FileCatalog,
    names: NameIndex,
    users: UserDirectory,
    auth: SessionAuth,
}

impl Catalog {
    pub fn new(db: Database, blobs: BlobHandle, clock: ClockHandle, token_ttl: Duration) -> Self {
        Self {
            files: FileCatalog::new(db.clone(), blobs, Arc::clone(&clock)),
            names: NameIndex::from(&db),
            users: UserDirectory::from(&db),
            auth: SessionAuth::new(db.clone(), clock, token_ttl),
            db,
        }
    }

    /// Open the database and blob store described by `config`, using the
    /// system clock. The configuration is validated first.
    #[instrument(skip_all)]
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::InvalidData("config"))?;
        let db = Database::connect_with(&config.database.path, config.database.max_connections).await?;
        let blobs: BlobHandle = Arc::new(LocalBlobStore::new(&config.storage.path).or_raise(|| ErrorKind::Storage)?);
        let token_ttl = Duration::try_from(config.auth.token_ttl()).or_raise(|| ErrorKind::InvalidData("token ttl"))?;
        tracing::info!(storage = %config.storage.path.display(), ?token_ttl, "Opened catalog");
        Ok(Self::new(db, blobs, Arc::new(SystemClock), token_ttl))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn files(&self) -> &FileCatalog {
        &self.files
    }

    pub fn names(&self) -> &NameIndex {
        &self.names
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn auth(&self) -> &SessionAuth {
        &self.auth
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
