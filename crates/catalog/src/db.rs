//! Database connection, pool management and transactions.
//!
//! All tables live in one SQLite file. Write transactions are serialized by a
//! process-wide lock so that at most one is in flight; read transactions run
//! on WAL snapshots concurrently with each other and with the writer.

use exn::ResultExt;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Held for the lifetime of a write transaction, and beyond it when a caller
/// needs to finish work before the next writer starts.
pub(crate) type WriteGuard = OwnedMutexGuard<()>;

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
const MAX_CONNECTIONS: u32 = 5;

/// Handle to the metadata store.
///
/// Cheap to clone; clones share the pool and the write lock. Construct one at
/// startup and hand it to every component that needs the catalog.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Query-based PRAGMAs must be applied to EVERY pooled connection,
            // not only the first one.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool, writer: Arc::new(Mutex::new(())) };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the catalog database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    /// Failure here is fatal: the service cannot run without its catalog.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with(path, MAX_CONNECTIONS).await
    }

    pub async fn connect_with(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database)?;
        }
        let options = Self::base_options().filename(path).create_if_missing(true);
        let db = Self::new(options, Some(max_connections)).await?;
        tracing::info!(path = %path.display(), "Opened catalog database");
        Ok(db)
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every connection to ":memory:" is a separate database, so the pool
        // is limited to one connection.
        Self::new(options, Some(1)).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // WAL lets readers see a consistent snapshot while a writer is active.
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // Writers are already serialized by `writer`; this only covers
            // checkpoints and other processes touching the file.
            .busy_timeout(std::time::Duration::from_millis(1500))
            .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::None)
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA locking_mode = NORMAL;
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -8192;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    #[instrument("performing database migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin an exclusive write transaction.
    ///
    /// Waits for any other write transaction to finish. Effects become
    /// visible and durable only on [`Update::commit`]; dropping the
    /// transaction (including via an early `?` return) rolls everything back.
    pub async fn update(&self) -> Result<Update> {
        let lock = Arc::clone(&self.writer).lock_owned().await;
        let tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Ok(Update { tx, _lock: lock })
    }

    /// Begin a read-only transaction over a consistent snapshot.
    pub async fn view(&self) -> Result<View> {
        let tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Ok(View { tx })
    }

    /// Close the database connection pool.
    ///
    /// Waits for all connections to be returned to the pool and then closes
    /// them. The handle (and all its clones) must not be used afterwards.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
        tracing::info!("Closed catalog database");
    }
}

/// Exclusive write transaction; holds the process-wide write lock.
pub struct Update {
    tx: Transaction<'static, Sqlite>,
    _lock: WriteGuard,
}
impl Update {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Commit, but keep other writers out until the returned guard is dropped.
    pub(crate) async fn commit_holding(self) -> Result<WriteGuard> {
        let Update { tx, _lock: lock } = self;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(lock)
    }
}
impl Deref for Update {
    type Target = SqliteConnection;
    fn deref(&self) -> &SqliteConnection {
        &self.tx
    }
}
impl DerefMut for Update {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }
}

/// Read-only transaction. Never commits; its snapshot is released on drop.
pub struct View {
    tx: Transaction<'static, Sqlite>,
}
impl Deref for View {
    type Target = SqliteConnection;
    fn deref(&self) -> &SqliteConnection {
        &self.tx
    }
}
impl DerefMut for View {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }
}
