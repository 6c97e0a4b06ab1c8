//! Transactional metadata and index store for the gorjun artifact repository.
//!
//! Blobs themselves live in a content-addressed [`BlobStore`](gorjun_storage::BlobStore);
//! this crate keeps everything *about* them in one SQLite database:
//!
//! - [`FileCatalog`]: one record per content hash with its display name,
//!   attributes and a reference-counted set of owners. The last owner's
//!   delete purges the record.
//! - [`NameIndex`]: every hash ever published under a display name, ordered
//!   by time, for prefix search and "latest version of X" lookups.
//! - [`UserDirectory`]: registered public keys and each owner's file list.
//! - [`SessionAuth`]: bearer tokens with a time-to-live and single-use auth
//!   exchange identifiers.
//!
//! All writes go through one process-wide write transaction at a time
//! ([`Database::update`]); reads run concurrently on snapshots
//! ([`Database::view`]). Every multi-table mutation is atomic.

pub mod auth;
mod catalog;
pub mod clock;
mod db;
pub mod error;
mod files;
mod models;
mod names;
mod users;

pub use crate::auth::SessionAuth;
pub use crate::catalog::Catalog;
pub use crate::clock::{Clock, ClockHandle, ManualClock, SystemClock};
pub use crate::db::{Database, Update, View};
pub use crate::files::{Attributes, FileCatalog, PUBLIC_OWNER};
pub use crate::models::{FileRecord, Publication};
pub use crate::names::NameIndex;
pub use crate::users::UserDirectory;
