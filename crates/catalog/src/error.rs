//! Catalog Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Storage-layer failures never leak their details into the catalog contract:
//! they are raised as [`ErrorKind::Database`] and the enclosing transaction is
//! rolled back. Unknown keys are not errors; lookups return `None` or empty
//! collections instead.

use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The store could not be reached or a transaction was aborted. No
    /// effect of the failed operation is visible; it is safe to retry.
    #[display("database error")]
    Database,
    /// The schema could not be created. Fatal at startup.
    #[display("database migration error")]
    Migration,
    /// A stored or supplied value could not be converted.
    #[display("invalid catalog data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// Registration is create-only.
    #[display("user already exists: {_0}")]
    UserExists(#[error(not(source))] String),
    /// The blob store could not be opened or a blob could not be removed.
    #[display("blob storage error")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Storage)
    }
}
