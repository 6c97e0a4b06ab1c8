//! Blob storage for the artifact catalog.
//!
//! Blobs are stored as individual files named by their content hash under a
//! single configured root. Hashing and placing bytes on disk is the job of the
//! upload front-ends; this crate only resolves, inspects and removes blobs on
//! behalf of the catalog.

pub mod backend;
pub mod error;
mod path;

pub use crate::backend::BlobStore;
pub use crate::path::{validate as validate_path, validate_hash};
use std::sync::Arc;

pub type BlobHandle = Arc<dyn BlobStore + Send + Sync>;
