//! Path validation for blob locations.
//!
//! Blob keys arrive from request handlers, so a key must never be able to
//! name a file outside the storage root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Normalizes a relative storage path and ensures it never escapes the root.
///
/// > **Note:** Null bytes are rejected explicitly; they pass through
/// >           `Path::components()` on Unix but truncate in syscalls.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use gorjun_storage::validate_path;
/// assert!(validate_path("apt/Packages").is_ok());
/// assert!(validate_path("a/../Packages").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(validate_path("./x//y/").unwrap(), Path::new("x/y"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let invalid = || ErrorKind::InvalidPath(path.as_ref().to_path_buf());
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) if s.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
            Component::Normal(s) => components.push(s),
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.into_iter().collect()),
    }
}

/// Validates a content hash for use as a blob filename.
///
/// Blobs live directly under the storage root, so the hash must normalize to
/// exactly one path component and must not be rewritten by normalization.
///
/// ```
/// use gorjun_storage::validate_hash;
/// assert!(validate_hash("9b2f6a1c").is_ok());
/// assert!(validate_hash("nested/9b2f6a1c").is_err());
/// assert!(validate_hash("..").is_err());
/// ```
pub fn validate_hash(hash: &str) -> Result<PathBuf> {
    let normalized = validate(hash)?;
    if normalized.components().count() != 1 || normalized.as_os_str() != hash {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(hash)));
    }
    Ok(normalized)
}
