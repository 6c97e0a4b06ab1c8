use crate::clock::from_nanos;
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use std::collections::BTreeMap;
use time::UtcDateTime;

/// A stored file, keyed by content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub hash: String,
    /// Display name given by the first writer.
    pub name: String,
    /// `None` when the blob could not be inspected at creation time.
    pub size: Option<u64>,
    pub created_at: UtcDateTime,
    pub attributes: BTreeMap<String, String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub(crate) hash: String,
    pub(crate) name: String,
    #[sqlx(default)]
    pub(crate) size: Option<i64>,
    pub(crate) created_at: i64,
}
impl TryFrom<FileRow> for FileRecord {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            hash: row.hash,
            name: row.name,
            size: row
                .size
                .map(|size| u64::try_from(size).or_raise(|| ErrorKind::InvalidData("file size")))
                .transpose()?,
            created_at: from_nanos(row.created_at)?,
            attributes: BTreeMap::new(),
        })
    }
}
