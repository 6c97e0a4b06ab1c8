use crate::clock::from_nanos;
use crate::error::Error;
use time::UtcDateTime;

/// One entry of a name's publication history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub published_at: UtcDateTime,
    pub hash: String,
}

#[derive(sqlx::FromRow)]
pub(crate) struct PublicationRow {
    pub(crate) published_at: i64,
    pub(crate) hash: String,
}
impl TryFrom<PublicationRow> for Publication {
    type Error = Error;
    fn try_from(row: PublicationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            published_at: from_nanos(row.published_at)?,
            hash: row.hash,
        })
    }
}
