mod file;
mod publication;
mod token;

pub use self::file::FileRecord;
pub(crate) use self::file::FileRow;
pub use self::publication::Publication;
pub(crate) use self::publication::PublicationRow;
pub(crate) use self::token::TokenRow;
