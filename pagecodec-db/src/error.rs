//! Error types for the page store.

use pagecodec::{CodecError, PageIoError, PageNumber};
use thiserror::Error;

/// Error returned by page store operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Filesystem failure on the database or journal file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Page 1 does not carry the store header after decoding. With an
    /// encrypted file this is also what a wrong key looks like.
    #[error("file is not a database")]
    NotADatabase,
    /// Key handling or rekey failure reported by the codec.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A page transform failed; the I/O was aborted.
    #[error(transparent)]
    PageIo(#[from] PageIoError),
    /// A write transaction is already open on this file.
    #[error("database is locked: a transaction is already active")]
    Busy,
    /// The operation needs an open write transaction.
    #[error("no transaction is active")]
    NoTransaction,
    /// Page 0, or a write that would leave a gap after the last page.
    #[error("page {0} is out of range")]
    PageOutOfRange(PageNumber),
    /// The page holding the lock byte range is never written.
    #[error("page {0} is reserved for locking")]
    LockingPage(PageNumber),
    /// A page buffer of the wrong size was supplied.
    #[error("page buffer has {actual} bytes, expected {expected}")]
    PageSize {
        /// Configured page size.
        expected: usize,
        /// Length of the supplied buffer.
        actual: usize,
    },
    /// No database is attached under this schema name.
    #[error("no such database: {0}")]
    UnknownDatabase(String),
    /// The schema name is already taken.
    #[error("database {0} is already in use")]
    DuplicateDatabase(String),
    /// The rollback journal could not be understood.
    #[error("corrupt journal: {0}")]
    CorruptJournal(String),
}

/// Result type for page store operations.
pub type DbResult<T> = Result<T, DbError>;
