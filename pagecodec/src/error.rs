//! Error types for the page codec.

use thiserror::Error;

use crate::hook::IoMode;
use crate::PageNumber;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised by key handling, page encryption and rekeying.
///
/// A wrong key is indistinguishable from corrupt ciphertext at this layer:
/// pages carry no authentication tag, so decrypting with the wrong key
/// succeeds and yields garbage. Hosts detect that one level up (for example
/// through a header check on page 1).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The encoded key could not be decoded (bad base64 or hex).
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// The decoded key has the wrong length.
    #[error("bad key size: got {actual} bytes after decoding, expected {expected} bytes")]
    InvalidKeySize {
        /// Decoded length supplied by the caller.
        actual: usize,
        /// Required decoded length.
        expected: usize,
    },

    /// The underlying crypto primitive rejected the operation.
    #[error("cipher failure: {0}")]
    CipherFailure(String),

    /// The page size reported by the host is out of range.
    #[error("invalid page size {0}")]
    InvalidPageSize(usize),

    /// A page buffer does not match the notified page size.
    #[error("page length mismatch: expected {expected} bytes, got {actual}")]
    PageLengthMismatch {
        /// Page size the codec was notified of.
        expected: usize,
        /// Length of the buffer handed in.
        actual: usize,
    },

    /// An operation needed a key the codec does not hold.
    #[error("no {0} key present")]
    MissingKey(&'static str),

    /// The system random source failed.
    #[error("random source failure: {0}")]
    Randomness(String),

    /// The host engine failed while a rekey transaction was running.
    #[error("rekey transaction failed: {0}")]
    TransactionFailure(String),
}

/// Generic page I/O error surfaced to the host when a codec dispatch fails.
///
/// The host must abort the in-flight read or write; the page buffer is not
/// trustworthy once this is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("page codec error on page {page} ({mode}): {cause}")]
pub struct PageIoError {
    /// Page being transformed.
    pub page: PageNumber,
    /// Mode tag of the failed dispatch.
    pub mode: IoMode,
    /// Message recorded by the codec.
    pub cause: String,
}
