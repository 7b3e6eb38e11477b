//! Journaled single-file page store with transparent page encryption.
//!
//! This crate is a small pager in the shape the `pagecodec` hooks expect:
//! fixed-size pages, a page cache holding plaintext, and a rollback journal
//! next to the database file. It exists to drive the codec end to end:
//!
//! * open with a key, and detect a wrong key as a non-database,
//! * rekey, first-time encrypt and decrypt a whole file atomically,
//! * attach further files that inherit or override the main key.
//!
//! Consumer code uses [`Database`] (or [`cipher::open_encrypted`]) and
//! [`Transaction`]; pages are plain byte buffers of the configured size.

mod database;
pub mod error;
mod journal;
mod options;
mod pager;
mod transaction;

pub mod cipher;

pub use database::{Database, MAIN_SCHEMA};
pub use error::{DbError, DbResult};
pub use options::OpenOptions;
pub use pager::{locking_page, Pager, HEADER_MAGIC, HEADER_SIZE};
pub use transaction::Transaction;

pub use pagecodec::{AttachKey, RekeyKind};
