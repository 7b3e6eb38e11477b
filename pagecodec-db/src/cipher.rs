//! Keyed open sequence.
//!
//! # Encryption flow
//!
//! Encryption is transparent to page users: once a file is keyed, every
//! page read from disk is decrypted and every page written is encrypted by
//! the codec installed on its pager. Opening an encrypted database is:
//!
//! 1. **Open** -- [`Database::open`] opens the file and plays back any hot
//!    journal. Nothing is decoded yet.
//!
//! 2. **Key** -- [`Database::key`] installs a codec whose read and write keys
//!    are both the supplied key.
//!
//! 3. **Verify** -- page 1 is read and its header checked. With a wrong key
//!    the page decrypts to noise and the check fails with
//!    [`DbError::NotADatabase`]; pages carry no authentication tag, so this
//!    is the only way a bad key is noticed.

use std::path::Path;

use log::warn;
use pagecodec::KeyMaterial;
use secrecy::{ExposeSecret, SecretString};

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::options::OpenOptions;

/// Opens a database, applies the base64 key, and verifies it.
///
/// See the [module-level documentation](self) for the full flow.
///
/// # Errors
///
/// Open and key decoding errors, or [`DbError::NotADatabase`] when the key
/// does not match the file.
pub fn open_encrypted(path: &Path, key: &SecretString, options: &OpenOptions) -> DbResult<Database> {
    let mut db = Database::open(path, options)?;
    apply_key(&mut db, key)?;
    Ok(db)
}

fn apply_key(db: &mut Database, key: &SecretString) -> DbResult<()> {
    db.key(key.expose_secret())?;
    db.verify().inspect_err(|err| {
        if matches!(err, DbError::NotADatabase) {
            warn!("encryption key verification failed (is the key correct?)");
        }
    })
}

/// Generates a fresh random key in the text form [`open_encrypted`] and
/// [`Database::rekey`] accept.
///
/// # Errors
///
/// [`pagecodec::CodecError::Randomness`] if the OS RNG fails.
pub fn generate_key() -> DbResult<SecretString> {
    Ok(KeyMaterial::generate()?.to_base64())
}
