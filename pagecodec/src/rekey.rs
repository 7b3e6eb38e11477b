//! Whole-database key change as one exclusive transaction.
//!
//! The orchestrator holds no cryptography. It changes the write side of the
//! codec, then reads and dirties every page inside one transaction; the host
//! pager's normal I/O path does the actual decrypt (read key) and encrypt
//! (write key) through the [`PagerHookAdapter`]. Commit promotes the write
//! key, any failure rolls back and restores the previous key state, so the
//! outcome is all or nothing.
//!
//! The exclusive lock is held for the whole sweep. Readers and writers are
//! blocked for a time proportional to the database size, and there is no
//! incremental mode.

use std::fmt::Display;

use log::{info, warn};

use crate::codec::Codec;
use crate::error::{CodecError, CodecResult};
use crate::hook::PagerHookAdapter;
use crate::{ConnectionId, PageNumber};

/// Host engine primitives the rekey sweep drives.
pub trait RekeyHost {
    /// Host error type; only its message is kept.
    type Error: Display;

    /// Connection the database belongs to.
    fn owner(&self) -> ConnectionId;

    /// Codec slot of the database being rekeyed.
    fn hooks(&mut self) -> &mut PagerHookAdapter;

    /// Begins an exclusive write transaction.
    ///
    /// # Errors
    ///
    /// Lock contention, I/O errors, or an unreadable first page.
    fn begin_exclusive(&mut self) -> Result<(), Self::Error>;

    /// Number of pages currently in the database.
    ///
    /// # Errors
    ///
    /// Host I/O errors.
    fn page_count(&mut self) -> Result<PageNumber, Self::Error>;

    /// Page reserved for the host's locking protocol; never rewritten.
    fn locking_page(&self) -> PageNumber;

    /// Loads `page` and marks it dirty so the commit rewrites it.
    ///
    /// # Errors
    ///
    /// Host I/O errors, including codec failures on the read path.
    fn touch_page(&mut self, page: PageNumber) -> Result<(), Self::Error>;

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Host I/O errors, including codec failures on the write path.
    fn commit(&mut self) -> Result<(), Self::Error>;

    /// Aborts the transaction, restoring the pre-transaction state.
    ///
    /// # Errors
    ///
    /// Host I/O errors.
    fn rollback(&mut self) -> Result<(), Self::Error>;
}

/// What a rekey request does, decided by the key argument and whether the
/// database currently has a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyKind {
    /// No key and no codec: nothing to do.
    Unchanged,
    /// New key, no codec: encrypt a plaintext database.
    Encrypt,
    /// New key and a codec: re-encrypt under the new key.
    Reencrypt,
    /// No key but a codec: decrypt to plaintext.
    Decrypt,
}

impl RekeyKind {
    /// Classifies a request.
    #[must_use]
    pub const fn classify(has_codec: bool, has_new_key: bool) -> Self {
        match (has_codec, has_new_key) {
            (false, false) => Self::Unchanged,
            (false, true) => Self::Encrypt,
            (true, true) => Self::Reencrypt,
            (true, false) => Self::Decrypt,
        }
    }
}

/// Drives one rekey over a [`RekeyHost`].
pub struct RekeyOrchestrator<'h, H: RekeyHost> {
    host: &'h mut H,
    in_transaction: bool,
}

impl<'h, H: RekeyHost> RekeyOrchestrator<'h, H> {
    /// Wraps `host` for one rekey.
    pub fn new(host: &'h mut H) -> Self {
        Self {
            host,
            in_transaction: false,
        }
    }

    /// Changes the database key to `new_key` (base64), or decrypts the
    /// database when `new_key` is `None` or empty.
    ///
    /// A malformed key fails before any transaction starts. A failure during
    /// the sweep or the commit rolls the transaction back and restores the
    /// previous key state before the error is returned.
    ///
    /// # Errors
    ///
    /// Key decoding errors, or [`CodecError::TransactionFailure`].
    pub fn rekey(mut self, new_key: Option<&str>) -> CodecResult<RekeyKind> {
        let new_key = new_key.filter(|key| !key.is_empty());
        let has_codec = self.host.hooks().is_encrypted();
        let kind = RekeyKind::classify(has_codec, new_key.is_some());
        let owner = self.host.owner();

        match (has_codec, new_key) {
            (false, None) => return Ok(kind),
            (false, Some(key)) => {
                let mut codec = Codec::new(owner);
                codec.set_write_key(key)?;
                self.host.hooks().install(codec)?;
            }
            (true, Some(key)) => {
                if let Some(codec) = self.host.hooks().codec_mut() {
                    // The error is returned directly; keep it out of the slot
                    // so the next page dispatch does not trip over it.
                    codec.set_write_key(key).inspect_err(|_| codec.reset_error())?;
                }
            }
            (true, None) => {
                if let Some(codec) = self.host.hooks().codec_mut() {
                    codec.drop_write_key();
                }
            }
        }

        info!("connection {owner}: rekey started ({kind:?})");
        match self.sweep() {
            Ok(pages) => {
                self.promote();
                info!("connection {owner}: rekey committed, {pages} pages rewritten");
                Ok(kind)
            }
            Err(err) => {
                warn!("connection {owner}: rekey failed: {err}");
                self.abandon();
                Err(err)
            }
        }
    }

    fn sweep(&mut self) -> CodecResult<usize> {
        self.host.begin_exclusive().map_err(|err| {
            CodecError::TransactionFailure(format!(
                "error beginning rekey transaction (is the current key correct?): {err}"
            ))
        })?;
        self.in_transaction = true;
        let count = self.host.page_count().map_err(|err| {
            CodecError::TransactionFailure(format!("could not read page count: {err}"))
        })?;
        let skip = self.host.locking_page();

        let mut rewritten = 0;
        for page in (1..=count).filter(|&page| page != skip) {
            self.host.touch_page(page).map_err(|err| {
                CodecError::TransactionFailure(format!(
                    "error while rekeying page {page}; transaction cancelled: {err}"
                ))
            })?;
            rewritten += 1;
        }

        self.host.commit().map_err(|err| {
            CodecError::TransactionFailure(format!("could not commit rekey transaction: {err}"))
        })?;
        self.in_transaction = false;
        Ok(rewritten)
    }

    fn promote(&mut self) {
        let hooks = self.host.hooks();
        let Some(codec) = hooks.codec_mut() else {
            return;
        };
        if codec.has_write_key() {
            codec.set_read_is_write();
        } else {
            // No write key left: the database is plaintext now.
            hooks.detach();
        }
    }

    fn abandon(&mut self) {
        // A transaction the sweep did not begin belongs to the caller.
        if self.in_transaction {
            self.in_transaction = false;
            if let Err(err) = self.host.rollback() {
                warn!("connection {}: rekey rollback failed: {err}", self.host.owner());
            }
        }
        let hooks = self.host.hooks();
        let Some(codec) = hooks.codec_mut() else {
            return;
        };
        if codec.has_read_key() {
            codec.set_write_is_read();
            codec.reset_error();
        } else {
            // The database was plaintext to begin with.
            hooks.detach();
        }
    }
}
