//! Per-connection codec: read/write key state and the page transform hot path.
//!
//! # Key state
//!
//! The read key decrypts what is durable on disk; the write key encrypts
//! what is about to become durable. They only differ while a rekey is in
//! flight, and the state machine below keeps every other combination
//! unrepresentable:
//!
//! ```text
//!             set_write_key                  set_read_is_write
//!   Unkeyed ──────────────► Encrypting{w} ─────────────────────► Keyed(w)
//!   Keyed(r) ─────────────► Rekeying{r,w} ─────────────────────► Keyed(w)
//!   Keyed(r) ─drop_write_key► Decrypting{r} ────────────────────► Unkeyed
//!
//!   set_write_is_read: Encrypting → Unkeyed, Rekeying{r,_} / Decrypting{r} → Keyed(r)
//! ```
//!
//! # Errors
//!
//! Every entry point returns a [`CodecResult`]. Failures are also recorded in
//! an error slot ([`last_error`](Codec::last_error)) for hosts that poll.

use log::{debug, warn};
use zeroize::Zeroize;

use crate::cipher::PageCipher;
use crate::error::{CodecError, CodecResult};
use crate::key::KeyMaterial;
use crate::{ConnectionId, PageNumber, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// Key state of a codec.
#[derive(Clone, Default)]
enum KeyState {
    /// No key on either side.
    #[default]
    Unkeyed,
    /// Steady state: read key and write key are the same.
    Keyed(KeyMaterial),
    /// First-time encryption in flight: plaintext on disk, write key pending.
    Encrypting { write: KeyMaterial },
    /// Key change in flight.
    Rekeying { read: KeyMaterial, write: KeyMaterial },
    /// Decryption in flight: encrypted on disk, pages written as plaintext.
    Decrypting { read: KeyMaterial },
}

impl KeyState {
    const fn read(&self) -> Option<&KeyMaterial> {
        match self {
            Self::Keyed(key) | Self::Rekeying { read: key, .. } | Self::Decrypting { read: key } => {
                Some(key)
            }
            Self::Unkeyed | Self::Encrypting { .. } => None,
        }
    }

    const fn write(&self) -> Option<&KeyMaterial> {
        match self {
            Self::Keyed(key) | Self::Rekeying { write: key, .. } | Self::Encrypting { write: key } => {
                Some(key)
            }
            Self::Unkeyed | Self::Decrypting { .. } => None,
        }
    }

    const fn phase(&self) -> KeyPhase {
        match self {
            Self::Unkeyed => KeyPhase::Unkeyed,
            Self::Keyed(_) => KeyPhase::Keyed,
            Self::Encrypting { .. } | Self::Rekeying { .. } | Self::Decrypting { .. } => {
                KeyPhase::Rekeying
            }
        }
    }

    fn with_write(self, write: KeyMaterial) -> Self {
        match self {
            Self::Unkeyed | Self::Encrypting { .. } => Self::Encrypting { write },
            Self::Keyed(read) | Self::Rekeying { read, .. } | Self::Decrypting { read } => {
                Self::Rekeying { read, write }
            }
        }
    }

    fn without_write(self) -> Self {
        match self {
            Self::Unkeyed | Self::Encrypting { .. } => Self::Unkeyed,
            Self::Keyed(read) | Self::Rekeying { read, .. } | Self::Decrypting { read } => {
                Self::Decrypting { read }
            }
        }
    }

    fn commit(self) -> Self {
        match self {
            Self::Unkeyed | Self::Decrypting { .. } => Self::Unkeyed,
            Self::Keyed(key) | Self::Encrypting { write: key } | Self::Rekeying { write: key, .. } => {
                Self::Keyed(key)
            }
        }
    }

    fn revert(self) -> Self {
        match self {
            Self::Unkeyed | Self::Encrypting { .. } => Self::Unkeyed,
            Self::Keyed(key) | Self::Rekeying { read: key, .. } | Self::Decrypting { read: key } => {
                Self::Keyed(key)
            }
        }
    }
}

/// Coarse view of a codec's key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    /// No key at all.
    Unkeyed,
    /// Read and write keys identical.
    Keyed,
    /// Read and write keys differ (encrypt, re-encrypt or decrypt in flight).
    Rekeying,
}

/// Encryption codec owned by exactly one connection.
///
/// Not reentrant: the scratch page is reused across [`encrypt`](Self::encrypt)
/// calls, so callers serialize access (the pager's single-threaded access
/// pattern already does).
pub struct Codec {
    keys: KeyState,
    page_size: Option<usize>,
    scratch: Box<[u8]>,
    last_error: Option<String>,
    owner: ConnectionId,
}

impl Codec {
    /// Creates an unkeyed codec for the connection `owner`.
    #[must_use]
    pub fn new(owner: ConnectionId) -> Self {
        Self {
            keys: KeyState::Unkeyed,
            page_size: None,
            scratch: vec![0u8; MAX_PAGE_SIZE].into_boxed_slice(),
            last_error: None,
            owner,
        }
    }

    /// Creates a codec whose read and write keys are both `encoded_key`.
    ///
    /// This is the open-with-key path: the database is expected to already be
    /// encrypted under that key (or to be empty).
    ///
    /// # Errors
    ///
    /// Key decoding errors from [`set_write_key`](Self::set_write_key).
    pub fn with_key(owner: ConnectionId, encoded_key: &str) -> CodecResult<Self> {
        let mut codec = Self::new(owner);
        codec.set_write_key(encoded_key)?;
        codec.set_read_is_write();
        Ok(codec)
    }

    /// Copies this codec's key state into a new codec for `owner`.
    ///
    /// The clone shares nothing with `self`: later key changes on either side
    /// are invisible to the other. The page size is not copied; the pager the
    /// clone is installed on reports its own.
    #[must_use]
    pub fn clone_for(&self, owner: ConnectionId) -> Self {
        let mut codec = Self::new(owner);
        codec.keys = self.keys.clone();
        codec
    }

    /// Connection this codec belongs to.
    #[must_use]
    pub const fn owner(&self) -> ConnectionId {
        self.owner
    }

    /// Replaces the write key with a base64-encoded key.
    ///
    /// On failure the write key is left untouched.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidKeyEncoding`] or [`CodecError::InvalidKeySize`].
    pub fn set_write_key(&mut self, encoded_key: &str) -> CodecResult<()> {
        let key = KeyMaterial::from_base64(encoded_key);
        self.install_write_key(key)
    }

    /// Replaces the write key with a hex-encoded key.
    ///
    /// # Errors
    ///
    /// Same as [`set_write_key`](Self::set_write_key).
    pub fn set_write_key_hex(&mut self, encoded_key: &str) -> CodecResult<()> {
        let key = KeyMaterial::from_hex(encoded_key);
        self.install_write_key(key)
    }

    /// Replaces the write key with already decoded key material.
    pub fn set_write_key_material(&mut self, key: KeyMaterial) {
        self.transition(|keys| keys.with_write(key), "set write key");
    }

    fn install_write_key(&mut self, key: CodecResult<KeyMaterial>) -> CodecResult<()> {
        let key = self.record(key)?;
        self.set_write_key_material(key);
        Ok(())
    }

    /// Drops the write key; pages are written as plaintext afterwards.
    /// The read key is unaffected.
    pub fn drop_write_key(&mut self) {
        self.transition(KeyState::without_write, "drop write key");
    }

    /// Makes the write key the read key as well (rekey committed).
    pub fn set_read_is_write(&mut self) {
        self.transition(KeyState::commit, "read is write");
    }

    /// Makes the read key the write key as well (rekey abandoned).
    pub fn set_write_is_read(&mut self) {
        self.transition(KeyState::revert, "write is read");
    }

    fn transition(&mut self, step: impl FnOnce(KeyState) -> KeyState, label: &str) {
        let before = self.keys.phase();
        self.keys = step(std::mem::take(&mut self.keys));
        debug!(
            "codec {}: {label}: {before:?} -> {:?}",
            self.owner,
            self.keys.phase()
        );
    }

    /// Whether a read key is present.
    #[must_use]
    pub const fn has_read_key(&self) -> bool {
        self.keys.read().is_some()
    }

    /// Whether a write key is present.
    #[must_use]
    pub const fn has_write_key(&self) -> bool {
        self.keys.write().is_some()
    }

    /// Coarse key state.
    #[must_use]
    pub const fn phase(&self) -> KeyPhase {
        self.keys.phase()
    }

    /// Records the page size reported by the pager.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidPageSize`] unless `page_size` is a power of two in
    /// `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`. The previous size is kept.
    pub fn notify_page_size(&mut self, page_size: usize) -> CodecResult<()> {
        let checked = if page_size.is_power_of_two()
            && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size)
        {
            Ok(page_size)
        } else {
            Err(CodecError::InvalidPageSize(page_size))
        };
        self.page_size = Some(self.record(checked)?);
        Ok(())
    }

    /// Page size last notified, if any.
    #[must_use]
    pub const fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    /// Encrypts one page for writing.
    ///
    /// `data` is copied into the codec's scratch buffer and encrypted there;
    /// the caller's buffer is never modified, so a failure cannot corrupt a
    /// cached page. Uses the write key when `use_write_key` is set and the
    /// read key otherwise (journal pages during a rekey).
    ///
    /// # Errors
    ///
    /// [`CodecError::MissingKey`] when the selected key is absent, page size
    /// errors, or [`CodecError::CipherFailure`].
    pub fn encrypt(
        &mut self,
        page: PageNumber,
        data: &[u8],
        use_write_key: bool,
    ) -> CodecResult<&[u8]> {
        let len = self.encrypt_to_scratch(page, data, use_write_key)?;
        Ok(self.scratch(len))
    }

    /// Encrypts into the scratch buffer and returns the page length, leaving
    /// the scratch unborrowed so the caller can still poll the error slot.
    pub(crate) fn encrypt_to_scratch(
        &mut self,
        page: PageNumber,
        data: &[u8],
        use_write_key: bool,
    ) -> CodecResult<usize> {
        let outcome = self.encrypt_into_scratch(page, data, use_write_key);
        self.record(outcome)
    }

    pub(crate) fn scratch(&self, len: usize) -> &[u8] {
        &self.scratch[..len]
    }

    fn encrypt_into_scratch(
        &mut self,
        page: PageNumber,
        data: &[u8],
        use_write_key: bool,
    ) -> CodecResult<usize> {
        let len = self.checked_len(data.len())?;
        let key = if use_write_key {
            self.keys.write().ok_or(CodecError::MissingKey("write"))?
        } else {
            self.keys.read().ok_or(CodecError::MissingKey("read"))?
        };
        let scratch = &mut self.scratch[..len];
        scratch.copy_from_slice(data);
        PageCipher::new(key)?.encrypt(page, scratch)?;
        Ok(len)
    }

    /// Decrypts one page in place with the read key.
    ///
    /// On error the contents of `data` are unspecified.
    ///
    /// # Errors
    ///
    /// [`CodecError::MissingKey`] without a read key, page size errors, or
    /// [`CodecError::CipherFailure`].
    pub fn decrypt(&mut self, page: PageNumber, data: &mut [u8]) -> CodecResult<()> {
        let outcome = self.decrypt_in_place(page, data);
        self.record(outcome)
    }

    fn decrypt_in_place(&self, page: PageNumber, data: &mut [u8]) -> CodecResult<()> {
        self.checked_len(data.len())?;
        let key = self.keys.read().ok_or(CodecError::MissingKey("read"))?;
        PageCipher::new(key)?.decrypt(page, data)
    }

    fn checked_len(&self, actual: usize) -> CodecResult<usize> {
        let expected = self.page_size.ok_or(CodecError::InvalidPageSize(0))?;
        if actual != expected {
            return Err(CodecError::PageLengthMismatch { expected, actual });
        }
        Ok(expected)
    }

    /// Last recorded error message, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Clears the error slot.
    pub fn reset_error(&mut self) {
        self.last_error = None;
    }

    /// Returns and clears the error slot.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    fn record<T>(&mut self, result: CodecResult<T>) -> CodecResult<T> {
        if let Err(err) = &result {
            warn!("codec {}: {err}", self.owner);
            self.last_error = Some(err.to_string());
        }
        result
    }
}

impl Drop for Codec {
    fn drop(&mut self) {
        self.scratch.zeroize();
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("owner", &self.owner)
            .field("phase", &self.keys.phase())
            .field("page_size", &self.page_size)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}
