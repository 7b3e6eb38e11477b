//! Transparent page-level encryption for embedded paged storage engines.
//!
//! Every fixed-size page is encrypted on its way to disk and decrypted on its
//! way back, invisibly to the layers above the pager:
//!
//! * **Cipher** -- AES-256 in XTS mode, length preserving, no padding and no
//!   per-page tag. Ciphertext is exactly one page long.
//! * **IV** -- `CMAC-AES-256(iv_key, le_u32(page_number))`, keyed separately
//!   from the data key, used as the XTS tweak.
//! * **Keys** -- base64 (or hex) text decoding to 96 bytes: the 64-byte XTS key
//!   followed by the 32-byte IV-derivation key.
//!
//! The pieces, leaves first:
//!
//! * [`KeyMaterial`] -- one validated key.
//! * [`PageCipher`] -- encrypt/decrypt one page buffer under one key.
//! * [`Codec`] -- per-connection read/write key state machine and the page
//!   transform entry points.
//! * [`PagerHookAdapter`] -- what the host pager calls on every page I/O,
//!   dispatching on [`IoMode`].
//! * [`RekeyOrchestrator`] -- whole-database key change inside one exclusive
//!   transaction over a [`RekeyHost`].
//!
//! Pages are not authenticated. A wrong key decrypts to garbage rather than
//! failing, so hosts see it as a corrupt database, not as a key error.

use std::fmt;

mod attach;
mod cipher;
mod codec;
pub mod error;
mod hook;
mod iv;
mod key;
pub mod logger;
mod rekey;

pub use attach::{codec_for_attached, AttachKey};
pub use cipher::PageCipher;
pub use codec::{Codec, KeyPhase};
pub use error::{CodecError, CodecResult, PageIoError};
pub use hook::{IoMode, PageCodecHooks, PagerHookAdapter};
pub use iv::{derive_page_iv, IV_SIZE};
pub use key::{KeyMaterial, CIPHER_KEY_SIZE, IV_DERIVATION_KEY_SIZE, KEY_MATERIAL_SIZE};
pub use rekey::{RekeyHost, RekeyKind, RekeyOrchestrator};

/// 1-based page number within one database file.
pub type PageNumber = u32;

/// Largest page size the codec handles; the scratch buffer is this large.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Smallest page size the codec accepts.
pub const MIN_PAGE_SIZE: usize = 512;

/// Identifies the connection that owns a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
