//! Per-page IV derivation.
//!
//! `IV = CMAC-AES-256(iv_derivation_key, le_u32(page_number))`. The IV is a
//! pure function of the page number and the IV-derivation half of the active
//! key, so distinct pages never share an IV under one key and a new key gives
//! every page a fresh IV.

use aes::Aes256;
use cmac::{Cmac, Mac};

use crate::error::{CodecError, CodecResult};
use crate::key::IV_DERIVATION_KEY_SIZE;
use crate::PageNumber;

/// Size of a derived IV (one AES block), used as the XTS tweak.
pub const IV_SIZE: usize = 16;

/// Derives the IV for `page` under `iv_key`.
///
/// # Errors
///
/// [`CodecError::CipherFailure`] if the MAC rejects the key.
pub fn derive_page_iv(
    iv_key: &[u8; IV_DERIVATION_KEY_SIZE],
    page: PageNumber,
) -> CodecResult<[u8; IV_SIZE]> {
    let mut mac = <Cmac<Aes256> as Mac>::new_from_slice(iv_key)
        .map_err(|err| CodecError::CipherFailure(format!("CMAC key rejected: {err}")))?;
    mac.update(&page.to_le_bytes());
    let tag = mac.finalize().into_bytes();

    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&tag);
    Ok(iv)
}
