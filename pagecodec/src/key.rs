//! Decoded key material for one side (read or write) of a codec.
//!
//! A key is supplied as text, either base64 (the default) or hex, and must
//! decode to exactly [`KEY_MATERIAL_SIZE`] bytes: the XTS cipher key followed
//! by the CMAC key used for IV derivation.

use base64::{engine::general_purpose::STANDARD, Engine};
use secrecy::SecretString;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CodecError, CodecResult};

/// Size of the XTS key (two AES-256 keys: data key and tweak key).
pub const CIPHER_KEY_SIZE: usize = 64;

/// Size of the CMAC key used to derive per-page IVs.
pub const IV_DERIVATION_KEY_SIZE: usize = 32;

/// Decoded length every encoded key must have.
pub const KEY_MATERIAL_SIZE: usize = CIPHER_KEY_SIZE + IV_DERIVATION_KEY_SIZE;

/// Cipher key and IV-derivation key, always complete.
///
/// There is no partially-set key: a value of this type only exists once both
/// halves have been validated. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    cipher_key: [u8; CIPHER_KEY_SIZE],
    iv_derivation_key: [u8; IV_DERIVATION_KEY_SIZE],
}

impl KeyMaterial {
    /// Decodes a base64 key.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidKeyEncoding`] if `encoded` is not valid base64,
    /// [`CodecError::InvalidKeySize`] if it does not decode to
    /// [`KEY_MATERIAL_SIZE`] bytes.
    pub fn from_base64(encoded: &str) -> CodecResult<Self> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map(Zeroizing::new)
            .map_err(|err| CodecError::InvalidKeyEncoding(err.to_string()))?;
        Self::from_bytes(&decoded)
    }

    /// Decodes a hex key.
    ///
    /// # Errors
    ///
    /// Same as [`from_base64`](Self::from_base64), for hex input.
    pub fn from_hex(encoded: &str) -> CodecResult<Self> {
        let decoded = hex::decode(encoded.trim())
            .map(Zeroizing::new)
            .map_err(|err| CodecError::InvalidKeyEncoding(err.to_string()))?;
        Self::from_bytes(&decoded)
    }

    /// Splits raw key bytes into cipher key and IV-derivation key.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidKeySize`] unless `bytes` is exactly
    /// [`KEY_MATERIAL_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != KEY_MATERIAL_SIZE {
            return Err(CodecError::InvalidKeySize {
                actual: bytes.len(),
                expected: KEY_MATERIAL_SIZE,
            });
        }
        let (cipher, iv) = bytes.split_at(CIPHER_KEY_SIZE);
        let mut key = Self {
            cipher_key: [0u8; CIPHER_KEY_SIZE],
            iv_derivation_key: [0u8; IV_DERIVATION_KEY_SIZE],
        };
        key.cipher_key.copy_from_slice(cipher);
        key.iv_derivation_key.copy_from_slice(iv);
        Ok(key)
    }

    /// Generates fresh random key material.
    ///
    /// # Errors
    ///
    /// [`CodecError::Randomness`] if the system random source fails.
    pub fn generate() -> CodecResult<Self> {
        let mut bytes = Zeroizing::new([0u8; KEY_MATERIAL_SIZE]);
        getrandom::fill(bytes.as_mut_slice())
            .map_err(|err| CodecError::Randomness(err.to_string()))?;
        Self::from_bytes(bytes.as_slice())
    }

    /// Encodes the key as base64, the form [`Codec::set_write_key`] accepts.
    ///
    /// [`Codec::set_write_key`]: crate::Codec::set_write_key
    #[must_use]
    pub fn to_base64(&self) -> SecretString {
        let mut bytes = Zeroizing::new([0u8; KEY_MATERIAL_SIZE]);
        bytes[..CIPHER_KEY_SIZE].copy_from_slice(&self.cipher_key);
        bytes[CIPHER_KEY_SIZE..].copy_from_slice(&self.iv_derivation_key);
        SecretString::from(STANDARD.encode(bytes.as_slice()))
    }

    /// XTS key: AES-256 data key followed by AES-256 tweak key.
    #[must_use]
    pub const fn cipher_key(&self) -> &[u8; CIPHER_KEY_SIZE] {
        &self.cipher_key
    }

    /// CMAC key for per-page IV derivation.
    #[must_use]
    pub const fn iv_derivation_key(&self) -> &[u8; IV_DERIVATION_KEY_SIZE] {
        &self.iv_derivation_key
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
