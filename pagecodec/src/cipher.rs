//! AES-256-XTS transform over one page buffer.
//!
//! XTS is length preserving: a page encrypts to ciphertext of the same size
//! with no padding and no tag, with ciphertext stealing covering page sizes
//! that are not a multiple of the block size. The tweak is the page IV from
//! [`derive_page_iv`].

use aes::cipher::KeyInit;
use aes::Aes256;
use xts_mode::Xts128;

use crate::error::{CodecError, CodecResult};
use crate::iv::{derive_page_iv, IV_SIZE};
use crate::key::{KeyMaterial, CIPHER_KEY_SIZE};
use crate::PageNumber;

/// Stateless page encryptor bound to one [`KeyMaterial`].
///
/// Built per call by the codec; holds expanded AES key schedules only for the
/// duration of one transform.
pub struct PageCipher<'k> {
    key: &'k KeyMaterial,
    xts: Xts128<Aes256>,
}

impl<'k> PageCipher<'k> {
    /// Expands the XTS key schedules for `key`.
    ///
    /// # Errors
    ///
    /// [`CodecError::CipherFailure`] if AES rejects either key half.
    pub fn new(key: &'k KeyMaterial) -> CodecResult<Self> {
        let (data_key, tweak_key) = key.cipher_key().split_at(CIPHER_KEY_SIZE / 2);
        let data = Aes256::new_from_slice(data_key)
            .map_err(|err| CodecError::CipherFailure(format!("XTS data key rejected: {err}")))?;
        let tweak = Aes256::new_from_slice(tweak_key)
            .map_err(|err| CodecError::CipherFailure(format!("XTS tweak key rejected: {err}")))?;
        Ok(Self {
            key,
            xts: Xts128::new(data, tweak),
        })
    }

    /// Encrypts `page` in place.
    ///
    /// # Errors
    ///
    /// [`CodecError::CipherFailure`] if the buffer is shorter than one AES
    /// block or IV derivation fails.
    pub fn encrypt(&self, page_number: PageNumber, page: &mut [u8]) -> CodecResult<()> {
        let tweak = self.tweak(page_number, page.len())?;
        self.xts.encrypt_sector(page, tweak);
        Ok(())
    }

    /// Decrypts `page` in place.
    ///
    /// # Errors
    ///
    /// Same as [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, page_number: PageNumber, page: &mut [u8]) -> CodecResult<()> {
        let tweak = self.tweak(page_number, page.len())?;
        self.xts.decrypt_sector(page, tweak);
        Ok(())
    }

    fn tweak(&self, page_number: PageNumber, len: usize) -> CodecResult<[u8; IV_SIZE]> {
        // xts-mode panics below one block; refuse instead.
        if len < IV_SIZE {
            return Err(CodecError::CipherFailure(format!(
                "page of {len} bytes is shorter than one cipher block"
            )));
        }
        derive_page_iv(self.key.iv_derivation_key(), page_number)
    }
}

impl std::fmt::Debug for PageCipher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KEY_MATERIAL_SIZE;

    fn key(fill: u8) -> KeyMaterial {
        KeyMaterial::from_bytes(&[fill; KEY_MATERIAL_SIZE]).expect("key")
    }

    fn sample_page(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251).to_le_bytes()[0]).collect()
    }

    #[test]
    fn test_round_trip() {
        let key = key(0x42);
        let cipher = PageCipher::new(&key).expect("cipher");
        let plain = sample_page(4096);
        let mut page = plain.clone();
        cipher.encrypt(3, &mut page).expect("encrypt");
        assert_ne!(page, plain);
        assert_eq!(page.len(), plain.len());
        cipher.decrypt(3, &mut page).expect("decrypt");
        assert_eq!(page, plain);
    }

    #[test]
    fn test_length_not_multiple_of_block() {
        let key = key(0x42);
        let cipher = PageCipher::new(&key).expect("cipher");
        let plain = sample_page(1000);
        let mut page = plain.clone();
        cipher.encrypt(1, &mut page).expect("encrypt");
        cipher.decrypt(1, &mut page).expect("decrypt");
        assert_eq!(page, plain);
    }

    #[test]
    fn test_same_content_different_pages() {
        let key = key(0x42);
        let cipher = PageCipher::new(&key).expect("cipher");
        let mut a = vec![0u8; 1024];
        let mut b = vec![0u8; 1024];
        cipher.encrypt(1, &mut a).expect("encrypt");
        cipher.encrypt(2, &mut b).expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_page_different_keys() {
        let (k1, k2) = (key(0x01), key(0x02));
        let mut a = vec![0u8; 1024];
        let mut b = vec![0u8; 1024];
        PageCipher::new(&k1).expect("cipher").encrypt(5, &mut a).expect("encrypt");
        PageCipher::new(&k2).expect("cipher").encrypt(5, &mut b).expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_yields_garbage() {
        let (k1, k2) = (key(0x01), key(0x02));
        let plain = sample_page(512);
        let mut page = plain.clone();
        PageCipher::new(&k1).expect("cipher").encrypt(9, &mut page).expect("encrypt");
        PageCipher::new(&k2).expect("cipher").decrypt(9, &mut page).expect("decrypt");
        assert_ne!(page, plain);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let key = key(0x42);
        let cipher = PageCipher::new(&key).expect("cipher");
        let mut page = [0u8; 8];
        let err = cipher.encrypt(1, &mut page).expect_err("too short");
        assert!(matches!(err, CodecError::CipherFailure(_)));
    }
}
