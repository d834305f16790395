//! Authenticated symmetric encryption of stored state.

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng},
};
use rand::RngCore as _;
use thiserror::Error;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Error raised by a [`Cipher`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The configured key has the wrong length for the cipher.
    #[error("cipher key must be {expected} bytes, got {actual}")]
    KeyMismatch {
        /// Required key length in bytes.
        expected: usize,
        /// Supplied key length in bytes.
        actual: usize,
    },
    /// The ciphertext failed authentication: it was tampered with, truncated,
    /// or encrypted under a different key.
    #[error("ciphertext failed authentication")]
    Authentication,
    /// The plaintext could not be sealed.
    #[error("encryption failed")]
    Encryption,
}

/// Authenticated encryption applied to stored state.
///
/// Decryption must detect any modification of the ciphertext and fail with
/// [`CipherError::Authentication`] rather than return corrupted plaintext.
pub trait Cipher: Send + Sync {
    /// Seal `plaintext`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encryption`] if sealing fails.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Open `ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Authentication`] on any authentication
    /// failure.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// AES-256-GCM cipher, the default state cipher.
///
/// Each sealed value carries a fresh random 12-byte nonce as a prefix, so
/// encrypting the same plaintext twice yields different ciphertexts.
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Construct a cipher from a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::KeyMismatch`] for any other key length.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_SIZE {
            return Err(CipherError::KeyMismatch {
                expected: KEY_SIZE,
                actual: key.len(),
            });
        }
        Ok(Self {
            cipher: Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::KeyMismatch {
                expected: KEY_SIZE,
                actual: key.len(),
            })?,
        })
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CipherError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(CipherError::Authentication);
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| CipherError::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::new(&[7u8; KEY_SIZE]).unwrap()
    }

    #[test]
    fn round_trips_plaintext() {
        let cipher = cipher();
        let sealed = cipher.encrypt(b"attack at dawn").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"attack at dawn");
    }

    #[test]
    fn same_plaintext_seals_differently() {
        let cipher = cipher();
        let first = cipher.encrypt(b"same").unwrap();
        let second = cipher.encrypt(b"same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn wrong_key_length_is_rejected_at_construction() {
        let err = AesGcmCipher::new(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            CipherError::KeyMismatch {
                expected: 32,
                actual: 16
            }
        );
    }

    #[test]
    fn single_bit_flip_fails_authentication() {
        let cipher = cipher();
        let mut sealed = cipher.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(cipher.decrypt(&sealed).unwrap_err(), CipherError::Authentication);
    }

    #[test]
    fn truncated_ciphertext_fails_authentication() {
        let cipher = cipher();
        let err = cipher.decrypt(&[0u8; NONCE_SIZE - 1]).unwrap_err();
        assert_eq!(err, CipherError::Authentication);
    }

    #[test]
    fn different_key_fails_authentication() {
        let sealed = cipher().encrypt(b"secret").unwrap();
        let other = AesGcmCipher::new(&[8u8; KEY_SIZE]).unwrap();
        assert_eq!(other.decrypt(&sealed).unwrap_err(), CipherError::Authentication);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let cipher = cipher();
        let sealed = cipher.encrypt(b"").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), Vec::<u8>::new());
    }
}
