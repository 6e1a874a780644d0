//! Authenticated symmetric encryption for the credential vault (C1).
//!
//! Only the SOR auth secret is ever opaque to storage — every other
//! `Connection` column stays queryable plaintext. This module has no
//! knowledge of what it encrypts; it is a thin, pure wrapper around
//! AES-256-GCM with per-call random nonces.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Errors produced by `encrypt`/`decrypt`/key loading.
///
/// Never retried (§7); every variant is audited as-is by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The supplied key material was not exactly 256 bits (32 bytes).
    InvalidKeyLength { got_bytes: usize },
    /// The supplied nonce was not exactly 96 bits (12 bytes).
    InvalidNonce { got_bytes: usize },
    /// Ciphertext or nonce failed authentication (tampering, wrong key, or
    /// mismatched nonce).
    DecryptionFailed,
    /// The underlying AEAD cipher refused to encrypt (should not happen for
    /// well-formed input; kept distinct from `DecryptionFailed` for callers
    /// that branch on direction).
    EncryptionFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::InvalidKeyLength { got_bytes } => {
                write!(f, "invalid key length: expected 32 bytes, got {got_bytes}")
            }
            CryptoError::InvalidNonce { got_bytes } => {
                write!(f, "invalid nonce length: expected 12 bytes, got {got_bytes}")
            }
            CryptoError::DecryptionFailed => write!(f, "decryption failed: authentication tag mismatch"),
            CryptoError::EncryptionFailed => write!(f, "encryption failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// A loaded 256-bit symmetric key. Construct via [`EncryptionKey::from_base64`].
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EncryptionKey").field(&"<REDACTED>").finish()
    }
}

impl EncryptionKey {
    /// Load a key from its base64 form. Rejects any decoded length other
    /// than 32 bytes with [`CryptoError::InvalidKeyLength`].
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKeyLength { got_bytes: 0 })?;
        Self::from_bytes(&bytes)
    }

    /// Load a key directly from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                got_bytes: bytes.len(),
            });
        }
        let mut arr = [0u8; KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// Encrypt `plaintext` under `key`, drawing a fresh random nonce from the OS
/// CSPRNG. The same plaintext encrypted twice under the same key yields two
/// different ciphertexts (property 1, §8).
///
/// Returns `(ciphertext, nonce)` — both must be persisted; `nonce` is not
/// secret but is required to decrypt.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let cipher = key.cipher();
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok((ciphertext, nonce.to_vec()))
}

/// Decrypt `ciphertext` under `key` using the paired `nonce`.
///
/// Fails with [`CryptoError::InvalidNonce`] if `nonce` isn't 12 bytes, or
/// [`CryptoError::DecryptionFailed`] if authentication fails for any other
/// reason (tampered ciphertext, tampered nonce, wrong key).
pub fn decrypt(key: &EncryptionKey, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonce {
            got_bytes: nonce.len(),
        });
    }
    let cipher = key.cipher();
    let nonce = Nonce::from_slice(nonce);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Convenience: encrypt a UTF-8 string secret.
pub fn encrypt_str(key: &EncryptionKey, plaintext: &str) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    encrypt(key, plaintext.as_bytes())
}

/// Convenience: decrypt back to a UTF-8 string secret.
pub fn decrypt_str(key: &EncryptionKey, ciphertext: &[u8], nonce: &[u8]) -> Result<String, CryptoError> {
    let bytes = decrypt(key, ciphertext, nonce)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn round_trips() {
        let key = test_key();
        let (ct, nonce) = encrypt_str(&key, "p@55word").unwrap();
        let pt = decrypt_str(&key, &ct, &nonce).unwrap();
        assert_eq!(pt, "p@55word");
    }

    #[test]
    fn same_plaintext_yields_different_ciphertexts() {
        let key = test_key();
        let (ct1, nonce1) = encrypt_str(&key, "same-secret").unwrap();
        let (ct2, nonce2) = encrypt_str(&key, "same-secret").unwrap();
        assert_ne!(ct1, ct2);
        assert_ne!(nonce1, nonce2);
    }

    #[test]
    fn tampered_ciphertext_byte_fails_decryption() {
        let key = test_key();
        let (mut ct, nonce) = encrypt_str(&key, "hunter2").unwrap();
        ct[0] ^= 0xFF;
        assert_eq!(decrypt(&key, &ct, &nonce), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn tampered_nonce_byte_fails_decryption() {
        let key = test_key();
        let (ct, mut nonce) = encrypt_str(&key, "hunter2").unwrap();
        nonce[0] ^= 0xFF;
        assert_eq!(decrypt(&key, &ct, &nonce), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn wrong_nonce_length_is_rejected_before_decrypting() {
        let key = test_key();
        let (ct, _) = encrypt_str(&key, "hunter2").unwrap();
        let short_nonce = vec![0u8; 4];
        assert_eq!(
            decrypt(&key, &ct, &short_nonce),
            Err(CryptoError::InvalidNonce { got_bytes: 4 })
        );
    }

    #[test]
    fn rejects_16_byte_key() {
        let err = EncryptionKey::from_bytes(&[1u8; 16]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength { got_bytes: 16 });
    }

    #[test]
    fn rejects_48_byte_key() {
        let err = EncryptionKey::from_bytes(&[1u8; 48]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength { got_bytes: 48 });
    }

    #[test]
    fn loads_valid_base64_key() {
        let raw = [9u8; KEY_LEN];
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        let key = EncryptionKey::from_base64(&encoded).unwrap();
        assert_eq!(key.0, raw);
    }
}
