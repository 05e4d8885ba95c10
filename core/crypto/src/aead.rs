//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. Callers bind
//! their plaintext header as associated data so it is authenticated too.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::BackupKey;
use portvault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// A 192-bit XChaCha20 nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a fresh random nonce.
    pub fn generate() -> Self {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let mut bytes = [0u8; NONCE_SIZE];
        bytes.copy_from_slice(&nonce);
        Self(bytes)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Encrypt plaintext, authenticating `aad` alongside it.
///
/// # Preconditions
/// - `nonce` must never be reused with the same key
///
/// # Postconditions
/// - Returns ciphertext || tag, of length `plaintext.len() + TAG_SIZE`
///
/// # Errors
/// - Returns error if encryption fails
pub fn encrypt(key: &BackupKey, nonce: &Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .encrypt(
            GenericArray::from_slice(nonce.as_bytes()),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Postconditions
/// - Returns the original plaintext only if the tag verifies over both
///   the ciphertext and `aad`
///
/// # Errors
/// - `WrongPassphraseOrCorrupted` if the ciphertext is too short or
///   authentication fails (wrong key, tampered ciphertext, tag or aad)
pub fn decrypt(key: &BackupKey, nonce: &Nonce, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::WrongPassphraseOrCorrupted);
    }

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(
            GenericArray::from_slice(nonce.as_bytes()),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::WrongPassphraseOrCorrupted)
}
