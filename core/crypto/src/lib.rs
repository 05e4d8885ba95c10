//! Cryptographic primitives for Portvault.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption with associated data using XChaCha20-Poly1305
//! - Key and salt types with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption verifies the authentication tag before returning plaintext

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt, Nonce, NONCE_SIZE, TAG_SIZE};
pub use kdf::{derive_key, KdfParams};
pub use keys::{BackupKey, Salt, KEY_LENGTH, SALT_LENGTH};
