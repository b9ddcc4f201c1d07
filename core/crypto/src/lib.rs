//! Cryptographic primitives for Lockbox.
//!
//! This module provides:
//! - Per-user key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - String envelopes for encrypting single document fields
//! - Secure key management with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Key comparisons are constant-time

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use envelope::{decrypt_field, encrypt_field, CipherEnvelope};
pub use kdf::{derive_key, KdfParams};
pub use keys::{EncryptionKey, Salt, KEY_LENGTH};
