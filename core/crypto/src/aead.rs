//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Key, XChaCha20Poly1305, XNonce,
};

use crate::keys::EncryptionKey;
use lockbox_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated, so equal inputs yield different outputs
/// - `aad` is authenticated but not encrypted
///
/// # Errors
/// - Returns error if encryption fails
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    // Prepend nonce to ciphertext
    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt ciphertext using XChaCha20-Poly1305.
///
/// # Preconditions
/// - Ciphertext format: nonce || encrypted_data || tag
/// - `aad` must equal the value given at encryption time
///
/// # Errors
/// - `DecryptionFailed` if the ciphertext is too short
/// - `DecryptionFailed` if authentication fails (wrong key or tampered data)
pub fn decrypt(key: &EncryptionKey, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    cipher
        .decrypt(nonce, Payload { msg: encrypted, aad })
        .map_err(|_| Error::DecryptionFailed("Authentication failed".to_string()))
}
