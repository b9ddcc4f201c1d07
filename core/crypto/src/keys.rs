//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use lockbox_common::UserId;

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of key-derivation salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Domain label mixed into per-user salts.
const USER_SALT_LABEL: &[u8] = b"lockbox.user-salt.v1";

/// Symmetric key derived from the user's login password.
///
/// Held only in memory for the lifetime of an unlocked session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LENGTH],
}

impl EncryptionKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for EncryptionKey {}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    /// Derive the salt for a user.
    ///
    /// Deterministic in the user id, so every device derives the same key
    /// from the same password without a stored salt.
    pub fn for_user(user: &UserId) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(USER_SALT_LABEL);
        hasher.update(user.as_str().as_bytes());

        let mut salt = [0u8; SALT_LENGTH];
        salt.copy_from_slice(&hasher.finalize());
        Self(salt)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_salt_is_stable() {
        let user = UserId::new("alice-uid").unwrap();
        assert_eq!(Salt::for_user(&user), Salt::for_user(&user));
    }

    #[test]
    fn test_user_salt_differs_per_user() {
        let alice = UserId::new("alice-uid").unwrap();
        let bob = UserId::new("bob-uid").unwrap();
        assert_ne!(Salt::for_user(&alice), Salt::for_user(&bob));
    }

    #[test]
    fn test_key_generate() {
        let key1 = EncryptionKey::generate();
        let key2 = EncryptionKey::generate();

        // Random keys should be different
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = EncryptionKey::from_bytes([7u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "EncryptionKey([REDACTED])");
    }
}
