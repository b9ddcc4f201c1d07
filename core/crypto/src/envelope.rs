//! Field-level ciphertext envelopes.
//!
//! An envelope is a single string that can be stored as one document field
//! and carries everything needed to decrypt it given the key:
//!
//! ```text
//! v1.<base64url(nonce || ciphertext || tag)>
//! ```
//!
//! The version prefix is also bound into the AEAD associated data, so an
//! envelope cannot be relabelled without failing authentication.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

use crate::aead::{self, NONCE_SIZE, TAG_SIZE};
use crate::keys::EncryptionKey;
use lockbox_common::{Error, Result};

/// Version prefix of the current envelope format.
pub const ENVELOPE_PREFIX: &str = "v1.";

const ENVELOPE_AAD: &[u8] = b"lockbox.envelope.v1";

/// Opaque encrypted field value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CipherEnvelope(String);

impl CipherEnvelope {
    /// Accept a stored envelope string.
    ///
    /// Only the outer shape is checked here; authenticity is established by
    /// [`decrypt_field`].
    ///
    /// # Errors
    /// - `DecryptionFailed` if the version prefix is unknown or the body is
    ///   not valid base64 of plausible length
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        decode_body(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for CipherEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherEnvelope({} chars)", self.0.len())
    }
}

impl fmt::Display for CipherEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn decode_body(value: &str) -> Result<Vec<u8>> {
    let body = value
        .strip_prefix(ENVELOPE_PREFIX)
        .ok_or_else(|| Error::DecryptionFailed("Unknown envelope version".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| Error::DecryptionFailed("Malformed envelope encoding".to_string()))?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed("Envelope truncated".to_string()));
    }

    Ok(bytes)
}

/// Encrypt a text field into an envelope.
///
/// A fresh nonce is drawn for every call.
pub fn encrypt_field(key: &EncryptionKey, plaintext: &str) -> Result<CipherEnvelope> {
    let sealed = aead::encrypt(key, plaintext.as_bytes(), ENVELOPE_AAD)?;
    Ok(CipherEnvelope(format!(
        "{}{}",
        ENVELOPE_PREFIX,
        URL_SAFE_NO_PAD.encode(sealed)
    )))
}

/// Decrypt an envelope back into text.
///
/// # Errors
/// - `DecryptionFailed` on wrong key, malformed or truncated envelope,
///   tampering, or plaintext that is not UTF-8
pub fn decrypt_field(key: &EncryptionKey, envelope: &CipherEnvelope) -> Result<String> {
    let sealed = decode_body(&envelope.0)?;
    let plaintext = aead::decrypt(key, &sealed, ENVELOPE_AAD)?;

    String::from_utf8(plaintext).map_err(|e| {
        let mut bytes = e.into_bytes();
        bytes.zeroize();
        Error::DecryptionFailed("Plaintext is not valid UTF-8".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    #[test]
    fn test_field_roundtrip() {
        let key = EncryptionKey::generate();
        let envelope = encrypt_field(&key, "meet at noon").unwrap();

        assert!(envelope.as_str().starts_with(ENVELOPE_PREFIX));
        assert_eq!(decrypt_field(&key, &envelope).unwrap(), "meet at noon");
    }

    #[test]
    fn test_same_plaintext_different_envelopes() {
        let key = EncryptionKey::generate();
        let a = encrypt_field(&key, "same").unwrap();
        let b = encrypt_field(&key, "same").unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_envelope_does_not_contain_plaintext() {
        let key = EncryptionKey::generate();
        let envelope = encrypt_field(&key, "correct horse battery staple").unwrap();

        assert!(!envelope.as_str().contains("horse"));
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        let key = EncryptionKey::generate();
        let envelope = encrypt_field(&key, "x").unwrap();
        let relabelled = envelope.as_str().replacen("v1.", "v9.", 1);

        assert!(matches!(
            CipherEnvelope::parse(relabelled),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CipherEnvelope::parse("v1.!!!not-base64!!!").is_err());
        assert!(CipherEnvelope::parse("v1.AAAA").is_err());
        assert!(CipherEnvelope::parse("plain text").is_err());
    }

    #[test]
    fn test_truncated_envelope_fails() {
        let key = EncryptionKey::generate();
        let envelope = encrypt_field(&key, "a longer secret value").unwrap();
        let cut = &envelope.as_str()[..envelope.as_str().len() - 4];
        let truncated = CipherEnvelope(cut.to_string());

        assert!(matches!(
            decrypt_field(&key, &truncated),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let key = EncryptionKey::generate();
        let envelope = encrypt_field(&key, "tamper me").unwrap();

        let mut bytes = decode_body(envelope.as_str()).unwrap();
        bytes[NONCE_SIZE] ^= 0x01;
        let tampered = CipherEnvelope(format!(
            "{}{}",
            ENVELOPE_PREFIX,
            URL_SAFE_NO_PAD.encode(bytes)
        ));

        assert!(matches!(
            decrypt_field(&key, &tampered),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let key = EncryptionKey::from_bytes([3u8; KEY_LENGTH]);
        let envelope = encrypt_field(&key, "json").unwrap();

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json.as_str(), Some(envelope.as_str()));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_holds_for_any_text(text in any::<String>(), seed in any::<[u8; 32]>()) {
                let key = EncryptionKey::from_bytes(seed);
                let envelope = encrypt_field(&key, &text).unwrap();
                prop_assert_eq!(decrypt_field(&key, &envelope).unwrap(), text);
            }

            #[test]
            fn other_key_never_decrypts(
                text in any::<String>(),
                k1 in any::<[u8; 32]>(),
                k2 in any::<[u8; 32]>(),
            ) {
                prop_assume!(k1 != k2);
                let envelope = encrypt_field(&EncryptionKey::from_bytes(k1), &text).unwrap();
                let result = decrypt_field(&EncryptionKey::from_bytes(k2), &envelope);
                prop_assert!(matches!(result, Err(Error::DecryptionFailed(_))));
            }
        }
    }
}
