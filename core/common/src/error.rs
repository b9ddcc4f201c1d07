//! Common error types for Lockbox.

use thiserror::Error;

/// Top-level error type for Lockbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied password does not unlock this user's data.
    #[error("Invalid credential")]
    InvalidCredential,

    /// A ciphertext envelope could not be opened with the held key.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// An encrypted write was attempted without an unlocked session.
    #[error("Encryption unavailable: session is locked")]
    EncryptionUnavailable,

    /// The document store could not serve the request.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Cryptographic operation failed for a reason other than decryption.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted in the current state.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
