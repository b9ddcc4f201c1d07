//! Common types used throughout Lockbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Identity of an authenticated user, as issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a new UserId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or blank
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "UserId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored record, assigned by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The record collections a user owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Passwords,
    Notes,
    Todos,
    Expenses,
}

impl Collection {
    /// Every user-owned collection, in dashboard order.
    pub const ALL: [Collection; 4] = [
        Collection::Passwords,
        Collection::Notes,
        Collection::Todos,
        Collection::Expenses,
    ];

    /// Collection name as used by the document store.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Passwords => "passwords",
            Collection::Notes => "notes",
            Collection::Todos => "todos",
            Collection::Expenses => "expenses",
        }
    }

    /// Whether records of this collection may carry encrypted content.
    pub fn supports_encryption(&self) -> bool {
        matches!(self, Collection::Passwords | Collection::Notes)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Collection::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown collection: {}", s)))
    }
}

/// Sensitive text (passwords, decrypted secrets) that zeroizes on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveString(String);

impl SensitiveString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveString([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_creation() {
        let id = UserId::new("uid-123").unwrap();
        assert_eq!(id.as_str(), "uid-123");
    }

    #[test]
    fn test_user_id_blank_fails() {
        assert!(UserId::new("").is_err());
        assert!(UserId::new("   ").is_err());
    }

    #[test]
    fn test_collection_names_roundtrip() {
        for collection in Collection::ALL {
            assert_eq!(collection.name().parse::<Collection>().unwrap(), collection);
        }
        assert!("photos".parse::<Collection>().is_err());
    }

    #[test]
    fn test_collection_encryption_support() {
        assert!(Collection::Notes.supports_encryption());
        assert!(Collection::Passwords.supports_encryption());
        assert!(!Collection::Todos.supports_encryption());
        assert!(!Collection::Expenses.supports_encryption());
    }

    #[test]
    fn test_sensitive_string_redacted() {
        let secret = SensitiveString::new("hunter2");
        assert_eq!(format!("{:?}", secret), "SensitiveString([REDACTED])");
        assert_eq!(secret.expose(), "hunter2");
    }
}
