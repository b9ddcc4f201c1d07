//! Record model and its document mapping.
//!
//! A record's content is either stored in the clear or as a cipher
//! envelope, never both. [`StoredContent`] makes that a construction-time
//! guarantee; documents are parsed into it at the store boundary.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

use lockbox_common::{Error, RecordId, Result, SensitiveString, UserId};
use lockbox_crypto::CipherEnvelope;
use lockbox_store::{Document, Fields};

/// Document field names.
pub mod fields {
    pub const USER_ID: &str = "userId";
    pub const TITLE: &str = "title";
    pub const TAGS: &str = "tags";
    pub const PINNED: &str = "pinned";
    pub const CREATED_AT: &str = "createdAt";
    pub const ENCRYPTED: &str = "encrypted";
    pub const CONTENT: &str = "content";
    pub const ENCRYPTED_CONTENT: &str = "encryptedContent";

    /// Names callers may not use for extra metadata.
    pub const RESERVED: [&str; 8] = [
        USER_ID,
        TITLE,
        TAGS,
        PINNED,
        CREATED_AT,
        ENCRYPTED,
        CONTENT,
        ENCRYPTED_CONTENT,
    ];
}

/// Content as persisted in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredContent {
    Plain(String),
    Encrypted(CipherEnvelope),
}

impl StoredContent {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, StoredContent::Encrypted(_))
    }

    /// Write the `encrypted` flag and exactly one content field.
    pub fn write_into(self, target: &mut Fields) {
        target.remove(fields::CONTENT);
        target.remove(fields::ENCRYPTED_CONTENT);

        match self {
            StoredContent::Plain(text) => {
                target.insert(fields::ENCRYPTED.into(), Value::Bool(false));
                target.insert(fields::CONTENT.into(), Value::String(text));
            }
            StoredContent::Encrypted(envelope) => {
                target.insert(fields::ENCRYPTED.into(), Value::Bool(true));
                target.insert(
                    fields::ENCRYPTED_CONTENT.into(),
                    Value::String(envelope.into_string()),
                );
            }
        }
    }

    /// Parse the content fields of a stored document.
    ///
    /// A missing `encrypted` flag means cleartext and a missing cleartext
    /// `content` reads as empty.
    ///
    /// # Errors
    /// - `DecryptionFailed` if the document is encrypted but the envelope is
    ///   missing or malformed
    /// - `Serialization` if both content fields are present
    pub fn from_fields(source: &Fields) -> Result<Self> {
        let encrypted = source
            .get(fields::ENCRYPTED)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let plain = source.get(fields::CONTENT).and_then(Value::as_str);
        let sealed = source.get(fields::ENCRYPTED_CONTENT).and_then(Value::as_str);

        match (encrypted, plain, sealed) {
            (_, Some(_), Some(_)) => Err(Error::Serialization(
                "Document has both content and encryptedContent".to_string(),
            )),
            (true, _, Some(envelope)) => Ok(StoredContent::Encrypted(CipherEnvelope::parse(
                envelope,
            )?)),
            (true, _, None) => Err(Error::DecryptionFailed(
                "Encrypted document has no envelope".to_string(),
            )),
            (false, _, Some(_)) => Err(Error::Serialization(
                "Cleartext document carries an envelope".to_string(),
            )),
            (false, plain, None) => Ok(StoredContent::Plain(plain.unwrap_or_default().to_string())),
        }
    }
}

/// Cleartext metadata stored alongside every record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMetadata {
    pub title: String,
    pub tags: Vec<String>,
    pub pinned: bool,
    pub created_at: Option<DateTime<Utc>>,
    /// Kind-specific fields (e.g. `website`, `username` for passwords).
    pub extra: Fields,
}

impl RecordMetadata {
    /// Read metadata from a document, tolerating missing optional fields.
    pub fn from_fields(source: &Fields) -> Self {
        let tags = source
            .get(fields::TAGS)
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let created_at = source
            .get(fields::CREATED_AT)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        let extra = source
            .iter()
            .filter(|(name, _)| !fields::RESERVED.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            title: source
                .get(fields::TITLE)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tags,
            pinned: source
                .get(fields::PINNED)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            created_at,
            extra,
        }
    }
}

/// A record the caller wants to create.
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub title: String,
    pub content: SensitiveString,
    pub tags: Vec<String>,
    pub pinned: bool,
    pub extra: Fields,
}

impl RecordDraft {
    pub fn new(title: impl Into<String>, content: impl Into<SensitiveString>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            pinned: false,
            extra: Fields::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    /// Attach a cleartext metadata field.
    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Check required fields before anything is written.
    ///
    /// # Errors
    /// - `InvalidInput` if title or content is blank, or an extra field
    ///   shadows a reserved name
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Title is required".to_string()));
        }
        if self.content.expose().trim().is_empty() {
            return Err(Error::InvalidInput("Content is required".to_string()));
        }
        if let Some(name) = self
            .extra
            .keys()
            .find(|name| fields::RESERVED.contains(&name.as_str()))
        {
            return Err(Error::InvalidInput(format!(
                "'{}' is a reserved field name",
                name
            )));
        }
        Ok(())
    }

    /// Build the document fields for this draft. Content fields are added
    /// separately via [`StoredContent::write_into`].
    pub(crate) fn metadata_fields(&self, owner: &UserId, created_at: DateTime<Utc>) -> Fields {
        let mut out = self.extra.clone();
        out.insert(fields::USER_ID.into(), Value::String(owner.to_string()));
        out.insert(fields::TITLE.into(), Value::String(self.title.clone()));
        out.insert(
            fields::TAGS.into(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        out.insert(fields::PINNED.into(), Value::Bool(self.pinned));
        out.insert(
            fields::CREATED_AT.into(),
            Value::String(created_at.to_rfc3339()),
        );
        out
    }
}

/// Readable state of a loaded record's content.
#[derive(Clone)]
pub enum Content {
    /// Cleartext, or successfully decrypted.
    Available(SensitiveString),
    /// Encrypted and the session holds no key.
    Locked,
    /// Could not be decrypted or parsed; the reason is safe to display.
    Unreadable(String),
}

impl Content {
    /// The text, if readable.
    pub fn text(&self) -> Option<&str> {
        match self {
            Content::Available(text) => Some(text.expose()),
            Content::Locked | Content::Unreadable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Content::Available(_))
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Available(_) => write!(f, "Available([REDACTED])"),
            Content::Locked => write!(f, "Locked"),
            Content::Unreadable(reason) => write!(f, "Unreadable({})", reason),
        }
    }
}

/// A record as seen by the caller after loading.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: RecordId,
    pub owner: Option<UserId>,
    pub metadata: RecordMetadata,
    /// Whether the record is stored encrypted. Fixed at creation.
    pub encrypted: bool,
    pub content: Content,
}

impl Record {
    pub(crate) fn owner_of(doc: &Document) -> Option<UserId> {
        doc.str_field(fields::USER_ID)
            .and_then(|uid| UserId::new(uid).ok())
    }
}

/// Split a comma-separated tag list, trimming and dropping empties.
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}
