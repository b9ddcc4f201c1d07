//! Document store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::subscription::Subscription;
use lockbox_common::{RecordId, Result};

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// A document as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned identifier.
    pub id: RecordId,
    /// Document fields.
    pub fields: Fields,
}

impl Document {
    pub fn new(id: RecordId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// String value of a field, if present and a string.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Boolean value of a field, if present and a boolean.
    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(Value::as_bool)
    }
}

/// Equality filter over document fields.
///
/// An empty filter matches every document in the collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Filter matching all documents.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching documents whose `field` equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    /// Add another equality condition.
    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Check a field map against every condition.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.conditions
            .iter()
            .all(|(name, expected)| fields.get(name) == Some(expected))
    }
}

/// Document store trait for different backends.
///
/// Implementations handle their own connectivity, retry and timeout policy.
/// Any backend failure is reported as `Error::StoreUnavailable`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Return every document in `collection` matching `filter`.
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Fetch one document by id.
    ///
    /// Returns `Ok(None)` if the document does not exist.
    async fn get(&self, collection: &str, id: &RecordId) -> Result<Option<Document>>;

    /// Insert a new document, returning its generated id.
    async fn add(&self, collection: &str, fields: Fields) -> Result<RecordId>;

    /// Create or replace the document with the given id.
    async fn put(&self, collection: &str, id: &RecordId, fields: Fields) -> Result<()>;

    /// Delete a document.
    ///
    /// # Errors
    /// - `NotFound` if the document does not exist
    async fn delete(&self, collection: &str, id: &RecordId) -> Result<()>;

    /// Subscribe to real-time snapshots of a query.
    ///
    /// The first snapshot is delivered immediately; every later snapshot is
    /// complete and replaces the previous one.
    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_matches_equal_fields() {
        let doc = fields(json!({"userId": "u1", "encrypted": true}));

        assert!(Filter::all().matches(&doc));
        assert!(Filter::eq("userId", "u1").matches(&doc));
        assert!(Filter::eq("userId", "u1").and_eq("encrypted", true).matches(&doc));
        assert!(!Filter::eq("userId", "u2").matches(&doc));
        assert!(!Filter::eq("missing", "u1").matches(&doc));
    }

    #[test]
    fn test_document_accessors() {
        let doc = Document::new(
            RecordId::new("d1"),
            fields(json!({"title": "hello", "pinned": false, "count": 3})),
        );

        assert_eq!(doc.str_field("title"), Some("hello"));
        assert_eq!(doc.bool_field("pinned"), Some(false));
        assert_eq!(doc.str_field("count"), None);
    }
}
