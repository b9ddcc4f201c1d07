//! Record reads and writes with transparent field encryption.

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::record::{fields, Content, Record, RecordDraft, RecordMetadata, StoredContent};
use crate::session::Session;
use lockbox_common::{Collection, Error, RecordId, Result, UserId};
use lockbox_crypto::{decrypt_field, encrypt_field, EncryptionKey};
use lockbox_store::{Document, Filter};

/// Outcome of a batch load.
///
/// Records that could not be opened are still listed, with
/// [`Content::Unreadable`]; they never fail the batch.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub records: Vec<Record>,
    /// Requested ids that do not exist or belong to another user.
    pub missing: Vec<RecordId>,
}

impl LoadReport {
    pub(crate) fn from_documents<'d>(
        docs: impl IntoIterator<Item = &'d Document>,
        key: Option<&EncryptionKey>,
    ) -> Self {
        Self {
            records: docs.into_iter().map(|doc| open_document(doc, key)).collect(),
            missing: Vec::new(),
        }
    }

    /// Number of records whose content could not be read.
    pub fn unreadable(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.content, Content::Unreadable(_)))
            .count()
    }

    /// Number of encrypted records left closed for lack of a key.
    pub fn locked(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.content, Content::Locked))
            .count()
    }
}

/// Turn a stored document into a record, decrypting when a key is given.
///
/// Never fails: problems with a single document are reported as
/// [`Content::Unreadable`] and logged.
pub fn open_document(doc: &Document, key: Option<&EncryptionKey>) -> Record {
    let metadata = RecordMetadata::from_fields(&doc.fields);

    let (encrypted, content) = match StoredContent::from_fields(&doc.fields) {
        Ok(StoredContent::Plain(text)) => (false, Content::Available(text.into())),
        Ok(StoredContent::Encrypted(envelope)) => match key {
            None => (true, Content::Locked),
            Some(key) => match decrypt_field(key, &envelope) {
                Ok(text) => (true, Content::Available(text.into())),
                Err(e) => {
                    warn!(record = %doc.id, error = %e, "Record could not be decrypted");
                    (true, Content::Unreadable(e.to_string()))
                }
            },
        },
        Err(e) => {
            warn!(record = %doc.id, error = %e, "Record is malformed");
            (
                doc.bool_field(fields::ENCRYPTED).unwrap_or(false),
                Content::Unreadable(e.to_string()),
            )
        }
    };

    Record {
        id: doc.id.clone(),
        owner: Record::owner_of(doc),
        metadata,
        encrypted,
        content,
    }
}

/// Record operations for the signed-in user.
///
/// Borrowing the session keeps its state fixed for the lifetime of the
/// accessor.
pub struct RecordAccess<'a> {
    session: &'a Session,
    owner: UserId,
}

impl<'a> RecordAccess<'a> {
    /// Create an accessor for the session's user.
    ///
    /// # Errors
    /// - `NotPermitted` if nobody is logged in
    pub fn new(session: &'a Session) -> Result<Self> {
        let owner = session.user()?.clone();
        Ok(Self { session, owner })
    }

    fn owner_filter(&self) -> Filter {
        Filter::eq(fields::USER_ID, self.owner.as_str())
    }

    /// Create a record.
    ///
    /// Metadata is always stored in the clear. With `want_encrypted` the
    /// content is sealed under the session key; otherwise it is stored as is.
    ///
    /// # Errors
    /// - `InvalidInput` if the draft is incomplete, or encryption is asked
    ///   for in a collection that does not support it
    /// - `EncryptionUnavailable` if encryption is asked for while locked
    /// - `StoreUnavailable` if the write fails
    pub async fn save(
        &self,
        collection: Collection,
        draft: RecordDraft,
        want_encrypted: bool,
    ) -> Result<RecordId> {
        draft.validate()?;

        let content = if want_encrypted {
            if !collection.supports_encryption() {
                return Err(Error::InvalidInput(format!(
                    "Collection '{}' does not support encryption",
                    collection
                )));
            }
            let key = self.session.key().ok_or(Error::EncryptionUnavailable)?;
            StoredContent::Encrypted(encrypt_field(&key, draft.content.expose())?)
        } else {
            StoredContent::Plain(draft.content.expose().to_string())
        };

        let mut doc = draft.metadata_fields(&self.owner, Utc::now());
        content.write_into(&mut doc);

        let id = self.session.store().add(collection.name(), doc).await?;
        info!(
            user = %self.owner,
            collection = %collection,
            record = %id,
            encrypted = want_encrypted,
            "Record saved"
        );
        Ok(id)
    }

    /// Load every record the user owns in a collection.
    ///
    /// # Errors
    /// - `StoreUnavailable` if the query fails
    pub async fn load(&self, collection: Collection) -> Result<LoadReport> {
        debug!(user = %self.owner, collection = %collection, "Loading records");
        let docs = self
            .session
            .store()
            .query(collection.name(), &self.owner_filter())
            .await?;

        let key = self.session.key();
        let report = LoadReport::from_documents(&docs, key.as_deref());
        debug!(
            collection = %collection,
            records = report.records.len(),
            unreadable = report.unreadable(),
            "Records loaded"
        );
        Ok(report)
    }

    /// Load specific records, reading them concurrently.
    ///
    /// Records come back in request order. Ids that do not exist, or that
    /// belong to another user, are listed in [`LoadReport::missing`].
    ///
    /// # Errors
    /// - `StoreUnavailable` if any read fails
    pub async fn load_ids(&self, collection: Collection, ids: &[RecordId]) -> Result<LoadReport> {
        let store = self.session.store();
        let reads = ids.iter().map(|id| store.get(collection.name(), id));
        let results = join_all(reads).await;

        let key = self.session.key();
        let mut report = LoadReport::default();
        for (id, result) in ids.iter().zip(results) {
            match result? {
                Some(doc) if self.owns(&doc) => {
                    report.records.push(open_document(&doc, key.as_deref()))
                }
                Some(_) => {
                    debug!(collection = %collection, record = %id, "Skipping record of another user");
                    report.missing.push(id.clone());
                }
                None => report.missing.push(id.clone()),
            }
        }
        Ok(report)
    }

    /// Delete one of the user's records.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist or belongs to another user
    /// - `StoreUnavailable` if the store fails
    pub async fn delete(&self, collection: Collection, id: &RecordId) -> Result<()> {
        let store = self.session.store();
        match store.get(collection.name(), id).await? {
            Some(doc) if self.owns(&doc) => {}
            _ => {
                return Err(Error::NotFound(format!(
                    "Record not found: {}/{}",
                    collection, id
                )))
            }
        }

        store.delete(collection.name(), id).await?;
        info!(user = %self.owner, collection = %collection, record = %id, "Record deleted");
        Ok(())
    }

    fn owns(&self, doc: &Document) -> bool {
        Record::owner_of(doc).as_ref() == Some(&self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use lockbox_crypto::KdfParams;
    use lockbox_store::{DocumentStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    async fn unlocked(store: &MemoryStore, uid: &str) -> Session {
        let mut session = Session::new(Arc::new(store.clone()), KdfParams::testing());
        session
            .login_with_password(Identity::new(uid).unwrap(), &"pw".into())
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_accessor_requires_login() {
        let session = Session::new(Arc::new(MemoryStore::new()), KdfParams::testing());
        assert!(matches!(
            RecordAccess::new(&session),
            Err(Error::NotPermitted(_))
        ));
    }

    #[tokio::test]
    async fn test_cleartext_save_and_load() {
        let store = MemoryStore::new();
        let session = unlocked(&store, "u1").await;
        let access = RecordAccess::new(&session).unwrap();

        let draft = RecordDraft::new("Shopping", "milk").with_tags(vec!["home".into()]);
        let id = access.save(Collection::Notes, draft, false).await.unwrap();

        let doc = store.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(doc.bool_field("encrypted"), Some(false));
        assert_eq!(doc.str_field("content"), Some("milk"));
        assert_eq!(doc.bool_field("pinned"), Some(false));
        assert!(doc.str_field("createdAt").is_some());

        let report = access.load(Collection::Notes).await.unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].content.text(), Some("milk"));
        assert_eq!(report.records[0].metadata.tags, vec!["home"]);
    }

    #[tokio::test]
    async fn test_encryption_rejected_for_plain_collections() {
        let store = MemoryStore::new();
        let session = unlocked(&store, "u1").await;
        let access = RecordAccess::new(&session).unwrap();

        let result = access
            .save(Collection::Todos, RecordDraft::new("Call", "mum"), true)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.count("todos"), 0);
    }

    #[tokio::test]
    async fn test_invalid_draft_writes_nothing() {
        let store = MemoryStore::new();
        let session = unlocked(&store, "u1").await;
        let access = RecordAccess::new(&session).unwrap();

        let result = access
            .save(Collection::Notes, RecordDraft::new("", "body"), false)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.count("notes"), 0);
    }

    #[tokio::test]
    async fn test_queries_are_scoped_to_owner() {
        let store = MemoryStore::new();
        let alice = unlocked(&store, "alice").await;
        let bob = unlocked(&store, "bob").await;

        let id = RecordAccess::new(&alice)
            .unwrap()
            .save(Collection::Notes, RecordDraft::new("Mine", "private"), false)
            .await
            .unwrap();

        let bob_access = RecordAccess::new(&bob).unwrap();
        assert!(bob_access.load(Collection::Notes).await.unwrap().records.is_empty());

        let report = bob_access
            .load_ids(Collection::Notes, &[id.clone()])
            .await
            .unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.missing, vec![id.clone()]);

        assert!(matches!(
            bob_access.delete(Collection::Notes, &id).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(store.count("notes"), 1);
    }

    #[tokio::test]
    async fn test_delete_own_record() {
        let store = MemoryStore::new();
        let session = unlocked(&store, "u1").await;
        let access = RecordAccess::new(&session).unwrap();

        let id = access
            .save(Collection::Passwords, RecordDraft::new("Bank", "hunter2"), true)
            .await
            .unwrap();
        access.delete(Collection::Passwords, &id).await.unwrap();
        assert_eq!(store.count("passwords"), 0);
    }

    #[test]
    fn test_open_document_reports_malformed() {
        let doc = Document::new(
            RecordId::new("r1"),
            json!({"userId": "u1", "title": "t", "encrypted": true})
                .as_object()
                .cloned()
                .unwrap(),
        );

        let record = open_document(&doc, None);
        assert!(record.encrypted);
        assert!(matches!(record.content, Content::Unreadable(_)));
        assert_eq!(record.metadata.title, "t");
    }
}
