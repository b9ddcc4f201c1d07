//! Local filesystem document store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::store::{Document, DocumentStore, Fields, Filter};
use crate::subscription::{ChangeFeed, Subscription};
use lockbox_common::{Error, RecordId, Result};

type CollectionFile = BTreeMap<RecordId, Fields>;

/// Local filesystem document store.
///
/// Each collection is one JSON file under the root directory. Writes are
/// serialized within the process and replace the file atomically. Change
/// notifications only cover writes made through this process.
#[derive(Clone)]
pub struct LocalStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
    feed: ChangeFeed,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied or invalid path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
            feed: ChangeFeed::default(),
        })
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::InvalidInput(format!(
                "Invalid collection name: {:?}",
                collection
            )));
        }
        Ok(self.root.join(format!("{}.json", collection)))
    }

    async fn read_collection(&self, collection: &str) -> Result<CollectionFile> {
        let path = self.collection_path(collection)?;

        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| unavailable(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CollectionFile::new()),
            Err(e) => Err(unavailable(&path, e)),
        }
    }

    async fn write_collection(&self, collection: &str, docs: &CollectionFile) -> Result<()> {
        let path = self.collection_path(collection)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(docs)?;

        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| unavailable(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| unavailable(&path, e))?;

        debug!(collection, documents = docs.len(), "Collection file written");
        Ok(())
    }
}

fn unavailable(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl DocumentStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let docs = self.read_collection(collection).await?;

        Ok(docs
            .into_iter()
            .filter(|(_, fields)| filter.matches(fields))
            .map(|(id, fields)| Document::new(id, fields))
            .collect())
    }

    async fn get(&self, collection: &str, id: &RecordId) -> Result<Option<Document>> {
        let mut docs = self.read_collection(collection).await?;
        Ok(docs.remove(id).map(|fields| Document::new(id.clone(), fields)))
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<RecordId> {
        let id = RecordId::new(Uuid::new_v4().to_string());
        self.put(collection, &id, fields).await?;
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &RecordId, fields: Fields) -> Result<()> {
        {
            let _guard = self.write_lock.lock().await;
            let mut docs = self.read_collection(collection).await?;
            docs.insert(id.clone(), fields);
            self.write_collection(collection, &docs).await?;
        }

        self.feed.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> Result<()> {
        {
            let _guard = self.write_lock.lock().await;
            let mut docs = self.read_collection(collection).await?;
            if docs.remove(id).is_none() {
                return Err(Error::NotFound(format!(
                    "Document not found: {}/{}",
                    collection, id
                )));
            }
            self.write_collection(collection, &docs).await?;
        }

        self.feed.notify(collection);
        Ok(())
    }

    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<Subscription> {
        self.collection_path(collection)?;
        Ok(self
            .feed
            .subscribe(Arc::new(self.clone()), collection, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = LocalStore::new(dir.path()).unwrap();
            store
                .add("notes", fields(json!({"title": "kept"})))
                .await
                .unwrap()
        };

        let reopened = LocalStore::new(dir.path()).unwrap();
        let doc = reopened.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(doc.str_field("title"), Some("kept"));
    }

    #[tokio::test]
    async fn test_query_missing_collection_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();

        assert!(store.query("expenses", &Filter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_filter() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        store.add("todos", fields(json!({"userId": "a"}))).await.unwrap();
        store.add("todos", fields(json!({"userId": "b"}))).await.unwrap();

        let docs = store.query("todos", &Filter::eq("userId", "b")).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let id = store.add("todos", Fields::new()).await.unwrap();

        store.delete("todos", &id).await.unwrap();
        assert!(store.get("todos", &id).await.unwrap().is_none());
        assert!(matches!(
            store.delete("todos", &id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_collection_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("notes.json"), b"{\"trunc").unwrap();

        assert!(matches!(
            store.query("notes", &Filter::all()).await,
            Err(Error::StoreUnavailable(_))
        ));
        assert!(matches!(
            store.add("notes", Fields::new()).await,
            Err(Error::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_like_collection_names() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();

        assert!(matches!(
            store.query("../etc", &Filter::all()).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_sees_local_writes() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let mut sub = store.subscribe("notes", Filter::all()).await.unwrap();

        assert_eq!(sub.next().await.unwrap().unwrap().len(), 0);
        store.add("notes", Fields::new()).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 1);
    }
}
