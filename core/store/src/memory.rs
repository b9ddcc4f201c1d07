//! In-memory document store for testing.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::store::{Document, DocumentStore, Fields, Filter};
use crate::subscription::{ChangeFeed, Subscription};
use lockbox_common::{Error, RecordId, Result};

type CollectionMap = BTreeMap<RecordId, Fields>;

/// In-memory document store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, CollectionMap>>>,
    available: Arc<AtomicBool>,
    feed: ChangeFeed,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            feed: ChangeFeed::default(),
        }
    }

    /// Simulate the backend going offline (or coming back).
    ///
    /// While unavailable every operation fails with `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total number of documents in a collection, ignoring filters.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store is offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.ensure_available()?;
        let collections = self.collections.read();

        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| filter.matches(fields))
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &RecordId) -> Result<Option<Document>> {
        self.ensure_available()?;
        let collections = self.collections.read();

        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id.clone(), fields.clone())))
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<RecordId> {
        self.ensure_available()?;
        let id = RecordId::new(Uuid::new_v4().to_string());

        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);

        self.feed.notify(collection);
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &RecordId, fields: Fields) -> Result<()> {
        self.ensure_available()?;

        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);

        self.feed.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> Result<()> {
        self.ensure_available()?;

        let removed = self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));

        match removed {
            Some(_) => {
                self.feed.notify(collection);
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "Document not found: {}/{}",
                collection, id
            ))),
        }
    }

    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<Subscription> {
        self.ensure_available()?;
        Ok(self
            .feed
            .subscribe(Arc::new(self.clone()), collection, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let store = MemoryStore::new();
        let id = store
            .add("notes", fields(json!({"title": "first"})))
            .await
            .unwrap();

        let doc = store.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(doc.str_field("title"), Some("first"));
        assert!(store.get("notes", &RecordId::new("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_filters_by_owner() {
        let store = MemoryStore::new();
        store.add("notes", fields(json!({"userId": "a"}))).await.unwrap();
        store.add("notes", fields(json!({"userId": "a"}))).await.unwrap();
        store.add("notes", fields(json!({"userId": "b"}))).await.unwrap();

        let mine = store.query("notes", &Filter::eq("userId", "a")).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(store.query("todos", &Filter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let store = MemoryStore::new();
        let id = RecordId::new("fixed");
        store.put("keychecks", &id, fields(json!({"v": 1}))).await.unwrap();
        store.put("keychecks", &id, fields(json!({"v": 2}))).await.unwrap();

        let doc = store.get("keychecks", &id).await.unwrap().unwrap();
        assert_eq!(doc.fields.get("v"), Some(&json!(2)));
        assert_eq!(store.count("keychecks"), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        let id = store.add("todos", Fields::new()).await.unwrap();

        store.delete("todos", &id).await.unwrap();
        assert!(matches!(
            store.delete("todos", &id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(
            store.query("notes", &Filter::all()).await,
            Err(Error::StoreUnavailable(_))
        ));
        assert!(store.add("notes", Fields::new()).await.is_err());

        store.set_available(true);
        assert!(store.query("notes", &Filter::all()).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscription_delivers_complete_snapshots() {
        let store = MemoryStore::new();
        store.add("notes", fields(json!({"userId": "a"}))).await.unwrap();

        let mut sub = store
            .subscribe("notes", Filter::eq("userId", "a"))
            .await
            .unwrap();

        let initial = sub.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);

        store.add("notes", fields(json!({"userId": "a"}))).await.unwrap();
        let updated = sub.next().await.unwrap().unwrap();
        assert_eq!(updated.len(), 2);

        // Writes to other owners still produce a full, filtered snapshot.
        store.add("notes", fields(json!({"userId": "b"}))).await.unwrap();
        let unchanged = sub.next().await.unwrap().unwrap();
        assert_eq!(unchanged.len(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("notes", Filter::all()).await.unwrap();
        sub.next().await.unwrap().unwrap();

        sub.unsubscribe();
        assert!(!sub.is_active());
        store.add("notes", Fields::new()).await.unwrap();
        assert!(sub.next().await.is_none());
    }
}
