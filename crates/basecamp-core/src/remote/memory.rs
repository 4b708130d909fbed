use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use super::{Document, DocumentStore, RemoteError, StoredDocument};

/// Length of generated document ids.
const GENERATED_ID_LEN: usize = 20;

type Collections = HashMap<String, BTreeMap<String, StoredDocument>>;

/// In-process document store.
///
/// While marked unavailable every call fails with `RemoteError::Unavailable`,
/// which is how callers exercise offline behavior.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<Collections>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of successful upserts and appends so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn with_collections<T>(&self, f: impl FnOnce(&mut Collections) -> T) -> Result<T, RemoteError> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| RemoteError::ServerError("store lock poisoned".to_string()))?;
        Ok(f(&mut collections))
    }

    fn insert(&self, collection: &str, id: String, doc: Document) -> Result<(), RemoteError> {
        let stored = StoredDocument {
            id: id.clone(),
            fields: doc,
            written_at: Utc::now(),
        };
        self.with_collections(|collections| {
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id, stored);
        })?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, doc: Document) -> Result<(), RemoteError> {
        self.check_available()?;
        self.insert(collection, id.to_string(), doc)
    }

    async fn append(&self, collection: &str, doc: Document) -> Result<String, RemoteError> {
        self.check_available()?;
        let id = generate_id();
        self.insert(collection, id.clone(), doc)?;
        Ok(id)
    }

    async fn delete_where(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<usize, RemoteError> {
        self.check_available()?;
        self.with_collections(|collections| {
            let Some(docs) = collections.get_mut(collection) else {
                return 0;
            };
            let before = docs.len();
            docs.retain(|_, doc| doc.fields.get(field) != Some(value));
            before - docs.len()
        })
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<StoredDocument>, RemoteError> {
        self.check_available()?;
        self.with_collections(|collections| {
            collections
                .get(collection)
                .map(|docs| docs.values().cloned().collect())
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = MemoryDocumentStore::new();
        store.upsert("locations", "Kim", doc(json!({"lat": 1.0}))).await.unwrap();
        store.upsert("locations", "Kim", doc(json!({"lat": 2.0}))).await.unwrap();

        let all = store.read_all("locations").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].field("lat"), Some(&json!(2.0)));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_append_generates_distinct_ids() {
        let store = MemoryDocumentStore::new();
        let a = store.append("history", doc(json!({"n": 1}))).await.unwrap();
        let b = store.append("history", doc(json!({"n": 1}))).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), GENERATED_ID_LEN);
        assert_eq!(store.read_all("history").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_where_matches_field() {
        let store = MemoryDocumentStore::new();
        store.append("history", doc(json!({"who": "Kim"}))).await.unwrap();
        store.append("history", doc(json!({"who": "Kim"}))).await.unwrap();
        store.append("history", doc(json!({"who": "Ari"}))).await.unwrap();

        let deleted = store.delete_where("history", "who", &json!("Kim")).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.read_all("history").await.unwrap().len(), 1);
        assert_eq!(store.delete_where("missing", "who", &json!("Kim")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let store = MemoryDocumentStore::new();
        store.set_available(false);
        assert!(matches!(
            store.append("history", Document::new()).await,
            Err(RemoteError::Unavailable)
        ));
        assert!(store.read_all("history").await.is_err());

        store.set_available(true);
        assert!(store.read_all("history").await.unwrap().is_empty());
    }
}
