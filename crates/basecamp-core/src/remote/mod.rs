//! Remote document store client.
//!
//! The core only needs four operations from the managed database: upsert by
//! id, append with a generated id, delete by field equality and read a whole
//! collection. The store stamps every write with its own `written_at` time.
//!
//! No cross-record transactions are assumed; every write is independent.

pub mod credentials;
pub mod error;
pub mod memory;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use credentials::ApiKeyStore;
pub use error::RemoteError;
pub use memory::MemoryDocumentStore;
pub use rest::RestDocumentStore;

/// A document body: a JSON object.
pub type Document = Map<String, Value>;

/// A document as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    pub fields: Document,
    pub written_at: DateTime<Utc>,
}

impl StoredDocument {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or replace the document `id` in `collection`.
    async fn upsert(&self, collection: &str, id: &str, doc: Document) -> Result<(), RemoteError>;

    /// Add a document with a store-generated id, returning the id.
    async fn append(&self, collection: &str, doc: Document) -> Result<String, RemoteError>;

    /// Delete every document whose `field` equals `value`. Returns the count.
    async fn delete_where(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<usize, RemoteError>;

    async fn read_all(&self, collection: &str) -> Result<Vec<StoredDocument>, RemoteError>;
}
