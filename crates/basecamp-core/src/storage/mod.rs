//! Local durable key-value storage.
//!
//! The store is synchronous and survives process restarts (for `FileStore`).
//! Values are opaque strings; callers serialize their own data.

pub mod error;
pub mod file;
pub mod memory;

pub use error::StorageError;
pub use file::{FileStore, Stored};
pub use memory::MemoryStore;

/// A synchronous string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Missing keys are `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
