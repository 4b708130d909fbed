use crate::net::Response;

use super::CacheError;

/// Named buckets of cached responses.
///
/// Keys are normalized request URLs. `keys` returns them in insertion order;
/// re-putting an existing key keeps its position.
pub trait CacheStorage: Send + Sync {
    fn put(&self, bucket: &str, key: &str, response: &Response) -> Result<(), CacheError>;

    fn get(&self, bucket: &str, key: &str) -> Result<Option<Response>, CacheError>;

    /// Keys stored in `bucket`. A missing bucket has no keys.
    fn keys(&self, bucket: &str) -> Result<Vec<String>, CacheError>;

    fn bucket_names(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a bucket and everything in it. Returns whether it existed.
    fn delete_bucket(&self, bucket: &str) -> Result<bool, CacheError>;
}

/// A view of one bucket.
pub struct Bucket<'a> {
    storage: &'a dyn CacheStorage,
    name: &'a str,
}

impl<'a> Bucket<'a> {
    pub fn new(storage: &'a dyn CacheStorage, name: &'a str) -> Self {
        Self { storage, name }
    }

    pub fn put(&self, key: &str, response: &Response) -> Result<(), CacheError> {
        self.storage.put(self.name, key, response)
    }

    pub fn get(&self, key: &str) -> Result<Option<Response>, CacheError> {
        self.storage.get(self.name, key)
    }

    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.storage.keys(self.name)
    }
}
