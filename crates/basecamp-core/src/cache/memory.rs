use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::net::Response;

use super::{CacheError, CacheStorage};

/// In-process cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    buckets: Mutex<BTreeMap<String, Vec<(String, Response)>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn put(&self, bucket: &str, key: &str, response: &Response) -> Result<(), CacheError> {
        let mut buckets = self.buckets.lock().map_err(|_| CacheError::Poisoned)?;
        let entries = buckets.entry(bucket.to_string()).or_default();
        match entries.iter_mut().find(|(existing, _)| existing == key) {
            Some((_, stored)) => *stored = response.clone(),
            None => entries.push((key.to_string(), response.clone())),
        }
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<Response>, CacheError> {
        let buckets = self.buckets.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(buckets.get(bucket).and_then(|entries| {
            entries
                .iter()
                .find(|(existing, _)| existing == key)
                .map(|(_, response)| response.clone())
        }))
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, CacheError> {
        let buckets = self.buckets.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(buckets
            .get(bucket)
            .map(|entries| entries.iter().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default())
    }

    fn bucket_names(&self) -> Result<Vec<String>, CacheError> {
        let buckets = self.buckets.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(buckets.keys().cloned().collect())
    }

    fn delete_bucket(&self, bucket: &str) -> Result<bool, CacheError> {
        let mut buckets = self.buckets.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(buckets.remove(bucket).is_some())
    }
}
