use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::net::Response;
use crate::storage::file::{decode_key, encode_key};

use super::{CacheError, CacheStorage};

/// Index file name inside each bucket directory.
const INDEX_FILE: &str = "index.json";

/// File extension for response bodies.
const BODY_EXTENSION: &str = "body";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    key: String,
    body_file: String,
    status: u16,
    content_type: Option<String>,
    cached_at: DateTime<Utc>,
}

/// Cache storage on disk: one directory per bucket holding an `index.json`
/// and one body file per entry, named by the SHA-256 of the key.
pub struct DiskCacheStorage {
    root: PathBuf,
    // Serializes index read-modify-write
    lock: Mutex<()>,
}

impl DiskCacheStorage {
    pub fn new(root: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&root).map_err(|e| CacheError::Io {
            bucket: root.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(encode_key(bucket))
    }

    fn body_file_name(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        format!("{}.{}", hex::encode(digest), BODY_EXTENSION)
    }

    fn io_error(bucket: &str, source: std::io::Error) -> CacheError {
        CacheError::Io {
            bucket: bucket.to_string(),
            source,
        }
    }

    fn load_index(&self, bucket: &str) -> Result<Vec<IndexEntry>, CacheError> {
        let path = self.bucket_dir(bucket).join(INDEX_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| Self::io_error(bucket, e))?;
        serde_json::from_str(&contents).map_err(|e| CacheError::CorruptIndex {
            bucket: bucket.to_string(),
            source: e,
        })
    }

    fn save_index(&self, bucket: &str, index: &[IndexEntry]) -> Result<(), CacheError> {
        let path = self.bucket_dir(bucket).join(INDEX_FILE);
        let contents = serde_json::to_string_pretty(index).map_err(|e| CacheError::CorruptIndex {
            bucket: bucket.to_string(),
            source: e,
        })?;
        write_atomic(&path, contents.as_bytes()).map_err(|e| Self::io_error(bucket, e))
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

impl CacheStorage for DiskCacheStorage {
    fn put(&self, bucket: &str, key: &str, response: &Response) -> Result<(), CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;

        let dir = self.bucket_dir(bucket);
        std::fs::create_dir_all(&dir).map_err(|e| Self::io_error(bucket, e))?;

        let body_file = Self::body_file_name(key);
        write_atomic(&dir.join(&body_file), &response.body).map_err(|e| Self::io_error(bucket, e))?;

        let entry = IndexEntry {
            key: key.to_string(),
            body_file,
            status: response.status,
            content_type: response.content_type.clone(),
            cached_at: Utc::now(),
        };
        let mut index = self.load_index(bucket)?;
        match index.iter_mut().find(|existing| existing.key == key) {
            Some(existing) => *existing = entry,
            None => index.push(entry),
        }
        self.save_index(bucket, &index)?;
        debug!(bucket, key, bytes = response.body.len(), "Cached response");
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<Response>, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;

        let index = self.load_index(bucket)?;
        let Some(entry) = index.into_iter().find(|entry| entry.key == key) else {
            return Ok(None);
        };

        let body_path = self.bucket_dir(bucket).join(&entry.body_file);
        match std::fs::read(&body_path) {
            Ok(body) => Ok(Some(Response {
                status: entry.status,
                content_type: entry.content_type,
                body,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(bucket, key, "Cache index points at a missing body file");
                Ok(None)
            }
            Err(e) => Err(Self::io_error(bucket, e)),
        }
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(self
            .load_index(bucket)?
            .into_iter()
            .map(|entry| entry.key)
            .collect())
    }

    fn bucket_names(&self) -> Result<Vec<String>, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        let root = self.root.display().to_string();
        let entries = std::fs::read_dir(&self.root).map_err(|e| Self::io_error(&root, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_error(&root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str().and_then(decode_key) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete_bucket(&self, bucket: &str) -> Result<bool, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        let dir = self.bucket_dir(bucket);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(|e| Self::io_error(bucket, e))?;
        Ok(true)
    }
}
