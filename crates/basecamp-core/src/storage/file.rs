use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{KeyValueStore, StorageError};

/// File extension for stored values.
const VALUE_EXTENSION: &str = "json";

/// Escape character for key bytes that are not safe in file names.
const ESCAPE: char = '~';

/// A stored value together with the time it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stored<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
}

impl<T> Stored<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            stored_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.stored_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Negative ages come from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Key-value store keeping one JSON file per key in a directory.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_key(key), VALUE_EXTENSION))
    }

    /// Load a value with its write time.
    pub fn load_entry(&self, key: &str) -> Result<Option<Stored<String>>, StorageError> {
        let path = self.value_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| StorageError::io(key, e))?;
        let stored: Stored<String> =
            serde_json::from_str(&contents).map_err(|e| StorageError::corrupt(key, e))?;
        Ok(Some(stored))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load_entry(key)?.map(|stored| stored.value))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let stored = Stored::new(value);
        let contents = serde_json::to_string(&stored).map_err(|e| StorageError::corrupt(key, e))?;

        let path = self.value_path(key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, contents).map_err(|e| StorageError::io(key, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| StorageError::io(key, e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| StorageError::io(self.dir.display().to_string(), e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(self.dir.display().to_string(), e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(VALUE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_key(stem) {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                Some(_) => {}
                None => debug!(file = %path.display(), "Skipping file with undecodable name"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Map a key to a file-name-safe string. Bytes outside `[A-Za-z0-9_-]`
/// become `~xx` hex escapes.
pub(crate) fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push(ESCAPE);
            out.push_str(&format!("{:02x}", byte));
        }
    }
    out
}

pub(crate) fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE as u8 {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_encode_decode_key() {
        let key = "tracking/log/00000000000000000001";
        let encoded = encode_key(key);
        assert!(!encoded.contains('/'));
        assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        assert_eq!(decode_key("bad~z"), None);
    }

    #[test]
    fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();

        assert_eq!(store.get("missing").unwrap(), None);
        store.set("greeting", "hello").unwrap();
        assert_eq!(store.get("greeting").unwrap().as_deref(), Some("hello"));

        store.set("greeting", "bye").unwrap();
        assert_eq!(store.get("greeting").unwrap().as_deref(), Some("bye"));

        store.remove("greeting").unwrap();
        assert_eq!(store.get("greeting").unwrap(), None);
        // Removing twice is fine
        store.remove("greeting").unwrap();
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::new(dir.path().to_path_buf()).unwrap();
            store.set("a/b", "1").unwrap();
        }
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.get("a/b").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_keys_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        store.set("tracking/log/2", "b").unwrap();
        store.set("tracking/log/1", "a").unwrap();
        store.set("tracking/head", "2").unwrap();

        let keys = store.keys_with_prefix("tracking/log/").unwrap();
        assert_eq!(keys, vec!["tracking/log/1", "tracking/log/2"]);
    }

    #[test]
    fn test_stored_age_display() {
        let fresh = Stored::new("x");
        assert_eq!(fresh.age_display(), "just now");

        let mut old = Stored::new("x");
        old.stored_at = Utc::now() - Duration::minutes(125);
        assert_eq!(old.age_display(), "2h ago");
    }
}
