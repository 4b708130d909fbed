use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{FileStore, KeyValueStore, StorageError, Stored};

use super::GenerationState;

/// Local store key for the last known generation.
const RECORD_KEY: &str = "cache/generation";

/// What a run knew about its generation, kept in the local store so the next
/// run can answer status checks and fetches without reinstalling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub name: String,
    pub asset_list: Vec<String>,
    pub state: GenerationState,
    pub recorded_at: DateTime<Utc>,
}

impl GenerationRecord {
    pub fn new(name: String, asset_list: Vec<String>, state: GenerationState) -> Self {
        Self {
            name,
            asset_list,
            state,
            recorded_at: Utc::now(),
        }
    }

    pub fn load(store: &dyn KeyValueStore) -> Result<Option<Self>, StorageError> {
        match store.get(RECORD_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::corrupt(RECORD_KEY, e)),
            None => Ok(None),
        }
    }

    /// Load the record along with when it was written.
    pub fn load_stored(store: &FileStore) -> Result<Option<Stored<Self>>, StorageError> {
        let Some(entry) = store.load_entry(RECORD_KEY)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&entry.value).map_err(|e| StorageError::corrupt(RECORD_KEY, e))?;
        Ok(Some(Stored {
            value,
            stored_at: entry.stored_at,
        }))
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        let raw = serde_json::to_string(self).map_err(|e| StorageError::corrupt(RECORD_KEY, e))?;
        store.set(RECORD_KEY, &raw)
    }
}
