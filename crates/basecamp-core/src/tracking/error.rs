use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Local buffer error: {0}")]
    Storage(#[from] StorageError),

    #[error("Corrupt log entry {seq}: {source}")]
    CorruptEntry {
        seq: u64,
        #[source]
        source: serde_json::Error,
    },
}
