use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt value for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage lock poisoned")]
    Poisoned,
}

impl StorageError {
    pub(crate) fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            key: key.into(),
            source,
        }
    }

    pub(crate) fn corrupt(key: impl Into<String>, source: serde_json::Error) -> Self {
        StorageError::Corrupt {
            key: key.into(),
            source,
        }
    }
}
