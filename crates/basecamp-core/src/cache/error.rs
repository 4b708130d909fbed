use thiserror::Error;

use crate::net::FetchError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache storage I/O error in {bucket}: {source}")]
    Io {
        bucket: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache index for {bucket}: {source}")]
    CorruptIndex {
        bucket: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid asset manifest: {0}")]
    Manifest(String),

    #[error("Generation {0} has not finished installing")]
    NotPopulated(String),

    #[error("Cache storage lock poisoned")]
    Poisoned,
}
