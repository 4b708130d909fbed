use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Number of missing paths named in an error message.
const MAX_LISTED_MISSING: usize = 3;

/// Offline readiness of a generation, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Checking,
    Caching,
    Ready,
    Error,
}

impl CacheStatus {
    /// Pollers stop once they see a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, CacheStatus::Ready | CacheStatus::Error)
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheStatus::Checking => "checking",
            CacheStatus::Caching => "caching",
            CacheStatus::Ready => "ready",
            CacheStatus::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: CacheStatus,
    pub error: Option<String>,
}

impl StatusReport {
    pub fn new(status: CacheStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CacheStatus::Error,
            error: Some(message.into()),
        }
    }
}

/// The path component of an asset entry or cache key. Query strings,
/// fragments and origins are ignored.
pub fn path_of(entry: &str) -> String {
    if let Ok(url) = Url::parse(entry) {
        return url.path().to_string();
    }
    let end = entry.find(['?', '#']).unwrap_or(entry.len());
    let path = &entry[..end];
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Compare the asset list against the keys actually stored.
///
/// All present is `ready`, some present is `caching`, none present is
/// `error` with up to three missing paths named. An empty asset list is an
/// `error` as well: there is nothing to serve offline.
pub fn compute_status(asset_list: &[String], stored_keys: &[String]) -> StatusReport {
    if asset_list.is_empty() {
        return StatusReport::error("No assets are configured for offline use");
    }

    let stored: HashSet<String> = stored_keys.iter().map(|key| path_of(key)).collect();
    let missing: Vec<String> = asset_list
        .iter()
        .map(|asset| path_of(asset))
        .filter(|path| !stored.contains(path))
        .collect();

    if missing.is_empty() {
        StatusReport::new(CacheStatus::Ready)
    } else if missing.len() < asset_list.len() {
        StatusReport::new(CacheStatus::Caching)
    } else {
        let mut listed = missing
            .iter()
            .take(MAX_LISTED_MISSING)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if missing.len() > MAX_LISTED_MISSING {
            listed.push_str("...");
        }
        StatusReport::error(format!("Offline cache is empty; missing {}", listed))
    }
}
