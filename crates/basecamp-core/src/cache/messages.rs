//! Page ↔ background message protocol.
//!
//! ```json
//! {"type": "CHECK_CACHE"}
//! {"type": "CACHE_STATUS", "status": "caching"}
//! {"type": "CACHE_STATUS", "status": "error", "error": "Offline cache is empty; missing /"}
//! {"type": "CACHE_PROGRESS", "progress": 42}
//! ```

use serde::{Deserialize, Serialize};

use super::status::{CacheStatus, StatusReport};

/// Messages a page sends to the cache manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    CheckCache,
}

/// Messages the cache manager sends to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    CacheStatus {
        status: CacheStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CacheProgress {
        progress: u8,
    },
}

impl From<StatusReport> for WorkerMessage {
    fn from(report: StatusReport) -> Self {
        WorkerMessage::CacheStatus {
            status: report.status,
            error: report.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_cache_wire_format() {
        let message: PageMessage = serde_json::from_value(json!({"type": "CHECK_CACHE"})).unwrap();
        assert_eq!(message, PageMessage::CheckCache);
    }

    #[test]
    fn test_status_wire_format() {
        let ready = WorkerMessage::from(StatusReport::new(CacheStatus::Ready));
        assert_eq!(
            serde_json::to_value(&ready).unwrap(),
            json!({"type": "CACHE_STATUS", "status": "ready"})
        );

        let failed = WorkerMessage::from(StatusReport::error("missing /"));
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"type": "CACHE_STATUS", "status": "error", "error": "missing /"})
        );
    }

    #[test]
    fn test_progress_wire_format() {
        let progress = WorkerMessage::CacheProgress { progress: 42 };
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({"type": "CACHE_PROGRESS", "progress": 42})
        );
    }
}
