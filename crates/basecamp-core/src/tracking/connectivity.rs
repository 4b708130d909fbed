use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shared reachability flag with change notification.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(reachable: bool) -> Self {
        let (tx, _) = watch::channel(reachable);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a reachability change. Setting the current value again does
    /// not notify subscribers.
    pub fn set_reachable(&self, reachable: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            info!(reachable, "Connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
