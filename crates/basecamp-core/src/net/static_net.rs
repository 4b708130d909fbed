use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{FetchError, Network, Request, Response};

/// A network that serves a fixed set of routes.
///
/// Unknown URLs answer 404. While offline every fetch fails as unreachable.
/// Requested URLs are recorded so callers can check what hit the wire.
#[derive(Debug)]
pub struct StaticNetwork {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    requested: Mutex<Vec<String>>,
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            requested: Mutex::new(Vec::new()),
        }
    }
}

impl StaticNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for the absolute `url`.
    pub fn route(&self, url: &str, response: Response) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.to_string(), response);
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|requested| requested.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Network for StaticNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let key = request.cache_key();
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(key.clone());
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable(format!("offline: {}", key)));
        }

        let routes = self
            .routes
            .lock()
            .map_err(|_| FetchError::Unreachable("route table poisoned".to_string()))?;
        Ok(routes
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Response::empty(404, None)))
    }
}
