//! Fetch primitive consumed by the cache manager.
//!
//! A [`Network`] turns a [`Request`] into a [`Response`]. HTTP error statuses
//! come back as responses; only transport failures are errors.

pub mod http;
pub mod static_net;

use std::borrow::Cow;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub use http::HttpNetwork;
pub use static_net::StaticNetwork;

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_CSS: &str = "text/css";
pub const CONTENT_TYPE_JS: &str = "text/javascript";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// A top-level page navigation.
    Navigate,
    /// Anything else: stylesheets, scripts, images, data.
    Subresource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    url: Url,
    mode: RequestMode,
}

impl Request {
    pub fn new(mut url: Url, mode: RequestMode) -> Self {
        url.set_fragment(None);
        Self { url, mode }
    }

    pub fn navigate(url: Url) -> Self {
        Self::new(url, RequestMode::Navigate)
    }

    pub fn subresource(url: Url) -> Self {
        Self::new(url, RequestMode::Subresource)
    }

    /// Resolve `path` against `origin`. Absolute URLs are taken as-is.
    pub fn resolve(origin: &Url, path: &str, mode: RequestMode) -> Result<Self, FetchError> {
        let url = origin
            .join(path)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", path, e)))?;
        Ok(Self::new(url, mode))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// The key this request is stored under in a cache bucket.
    pub fn cache_key(&self) -> String {
        self.url.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    pub fn html(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, Some(CONTENT_TYPE_HTML), body)
    }

    pub fn empty(status: u16, content_type: Option<&str>) -> Self {
        Self::new(status, content_type, Vec::new())
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
