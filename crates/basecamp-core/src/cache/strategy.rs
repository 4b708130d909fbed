//! Ranked fetch resolution.
//!
//! A [`FetchStrategy`] is an ordered list of [`Matcher`]s; the first matcher
//! that produces a response wins. Navigations and sub-resources use
//! different rankings:
//!
//! - navigation: network → cached root document → cached offline page → 503 page
//! - sub-resource: exact cache hit → any cached resource of the same kind →
//!   network → typed empty response
//!
//! The same-kind substitute keeps pages rendering when a deploy changed hashed
//! file names and the new files never made it into the bucket.

use tracing::{debug, trace, warn};
use url::Url;

use crate::net::{Network, Request, RequestMode, Response, CONTENT_TYPE_CSS, CONTENT_TYPE_JS};

use super::status::path_of;
use super::CacheStorage;

/// Body served for navigations when nothing else is available.
pub const OFFLINE_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<title>Offline</title></head><body><h1>You are offline</h1>\
<p>This page is not available without a connection.</p></body></html>";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Stylesheet,
    Script,
    Image,
    Other,
}

impl ResourceKind {
    pub fn from_path(path: &str) -> Self {
        let extension = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("css") => ResourceKind::Stylesheet,
            Some("js") | Some("mjs") => ResourceKind::Script,
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => ResourceKind::Image,
            _ => ResourceKind::Other,
        }
    }

    /// Whether a cached resource of this kind can stand in for another.
    pub fn substitutable(self) -> bool {
        matches!(self, ResourceKind::Stylesheet | ResourceKind::Script)
    }

    /// The last-resort response for this kind.
    pub fn empty_response(self) -> Response {
        match self {
            ResourceKind::Stylesheet => Response::empty(200, Some(CONTENT_TYPE_CSS)),
            ResourceKind::Script => Response::empty(200, Some(CONTENT_TYPE_JS)),
            ResourceKind::Image => Response::empty(404, None),
            ResourceKind::Other => Response::empty(503, None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Ask the network. Any response counts, only transport failure falls through.
    Network,
    /// The request's own key in the active bucket.
    Exact,
    /// Any other cached resource of the same kind.
    SameKind,
    /// A specific cached document, by path.
    CachedDocument(String),
    /// The literal 503 offline page.
    OfflinePage,
    /// An empty response typed after the request.
    TypedEmpty,
}

/// What a matcher may consult.
pub struct ResolveContext<'a> {
    pub storage: &'a dyn CacheStorage,
    /// Bucket answering fetches; `None` before any generation is active.
    pub bucket: Option<&'a str>,
    pub network: &'a dyn Network,
    pub origin: &'a Url,
    /// The cache manager's own script, never used as a substitute.
    pub worker_script: &'a str,
}

impl<'a> ResolveContext<'a> {
    fn cached(&self, key: &str) -> Option<Response> {
        let bucket = self.bucket?;
        match self.storage.get(bucket, key) {
            Ok(found) => found,
            Err(e) => {
                warn!(bucket, key, error = %e, "Cache lookup failed");
                None
            }
        }
    }
}

impl Matcher {
    pub async fn attempt(&self, ctx: &ResolveContext<'_>, request: &Request) -> Option<Response> {
        match self {
            Matcher::Network => match ctx.network.fetch(request).await {
                Ok(response) => Some(response),
                Err(e) => {
                    debug!(url = %request.url(), error = %e, "Network fetch failed");
                    None
                }
            },
            Matcher::Exact => ctx.cached(&request.cache_key()),
            Matcher::SameKind => Self::same_kind(ctx, request),
            Matcher::CachedDocument(path) => {
                let document = Request::resolve(ctx.origin, path, RequestMode::Navigate).ok()?;
                ctx.cached(&document.cache_key())
            }
            Matcher::OfflinePage => Some(Response::html(503, OFFLINE_HTML)),
            Matcher::TypedEmpty => Some(ResourceKind::from_path(request.path()).empty_response()),
        }
    }

    fn same_kind(ctx: &ResolveContext<'_>, request: &Request) -> Option<Response> {
        let kind = ResourceKind::from_path(request.path());
        if !kind.substitutable() {
            return None;
        }
        let bucket = ctx.bucket?;
        let keys = match ctx.storage.keys(bucket) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(bucket, error = %e, "Failed to list cache keys");
                return None;
            }
        };

        let own_key = request.cache_key();
        let substitute = keys.iter().find(|key| {
            let path = path_of(key);
            **key != own_key
                && path != ctx.worker_script
                && ResourceKind::from_path(&path) == kind
        })?;
        debug!(requested = %own_key, substitute = %substitute, "Serving same-kind substitute");
        ctx.cached(substitute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchStrategy {
    matchers: Vec<Matcher>,
}

impl FetchStrategy {
    pub fn new(matchers: Vec<Matcher>) -> Self {
        Self { matchers }
    }

    pub fn navigation(root_document: &str, offline_page: &str) -> Self {
        Self::new(vec![
            Matcher::Network,
            Matcher::CachedDocument(root_document.to_string()),
            Matcher::CachedDocument(offline_page.to_string()),
            Matcher::OfflinePage,
        ])
    }

    pub fn subresource() -> Self {
        Self::new(vec![
            Matcher::Exact,
            Matcher::SameKind,
            Matcher::Network,
            Matcher::TypedEmpty,
        ])
    }

    /// Used while no generation controls the page: network, then the
    /// last-resort response.
    pub fn uncontrolled(mode: RequestMode) -> Self {
        let fallback = match mode {
            RequestMode::Navigate => Matcher::OfflinePage,
            RequestMode::Subresource => Matcher::TypedEmpty,
        };
        Self::new(vec![Matcher::Network, fallback])
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    pub async fn resolve(&self, ctx: &ResolveContext<'_>, request: &Request) -> Response {
        for matcher in &self.matchers {
            if let Some(response) = matcher.attempt(ctx, request).await {
                trace!(url = %request.url(), ?matcher, status = response.status, "Resolved fetch");
                return response;
            }
        }
        Response::html(503, OFFLINE_HTML)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::net::StaticNetwork;

    const BUCKET: &str = "offline-cache-v1";

    fn origin() -> Url {
        Url::parse("https://club.example.org/").unwrap()
    }

    fn subresource(path: &str) -> Request {
        Request::resolve(&origin(), path, RequestMode::Subresource).unwrap()
    }

    #[test]
    fn test_resource_kind_from_path() {
        assert_eq!(ResourceKind::from_path("/assets/index-9c1d.css"), ResourceKind::Stylesheet);
        assert_eq!(ResourceKind::from_path("/assets/index.JS"), ResourceKind::Script);
        assert_eq!(ResourceKind::from_path("/img/logo.png"), ResourceKind::Image);
        assert_eq!(ResourceKind::from_path("/api/activities"), ResourceKind::Other);
        assert_eq!(ResourceKind::from_path("/v1.2/data"), ResourceKind::Other);
    }

    #[test]
    fn test_rankings() {
        assert_eq!(
            FetchStrategy::navigation("/index.html", "/offline.html").matchers()[0],
            Matcher::Network
        );
        assert_eq!(FetchStrategy::subresource().matchers()[0], Matcher::Exact);
    }

    #[tokio::test]
    async fn test_same_kind_skips_worker_script() {
        let storage = MemoryCacheStorage::new();
        storage
            .put(BUCKET, "https://club.example.org/sw.js", &Response::new(200, Some(CONTENT_TYPE_JS), "worker"))
            .unwrap();
        let network = StaticNetwork::new();
        network.set_online(false);
        let origin = origin();
        let ctx = ResolveContext {
            storage: &storage,
            bucket: Some(BUCKET),
            network: &network,
            origin: &origin,
            worker_script: "/sw.js",
        };

        let response = FetchStrategy::subresource()
            .resolve(&ctx, &subresource("/assets/app-new.js"))
            .await;
        assert_eq!(response, Response::empty(200, Some(CONTENT_TYPE_JS)));
    }

    #[tokio::test]
    async fn test_typed_empty_fallbacks() {
        let storage = MemoryCacheStorage::new();
        let network = StaticNetwork::new();
        network.set_online(false);
        let origin = origin();
        let ctx = ResolveContext {
            storage: &storage,
            bucket: Some(BUCKET),
            network: &network,
            origin: &origin,
            worker_script: "/sw.js",
        };
        let strategy = FetchStrategy::subresource();

        let css = strategy.resolve(&ctx, &subresource("/a.css")).await;
        assert_eq!(css.status, 200);
        assert_eq!(css.content_type.as_deref(), Some(CONTENT_TYPE_CSS));

        assert_eq!(strategy.resolve(&ctx, &subresource("/a.png")).await.status, 404);
        assert_eq!(strategy.resolve(&ctx, &subresource("/api/x")).await.status, 503);
    }

    #[tokio::test]
    async fn test_network_error_status_is_passed_through() {
        let storage = MemoryCacheStorage::new();
        let network = StaticNetwork::new();
        let origin = origin();
        let ctx = ResolveContext {
            storage: &storage,
            bucket: None,
            network: &network,
            origin: &origin,
            worker_script: "/sw.js",
        };
        let request = Request::resolve(&origin, "/missing", RequestMode::Navigate).unwrap();
        let response = FetchStrategy::navigation("/index.html", "/offline.html")
            .resolve(&ctx, &request)
            .await;
        assert_eq!(response.status, 404);
    }
}
