use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::net::{Network, Request, RequestMode, Response};

use super::generation::{discover_assets, parse_manifest};
use super::record::GenerationRecord;
use super::status::compute_status;
use super::strategy::{FetchStrategy, ResolveContext};
use super::{
    Bucket, CacheError, CacheGeneration, CacheStatus, CacheStorage, GenerationState, PageMessage,
    StatusReport, WorkerMessage,
};

/// Buffer size for the page notification channel.
/// Progress events from a few hundred assets fit without lagging a slow page.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where the generation's assets come from and how fetches are answered.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub origin: Url,
    /// Generation (bucket) name, bumped on every deploy that changes assets.
    pub generation: String,
    pub manifest_path: String,
    pub root_document: String,
    pub offline_page: String,
    pub worker_script: String,
    pub seed_assets: Vec<String>,
}

impl CacheSettings {
    pub fn new(origin: Url, generation: impl Into<String>) -> Self {
        Self {
            origin,
            generation: generation.into(),
            manifest_path: "/asset-manifest.json".to_string(),
            root_document: "/index.html".to_string(),
            offline_page: "/offline.html".to_string(),
            worker_script: "/sw.js".to_string(),
            seed_assets: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/offline.html".to_string(),
                "/manifest.webmanifest".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAsset {
    pub asset: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub generation: String,
    pub total: usize,
    pub stored: usize,
    pub failed: Vec<FailedAsset>,
}

#[derive(Debug, Clone)]
pub struct ActivationReport {
    pub generation: String,
    /// Buckets of older generations deleted by this activation.
    pub removed: Vec<String>,
}

/// Owns the generation bucket: installs it, activates it and answers fetches.
pub struct CacheManager {
    settings: CacheSettings,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    generation: RwLock<CacheGeneration>,
    // None until install starts
    state: RwLock<Option<GenerationState>>,
    // The bucket answering fetches. At most one at a time.
    serving: RwLock<Option<String>>,
    events: broadcast::Sender<WorkerMessage>,
    last_pushed: Mutex<Option<StatusReport>>,
}

fn progress_percent(loaded: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((loaded as f64 / total as f64) * 100.0).round() as u8
}

impl CacheManager {
    pub fn new(
        settings: CacheSettings,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        let generation = CacheGeneration::new(settings.generation.clone(), &settings.seed_assets);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            storage,
            network,
            generation: RwLock::new(generation),
            state: RwLock::new(None),
            serving: RwLock::new(None),
            events,
            last_pushed: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub async fn state(&self) -> Option<GenerationState> {
        *self.state.read().await
    }

    pub async fn generation(&self) -> CacheGeneration {
        self.generation.read().await.clone()
    }

    /// Name of the bucket currently answering fetches.
    pub async fn serving_generation(&self) -> Option<String> {
        self.serving.read().await.clone()
    }

    /// Receive pushed `CACHE_PROGRESS` and `CACHE_STATUS` messages.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerMessage> {
        self.events.subscribe()
    }

    async fn set_state(&self, state: GenerationState) {
        *self.state.write().await = Some(state);
    }

    fn broadcast(&self, message: WorkerMessage) {
        // No subscribers is fine: pages can still poll
        if self.events.send(message).is_err() {
            debug!("No pages listening for cache events");
        }
    }

    /// Push the current status if it changed since the last push.
    async fn publish_status(&self) {
        let report = self.check_status().await;
        let mut last = self.last_pushed.lock().await;
        if last.as_ref() == Some(&report) {
            return;
        }
        *last = Some(report.clone());
        self.broadcast(report.into());
    }

    /// This generation's bucket.
    fn bucket(&self) -> Bucket<'_> {
        Bucket::new(self.storage.as_ref(), &self.settings.generation)
    }

    fn request_for(&self, path: &str, mode: RequestMode) -> Result<Request, CacheError> {
        Ok(Request::resolve(&self.settings.origin, path, mode)?)
    }

    async fn fetch_manifest(&self) -> Result<Vec<String>, CacheError> {
        let request = self.request_for(&self.settings.manifest_path, RequestMode::Subresource)?;
        let response = self.network.fetch(&request).await?;
        if !response.is_ok() {
            return Err(CacheError::Manifest(format!(
                "{} answered {}",
                request.url(),
                response.status
            )));
        }
        parse_manifest(&response.body)
    }

    /// Fetch one asset and store it in this generation's bucket.
    async fn store_asset(&self, asset: &str) -> Result<Response, CacheError> {
        let request = self.request_for(asset, RequestMode::Subresource)?;
        let response = self.network.fetch(&request).await?;
        if !response.is_ok() {
            return Err(crate::net::FetchError::Status {
                url: request.cache_key(),
                status: response.status,
            }
            .into());
        }
        self.bucket().put(&request.cache_key(), &response)?;
        Ok(response)
    }

    /// Populate this generation's bucket.
    ///
    /// Never fails as a whole: a missing manifest falls back to the seed list
    /// and every asset that cannot be stored is logged and skipped. A
    /// progress message goes out after each asset attempt.
    pub async fn install(&self) -> InstallReport {
        let name = self.settings.generation.clone();
        info!(generation = %name, "Installing cache generation");
        self.set_state(GenerationState::Installing).await;
        self.publish_status().await;

        let mut generation = CacheGeneration::new(name.clone(), &self.settings.seed_assets);

        match self.fetch_manifest().await {
            Ok(entries) => {
                let added = generation.extend_assets(entries);
                debug!(added, "Asset manifest loaded");
            }
            Err(e) => warn!(error = %e, "Asset manifest unavailable, using seed list only"),
        }

        // The root document goes first so its markup can be mined
        let root = self.settings.root_document.clone();
        let root_stored = match self.store_asset(&root).await {
            Ok(response) => {
                let added = generation.extend_assets(discover_assets(&response.text()));
                debug!(added, "Assets discovered in root document");
                true
            }
            Err(e) => {
                warn!(asset = %root, error = %e, "Failed to cache root document");
                false
            }
        };
        generation.extend_assets([root.clone()]);

        *self.generation.write().await = generation.clone();

        let total = generation.asset_list.len();
        let mut stored = 0;
        let mut failed = Vec::new();
        for (index, asset) in generation.asset_list.iter().enumerate() {
            if *asset == root && root_stored {
                stored += 1;
            } else {
                match self.store_asset(asset).await {
                    Ok(_) => stored += 1,
                    Err(e) => {
                        warn!(asset = %asset, error = %e, "Failed to cache asset, skipping");
                        failed.push(FailedAsset {
                            asset: asset.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            self.broadcast(WorkerMessage::CacheProgress {
                progress: progress_percent(index + 1, total),
            });
        }

        self.set_state(GenerationState::Populated).await;
        self.publish_status().await;
        info!(generation = %name, total, stored, failed = failed.len(), "Cache generation populated");

        InstallReport {
            generation: name,
            total,
            stored,
            failed,
        }
    }

    /// Make this generation the one answering fetches and delete every
    /// other bucket. Safe to repeat.
    pub async fn activate(&self) -> Result<ActivationReport, CacheError> {
        let name = self.settings.generation.clone();
        match self.state().await {
            Some(GenerationState::Populated) | Some(GenerationState::Active) => {}
            _ => return Err(CacheError::NotPopulated(name)),
        }

        let mut removed = Vec::new();
        match self.storage.bucket_names() {
            Ok(buckets) => {
                for bucket in buckets.into_iter().filter(|bucket| *bucket != name) {
                    match self.storage.delete_bucket(&bucket) {
                        Ok(_) => {
                            info!(bucket = %bucket, "Deleted superseded cache generation");
                            removed.push(bucket);
                        }
                        Err(e) => warn!(bucket = %bucket, error = %e, "Failed to delete old cache"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list cache generations"),
        }

        *self.serving.write().await = Some(name.clone());
        self.set_state(GenerationState::Active).await;
        self.publish_status().await;
        info!(generation = %name, "Cache generation active");

        Ok(ActivationReport {
            generation: name,
            removed,
        })
    }

    /// Answer an intercepted fetch.
    pub async fn handle_fetch(&self, request: &Request) -> Response {
        let serving = self.serving.read().await.clone();
        let strategy = match (&serving, request.mode()) {
            (None, mode) => FetchStrategy::uncontrolled(mode),
            (Some(_), RequestMode::Navigate) => {
                FetchStrategy::navigation(&self.settings.root_document, &self.settings.offline_page)
            }
            (Some(_), RequestMode::Subresource) => FetchStrategy::subresource(),
        };

        let ctx = ResolveContext {
            storage: self.storage.as_ref(),
            bucket: serving.as_deref(),
            network: self.network.as_ref(),
            origin: &self.settings.origin,
            worker_script: &self.settings.worker_script,
        };
        strategy.resolve(&ctx, request).await
    }

    /// Resolve `path` against the origin and answer it.
    pub async fn fetch_path(&self, path: &str, mode: RequestMode) -> Result<Response, CacheError> {
        let request = self.request_for(path, mode)?;
        Ok(self.handle_fetch(&request).await)
    }

    /// Diff the asset list against the stored keys.
    ///
    /// While installing, an incomplete bucket reads as `caching` rather than
    /// `error` so pollers keep waiting.
    pub async fn check_status(&self) -> StatusReport {
        let Some(state) = self.state().await else {
            return StatusReport::new(CacheStatus::Checking);
        };

        let generation = self.generation.read().await;
        let report = match self.bucket().keys() {
            Ok(keys) => compute_status(&generation.asset_list, &keys),
            Err(e) => StatusReport::error(format!("Failed to read offline cache: {}", e)),
        };

        if state == GenerationState::Installing && report.status != CacheStatus::Ready {
            StatusReport::new(CacheStatus::Caching)
        } else {
            report
        }
    }

    pub async fn handle_message(&self, message: PageMessage) -> WorkerMessage {
        match message {
            PageMessage::CheckCache => self.check_status().await.into(),
        }
    }

    /// Snapshot of this generation for persisting across restarts.
    pub async fn record(&self) -> Option<GenerationRecord> {
        let state = self.state().await?;
        let generation = self.generation.read().await;
        Some(GenerationRecord::new(
            generation.name.clone(),
            generation.asset_list.clone(),
            state,
        ))
    }

    /// Pick up where a previous run left off.
    ///
    /// A record of this generation restores its asset list and state. An
    /// active record of an older generation keeps that bucket serving until
    /// this generation activates.
    pub async fn restore(&self, record: &GenerationRecord) {
        if record.name == self.settings.generation {
            if record.state == GenerationState::Installing {
                debug!(generation = %record.name, "Previous install was interrupted");
                return;
            }
            self.generation.write().await.asset_list = record.asset_list.clone();
            self.set_state(record.state).await;
            if record.state == GenerationState::Active {
                *self.serving.write().await = Some(record.name.clone());
            }
        } else if record.state == GenerationState::Active {
            let exists = self
                .storage
                .bucket_names()
                .map(|names| names.contains(&record.name))
                .unwrap_or(false);
            if exists {
                debug!(previous = %record.name, "Previous generation keeps serving");
                *self.serving.write().await = Some(record.name.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::net::StaticNetwork;

    const ORIGIN: &str = "https://club.example.org";

    fn settings(generation: &str) -> CacheSettings {
        let mut settings = CacheSettings::new(Url::parse(ORIGIN).unwrap(), generation);
        settings.seed_assets = vec!["/".to_string(), "/index.html".to_string()];
        settings
    }

    fn site() -> Arc<StaticNetwork> {
        let network = Arc::new(StaticNetwork::new());
        network.route(
            &format!("{ORIGIN}/asset-manifest.json"),
            Response::new(200, Some("application/json"), r#"["/assets/app.js"]"#),
        );
        network.route(
            &format!("{ORIGIN}/index.html"),
            Response::html(200, r#"<link rel="stylesheet" href="/assets/app.css"><script src="/assets/app.js"></script>"#),
        );
        network.route(&format!("{ORIGIN}/"), Response::html(200, "<p>home</p>"));
        network.route(&format!("{ORIGIN}/assets/app.js"), Response::new(200, Some("text/javascript"), "x"));
        network.route(&format!("{ORIGIN}/assets/app.css"), Response::new(200, Some("text/css"), "y"));
        network
    }

    #[test]
    fn test_progress_percent_rounds() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[tokio::test]
    async fn test_install_builds_asset_list_in_order() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let manager = CacheManager::new(settings("v1"), storage.clone(), site());

        assert_eq!(manager.check_status().await.status, CacheStatus::Checking);
        let report = manager.install().await;

        assert_eq!(
            manager.generation().await.asset_list,
            vec!["/", "/index.html", "/assets/app.js", "/assets/app.css"]
        );
        assert_eq!(report.total, 4);
        assert_eq!(report.stored, 4);
        assert!(report.failed.is_empty());
        assert_eq!(manager.state().await, Some(GenerationState::Populated));
        assert_eq!(manager.check_status().await.status, CacheStatus::Ready);
    }

    #[tokio::test]
    async fn test_missing_manifest_falls_back_to_seed() {
        let network = Arc::new(StaticNetwork::new());
        network.route(&format!("{ORIGIN}/"), Response::html(200, "home"));
        network.route(&format!("{ORIGIN}/index.html"), Response::html(200, "index"));
        let manager = CacheManager::new(settings("v1"), Arc::new(MemoryCacheStorage::new()), network);

        let report = manager.install().await;
        assert_eq!(report.total, 2);
        assert_eq!(report.stored, 2);
        assert_eq!(manager.check_status().await.status, CacheStatus::Ready);
    }

    #[tokio::test]
    async fn test_activate_requires_population() {
        let manager = CacheManager::new(settings("v1"), Arc::new(MemoryCacheStorage::new()), site());
        assert!(matches!(manager.activate().await, Err(CacheError::NotPopulated(_))));
    }

    #[tokio::test]
    async fn test_handle_message_answers_check_cache() {
        let manager = CacheManager::new(settings("v1"), Arc::new(MemoryCacheStorage::new()), site());
        manager.install().await;
        let reply = manager.handle_message(PageMessage::CheckCache).await;
        assert_eq!(
            reply,
            WorkerMessage::CacheStatus {
                status: CacheStatus::Ready,
                error: None
            }
        );
    }

    #[tokio::test]
    async fn test_status_is_pushed_on_transitions() {
        let manager = CacheManager::new(settings("v1"), Arc::new(MemoryCacheStorage::new()), site());
        let mut events = manager.subscribe();
        manager.install().await;
        manager.activate().await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(message) = events.try_recv() {
            if let WorkerMessage::CacheStatus { status, .. } = message {
                statuses.push(status);
            }
        }
        // Activation does not change readiness, so it pushes nothing new
        assert_eq!(statuses, vec![CacheStatus::Caching, CacheStatus::Ready]);
    }

    #[tokio::test]
    async fn test_restore_keeps_previous_generation_serving() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let old = CacheManager::new(settings("v1"), storage.clone(), site());
        old.install().await;
        old.activate().await.unwrap();
        let record = old.record().await.unwrap();

        let new = CacheManager::new(settings("v2"), storage.clone(), site());
        new.restore(&record).await;
        assert_eq!(new.serving_generation().await.as_deref(), Some("v1"));
        assert_eq!(new.state().await, None);

        new.install().await;
        // Still the old bucket until activation
        assert_eq!(new.serving_generation().await.as_deref(), Some("v1"));
        new.activate().await.unwrap();
        assert_eq!(new.serving_generation().await.as_deref(), Some("v2"));
        assert_eq!(storage.bucket_names().unwrap(), vec!["v2"]);
    }
}
