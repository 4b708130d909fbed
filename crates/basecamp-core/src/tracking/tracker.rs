use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::remote::{DocumentStore, RemoteError};
use crate::storage::KeyValueStore;

use super::{Connectivity, Geolocator, TrackLog, TrackPoint};

/// Time between samples while tracking.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Latest position per identity, upserted by name.
pub const LATEST_COLLECTION: &str = "locations";

/// Every delivered sample, append-only.
pub const HISTORY_COLLECTION: &str = "location_history";

/// Field the remote records are keyed and erased by.
const IDENTITY_FIELD: &str = "who";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

struct Session {
    who: String,
    epoch: u64,
    ticker: JoinHandle<()>,
}

struct Inner {
    remote: Arc<dyn DocumentStore>,
    geolocator: Option<Arc<dyn Geolocator>>,
    connectivity: Connectivity,
    log: TrackLog,
    interval: Duration,
    session: Mutex<Option<Session>>,
    // Bumped on every start and stop; a fix taken under an older epoch is dropped
    epoch: AtomicU64,
    points: Mutex<Vec<TrackPoint>>,
    status: Mutex<Option<String>>,
    // Single drain pass at a time; stop waits for it before erasing
    drain: Mutex<()>,
    // Shared by immediate deliveries, exclusive for erasure
    deliveries: RwLock<()>,
}

/// Periodic position capture with a durable local buffer.
/// Clone is cheap - all state lives behind one Arc.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

impl Tracker {
    /// `geolocator` is `None` on devices without a position source; starting
    /// then fails with a status message.
    pub fn new(
        remote: Arc<dyn DocumentStore>,
        geolocator: Option<Arc<dyn Geolocator>>,
        connectivity: Connectivity,
        store: Arc<dyn KeyValueStore>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                geolocator,
                connectivity,
                log: TrackLog::new(store),
                interval,
                session: Mutex::new(None),
                epoch: AtomicU64::new(0),
                points: Mutex::new(Vec::new()),
                status: Mutex::new(None),
                drain: Mutex::new(()),
                deliveries: RwLock::new(()),
            }),
        }
    }

    pub fn log(&self) -> &TrackLog {
        &self.inner.log
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// Latest user-facing status line.
    pub async fn status(&self) -> Option<String> {
        self.inner.status.lock().await.clone()
    }

    async fn set_status(&self, message: impl Into<String>) {
        *self.inner.status.lock().await = Some(message.into());
    }

    pub async fn is_tracking(&self) -> bool {
        self.inner.session.lock().await.is_some()
    }

    pub async fn who(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|session| session.who.clone())
    }

    /// Samples captured in this session.
    pub async fn points(&self) -> Vec<TrackPoint> {
        self.inner.points.lock().await.clone()
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Start sampling every interval as `who`.
    ///
    /// Refused, with a status message and no side effect, when `who` is blank
    /// or no geolocator is available. Starting while tracking restarts the
    /// loop under the new name.
    pub async fn start_tracking(&self, who: &str) -> bool {
        let who = who.trim();
        if who.is_empty() {
            self.set_status("Enter your name before starting tracking").await;
            return false;
        }
        if self.inner.geolocator.is_none() {
            self.set_status("Geolocation is not available on this device").await;
            return false;
        }

        {
            let mut session = self.inner.session.lock().await;
            if let Some(previous) = session.take() {
                previous.ticker.abort();
            }

            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let tracker = self.clone();
            let interval = self.inner.interval;
            let ticker = tokio::spawn(async move {
                let mut ticks = tokio::time::interval(interval);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticks.tick().await;
                    tracker.sample(epoch).await;
                }
            });

            *session = Some(Session {
                who: who.to_string(),
                epoch,
                ticker,
            });
        }

        info!(who, "Tracking started");
        self.set_status(format!("Tracking {}", who)).await;
        true
    }

    /// Take one sample for the running session, outside the timer.
    pub async fn tick(&self) {
        let epoch = match self.inner.session.lock().await.as_ref() {
            Some(session) => session.epoch,
            None => return,
        };
        self.sample(epoch).await;
    }

    async fn sample(&self, epoch: u64) {
        let Some(geolocator) = self.inner.geolocator.clone() else {
            return;
        };
        if !self.is_current(epoch) {
            return;
        }

        let position = match geolocator.current_position().await {
            Ok(position) => position,
            Err(e) => {
                if self.is_current(epoch) {
                    warn!(error = %e, "Position unavailable, skipping tick");
                    self.set_status(e.to_string()).await;
                }
                return;
            }
        };

        // Checked and appended under the session lock so a concurrent stop
        // cannot purge the log between the two
        let (point, seq) = {
            let session = self.inner.session.lock().await;
            let Some(session) = session.as_ref().filter(|session| session.epoch == epoch) else {
                debug!("Dropping position fix from a stopped session");
                return;
            };

            let point = TrackPoint::new(&session.who, position, self.inner.connectivity.is_reachable());
            self.inner.points.lock().await.push(point.clone());
            let seq = match self.inner.log.append(&point).await {
                Ok(seq) => Some(seq),
                Err(e) => {
                    warn!(error = %e, "Failed to buffer sample locally");
                    None
                }
            };
            (point, seq)
        };

        if point.delivered_online {
            // Erasure waits for this guard, so a write cannot land after it
            let _delivering = self.inner.deliveries.read().await;
            if !self.is_current(epoch) {
                return;
            }
            match self.deliver(&point).await {
                Ok(()) => {
                    if let Some(seq) = seq {
                        if let Err(e) = self.inner.log.confirm(&[seq]).await {
                            warn!(seq, error = %e, "Failed to confirm delivered sample");
                        }
                    }
                }
                Err(e) => debug!(error = %e, "Immediate delivery failed, sample stays buffered"),
            }
        }

        if !self.is_current(epoch) {
            return;
        }
        self.set_status(format!(
            "Last fix {:.5}, {:.5} at {}",
            point.lat,
            point.lon,
            point.observed_at.format("%H:%M:%S")
        ))
        .await;
    }

    /// Write one sample remotely: upsert the latest position and append to
    /// the history. Delivered only if both succeed.
    async fn deliver(&self, point: &TrackPoint) -> Result<(), RemoteError> {
        let doc = point.to_document();
        let remote = &self.inner.remote;
        let (latest, history) = futures::future::join(
            remote.upsert(LATEST_COLLECTION, &point.who, doc.clone()),
            remote.append(HISTORY_COLLECTION, doc),
        )
        .await;
        latest?;
        history?;
        Ok(())
    }

    /// Deliver every buffered sample.
    ///
    /// Each entry is attempted independently. Only delivered entries leave
    /// the buffer; failures stay for the next pass.
    pub async fn sync_offline_buffer(&self) -> SyncReport {
        let _drain = self.inner.drain.lock().await;
        let mut report = SyncReport::default();

        let pending = match self.inner.log.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Failed to read local buffer");
                return report;
            }
        };
        if pending.is_empty() {
            return report;
        }

        info!(count = pending.len(), "Draining local buffer");
        for entry in pending {
            report.attempted += 1;
            match self.deliver(&entry.point).await {
                Ok(()) => {
                    report.delivered += 1;
                    if let Err(e) = self.inner.log.confirm(&[entry.seq]).await {
                        warn!(seq = entry.seq, error = %e, "Failed to confirm delivered sample");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(seq = entry.seq, error = %e, "Failed to deliver buffered sample, keeping it");
                }
            }
        }
        info!(delivered = report.delivered, failed = report.failed, "Drain pass finished");
        report
    }

    /// Stop sampling, drop every local sample and erase this identity's
    /// remote records.
    pub async fn stop_tracking(&self) {
        let who = {
            let mut session = self.inner.session.lock().await;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            session.take().map(|session| {
                session.ticker.abort();
                session.who
            })
        };
        self.inner.points.lock().await.clear();

        match who {
            Some(who) => {
                self.erase_identity(&who).await;
                info!(who = %who, "Tracking stopped");
            }
            None => {
                let _drain = self.inner.drain.lock().await;
                if let Err(e) = self.inner.log.purge().await {
                    warn!(error = %e, "Failed to clear local buffer");
                }
            }
        }
        self.set_status("Tracking stopped").await;
    }

    /// Clear the local buffer and delete every remote record of `who`.
    /// Best effort: failures are logged, not returned.
    ///
    /// Runs after any drain pass or immediate delivery already in flight.
    pub async fn erase_identity(&self, who: &str) {
        let _drain = self.inner.drain.lock().await;
        let _deliveries = self.inner.deliveries.write().await;
        if let Err(e) = self.inner.log.purge().await {
            warn!(error = %e, "Failed to clear local buffer");
        }

        let identity = Value::from(who);
        for collection in [LATEST_COLLECTION, HISTORY_COLLECTION] {
            match self
                .inner
                .remote
                .delete_where(collection, IDENTITY_FIELD, &identity)
                .await
            {
                Ok(count) => info!(collection, count, "Erased remote records"),
                Err(e) => warn!(collection, error = %e, "Failed to erase remote records"),
            }
        }
    }

    /// Run a drain pass now and again every time connectivity comes back.
    pub fn spawn_reconnect_sync(&self) -> JoinHandle<()> {
        let tracker = self.clone();
        let mut reachability = self.inner.connectivity.subscribe();
        tokio::spawn(async move {
            tracker.sync_offline_buffer().await;

            let mut was_reachable = *reachability.borrow_and_update();
            while reachability.changed().await.is_ok() {
                let reachable = *reachability.borrow_and_update();
                if reachable && !was_reachable {
                    info!("Connectivity regained, syncing buffered samples");
                    tracker.sync_offline_buffer().await;
                }
                was_reachable = reachable;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryDocumentStore;
    use crate::storage::MemoryStore;
    use crate::tracking::{FixedGeolocator, GeoError, Position};
    use async_trait::async_trait;

    struct NoFix;

    #[async_trait]
    impl Geolocator for NoFix {
        async fn current_position(&self) -> Result<Position, GeoError> {
            Err(GeoError("User denied Geolocation".to_string()))
        }
    }

    fn tracker_with(geolocator: Option<Arc<dyn Geolocator>>) -> (Arc<MemoryDocumentStore>, Tracker) {
        let remote = Arc::new(MemoryDocumentStore::new());
        let tracker = Tracker::new(
            remote.clone(),
            geolocator,
            Connectivity::new(true),
            Arc::new(MemoryStore::new()),
            DEFAULT_TICK_INTERVAL,
        );
        (remote, tracker)
    }

    fn fixed() -> Option<Arc<dyn Geolocator>> {
        Some(Arc::new(FixedGeolocator::new(Position::new(46.5, 8.0))))
    }

    #[tokio::test]
    async fn test_start_refuses_blank_name() {
        let (_, tracker) = tracker_with(fixed());
        assert!(!tracker.start_tracking("   ").await);
        assert!(!tracker.is_tracking().await);
        assert_eq!(
            tracker.status().await.as_deref(),
            Some("Enter your name before starting tracking")
        );
    }

    #[tokio::test]
    async fn test_start_refuses_without_geolocation() {
        let (_, tracker) = tracker_with(None);
        assert!(!tracker.start_tracking("Kim").await);
        assert!(!tracker.is_tracking().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_tick_is_delivered_and_confirmed() {
        let (remote, tracker) = tracker_with(fixed());
        assert!(tracker.start_tracking("Kim").await);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(tracker.points().await.len(), 1);
        assert!(tracker.log().is_empty().await.unwrap());
        assert_eq!(remote.read_all(LATEST_COLLECTION).await.unwrap().len(), 1);
        assert_eq!(remote.read_all(HISTORY_COLLECTION).await.unwrap().len(), 1);
        tracker.stop_tracking().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_immediate_delivery_stays_buffered() {
        let (remote, tracker) = tracker_with(fixed());
        remote.set_available(false);
        tracker.start_tracking("Kim").await;
        tokio::time::sleep(Duration::from_secs(15)).await;

        // Ticks at 0s and 10s
        assert_eq!(tracker.log().len().await.unwrap(), 2);
        assert!(tracker.points().await.iter().all(|p| p.delivered_online));
        tracker.stop_tracking().await;
    }

    #[tokio::test]
    async fn test_geolocation_failure_sets_status() {
        let (_, tracker) = tracker_with(Some(Arc::new(NoFix)));
        assert!(tracker.start_tracking("Kim").await);
        tracker.tick().await;

        assert_eq!(tracker.status().await.as_deref(), Some("User denied Geolocation"));
        assert!(tracker.points().await.is_empty());
        assert!(tracker.log().is_empty().await.unwrap());
        tracker.stop_tracking().await;
    }

    #[tokio::test]
    async fn test_tick_without_session_is_noop() {
        let (remote, tracker) = tracker_with(fixed());
        tracker.tick().await;
        assert!(tracker.points().await.is_empty());
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_keeps_failed_entries() {
        let (remote, tracker) = tracker_with(fixed());
        tracker.connectivity().set_reachable(false);
        tracker.start_tracking("Kim").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.tick().await;

        remote.set_available(false);
        let report = tracker.sync_offline_buffer().await;
        assert_eq!(
            report,
            SyncReport {
                attempted: 2,
                delivered: 0,
                failed: 2
            }
        );
        assert_eq!(tracker.log().len().await.unwrap(), 2);

        remote.set_available(true);
        let report = tracker.sync_offline_buffer().await;
        assert_eq!(report.delivered, 2);
        assert!(tracker.log().is_empty().await.unwrap());
        tracker.stop_tracking().await;
    }

    /// Remote writes that take a while to land.
    struct SlowStore {
        inner: MemoryDocumentStore,
        delay: Duration,
    }

    #[async_trait]
    impl DocumentStore for SlowStore {
        async fn upsert(&self, collection: &str, id: &str, doc: crate::remote::Document) -> Result<(), RemoteError> {
            tokio::time::sleep(self.delay).await;
            self.inner.upsert(collection, id, doc).await
        }

        async fn append(&self, collection: &str, doc: crate::remote::Document) -> Result<String, RemoteError> {
            tokio::time::sleep(self.delay).await;
            self.inner.append(collection, doc).await
        }

        async fn delete_where(&self, collection: &str, field: &str, value: &Value) -> Result<usize, RemoteError> {
            self.inner.delete_where(collection, field, value).await
        }

        async fn read_all(&self, collection: &str) -> Result<Vec<crate::remote::StoredDocument>, RemoteError> {
            self.inner.read_all(collection).await
        }
    }

    /// Answers only once the gate opens.
    struct GatedFix {
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl Geolocator for GatedFix {
        async fn current_position(&self) -> Result<Position, GeoError> {
            self.gate.notified().await;
            Ok(Position::new(46.5, 8.0))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_delivery_before_erasing() {
        let remote = Arc::new(SlowStore {
            inner: MemoryDocumentStore::new(),
            delay: Duration::from_millis(200),
        });
        let tracker = Tracker::new(
            remote.clone(),
            fixed(),
            Connectivity::new(false),
            Arc::new(MemoryStore::new()),
            Duration::from_secs(3600),
        );
        tracker.start_tracking("Kim").await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        tracker.connectivity().set_reachable(true);
        let sampling = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.tick().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        tracker.stop_tracking().await;
        sampling.await.unwrap();

        assert!(remote.inner.read_all(HISTORY_COLLECTION).await.unwrap().is_empty());
        assert!(remote.inner.read_all(LATEST_COLLECTION).await.unwrap().is_empty());
        assert!(tracker.log().is_empty().await.unwrap());
        assert!(tracker.points().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_resolving_after_stop_is_dropped() {
        let gated = Arc::new(GatedFix {
            gate: tokio::sync::Notify::new(),
        });
        let remote = Arc::new(MemoryDocumentStore::new());
        let tracker = Tracker::new(
            remote.clone(),
            Some(gated.clone() as Arc<dyn Geolocator>),
            Connectivity::new(true),
            Arc::new(MemoryStore::new()),
            Duration::from_secs(3600),
        );
        tracker.start_tracking("Kim").await;
        let sampling = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.tick().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        tracker.stop_tracking().await;
        gated.gate.notify_waiters();
        sampling.await.unwrap();

        assert!(tracker.points().await.is_empty());
        assert!(tracker.log().is_empty().await.unwrap());
        assert_eq!(remote.write_count(), 0);
        assert_eq!(tracker.status().await.as_deref(), Some("Tracking stopped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_from_previous_session_is_dropped_after_restart() {
        let gated = Arc::new(GatedFix {
            gate: tokio::sync::Notify::new(),
        });
        let remote = Arc::new(MemoryDocumentStore::new());
        let tracker = Tracker::new(
            remote.clone(),
            Some(gated.clone() as Arc<dyn Geolocator>),
            Connectivity::new(false),
            Arc::new(MemoryStore::new()),
            Duration::from_secs(3600),
        );
        tracker.start_tracking("Kim").await;
        let stale = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.tick().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Restarting under another name aborts the first loop
        tracker.start_tracking("Ana").await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        gated.gate.notify_waiters();
        stale.await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Only the new loop's first tick counts
        let points = tracker.points().await;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].who, "Ana");
        assert_eq!(tracker.log().len().await.unwrap(), 1);
        tracker.stop_tracking().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_sync_drains_at_startup() {
        let (remote, tracker) = tracker_with(None);
        for n in 0..2 {
            let point = TrackPoint::new("Kim", Position::new(46.0 + n as f64, 8.0), false);
            tracker.log().append(&point).await.unwrap();
        }

        let sync = tracker.spawn_reconnect_sync();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(tracker.log().is_empty().await.unwrap());
        assert_eq!(remote.read_all(HISTORY_COLLECTION).await.unwrap().len(), 2);
        assert_eq!(remote.read_all(LATEST_COLLECTION).await.unwrap().len(), 1);
        sync.abort();
    }
}
