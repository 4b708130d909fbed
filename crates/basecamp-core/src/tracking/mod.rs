//! Offline-first location tracking.
//!
//! Samples are captured on a fixed interval, written to a durable local log
//! before anything else, and delivered to the remote store either right away
//! (when reachable) or by a drain pass after connectivity returns. Delivery
//! is at-least-once: an entry leaves the local log only after both remote
//! writes for it succeeded.

pub mod connectivity;
pub mod error;
pub mod geo;
pub mod log;
pub mod point;
pub mod tracker;

pub use connectivity::Connectivity;
pub use error::TrackingError;
pub use geo::{FixedGeolocator, GeoError, Geolocator, Position};
pub use log::{LogEntry, TrackLog};
pub use point::TrackPoint;
pub use tracker::{SyncReport, Tracker, DEFAULT_TICK_INTERVAL, HISTORY_COLLECTION, LATEST_COLLECTION};
