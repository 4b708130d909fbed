//! Offline cache manager.
//!
//! A cache generation is one versioned snapshot of the offline asset bundle,
//! stored in a bucket named after the generation. Lifecycle:
//!
//! 1. **Install**: build the asset list (seed list, build manifest, assets
//!    referenced by the root document) and store every asset, broadcasting
//!    progress after each attempt. Per-asset failures are skipped.
//! 2. **Activate**: delete every other bucket and start answering fetches.
//! 3. **Serve**: navigations go network-first with cached fallbacks,
//!    sub-resources go cache-first with same-type substitutes.
//!
//! Pages query readiness with the `CHECK_CACHE` message or subscribe to
//! pushed `CACHE_STATUS`/`CACHE_PROGRESS` messages.

pub mod disk;
pub mod error;
pub mod generation;
pub mod manager;
pub mod memory;
pub mod messages;
pub mod record;
pub mod status;
pub mod storage;
pub mod strategy;

pub use disk::DiskCacheStorage;
pub use error::CacheError;
pub use generation::{CacheGeneration, GenerationState};
pub use manager::{ActivationReport, CacheManager, CacheSettings, FailedAsset, InstallReport};
pub use memory::MemoryCacheStorage;
pub use messages::{PageMessage, WorkerMessage};
pub use record::GenerationRecord;
pub use status::{CacheStatus, StatusReport};
pub use storage::{Bucket, CacheStorage};
pub use strategy::{FetchStrategy, Matcher, ResourceKind};
