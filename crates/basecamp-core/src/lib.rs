//! Basecamp core - the offline field kit behind the club website.
//!
//! This crate provides the two pieces of the site that have to keep working
//! without a network connection:
//!
//! - [`cache::CacheManager`]: populates a versioned asset bucket from a
//!   build manifest and the root document, then answers fetches cache-first
//!   with typed fallbacks when the network is gone.
//! - [`tracking::Tracker`]: captures periodic position samples into a durable
//!   local log and drains them to the remote document store whenever
//!   connectivity comes back.
//!
//! Both consume generic collaborators: a local key-value store
//! ([`storage::KeyValueStore`]), a remote document store
//! ([`remote::DocumentStore`]) and a fetch primitive ([`net::Network`]).

pub mod cache;
pub mod config;
pub mod net;
pub mod remote;
pub mod storage;
pub mod tracking;

pub use config::Config;
