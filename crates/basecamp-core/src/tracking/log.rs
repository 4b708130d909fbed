//! Durable append-only log of undelivered samples.
//!
//! Layout in the local store:
//!
//! - `tracking/log/<seq>`: one entry per sample, zero-padded so keys sort
//!   numerically
//! - `tracking/head`: highest sequence number handed out
//! - `tracking/confirmed`: every sequence number at or below it is confirmed
//!   delivered
//!
//! An entry is removed only once its remote write is confirmed, so the log
//! always holds a superset of the undelivered samples. All read-modify-write
//! runs under one async mutex.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::storage::KeyValueStore;

use super::{TrackPoint, TrackingError};

const ENTRY_PREFIX: &str = "tracking/log/";
const HEAD_KEY: &str = "tracking/head";
const CONFIRMED_KEY: &str = "tracking/confirmed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub point: TrackPoint,
}

pub struct TrackLog {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

fn entry_key(seq: u64) -> String {
    format!("{}{:020}", ENTRY_PREFIX, seq)
}

fn seq_of(key: &str) -> Option<u64> {
    key.strip_prefix(ENTRY_PREFIX)?.parse().ok()
}

impl TrackLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    fn read_counter(&self, key: &str) -> Result<u64, TrackingError> {
        match self.store.get(key)? {
            Some(raw) => Ok(raw.trim().parse().unwrap_or_else(|_| {
                warn!(key, value = %raw, "Unreadable log counter, starting from zero");
                0
            })),
            None => Ok(0),
        }
    }

    fn stored_seqs(&self) -> Result<Vec<u64>, TrackingError> {
        Ok(self
            .store
            .keys_with_prefix(ENTRY_PREFIX)?
            .iter()
            .filter_map(|key| seq_of(key))
            .collect())
    }

    /// Durably record a sample. Returns its sequence number.
    pub async fn append(&self, point: &TrackPoint) -> Result<u64, TrackingError> {
        let _guard = self.lock.lock().await;

        // A lost or unreadable head must not hand out numbers of entries
        // still stored or already behind the confirmed cursor
        let highest_stored = self.stored_seqs()?.into_iter().max().unwrap_or(0);
        let seq = self
            .read_counter(HEAD_KEY)?
            .max(highest_stored)
            .max(self.read_counter(CONFIRMED_KEY)?)
            + 1;

        let entry = LogEntry {
            seq,
            point: point.clone(),
        };
        let raw = serde_json::to_string(&entry)
            .map_err(|e| TrackingError::CorruptEntry { seq, source: e })?;
        self.store.set(HEAD_KEY, &seq.to_string())?;
        self.store.set(&entry_key(seq), &raw)?;
        debug!(seq, "Sample appended to local log");
        Ok(seq)
    }

    /// Entries not yet confirmed, oldest first.
    pub async fn pending(&self) -> Result<Vec<LogEntry>, TrackingError> {
        let _guard = self.lock.lock().await;

        let confirmed = self.read_counter(CONFIRMED_KEY)?;
        let mut seqs: Vec<u64> = self
            .stored_seqs()?
            .into_iter()
            .filter(|seq| *seq > confirmed)
            .collect();
        seqs.sort_unstable();

        let mut entries = Vec::with_capacity(seqs.len());
        for seq in seqs {
            let Some(raw) = self.store.get(&entry_key(seq))? else {
                continue;
            };
            match serde_json::from_str::<LogEntry>(&raw) {
                Ok(entry) => entries.push(entry),
                // Left in place for inspection; it cannot be delivered
                Err(e) => warn!(seq, error = %e, "Skipping unreadable log entry"),
            }
        }
        Ok(entries)
    }

    /// Mark entries as delivered: remove them and move the confirmed cursor
    /// past the contiguous delivered prefix.
    pub async fn confirm(&self, seqs: &[u64]) -> Result<(), TrackingError> {
        let _guard = self.lock.lock().await;

        for seq in seqs {
            self.store.remove(&entry_key(*seq))?;
        }

        let confirmed = self.read_counter(CONFIRMED_KEY)?;
        let lowest_remaining = self
            .stored_seqs()?
            .into_iter()
            .filter(|seq| *seq > confirmed)
            .min();
        let cursor = match lowest_remaining {
            Some(seq) => seq - 1,
            None => self.read_counter(HEAD_KEY)?,
        };
        if cursor > confirmed {
            self.store.set(CONFIRMED_KEY, &cursor.to_string())?;
        }
        Ok(())
    }

    /// Drop every entry and both counters.
    pub async fn purge(&self) -> Result<(), TrackingError> {
        let _guard = self.lock.lock().await;

        for key in self.store.keys_with_prefix(ENTRY_PREFIX)? {
            self.store.remove(&key)?;
        }
        self.store.remove(HEAD_KEY)?;
        self.store.remove(CONFIRMED_KEY)?;
        Ok(())
    }

    /// Number of stored, unconfirmed entries.
    pub async fn len(&self) -> Result<usize, TrackingError> {
        let _guard = self.lock.lock().await;
        Ok(self.stored_seqs()?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, TrackingError> {
        Ok(self.len().await? == 0)
    }

    /// The confirmed cursor.
    pub async fn confirmed_through(&self) -> Result<u64, TrackingError> {
        let _guard = self.lock.lock().await;
        self.read_counter(CONFIRMED_KEY)
    }
}
