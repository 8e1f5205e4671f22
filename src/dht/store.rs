//! Local record store
//!
//! Records accepted through STORE, keyed by record key. Entries expire
//! after the configured TTL; they are pruned on read, and the whole store
//! is swept at most once per [`SWEEP_INTERVAL`] on insert.

use crate::dht::record::Record;
use crate::dht::validator::Validator;
use crate::error::{DhtError, Result};
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Minimum time between two full sweeps of expired records
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct StoredRecord {
    record: Record,
    expires_at: Instant,
}

/// Concurrent in-memory record store
#[derive(Debug)]
pub struct RecordStore {
    entries: DashMap<String, StoredRecord>,
    ttl: Duration,
    max_value_size: usize,
    last_sweep: Mutex<Instant>,
}

impl RecordStore {
    /// Create a new store
    pub fn new(ttl: Duration, max_value_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_value_size,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Validate and insert a record, replacing any previous value for its key
    pub fn put(&self, record: Record, validator: &dyn Validator) -> Result<()> {
        if record.value.len() > self.max_value_size {
            return Err(DhtError::validation(
                &record.key,
                format!(
                    "value is {} bytes, limit is {}",
                    record.value.len(),
                    self.max_value_size
                ),
            ));
        }
        validator.validate(&record)?;

        trace!("Storing record '{}' ({} bytes)", record.key, record.value.len());
        let now = Instant::now();
        self.sweep_if_due(now);
        let expires_at = now + self.ttl;
        self.entries.insert(
            record.key.clone(),
            StoredRecord { record, expires_at },
        );
        Ok(())
    }

    /// Get a live record
    pub fn get(&self, key: &str) -> Option<Record> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.record.clone());
            }
        }
        // Expired or absent; drop it if it is still expired
        if self.entries.remove_if(key, |_, e| e.expires_at <= now).is_some() {
            trace!("Record '{}' expired", key);
        }
        None
    }

    /// Drop every expired record, returning how many were removed
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Pruned {} expired records", removed);
        }
        removed
    }

    fn sweep_if_due(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last) < SWEEP_INTERVAL {
            return;
        }
        *last = now;
        drop(last);
        self.prune_expired();
    }

    /// Remove a record
    pub fn remove(&self, key: &str) -> Option<Record> {
        self.entries.remove(key).map(|(_, e)| e.record)
    }

    /// Number of stored records, including expired ones not yet pruned
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
