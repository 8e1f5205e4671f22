//! GET orchestration
//!
//! Collects records for a key from up to `quorum` distinct peers and lets
//! the validator pick the winner.

use crate::dht::events::{DhtEvent, EventSink};
use crate::dht::lookup::{LookupEngine, LookupMode};
use crate::dht::record::{key_target, Record};
use crate::dht::store::RecordStore;
use crate::dht::validator::Validator;
use crate::error::{DhtError, Result};
use std::sync::Arc;
use tracing::debug;

/// Resolves keys through value lookups
#[derive(Clone)]
pub struct GetOrchestrator {
    lookup: LookupEngine,
    validator: Arc<dyn Validator>,
    events: Arc<dyn EventSink>,
    local: Option<Arc<RecordStore>>,
}

impl GetOrchestrator {
    /// Create a new GET orchestrator
    pub fn new(lookup: LookupEngine, validator: Arc<dyn Validator>, events: Arc<dyn EventSink>) -> Self {
        Self {
            lookup,
            validator,
            events,
            local: None,
        }
    }

    /// Count a record held in `store` as one of the quorum
    pub fn with_local_store(mut self, store: Arc<RecordStore>) -> Self {
        self.local = Some(store);
        self
    }

    /// Fetch the best record for `key`.
    ///
    /// Stops once `quorum` distinct peers returned a valid record (a quorum
    /// of 0 counts as 1). Fewer records than the quorum still resolve; none
    /// at all is `QuorumNotMet`, or `LookupTimeout` if the deadline passed.
    pub async fn get(&self, key: &str, quorum: usize) -> Result<Record> {
        let quorum = quorum.max(1);

        let mut candidates: Vec<Record> = Vec::new();
        if let Some(record) = self.local.as_ref().and_then(|store| store.get(key)) {
            if self.validator.validate(&record).is_ok() {
                candidates.push(record);
            }
        }

        let mut timed_out = false;
        let mut closest = 0;
        let mut elapsed = None;
        if candidates.len() < quorum {
            let mode = LookupMode::FindValue {
                key: key.to_string(),
                quorum: quorum - candidates.len(),
                validator: self.validator.clone(),
            };
            let outcome = self.lookup.run(key_target(key), mode).await;
            timed_out = outcome.timed_out();
            closest = outcome.closest.len();
            elapsed = Some(outcome.elapsed);
            for (peer, record) in outcome.records {
                match self.validator.validate(&record) {
                    Ok(()) => candidates.push(record),
                    Err(e) => debug!("Dropping record from {}: {}", peer.short(), e),
                }
            }
        }

        if candidates.is_empty() {
            if timed_out {
                return Err(DhtError::LookupTimeout {
                    target: key_target(key).to_hex(),
                    elapsed: elapsed.unwrap_or_default(),
                    found: closest,
                });
            }
            return Err(DhtError::QuorumNotMet {
                key: key.to_string(),
                required: quorum,
                found: 0,
            });
        }

        let index = self.validator.select(key, &candidates)?;
        if index >= candidates.len() {
            return Err(DhtError::validation(
                key,
                format!("selector chose {} of {} candidates", index, candidates.len()),
            ));
        }

        self.events.emit(DhtEvent::GetResolved {
            key: key.to_string(),
            candidates: candidates.len(),
        });
        Ok(candidates.swap_remove(index))
    }
}
