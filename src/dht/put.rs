//! PUT orchestration
//!
//! Validates a record locally, finds the K peers closest to `H(key)` and
//! sends STORE to all of them in parallel.

use crate::dht::events::{DhtEvent, EventSink};
use crate::dht::lookup::{LookupEngine, LookupMode};
use crate::dht::record::Record;
use crate::dht::rpc::{RpcClient, StoreResult};
use crate::dht::store::RecordStore;
use crate::dht::validator::Validator;
use crate::error::{DhtError, NetworkError, Result};
use crate::peer::PeerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of a successful PUT
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutReport {
    /// Peers that accepted the record
    pub acks: usize,
    /// Peers a STORE was sent to
    pub attempted: usize,
    /// Peers that refused the record, with their reason
    pub rejected: Vec<(PeerId, String)>,
    /// Peers that could not be reached or timed out
    pub unreachable: usize,
    /// Whether the lookup hit its deadline and the store went to a partial set
    pub partial: bool,
}

/// Replicates records to the closest peers
#[derive(Clone)]
pub struct PutOrchestrator {
    lookup: LookupEngine,
    rpc: Arc<dyn RpcClient>,
    validator: Arc<dyn Validator>,
    events: Arc<dyn EventSink>,
    rpc_timeout: Duration,
    local: Option<Arc<RecordStore>>,
}

impl PutOrchestrator {
    /// Create a new PUT orchestrator
    pub fn new(
        lookup: LookupEngine,
        rpc: Arc<dyn RpcClient>,
        validator: Arc<dyn Validator>,
        events: Arc<dyn EventSink>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            lookup,
            rpc,
            validator,
            events,
            rpc_timeout,
            local: None,
        }
    }

    /// Also keep a copy of every successfully replicated record in `store`
    pub fn with_local_store(mut self, store: Arc<RecordStore>) -> Self {
        self.local = Some(store);
        self
    }

    /// Store `record` on the K closest peers to its key.
    ///
    /// Succeeds once at least one peer acknowledged the STORE. The local
    /// copy is only written after that and does not count as an
    /// acknowledgement.
    pub async fn put(&self, record: Record) -> Result<PutReport> {
        self.validator.validate(&record)?;

        let outcome = self.lookup.run(record.target(), LookupMode::FindNode).await;
        let partial = outcome.timed_out();
        let targets = outcome.closest;
        if targets.is_empty() {
            if partial {
                return Err(DhtError::LookupTimeout {
                    target: record.target().to_hex(),
                    elapsed: outcome.elapsed,
                    found: 0,
                });
            }
            return Err(DhtError::PutFailed {
                key: record.key,
                attempted: 0,
            });
        }
        if partial {
            warn!(
                "Lookup for '{}' timed out, storing on {} peers found so far",
                record.key,
                targets.len()
            );
        }

        let mut report = PutReport {
            attempted: targets.len(),
            partial,
            ..Default::default()
        };

        let mut stores = JoinSet::new();
        for contact in targets {
            let rpc = self.rpc.clone();
            let record = record.clone();
            let rpc_timeout = self.rpc_timeout;
            stores.spawn(async move {
                let result = match tokio::time::timeout(rpc_timeout, rpc.store(&contact, record)).await {
                    Ok(result) => result,
                    Err(_) => Err(NetworkError::timeout(contact.id.to_hex())),
                };
                (contact.id, result)
            });
        }

        while let Some(joined) = stores.join_next().await {
            let Ok((peer, result)) = joined else {
                report.unreachable += 1;
                continue;
            };
            match result {
                Ok(StoreResult::Accepted) => report.acks += 1,
                Ok(StoreResult::Rejected(reason)) => {
                    debug!("Peer {} rejected '{}': {}", peer.short(), record.key, reason);
                    report.rejected.push((peer, reason));
                }
                Err(e) => {
                    self.events.emit(DhtEvent::RpcFailed {
                        peer,
                        reason: e.to_string(),
                    });
                    report.unreachable += 1;
                }
            }
        }

        self.events.emit(DhtEvent::PutCompleted {
            key: record.key.clone(),
            acks: report.acks,
            attempted: report.attempted,
        });

        if report.acks == 0 {
            return Err(DhtError::PutFailed {
                key: record.key,
                attempted: report.attempted,
            });
        }
        if let Some(store) = &self.local {
            if let Err(e) = store.put(record, self.validator.as_ref()) {
                warn!("Not keeping a local copy: {}", e);
            }
        }
        Ok(report)
    }
}
