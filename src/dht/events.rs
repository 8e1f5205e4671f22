//! DHT events
//!
//! Structured events emitted by the routing table, the lookup engine and
//! the orchestrators. Components receive an [`EventSink`] at construction;
//! [`TracingSink`] forwards events to `tracing`.

use crate::peer::PeerId;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Why a lookup stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupEnd {
    /// No unqueried candidates remained among the closest
    Converged,
    /// Enough distinct peers returned a record
    QuorumReached,
    /// The overall deadline expired
    TimedOut,
}

/// Event types
#[derive(Debug, Clone)]
pub enum DhtEvent {
    /// A peer was added to a bucket
    PeerAdded { peer: PeerId, bucket: usize },
    /// A known peer moved to the most-recently-seen position
    PeerRefreshed { peer: PeerId },
    /// An unresponsive peer was replaced by a new one
    PeerEvicted { evicted: PeerId, replacement: PeerId },
    /// A new peer was dropped because the bucket's oldest peer answered
    PeerDropped { peer: PeerId, bucket: usize },
    /// One round of a lookup was dispatched
    LookupRound {
        target: PeerId,
        round: usize,
        queried: usize,
    },
    /// A lookup finished
    LookupFinished {
        target: PeerId,
        end: LookupEnd,
        rounds: usize,
        closest: usize,
        records: usize,
        elapsed: Duration,
    },
    /// An RPC failed and the peer was marked failed for this operation
    RpcFailed { peer: PeerId, reason: String },
    /// The local store accepted a record
    RecordStored { key: String },
    /// The local store rejected a record
    RecordRejected { key: String, reason: String },
    /// A PUT finished its STORE fan-out
    PutCompleted {
        key: String,
        acks: usize,
        attempted: usize,
    },
    /// A GET selected a value
    GetResolved { key: String, candidates: usize },
}

/// Receiver of DHT events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DhtEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DhtEvent) {
        match event {
            DhtEvent::PeerAdded { peer, bucket } => {
                debug!("Added peer {} to bucket {}", peer.short(), bucket);
            }
            DhtEvent::PeerRefreshed { peer } => {
                trace!("Refreshed peer {}", peer.short());
            }
            DhtEvent::PeerEvicted {
                evicted,
                replacement,
            } => {
                debug!(
                    "Evicted unresponsive peer {} in favour of {}",
                    evicted.short(),
                    replacement.short()
                );
            }
            DhtEvent::PeerDropped { peer, bucket } => {
                trace!("Bucket {} full, dropped new peer {}", bucket, peer.short());
            }
            DhtEvent::LookupRound {
                target,
                round,
                queried,
            } => {
                trace!(
                    "Lookup {} round {}: querying {} peers",
                    target.short(),
                    round,
                    queried
                );
            }
            DhtEvent::LookupFinished {
                target,
                end,
                rounds,
                closest,
                records,
                elapsed,
            } => {
                if end == LookupEnd::TimedOut {
                    warn!(
                        "Lookup {} timed out after {:?} ({} rounds, {} peers)",
                        target.short(),
                        elapsed,
                        rounds,
                        closest
                    );
                } else {
                    debug!(
                        "Lookup {} finished ({:?}) in {} rounds / {:?}: {} peers, {} records",
                        target.short(),
                        end,
                        rounds,
                        elapsed,
                        closest,
                        records
                    );
                }
            }
            DhtEvent::RpcFailed { peer, reason } => {
                debug!("RPC to {} failed: {}", peer.short(), reason);
            }
            DhtEvent::RecordStored { key } => {
                debug!("Stored record '{}'", key);
            }
            DhtEvent::RecordRejected { key, reason } => {
                warn!("Rejected record '{}': {}", key, reason);
            }
            DhtEvent::PutCompleted {
                key,
                acks,
                attempted,
            } => {
                info!("Put '{}' acknowledged by {}/{} peers", key, acks, attempted);
            }
            DhtEvent::GetResolved { key, candidates } => {
                info!("Get '{}' resolved from {} candidates", key, candidates);
            }
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: DhtEvent) {}
}

/// Keeps events in memory for assertions
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<DhtEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<DhtEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit(&self, event: DhtEvent) {
        self.events.lock().unwrap().push(event);
    }
}
