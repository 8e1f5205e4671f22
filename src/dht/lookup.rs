//! Iterative lookup
//!
//! Finds the K peers closest to a target, or records stored under a key,
//! by repeatedly querying the closest known peers that have not been asked
//! yet. Queries of one round run concurrently, each under its own timeout;
//! the whole lookup runs under an overall deadline.

use crate::dht::config::DhtConfig;
use crate::dht::events::{DhtEvent, EventSink, LookupEnd};
use crate::dht::record::Record;
use crate::dht::routing::SharedRoutingTable;
use crate::dht::rpc::{FindValueResult, RpcClient};
use crate::dht::validator::Validator;
use crate::error::{DhtError, NetworkError, Result};
use crate::peer::{AddressBook, AddressTtl, Contact, Distance, PeerId};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::trace;

/// What a lookup is looking for
#[derive(Clone)]
pub enum LookupMode {
    /// The closest peers to the target
    FindNode,
    /// Records under `key`, until `quorum` distinct peers returned a valid one
    FindValue {
        key: String,
        quorum: usize,
        validator: Arc<dyn Validator>,
    },
}

/// Result of a lookup, possibly partial
#[derive(Debug, Clone)]
pub struct LookupOutcome {
    /// Up to K closest peers not known to have failed, nearest first
    pub closest: Vec<Contact>,
    /// Records found, at most one per peer, in arrival order
    pub records: Vec<(PeerId, Record)>,
    /// Why the lookup stopped
    pub end: LookupEnd,
    /// Time spent
    pub elapsed: Duration,
}

impl LookupOutcome {
    /// Check if the overall deadline cut the lookup short
    pub fn timed_out(&self) -> bool {
        self.end == LookupEnd::TimedOut
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    Pending,
    InFlight,
    Responded,
    Failed,
}

#[derive(Debug)]
struct Candidate {
    contact: Contact,
    state: ProbeState,
}

/// Answer of one probe
enum Probe {
    Closer(Vec<Contact>),
    Found(Record),
}

/// Per-operation shortlist keyed by distance to the target
struct Shortlist {
    local: PeerId,
    target: PeerId,
    k: usize,
    entries: BTreeMap<Distance, Candidate>,
}

impl Shortlist {
    fn new(local: PeerId, target: PeerId, k: usize) -> Self {
        Self {
            local,
            target,
            k,
            entries: BTreeMap::new(),
        }
    }

    /// Add a contact; returns false for self and already known peers
    fn add(&mut self, contact: Contact) -> bool {
        if contact.id == self.local {
            return false;
        }
        let distance = self.target.distance(&contact.id);
        if self.entries.contains_key(&distance) {
            return false;
        }
        self.entries.insert(
            distance,
            Candidate {
                contact,
                state: ProbeState::Pending,
            },
        );
        true
    }

    fn set_state(&mut self, id: &PeerId, state: ProbeState) {
        if let Some(c) = self.entries.get_mut(&self.target.distance(id)) {
            c.state = state;
        }
    }

    /// The K closest candidates that have not failed
    fn live_best(&self) -> impl Iterator<Item = &Candidate> {
        self.entries
            .values()
            .filter(|c| c.state != ProbeState::Failed)
            .take(self.k)
    }

    /// Unqueried candidates among the live best K
    fn next_batch(&self, limit: usize) -> Vec<Contact> {
        self.live_best()
            .filter(|c| c.state == ProbeState::Pending)
            .take(limit)
            .map(|c| c.contact.clone())
            .collect()
    }

    fn live_best_contains(&self, ids: &HashSet<PeerId>) -> bool {
        self.live_best().any(|c| ids.contains(&c.contact.id))
    }

    /// Probes whose task vanished count as failures
    fn fail_in_flight(&mut self) {
        for c in self.entries.values_mut() {
            if c.state == ProbeState::InFlight {
                c.state = ProbeState::Failed;
            }
        }
    }

    fn closest(&self) -> Vec<Contact> {
        self.live_best().map(|c| c.contact.clone()).collect()
    }
}

/// Iterative lookup engine
#[derive(Clone)]
pub struct LookupEngine {
    local: PeerId,
    routing: SharedRoutingTable,
    rpc: Arc<dyn RpcClient>,
    address_book: Arc<AddressBook>,
    events: Arc<dyn EventSink>,
    k: usize,
    alpha: usize,
    rpc_timeout: Duration,
    lookup_timeout: Duration,
}

impl LookupEngine {
    /// Create a new lookup engine
    pub fn new(
        local: PeerId,
        routing: SharedRoutingTable,
        rpc: Arc<dyn RpcClient>,
        address_book: Arc<AddressBook>,
        config: &DhtConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            local,
            routing,
            rpc,
            address_book,
            events,
            k: config.k,
            alpha: config.alpha,
            rpc_timeout: config.rpc_timeout,
            lookup_timeout: config.lookup_timeout,
        }
    }

    /// Bucket capacity and replication factor
    pub fn k(&self) -> usize {
        self.k
    }

    /// The K closest peers to `target`.
    ///
    /// Fails with `LookupTimeout` if the overall deadline passes first.
    pub async fn find_closest(&self, target: PeerId) -> Result<Vec<Contact>> {
        let outcome = self.run(target, LookupMode::FindNode).await;
        if outcome.timed_out() {
            return Err(DhtError::LookupTimeout {
                target: target.to_hex(),
                elapsed: outcome.elapsed,
                found: outcome.closest.len(),
            });
        }
        Ok(outcome.closest)
    }

    /// Run a lookup seeded from the routing table
    pub async fn run(&self, target: PeerId, mode: LookupMode) -> LookupOutcome {
        self.run_with_seeds(target, mode, Vec::new()).await
    }

    /// Run a lookup seeded from the routing table plus `seeds`
    pub async fn run_with_seeds(
        &self,
        target: PeerId,
        mode: LookupMode,
        seeds: Vec<Contact>,
    ) -> LookupOutcome {
        let start = Instant::now();
        let deadline = start + self.lookup_timeout;

        let mut shortlist = Shortlist::new(self.local, target, self.k);
        for contact in self.routing.closest(&target, self.k).await {
            shortlist.add(contact);
        }
        for contact in seeds {
            shortlist.add(contact);
        }

        let quorum = match &mode {
            LookupMode::FindNode => usize::MAX,
            LookupMode::FindValue { quorum, .. } => (*quorum).max(1),
        };

        let mut records: Vec<(PeerId, Record)> = Vec::new();
        let mut improved = true;
        let mut rounds = 0;

        let end = 'rounds: loop {
            if Instant::now() >= deadline {
                break LookupEnd::TimedOut;
            }

            let limit = if improved { self.alpha } else { usize::MAX };
            let batch = shortlist.next_batch(limit);
            if batch.is_empty() {
                break LookupEnd::Converged;
            }

            rounds += 1;
            self.events.emit(DhtEvent::LookupRound {
                target,
                round: rounds,
                queried: batch.len(),
            });

            let mut in_flight = JoinSet::new();
            for contact in batch {
                shortlist.set_state(&contact.id, ProbeState::InFlight);
                in_flight.spawn(self.probe(contact, target, mode.clone()));
            }

            let mut learned: HashSet<PeerId> = HashSet::new();
            loop {
                let joined = match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                    Ok(Some(joined)) => joined,
                    Ok(None) => break,
                    Err(_) => {
                        in_flight.abort_all();
                        break 'rounds LookupEnd::TimedOut;
                    }
                };
                let Ok((contact, result)) = joined else {
                    continue;
                };

                match result {
                    Ok(Probe::Closer(closer)) => {
                        shortlist.set_state(&contact.id, ProbeState::Responded);
                        self.learn(&contact, &closer);
                        for c in closer {
                            let id = c.id;
                            if shortlist.add(c) {
                                learned.insert(id);
                            }
                        }
                    }
                    Ok(Probe::Found(record)) => {
                        shortlist.set_state(&contact.id, ProbeState::Responded);
                        self.learn(&contact, &[]);
                        if let LookupMode::FindValue { validator, .. } = &mode {
                            if let Err(e) = validator.validate(&record) {
                                trace!("Discarding invalid record from {}: {}", contact.id.short(), e);
                                continue;
                            }
                        }
                        if !records.iter().any(|(peer, _)| *peer == contact.id) {
                            records.push((contact.id, record));
                        }
                        if records.len() >= quorum {
                            in_flight.abort_all();
                            break 'rounds LookupEnd::QuorumReached;
                        }
                    }
                    Err(e) => {
                        shortlist.set_state(&contact.id, ProbeState::Failed);
                        self.events.emit(DhtEvent::RpcFailed {
                            peer: contact.id,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            shortlist.fail_in_flight();
            improved = shortlist.live_best_contains(&learned);
        };

        let outcome = LookupOutcome {
            closest: shortlist.closest(),
            records,
            end,
            elapsed: start.elapsed(),
        };
        self.events.emit(DhtEvent::LookupFinished {
            target,
            end,
            rounds,
            closest: outcome.closest.len(),
            records: outcome.records.len(),
            elapsed: outcome.elapsed,
        });
        outcome
    }

    /// One RPC under the per-RPC timeout
    fn probe(
        &self,
        contact: Contact,
        target: PeerId,
        mode: LookupMode,
    ) -> impl std::future::Future<Output = (Contact, std::result::Result<Probe, NetworkError>)> + Send + 'static
    {
        let rpc = self.rpc.clone();
        let rpc_timeout = self.rpc_timeout;
        async move {
            let call = async {
                match &mode {
                    LookupMode::FindNode => rpc.find_node(&contact, target).await.map(Probe::Closer),
                    LookupMode::FindValue { key, .. } => {
                        rpc.find_value(&contact, key).await.map(|found| match found {
                            FindValueResult::Found(record) => Probe::Found(record),
                            FindValueResult::Closer(closer) => Probe::Closer(closer),
                        })
                    }
                }
            };
            let result = match tokio::time::timeout(rpc_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(NetworkError::timeout(contact.id.to_hex())),
            };
            (contact, result)
        }
    }

    /// Remember the addresses a responder handed out, and offer the
    /// responder and those contacts to the routing table in the background.
    fn learn(&self, responder: &Contact, closer: &[Contact]) {
        let mut offered = Vec::with_capacity(closer.len() + 1);
        offered.push(responder.clone());
        for contact in closer {
            if contact.id != self.local && contact.id != responder.id {
                self.address_book
                    .add(contact.id, contact.addr.clone(), AddressTtl::RECENTLY_SEEN);
                offered.push(contact.clone());
            }
        }

        let routing = self.routing.clone();
        tokio::spawn(async move {
            for contact in offered {
                routing.update(contact).await;
            }
        });
    }
}
