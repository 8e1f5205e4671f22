//! Peer address book
//!
//! Known addresses per peer, each with an optional expiry. Expired
//! addresses are pruned when a peer's addresses are read, and the whole
//! book is swept at most once per [`SWEEP_INTERVAL`] on insert.

use crate::peer::address::NetworkAddress;
use crate::peer::id::PeerId;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Minimum time between two full sweeps of expired entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How long an address stays in the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressTtl {
    /// Never expires (bootstrap peers)
    Permanent,
    /// Expires after the given duration
    For(Duration),
}

impl AddressTtl {
    /// Addresses learned from lookup responses
    pub const RECENTLY_SEEN: AddressTtl = AddressTtl::For(Duration::from_secs(10 * 60));

    /// The destination a client tool was pointed at
    pub const CLIENT_DEST: AddressTtl = AddressTtl::For(Duration::from_secs(24 * 60 * 60));

    fn expires_at(self, now: Instant) -> Option<Instant> {
        match self {
            AddressTtl::Permanent => None,
            AddressTtl::For(ttl) => Some(now + ttl),
        }
    }
}

#[derive(Debug, Clone)]
struct AddressEntry {
    address: NetworkAddress,
    expires_at: Option<Instant>,
}

impl AddressEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// PeerId to addresses map shared by the node and its transport
#[derive(Debug)]
pub struct AddressBook {
    entries: DashMap<PeerId, Vec<AddressEntry>>,
    last_sweep: Mutex<Instant>,
}

impl Default for AddressBook {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }
}

impl AddressBook {
    /// Create an empty address book
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an address for a peer.
    ///
    /// Re-adding a known address extends its expiry; an address never
    /// loses a permanent TTL.
    pub fn add(&self, peer: PeerId, address: NetworkAddress, ttl: AddressTtl) {
        let now = Instant::now();
        self.sweep_if_due(now);
        let expires_at = ttl.expires_at(now);
        let mut list = self.entries.entry(peer).or_default();

        if let Some(existing) = list.iter_mut().find(|e| e.address == address) {
            existing.expires_at = match (existing.expires_at, expires_at) {
                (None, _) | (_, None) => None,
                (Some(a), Some(b)) => Some(a.max(b)),
            };
        } else {
            trace!("Address book: {} at {}", peer.short(), address);
            list.push(AddressEntry {
                address,
                expires_at,
            });
        }
    }

    /// Live addresses for a peer, pruning any that have expired
    pub fn addresses(&self, peer: &PeerId) -> Vec<NetworkAddress> {
        let now = Instant::now();
        let mut emptied = false;
        let live = match self.entries.get_mut(peer) {
            Some(mut list) => {
                list.retain(|e| e.is_live(now));
                emptied = list.is_empty();
                list.iter().map(|e| e.address.clone()).collect()
            }
            None => Vec::new(),
        };
        if emptied {
            self.entries.remove_if(peer, |_, list| list.is_empty());
        }
        live
    }

    /// Drop every expired address and every peer left without one.
    ///
    /// Returns the number of peers removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, list| {
            list.retain(|e| e.is_live(now));
            !list.is_empty()
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            trace!("Address book: pruned {} expired peers", removed);
        }
        removed
    }

    fn sweep_if_due(&self, now: Instant) {
        // Another caller is already sweeping
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

    /// Forget every address of a peer
    pub fn remove(&self, peer: &PeerId) {
        self.entries.remove(peer);
    }

    /// Number of peers with at least one stored address, including expired
    /// ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the book is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
