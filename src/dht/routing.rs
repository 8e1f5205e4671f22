//! DHT routing table module
//!
//! Implements the Kademlia routing table: 160 k-buckets indexed by the
//! position of the highest differing bit between a peer and the local id.

use crate::dht::events::{DhtEvent, EventSink};
use crate::dht::rpc::RpcClient;
use crate::peer::{Contact, PeerId, ID_BITS, ID_LEN};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::trace;

/// A contact plus when we last heard from it
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub contact: Contact,
    pub last_seen: Instant,
}

/// A bucket in the routing table, ordered least- to most-recently seen
#[derive(Debug, Clone)]
pub struct KBucket {
    entries: VecDeque<RoutingEntry>,
    last_refreshed: Instant,
}

impl KBucket {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            last_refreshed: Instant::now(),
        }
    }

    fn position(&self, id: &PeerId) -> Option<usize> {
        self.entries.iter().position(|e| e.contact.id == *id)
    }

    /// Move a known peer to the most-recently-seen end, optionally with a new address
    fn touch(&mut self, id: &PeerId, contact: Option<Contact>) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        if let Some(mut entry) = self.entries.remove(pos) {
            if let Some(contact) = contact {
                entry.contact = contact;
            }
            entry.last_seen = Instant::now();
            self.entries.push_back(entry);
            self.last_refreshed = Instant::now();
        }
        true
    }

    fn remove(&mut self, id: &PeerId) -> Option<Contact> {
        let pos = self.position(id)?;
        self.entries.remove(pos).map(|e| e.contact)
    }

    /// Entries, least recently seen first
    pub fn entries(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.iter()
    }

    /// Get the number of entries in the bucket
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the bucket is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What happened to a contact offered to the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Added to a bucket with room
    Inserted { bucket: usize },
    /// Already present; moved to most-recently-seen
    Refreshed,
    /// The bucket is full; `oldest` must be pinged before anything changes
    Full { bucket: usize, oldest: Contact },
    /// The local id; never stored
    Ignored,
}

/// Kademlia routing table
#[derive(Debug)]
pub struct RoutingTable {
    local_id: PeerId,
    k: usize,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Create a new routing table
    pub fn new(local_id: PeerId, k: usize) -> Self {
        Self {
            local_id,
            k,
            buckets: (0..ID_BITS).map(|_| KBucket::new()).collect(),
        }
    }

    /// The id this table is centred on
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Bucket capacity
    pub fn k(&self) -> usize {
        self.k
    }

    /// Bucket a peer belongs in, `None` for the local id
    pub fn bucket_index(&self, id: &PeerId) -> Option<usize> {
        self.local_id.distance(id).bucket_index()
    }

    /// Offer a contact to the table.
    ///
    /// Never evicts on its own: a full bucket is reported back so the
    /// caller can ping the oldest entry.
    pub fn insert(&mut self, contact: Contact) -> InsertOutcome {
        let Some(index) = self.bucket_index(&contact.id) else {
            return InsertOutcome::Ignored;
        };
        let k = self.k;
        let bucket = &mut self.buckets[index];

        let id = contact.id;
        if bucket.touch(&id, Some(contact.clone())) {
            return InsertOutcome::Refreshed;
        }

        if bucket.len() < k {
            bucket.entries.push_back(RoutingEntry {
                contact,
                last_seen: Instant::now(),
            });
            bucket.last_refreshed = Instant::now();
            return InsertOutcome::Inserted { bucket: index };
        }

        match bucket.entries.front() {
            Some(oldest) => InsertOutcome::Full {
                bucket: index,
                oldest: oldest.contact.clone(),
            },
            // k == 0 leaves no room at all
            None => InsertOutcome::Ignored,
        }
    }

    /// Mark a peer as just seen
    pub fn refresh(&mut self, id: &PeerId) -> bool {
        match self.bucket_index(id) {
            Some(index) => self.buckets[index].touch(id, None),
            None => false,
        }
    }

    /// Replace an unresponsive peer with a new contact.
    ///
    /// Returns whether the new contact ended up in the table.
    pub fn evict_and_insert(&mut self, stale: &PeerId, contact: Contact) -> bool {
        if let Some(index) = self.bucket_index(stale) {
            self.buckets[index].remove(stale);
        }
        matches!(
            self.insert(contact),
            InsertOutcome::Inserted { .. } | InsertOutcome::Refreshed
        )
    }

    /// Remove a peer from the routing table
    pub fn remove(&mut self, id: &PeerId) -> Option<Contact> {
        let index = self.bucket_index(id)?;
        self.buckets[index].remove(id)
    }

    /// Check if a peer is in the table
    pub fn contains(&self, id: &PeerId) -> bool {
        self.bucket_index(id)
            .map_or(false, |index| self.buckets[index].position(id).is_some())
    }

    /// Up to `n` contacts closest to `target`, nearest first.
    ///
    /// Ties in distance go to the most recently seen entry.
    pub fn closest(&self, target: &PeerId, n: usize) -> Vec<Contact> {
        let mut all: Vec<&RoutingEntry> = self.buckets.iter().flat_map(|b| b.entries.iter()).collect();
        all.sort_by(|a, b| {
            target
                .distance(&a.contact.id)
                .cmp(&target.distance(&b.contact.id))
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });
        all.into_iter().take(n).map(|e| e.contact.clone()).collect()
    }

    /// Get a bucket by index
    pub fn bucket(&self, index: usize) -> Option<&KBucket> {
        self.buckets.get(index)
    }

    /// Get the number of peers in the routing table
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    /// Non-empty buckets that have not changed for longer than `age`
    pub fn stale_buckets(&self, age: Duration) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty() && b.last_refreshed.elapsed() > age)
            .map(|(i, _)| i)
            .collect()
    }

    /// Reset a bucket's staleness clock
    pub fn mark_bucket_refreshed(&mut self, index: usize) {
        if let Some(bucket) = self.buckets.get_mut(index) {
            bucket.last_refreshed = Instant::now();
        }
    }

    /// A random id that falls into bucket `index`
    pub fn random_id_in_bucket(&self, index: usize) -> PeerId {
        use rand::Rng;

        let index = index.min(ID_BITS - 1);
        let mut distance = [0u8; ID_LEN];
        rand::thread_rng().fill(&mut distance);

        let byte_idx = ID_LEN - 1 - index / 8;
        for byte in distance.iter_mut().take(byte_idx) {
            *byte = 0;
        }
        let bit = 1u8 << (index % 8);
        distance[byte_idx] = bit | (distance[byte_idx] & (bit - 1));

        let local = self.local_id.as_bytes();
        let mut id = [0u8; ID_LEN];
        for (i, byte) in id.iter_mut().enumerate() {
            *byte = local[i] ^ distance[i];
        }
        PeerId::new(id)
    }
}

/// Routing table shared between the lookup engine and the query handler.
///
/// Reads take the table's read lock. Updates to one bucket are serialized
/// by that bucket's mutex, held across the liveness ping; the table lock is
/// never held during network I/O and other buckets stay writable.
#[derive(Clone)]
pub struct SharedRoutingTable {
    local_id: PeerId,
    table: Arc<RwLock<RoutingTable>>,
    bucket_locks: Arc<Vec<Mutex<()>>>,
    rpc: Arc<dyn RpcClient>,
    rpc_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl SharedRoutingTable {
    /// Create a new shared table
    pub fn new(
        table: RoutingTable,
        rpc: Arc<dyn RpcClient>,
        rpc_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            local_id: table.local_id(),
            table: Arc::new(RwLock::new(table)),
            bucket_locks: Arc::new((0..ID_BITS).map(|_| Mutex::new(())).collect()),
            rpc,
            rpc_timeout,
            events,
        }
    }

    /// Offer `contact` to the table.
    ///
    /// When its bucket is full the least-recently-seen entry is pinged: if
    /// it answers it is kept and `contact` is dropped, otherwise it is
    /// evicted in favour of `contact`.
    pub async fn update(&self, contact: Contact) {
        let Some(lock) = self.bucket_lock(&contact.id) else {
            return;
        };
        let _serial = lock.lock().await;

        let outcome = self.table.write().await.insert(contact.clone());
        match outcome {
            InsertOutcome::Inserted { bucket } => {
                self.events.emit(DhtEvent::PeerAdded {
                    peer: contact.id,
                    bucket,
                });
            }
            InsertOutcome::Refreshed => {
                self.events.emit(DhtEvent::PeerRefreshed { peer: contact.id });
            }
            InsertOutcome::Ignored => {}
            InsertOutcome::Full { bucket, oldest } => {
                trace!(
                    "Bucket {} full, pinging oldest peer {}",
                    bucket,
                    oldest.id.short()
                );
                let alive = matches!(
                    tokio::time::timeout(self.rpc_timeout, self.rpc.ping(&oldest)).await,
                    Ok(Ok(()))
                );

                let mut table = self.table.write().await;
                if alive {
                    table.refresh(&oldest.id);
                    self.events.emit(DhtEvent::PeerDropped {
                        peer: contact.id,
                        bucket,
                    });
                } else if table.evict_and_insert(&oldest.id, contact.clone()) {
                    self.events.emit(DhtEvent::PeerEvicted {
                        evicted: oldest.id,
                        replacement: contact.id,
                    });
                }
            }
        }
    }

    /// Up to `n` contacts closest to `target`
    pub async fn closest(&self, target: &PeerId, n: usize) -> Vec<Contact> {
        self.table.read().await.closest(target, n)
    }

    /// Remove a peer
    pub async fn remove(&self, id: &PeerId) -> Option<Contact> {
        let lock = self.bucket_lock(id)?;
        let _serial = lock.lock().await;
        self.table.write().await.remove(id)
    }

    /// The mutex serializing updates to `id`'s bucket, `None` for the local id
    fn bucket_lock(&self, id: &PeerId) -> Option<&Mutex<()>> {
        let index = self.local_id.distance(id).bucket_index()?;
        self.bucket_locks.get(index)
    }

    /// Check if a peer is in the table
    pub async fn contains(&self, id: &PeerId) -> bool {
        self.table.read().await.contains(id)
    }

    /// Get the number of peers in the table
    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    /// Check if the table is empty
    pub async fn is_empty(&self) -> bool {
        self.table.read().await.is_empty()
    }

    /// Buckets due for a refresh lookup, each with a random target inside it
    pub async fn stale_targets(&self, age: Duration) -> Vec<(usize, PeerId)> {
        let table = self.table.read().await;
        table
            .stale_buckets(age)
            .into_iter()
            .map(|i| (i, table.random_id_in_bucket(i)))
            .collect()
    }

    /// Reset a bucket's staleness clock
    pub async fn mark_bucket_refreshed(&self, index: usize) {
        self.table.write().await.mark_bucket_refreshed(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::events::{NoopSink, RecordingSink};
    use crate::error::NetworkError;
    use crate::peer::NetworkAddress;
    use crate::protocol::message::{Reply, Request, Response};
    use async_trait::async_trait;
    use std::collections::HashSet;

    fn contact(id: PeerId) -> Contact {
        Contact::new(id, "/ip4/127.0.0.1/tcp/4000".parse::<NetworkAddress>().unwrap())
    }

    /// Id whose distance to `local` has its highest bit at `bucket`, with `low` in the last byte
    fn id_in_bucket(local: &PeerId, bucket: usize, low: u8) -> PeerId {
        let mut d = [0u8; ID_LEN];
        d[ID_LEN - 1 - bucket / 8] |= 1 << (bucket % 8);
        if bucket >= 8 {
            d[ID_LEN - 1] = low;
        }
        let mut id = *local.as_bytes();
        for (i, byte) in id.iter_mut().enumerate() {
            *byte ^= d[i];
        }
        PeerId::new(id)
    }

    /// Answers PING for a fixed set of live peers only
    struct Liveness {
        alive: HashSet<PeerId>,
    }

    #[async_trait]
    impl RpcClient for Liveness {
        async fn call(&self, to: &Contact, _request: Request) -> Result<Reply, NetworkError> {
            if self.alive.contains(&to.id) {
                Ok(Reply::new(to.id, Response::Pong))
            } else {
                Err(NetworkError::unreachable(to.id.to_hex(), "down"))
            }
        }
    }

    /// Never answers a PING to `stuck`, answers everyone else
    struct Stuck {
        stuck: PeerId,
    }

    #[async_trait]
    impl RpcClient for Stuck {
        async fn call(&self, to: &Contact, _request: Request) -> Result<Reply, NetworkError> {
            if to.id == self.stuck {
                std::future::pending::<()>().await;
            }
            Ok(Reply::new(to.id, Response::Pong))
        }
    }

    #[tokio::test]
    async fn test_insert_and_refresh() {
        let local = PeerId::random();
        let mut table = RoutingTable::new(local, 4);
        let peer = id_in_bucket(&local, 100, 1);

        assert_eq!(
            table.insert(contact(peer)),
            InsertOutcome::Inserted { bucket: 100 }
        );
        assert_eq!(table.insert(contact(peer)), InsertOutcome::Refreshed);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&peer));
    }

    #[tokio::test]
    async fn test_self_is_ignored() {
        let local = PeerId::random();
        let mut table = RoutingTable::new(local, 4);
        assert_eq!(table.insert(contact(local)), InsertOutcome::Ignored);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_bucket_never_exceeds_k() {
        let local = PeerId::random();
        let k = 3;
        let mut table = RoutingTable::new(local, k);

        let ids: Vec<PeerId> = (0..5).map(|i| id_in_bucket(&local, 50, i)).collect();
        for id in &ids[..k] {
            assert!(matches!(table.insert(contact(*id)), InsertOutcome::Inserted { .. }));
        }
        match table.insert(contact(ids[3])) {
            InsertOutcome::Full { bucket, oldest } => {
                assert_eq!(bucket, 50);
                assert_eq!(oldest.id, ids[0]);
            }
            other => panic!("expected full bucket, got {:?}", other),
        }
        assert_eq!(table.bucket(50).unwrap().len(), k);
        assert!(!table.contains(&ids[3]));
    }

    #[tokio::test]
    async fn test_refresh_moves_to_tail() {
        let local = PeerId::random();
        let mut table = RoutingTable::new(local, 2);
        let a = id_in_bucket(&local, 20, 1);
        let b = id_in_bucket(&local, 20, 2);
        let c = id_in_bucket(&local, 20, 3);
        table.insert(contact(a));
        table.insert(contact(b));
        assert!(table.refresh(&a));

        match table.insert(contact(c)) {
            InsertOutcome::Full { oldest, .. } => assert_eq!(oldest.id, b),
            other => panic!("expected full bucket, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closest_sorted_by_distance() {
        let local = PeerId::new([0u8; ID_LEN]);
        let mut table = RoutingTable::new(local, 20);
        let ids: Vec<PeerId> = (0..30).map(|_| PeerId::random()).collect();
        for id in &ids {
            table.insert(contact(*id));
        }

        let target = PeerId::random();
        let closest = table.closest(&target, 5);
        assert_eq!(closest.len(), 5.min(table.len()));
        for pair in closest.windows(2) {
            assert!(target.distance(&pair[0].id) < target.distance(&pair[1].id));
        }

        let mut stored: Vec<PeerId> = table.closest(&target, usize::MAX).into_iter().map(|c| c.id).collect();
        stored.sort_by_key(|id| target.distance(id));
        let expected: Vec<PeerId> = stored.into_iter().take(5).collect();
        let got: Vec<PeerId> = closest.into_iter().map(|c| c.id).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_remove() {
        let local = PeerId::random();
        let mut table = RoutingTable::new(local, 4);
        let peer = PeerId::random();
        table.insert(contact(peer));
        assert!(table.remove(&peer).is_some());
        assert!(!table.contains(&peer));
        assert!(table.remove(&peer).is_none());
    }

    #[tokio::test]
    async fn test_random_id_lands_in_bucket() {
        let local = PeerId::random();
        let table = RoutingTable::new(local, 4);
        for index in [0usize, 1, 7, 8, 9, 63, 100, 158, 159] {
            for _ in 0..10 {
                let id = table.random_id_in_bucket(index);
                assert_eq!(table.bucket_index(&id), Some(index));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_buckets() {
        let local = PeerId::random();
        let mut table = RoutingTable::new(local, 4);
        table.insert(contact(id_in_bucket(&local, 10, 0)));
        table.insert(contact(id_in_bucket(&local, 30, 0)));

        assert!(table.stale_buckets(Duration::from_secs(60)).is_empty());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(table.stale_buckets(Duration::from_secs(60)), vec![10, 30]);

        table.mark_bucket_refreshed(10);
        assert_eq!(table.stale_buckets(Duration::from_secs(60)), vec![30]);
    }

    #[tokio::test]
    async fn test_update_keeps_live_oldest() {
        let local = PeerId::random();
        let a = id_in_bucket(&local, 40, 1);
        let b = id_in_bucket(&local, 40, 2);
        let newcomer = id_in_bucket(&local, 40, 3);

        let rpc = Arc::new(Liveness {
            alive: [a, b].into_iter().collect(),
        });
        let sink = Arc::new(RecordingSink::default());
        let shared = SharedRoutingTable::new(
            RoutingTable::new(local, 2),
            rpc,
            Duration::from_secs(1),
            sink.clone(),
        );

        shared.update(contact(a)).await;
        shared.update(contact(b)).await;
        shared.update(contact(newcomer)).await;

        assert!(shared.contains(&a).await);
        assert!(shared.contains(&b).await);
        assert!(!shared.contains(&newcomer).await);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, DhtEvent::PeerDropped { peer, .. } if *peer == newcomer)));
    }

    #[tokio::test]
    async fn test_update_evicts_dead_oldest() {
        let local = PeerId::random();
        let a = id_in_bucket(&local, 40, 1);
        let b = id_in_bucket(&local, 40, 2);
        let newcomer = id_in_bucket(&local, 40, 3);

        let rpc = Arc::new(Liveness {
            alive: [b].into_iter().collect(),
        });
        let shared = SharedRoutingTable::new(
            RoutingTable::new(local, 2),
            rpc,
            Duration::from_secs(1),
            Arc::new(NoopSink),
        );

        shared.update(contact(a)).await;
        shared.update(contact(b)).await;
        shared.update(contact(newcomer)).await;

        assert!(!shared.contains(&a).await);
        assert!(shared.contains(&b).await);
        assert!(shared.contains(&newcomer).await);
        assert_eq!(shared.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_updates_respect_bound() {
        let local = PeerId::random();
        let rpc = Arc::new(Liveness {
            alive: HashSet::new(),
        });
        let shared = SharedRoutingTable::new(
            RoutingTable::new(local, 3),
            rpc,
            Duration::from_millis(50),
            Arc::new(NoopSink),
        );

        let mut handles = Vec::new();
        for i in 0..20u8 {
            let shared = shared.clone();
            let c = contact(id_in_bucket(&local, 90, i));
            handles.push(tokio::spawn(async move { shared.update(c).await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(shared.len().await, 3);
    }

    #[tokio::test]
    async fn test_slow_ping_does_not_block_other_buckets() {
        let local = PeerId::random();
        let oldest = id_in_bucket(&local, 40, 1);
        let newcomer = id_in_bucket(&local, 40, 2);
        let elsewhere = id_in_bucket(&local, 60, 1);

        let shared = SharedRoutingTable::new(
            RoutingTable::new(local, 1),
            Arc::new(Stuck { stuck: oldest }),
            Duration::from_secs(30),
            Arc::new(NoopSink),
        );
        shared.update(contact(oldest)).await;

        // Holds bucket 40 while its ping hangs
        let pinging = {
            let shared = shared.clone();
            tokio::spawn(async move { shared.update(contact(newcomer)).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(Duration::from_secs(1), shared.update(contact(elsewhere)))
            .await
            .unwrap();
        assert!(shared.contains(&elsewhere).await);
        assert!(!shared.contains(&newcomer).await);
        pinging.abort();
    }
}
