//! DHT node
//!
//! Owns the routing table, address book and record store of one peer,
//! answers incoming queries and exposes PUT/GET on top of the lookup
//! engine.

use crate::dht::config::DhtConfig;
use crate::dht::events::{DhtEvent, EventSink};
use crate::dht::get::GetOrchestrator;
use crate::dht::lookup::{LookupEngine, LookupMode};
use crate::dht::put::{PutOrchestrator, PutReport};
use crate::dht::record::{key_target, Record};
use crate::dht::routing::{RoutingTable, SharedRoutingTable};
use crate::dht::rpc::{QueryHandler, RpcClient};
use crate::dht::store::RecordStore;
use crate::dht::validator::Validator;
use crate::error::Result;
use crate::peer::{AddressBook, AddressTtl, Contact, PeerId, PeerIdentity};
use crate::protocol::message::{Query, Reply, Request, Response};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// A participant in the DHT
#[derive(Clone)]
pub struct DhtNode {
    identity: Arc<PeerIdentity>,
    config: DhtConfig,
    routing: SharedRoutingTable,
    address_book: Arc<AddressBook>,
    store: Arc<RecordStore>,
    validator: Arc<dyn Validator>,
    events: Arc<dyn EventSink>,
    lookup: LookupEngine,
    putter: PutOrchestrator,
    getter: GetOrchestrator,
}

impl DhtNode {
    /// Create a new node sending its RPCs through `rpc`
    pub fn new(
        identity: PeerIdentity,
        config: DhtConfig,
        rpc: Arc<dyn RpcClient>,
        address_book: Arc<AddressBook>,
        validator: Arc<dyn Validator>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let local = identity.peer_id();

        let routing = SharedRoutingTable::new(
            RoutingTable::new(local, config.k),
            rpc.clone(),
            config.rpc_timeout,
            events.clone(),
        );
        let store = Arc::new(RecordStore::new(config.record_ttl, config.max_value_size));
        let lookup = LookupEngine::new(
            local,
            routing.clone(),
            rpc.clone(),
            address_book.clone(),
            &config,
            events.clone(),
        );

        let mut putter = PutOrchestrator::new(
            lookup.clone(),
            rpc,
            validator.clone(),
            events.clone(),
            config.rpc_timeout,
        );
        let mut getter = GetOrchestrator::new(lookup.clone(), validator.clone(), events.clone());
        if !config.is_client() {
            putter = putter.with_local_store(store.clone());
            getter = getter.with_local_store(store.clone());
        }

        info!("DHT node {} created ({:?} mode)", local, config.mode);

        Ok(Self {
            identity: Arc::new(identity),
            config,
            routing,
            address_book,
            store,
            validator,
            events,
            lookup,
            putter,
            getter,
        })
    }

    /// Our peer id
    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// Our keypair
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Node configuration
    pub fn config(&self) -> &DhtConfig {
        &self.config
    }

    /// Known addresses of other peers
    pub fn address_book(&self) -> &Arc<AddressBook> {
        &self.address_book
    }

    /// The routing table
    pub fn routing(&self) -> &SharedRoutingTable {
        &self.routing
    }

    /// Records this node holds for others
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Seed the routing table with known peers.
    ///
    /// Their addresses never expire. Returns the routing table size.
    pub async fn bootstrap(&self, peers: Vec<Contact>) -> usize {
        self.add_peers(peers, AddressTtl::Permanent).await
    }

    /// Remember `peers` for `ttl` and offer them to the routing table
    pub async fn add_peers(&self, peers: Vec<Contact>, ttl: AddressTtl) -> usize {
        for peer in peers {
            if peer.id == self.peer_id() {
                continue;
            }
            debug!("Adding peer {}", peer);
            self.address_book.add(peer.id, peer.addr.clone(), ttl);
            self.routing.update(peer).await;
        }
        self.routing.len().await
    }

    /// Look up our own id to populate the routing table and announce
    /// ourselves to our neighbours
    pub async fn join(&self) -> usize {
        let outcome = self
            .lookup
            .run(self.peer_id(), LookupMode::FindNode)
            .await;
        let size = self.routing.len().await;
        info!(
            "Joined: {} neighbours found, {} peers in routing table",
            outcome.closest.len(),
            size
        );
        size
    }

    /// Run a lookup for a random id inside each bucket untouched for longer
    /// than the refresh interval. Returns the number of buckets refreshed.
    pub async fn refresh_stale_buckets(&self) -> usize {
        let targets = self.routing.stale_targets(self.config.refresh_interval).await;
        let count = targets.len();
        for (bucket, target) in targets {
            debug!("Refreshing bucket {}", bucket);
            self.lookup.run(target, LookupMode::FindNode).await;
            self.routing.mark_bucket_refreshed(bucket).await;
        }
        count
    }

    /// Drop expired addresses and records, returning how many went
    pub fn prune_expired(&self) -> usize {
        let peers = self.address_book.prune_expired();
        let records = self.store.prune_expired();
        if peers + records > 0 {
            debug!("Pruned {} expired peers and {} expired records", peers, records);
        }
        peers + records
    }

    /// The K closest peers to `target`
    pub async fn find_closest(&self, target: PeerId) -> Result<Vec<Contact>> {
        self.lookup.find_closest(target).await
    }

    /// Store a record on the K closest peers to its key
    pub async fn put(&self, record: Record) -> Result<PutReport> {
        self.putter.put(record).await
    }

    /// Fetch the best record for `key` from up to `quorum` peers
    pub async fn get(&self, key: &str, quorum: usize) -> Result<Record> {
        self.getter.get(key, quorum).await
    }

    /// Up to K closest known peers to `target`, leaving out `requester`
    async fn closest_for(&self, target: &PeerId, requester: Option<PeerId>) -> Vec<Contact> {
        let k = self.config.k;
        let mut closer = self.routing.closest(target, k + 1).await;
        if let Some(requester) = requester {
            closer.retain(|c| c.id != requester);
        }
        closer.truncate(k);
        closer
    }

    fn store_record(&self, record: Record) -> Response {
        let key = record.key.clone();
        match self.store.put(record, self.validator.as_ref()) {
            Ok(()) => {
                self.events.emit(DhtEvent::RecordStored { key });
                Response::Stored
            }
            Err(e) => {
                let reason = e.to_string();
                self.events.emit(DhtEvent::RecordRejected {
                    key,
                    reason: reason.clone(),
                });
                Response::Rejected { reason }
            }
        }
    }
}

#[async_trait]
impl QueryHandler for DhtNode {
    async fn handle_query(&self, query: Query) -> Reply {
        let requester = query.sender.as_ref().map(|c| c.id);

        // Queries carrying a sender come from server-mode peers
        if let Some(sender) = query.sender {
            if sender.id != self.peer_id() {
                self.address_book
                    .add(sender.id, sender.addr.clone(), AddressTtl::RECENTLY_SEEN);
                let routing = self.routing.clone();
                tokio::spawn(async move { routing.update(sender).await });
            }
        }

        let response = match query.request {
            Request::Ping => Response::Pong,
            Request::FindNode { target } => Response::Nodes {
                closer: self.closest_for(&target, requester).await,
            },
            Request::FindValue { key } => match self.store.get(&key) {
                Some(record) => Response::Value { record },
                None => Response::Nodes {
                    closer: self.closest_for(&key_target(&key), requester).await,
                },
            },
            Request::Store { record } => self.store_record(record),
        };
        Reply::new(self.peer_id(), response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::config::NodeMode;
    use crate::dht::events::{NoopSink, RecordingSink};
    use crate::dht::sim::{sim_address, sim_contact, SimNetwork};
    use crate::dht::validator::{NullValidator, TimestampValidator};
    use crate::error::DhtError;
    use std::time::Duration;

    struct Cluster {
        net: Arc<SimNetwork>,
        nodes: Vec<DhtNode>,
        contacts: Vec<Contact>,
    }

    fn config(mode: NodeMode) -> DhtConfig {
        DhtConfig {
            k: 8,
            alpha: 2,
            mode,
            ..Default::default()
        }
    }

    fn server(net: &Arc<SimNetwork>, seed: u64, validator: Arc<dyn Validator>) -> (DhtNode, Contact) {
        let identity = PeerIdentity::derive(seed).unwrap();
        let contact = sim_contact(identity.peer_id(), seed as usize);
        let node = DhtNode::new(
            identity,
            config(NodeMode::Server),
            Arc::new(net.client(Some(contact.clone()))),
            Arc::new(AddressBook::new()),
            validator,
            Arc::new(NoopSink),
        )
        .unwrap();
        net.register(contact.id, Arc::new(node.clone()));
        (node, contact)
    }

    fn client(net: &Arc<SimNetwork>, validator: Arc<dyn Validator>) -> DhtNode {
        DhtNode::new(
            PeerIdentity::derive(999).unwrap(),
            config(NodeMode::Client),
            Arc::new(net.client(None)),
            Arc::new(AddressBook::new()),
            validator,
            Arc::new(NoopSink),
        )
        .unwrap()
    }

    async fn cluster(size: usize, validator: Arc<dyn Validator>) -> Cluster {
        let net = SimNetwork::new();
        let mut nodes = Vec::new();
        let mut contacts = Vec::new();
        for seed in 1..=size as u64 {
            let (node, contact) = server(&net, seed, validator.clone());
            nodes.push(node);
            contacts.push(contact);
        }
        // Everyone knows the first peer; the first peer knows the second
        nodes[0].bootstrap(vec![contacts[1].clone()]).await;
        for node in &nodes[1..] {
            node.bootstrap(vec![contacts[0].clone()]).await;
        }
        for node in &nodes {
            node.join().await;
        }
        Cluster {
            net,
            nodes,
            contacts,
        }
    }

    async fn settle() {
        // Let spawned routing updates run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cluster = cluster(8, Arc::new(NullValidator)).await;
        let report = cluster.nodes[2]
            .put(Record::new("greeting", b"hello".to_vec()))
            .await
            .unwrap();
        assert!(report.acks >= 1);
        assert!(!report.partial);

        let record = cluster.nodes[6].get("greeting", 1).await.unwrap();
        assert_eq!(record.value, b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_client_put_then_get() {
        let cluster = cluster(8, Arc::new(NullValidator)).await;
        let client = client(&cluster.net, Arc::new(NullValidator));
        client.bootstrap(vec![cluster.contacts[3].clone()]).await;

        client
            .put(Record::new("k", b"v".to_vec()))
            .await
            .unwrap();
        assert!(client.store().is_empty());
        assert_eq!(client.get("k", 1).await.unwrap().value, b"v".to_vec());
    }

    #[tokio::test]
    async fn test_get_unknown_key() {
        let cluster = cluster(8, Arc::new(NullValidator)).await;
        let err = cluster.nodes[1].get("nobody-wrote-this", 1).await.unwrap_err();
        assert!(matches!(err, DhtError::QuorumNotMet { found: 0, .. }));
    }

    #[tokio::test]
    async fn test_get_served_from_local_store() {
        let cluster = cluster(3, Arc::new(NullValidator)).await;
        cluster.nodes[0]
            .store()
            .put(Record::new("mine", b"local".to_vec()), &NullValidator)
            .unwrap();
        let record = cluster.nodes[0].get("mine", 1).await.unwrap();
        assert_eq!(record.value, b"local".to_vec());
    }

    async fn timestamp_race(newer_delay: Duration, older_delay: Duration) {
        let validator: Arc<dyn Validator> = Arc::new(TimestampValidator);
        let cluster = cluster(6, validator.clone()).await;
        let (older, newer) = (&cluster.nodes[1], &cluster.nodes[2]);
        older
            .store()
            .put(Record::timestamped("clock", b"old".to_vec(), 1), validator.as_ref())
            .unwrap();
        newer
            .store()
            .put(Record::timestamped("clock", b"new".to_vec(), 2), validator.as_ref())
            .unwrap();
        cluster.net.set_delay(newer.peer_id(), newer_delay);
        cluster.net.set_delay(older.peer_id(), older_delay);

        let client = client(&cluster.net, validator);
        client
            .bootstrap(cluster.contacts.iter().cloned().collect())
            .await;
        let record = client.get("clock", 2).await.unwrap();
        assert_eq!(record.value, b"new".to_vec());
        assert_eq!(record.timestamp(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_selects_newest_when_newest_arrives_last() {
        timestamp_race(Duration::from_millis(500), Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_selects_newest_when_newest_arrives_first() {
        timestamp_race(Duration::from_millis(10), Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn test_remote_rejection_fails_put() {
        let cluster = cluster(6, Arc::new(TimestampValidator)).await;
        // The client accepts anything, the servers want timestamps
        let client = client(&cluster.net, Arc::new(NullValidator));
        client.bootstrap(vec![cluster.contacts[0].clone()]).await;

        let err = client
            .put(Record::new("untimed", b"v".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, DhtError::PutFailed { attempted, .. } if attempted > 0));

        for node in &cluster.nodes {
            assert!(node.store().get("untimed").is_none());
        }
    }

    #[tokio::test]
    async fn test_rejected_store_is_not_served() {
        let (net, validator) = (SimNetwork::new(), Arc::new(TimestampValidator));
        let (node, contact) = server(&net, 1, validator);
        let sink = Arc::new(RecordingSink::default());
        let node = DhtNode {
            events: sink.clone(),
            ..node
        };

        let reply = node
            .handle_query(Query::new(
                None,
                Request::Store {
                    record: Record::new("bad", b"v".to_vec()),
                },
            ))
            .await;
        assert_eq!(reply.responder, contact.id);
        assert!(matches!(reply.response, Response::Rejected { .. }));
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, DhtEvent::RecordRejected { key, .. } if key == "bad")));

        let reply = node
            .handle_query(Query::new(None, Request::FindValue { key: "bad".into() }))
            .await;
        assert!(matches!(reply.response, Response::Nodes { .. }));
    }

    #[tokio::test]
    async fn test_find_node_excludes_requester() {
        let cluster = cluster(6, Arc::new(NullValidator)).await;
        settle().await;
        let asker = cluster.contacts[3].clone();
        let reply = cluster.nodes[0]
            .handle_query(Query::new(
                Some(asker.clone()),
                Request::FindNode { target: asker.id },
            ))
            .await;
        match reply.response {
            Response::Nodes { closer } => {
                assert!(!closer.is_empty());
                assert!(closer.iter().all(|c| c.id != asker.id));
                assert!(closer.len() <= 8);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_queries_do_not_enter_routing_tables() {
        let cluster = cluster(5, Arc::new(NullValidator)).await;
        let client = client(&cluster.net, Arc::new(NullValidator));
        client
            .bootstrap(cluster.contacts.iter().cloned().collect())
            .await;
        client.join().await;
        client.get("anything", 1).await.ok();
        settle().await;

        for node in &cluster.nodes {
            assert!(!node.routing().contains(&client.peer_id()).await);
        }
    }

    #[tokio::test]
    async fn test_server_queries_enter_routing_tables() {
        let net = SimNetwork::new();
        let (a, a_contact) = server(&net, 1, Arc::new(NullValidator));
        let (b, _) = server(&net, 2, Arc::new(NullValidator));
        b.bootstrap(vec![a_contact]).await;
        b.join().await;
        settle().await;
        assert!(a.routing().contains(&b.peer_id()).await);
        assert!(!a.address_book().addresses(&b.peer_id()).is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_skips_self() {
        let net = SimNetwork::new();
        let (a, a_contact) = server(&net, 1, Arc::new(NullValidator));
        assert_eq!(a.bootstrap(vec![a_contact]).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_stale_buckets() {
        let cluster = cluster(4, Arc::new(NullValidator)).await;
        let node = &cluster.nodes[0];
        assert_eq!(node.refresh_stale_buckets().await, 0);

        tokio::time::advance(node.config().refresh_interval + Duration::from_secs(1)).await;
        let refreshed = node.refresh_stale_buckets().await;
        assert!(refreshed > 0);
        assert_eq!(node.refresh_stale_buckets().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_expired() {
        let cluster = cluster(2, Arc::new(NullValidator)).await;
        let node = &cluster.nodes[0];
        let stray = PeerId::random();
        node.address_book()
            .add(stray, sim_address(99), AddressTtl::RECENTLY_SEEN);
        node.store()
            .put(Record::new("short-lived", b"v".to_vec()), &NullValidator)
            .unwrap();
        assert_eq!(node.prune_expired(), 0);

        tokio::time::advance(node.config().record_ttl + Duration::from_secs(1)).await;
        assert!(node.prune_expired() >= 2);
        assert!(node.store().is_empty());
        // Bootstrap contacts are permanent
        assert!(!node.address_book().addresses(&cluster.contacts[1].id).is_empty());
        assert!(node.address_book().addresses(&stray).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let net = SimNetwork::new();
        let result = DhtNode::new(
            PeerIdentity::derive(1).unwrap(),
            DhtConfig {
                k: 2,
                alpha: 3,
                ..Default::default()
            },
            Arc::new(net.client(None)),
            Arc::new(AddressBook::new()),
            Arc::new(NullValidator),
            Arc::new(NoopSink),
        );
        assert!(matches!(result, Err(DhtError::Config { .. })));
    }
}
