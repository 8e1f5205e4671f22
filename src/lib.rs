//! kadnode
//!
//! A Kademlia DHT node and client: XOR-metric routing, iterative lookups,
//! and a replicated key/value layer with quorum reads and pluggable record
//! validation.

pub mod cli;
pub mod dht;
pub mod error;
pub mod net;
pub mod peer;
pub mod protocol;

pub use error::{AddressError, DhtError, NetworkError, Result};

pub use dht::{
    DhtConfig, DhtEvent, DhtNode, EventSink, LookupEngine, NodeMode, PutReport, Record,
    RecordStore, RoutingTable, Validator, ValidatorKind,
};
pub use net::{start_client, start_server, RpcServer, ServerHandle, TcpRpcClient};
pub use peer::{AddressBook, AddressTtl, Contact, Distance, NetworkAddress, PeerId, PeerIdentity};
pub use protocol::{Query, Reply, Request, Response};
