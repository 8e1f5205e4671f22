//! DHT (Distributed Hash Table) module
//!
//! Kademlia routing, iterative lookups and the PUT/GET record layer.

pub mod config;
pub mod events;
pub mod get;
pub mod lookup;
pub mod node;
pub mod put;
pub mod record;
pub mod routing;
pub mod rpc;
pub mod store;
pub mod validator;

#[cfg(test)]
pub(crate) mod sim;

// Re-exports for convenience
pub use config::{DhtConfig, NodeMode};
pub use events::{DhtEvent, EventSink, LookupEnd, NoopSink, TracingSink};
pub use get::GetOrchestrator;
pub use lookup::{LookupEngine, LookupMode, LookupOutcome};
pub use node::DhtNode;
pub use put::{PutOrchestrator, PutReport};
pub use record::{key_target, Record};
pub use routing::{InsertOutcome, KBucket, RoutingTable, SharedRoutingTable};
pub use rpc::{FindValueResult, QueryHandler, RpcClient, StoreResult};
pub use store::RecordStore;
pub use validator::{NullValidator, SignatureValidator, TimestampValidator, Validator, ValidatorKind};
