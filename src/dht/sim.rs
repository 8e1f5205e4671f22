//! In-process network for tests
//!
//! Routes RPCs straight to registered [`QueryHandler`]s, with per-peer
//! unreachability, delays and hangs.

use crate::dht::record::Record;
use crate::dht::rpc::{QueryHandler, RpcClient};
use crate::error::NetworkError;
use crate::peer::{Contact, NetworkAddress, PeerId};
use crate::protocol::message::{Query, Reply, Request, Response};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Address for the `index`-th simulated peer
pub fn sim_address(index: usize) -> NetworkAddress {
    let ip = Ipv4Addr::new(10, (index >> 16) as u8, (index >> 8) as u8, index as u8);
    NetworkAddress::tcp(SocketAddr::new(ip.into(), 4000))
}

/// Contact for the `index`-th simulated peer
pub fn sim_contact(id: PeerId, index: usize) -> Contact {
    Contact::new(id, sim_address(index))
}

#[derive(Debug, Clone, Copy)]
enum Latency {
    Delay(Duration),
    Hang,
}

/// Registry of simulated peers
#[derive(Default)]
pub struct SimNetwork {
    handlers: DashMap<PeerId, Arc<dyn QueryHandler>>,
    unreachable: DashSet<PeerId>,
    latency: DashMap<PeerId, Latency>,
}

impl SimNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, id: PeerId, handler: Arc<dyn QueryHandler>) {
        self.handlers.insert(id, handler);
    }

    pub fn set_unreachable(&self, id: PeerId) {
        self.unreachable.insert(id);
    }

    pub fn set_delay(&self, id: PeerId, delay: Duration) {
        self.latency.insert(id, Latency::Delay(delay));
    }

    /// Calls to `id` never complete
    pub fn hang(&self, id: PeerId) {
        self.latency.insert(id, Latency::Hang);
    }

    /// An RPC client sending from `local` (`None` for client mode)
    pub fn client(self: &Arc<Self>, local: Option<Contact>) -> SimClient {
        SimClient {
            net: self.clone(),
            local,
        }
    }
}

/// RPC client over a [`SimNetwork`]
#[derive(Clone)]
pub struct SimClient {
    net: Arc<SimNetwork>,
    local: Option<Contact>,
}

#[async_trait]
impl RpcClient for SimClient {
    async fn call(&self, to: &Contact, request: Request) -> Result<Reply, NetworkError> {
        if self.net.unreachable.contains(&to.id) {
            return Err(NetworkError::unreachable(to.id.to_hex(), "simulated outage"));
        }
        let latency = self.net.latency.get(&to.id).map(|l| *l);
        match latency {
            Some(Latency::Delay(d)) => tokio::time::sleep(d).await,
            Some(Latency::Hang) => std::future::pending::<()>().await,
            None => {}
        }
        let handler = self
            .net
            .handlers
            .get(&to.id)
            .map(|h| h.value().clone())
            .ok_or_else(|| NetworkError::unreachable(to.id.to_hex(), "no such peer"))?;
        Ok(handler
            .handle_query(Query::new(self.local.clone(), request))
            .await)
    }
}

/// A peer that knows the whole network and always answers with the true
/// closest peers
pub struct OmniscientPeer {
    id: PeerId,
    everyone: Vec<Contact>,
    response_size: usize,
    record: Option<Record>,
}

impl OmniscientPeer {
    /// Peer `id` in a network of `ids`, answering with `response_size` contacts
    pub fn new(id: PeerId, ids: &[PeerId], response_size: usize) -> Self {
        Self {
            id,
            everyone: ids
                .iter()
                .enumerate()
                .map(|(i, id)| sim_contact(*id, i))
                .collect(),
            response_size,
            record: None,
        }
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.record = Some(record);
        self
    }

    fn closest(&self, target: &PeerId) -> Vec<Contact> {
        let mut all = self.everyone.clone();
        all.sort_by_key(|c| target.distance(&c.id));
        all.truncate(self.response_size);
        all
    }
}

#[async_trait]
impl QueryHandler for OmniscientPeer {
    async fn handle_query(&self, query: Query) -> Reply {
        let response = match query.request {
            Request::Ping => Response::Pong,
            Request::FindNode { target } => Response::Nodes {
                closer: self.closest(&target),
            },
            Request::FindValue { key } => match &self.record {
                Some(record) if record.key == key => Response::Value {
                    record: record.clone(),
                },
                _ => Response::Nodes {
                    closer: self.closest(&PeerId::digest(&key)),
                },
            },
            Request::Store { .. } => Response::Rejected {
                reason: "read-only peer".to_string(),
            },
        };
        Reply::new(self.id, response)
    }
}
