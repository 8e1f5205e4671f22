//! Network module
//!
//! TCP transport for the DHT RPCs, plus helpers wiring a [`DhtNode`] to it.

pub mod client;
pub mod server;

// Re-export main types
pub use client::TcpRpcClient;
pub use server::RpcServer;

use crate::dht::{DhtConfig, DhtNode, EventSink, Validator};
use crate::error::{DhtError, Result};
use crate::peer::{address, AddressBook, Contact, NetworkAddress, PeerIdentity};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A server-mode node accepting RPCs in the background
pub struct ServerHandle {
    pub node: DhtNode,
    pub local_addr: SocketAddr,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// Our contact as other peers dial it
    pub fn contact(&self) -> Contact {
        Contact::new(self.node.peer_id(), NetworkAddress::tcp(self.local_addr))
    }

    /// Full address including the peer id
    pub fn full_address(&self) -> String {
        address::compose(&self.node.peer_id(), &NetworkAddress::tcp(self.local_addr))
    }

    /// Wait for the accept loop to end
    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(DhtError::Io(std::io::Error::other(e))),
        }
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

/// Bind a TCP server on `bind` and start a server-mode node behind it
pub async fn start_server(
    identity: PeerIdentity,
    bind: SocketAddr,
    config: DhtConfig,
    validator: Arc<dyn Validator>,
    events: Arc<dyn EventSink>,
) -> Result<ServerHandle> {
    let peer_id = identity.peer_id();
    let server = RpcServer::bind(bind, peer_id).await?;
    let local_addr = server.local_addr()?;

    let address_book = Arc::new(AddressBook::new());
    let local = Contact::new(peer_id, NetworkAddress::tcp(local_addr));
    let rpc = Arc::new(TcpRpcClient::new(Some(local), address_book.clone()));
    let node = DhtNode::new(identity, config, rpc, address_book, validator, events)?;

    let task = tokio::spawn(server.serve(Arc::new(node.clone())));
    info!("Node {} serving on {}", peer_id, local_addr);

    Ok(ServerHandle {
        node,
        local_addr,
        task,
    })
}

/// Create a client-mode node that only dials out
pub fn start_client(
    identity: PeerIdentity,
    config: DhtConfig,
    validator: Arc<dyn Validator>,
    events: Arc<dyn EventSink>,
) -> Result<DhtNode> {
    let address_book = Arc::new(AddressBook::new());
    let rpc = Arc::new(TcpRpcClient::new(None, address_book.clone()));
    DhtNode::new(identity, config, rpc, address_book, validator, events)
}
