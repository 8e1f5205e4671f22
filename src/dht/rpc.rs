//! RPC capability interfaces
//!
//! [`RpcClient`] issues the four Kademlia RPCs to a remote contact;
//! [`QueryHandler`] serves them. Transports implement the former and call
//! the latter, so the DHT logic never touches sockets.

use crate::dht::record::Record;
use crate::error::NetworkError;
use crate::peer::{Contact, PeerId};
use crate::protocol::message::{Query, Reply, Request, Response};
use async_trait::async_trait;

/// Result of a FIND_VALUE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindValueResult {
    /// The peer holds a record for the key
    Found(Record),
    /// The peer does not; these are the closest contacts it knows
    Closer(Vec<Contact>),
}

/// Result of a STORE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResult {
    Accepted,
    Rejected(String),
}

fn check_responder(to: &Contact, reply: &Reply) -> Result<(), NetworkError> {
    if reply.responder != to.id {
        return Err(NetworkError::UnexpectedPeer {
            expected: to.id.to_hex(),
            actual: reply.responder.to_hex(),
        });
    }
    Ok(())
}

fn unexpected(to: &Contact, request: &str, response: Response) -> NetworkError {
    match response {
        Response::Error { message } => NetworkError::Remote {
            peer: to.id.to_hex(),
            message,
        },
        other => NetworkError::protocol(
            to.id.to_hex(),
            format!("unexpected answer to {}: {:?}", request, other),
        ),
    }
}

/// Outbound RPC capability
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Send one request to `to` and wait for its reply.
    ///
    /// Implementations attach the local contact as the query sender unless
    /// the node runs in client mode.
    async fn call(&self, to: &Contact, request: Request) -> Result<Reply, NetworkError>;

    /// Check liveness
    async fn ping(&self, to: &Contact) -> Result<(), NetworkError> {
        let reply = self.call(to, Request::Ping).await?;
        check_responder(to, &reply)?;
        match reply.response {
            Response::Pong => Ok(()),
            other => Err(unexpected(to, "PING", other)),
        }
    }

    /// Ask for the contacts closest to `target`
    async fn find_node(&self, to: &Contact, target: PeerId) -> Result<Vec<Contact>, NetworkError> {
        let reply = self.call(to, Request::FindNode { target }).await?;
        check_responder(to, &reply)?;
        match reply.response {
            Response::Nodes { closer } => Ok(closer),
            other => Err(unexpected(to, "FIND_NODE", other)),
        }
    }

    /// Ask for the record under `key`, or closer contacts
    async fn find_value(&self, to: &Contact, key: &str) -> Result<FindValueResult, NetworkError> {
        let reply = self
            .call(to, Request::FindValue { key: key.to_string() })
            .await?;
        check_responder(to, &reply)?;
        match reply.response {
            Response::Value { record } if record.key == key => Ok(FindValueResult::Found(record)),
            Response::Value { record } => Err(NetworkError::protocol(
                to.id.to_hex(),
                format!("asked for '{}' but got '{}'", key, record.key),
            )),
            Response::Nodes { closer } => Ok(FindValueResult::Closer(closer)),
            other => Err(unexpected(to, "FIND_VALUE", other)),
        }
    }

    /// Ask `to` to store a record
    async fn store(&self, to: &Contact, record: Record) -> Result<StoreResult, NetworkError> {
        let reply = self.call(to, Request::Store { record }).await?;
        check_responder(to, &reply)?;
        match reply.response {
            Response::Stored => Ok(StoreResult::Accepted),
            Response::Rejected { reason } => Ok(StoreResult::Rejected(reason)),
            other => Err(unexpected(to, "STORE", other)),
        }
    }
}

/// Inbound RPC capability
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Answer one query
    async fn handle_query(&self, query: Query) -> Reply;
}
