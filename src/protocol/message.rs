//! DHT protocol messages
//!
//! Request and response types exchanged between nodes. Every exchange is
//! a single [`Query`] answered by a single [`Reply`].

use crate::dht::record::Record;
use crate::peer::{Contact, PeerId};
use serde::{Deserialize, Serialize};

/// The four Kademlia RPCs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Ping,
    FindNode { target: PeerId },
    FindValue { key: String },
    Store { record: Record },
}

impl Request {
    /// Short name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "PING",
            Request::FindNode { .. } => "FIND_NODE",
            Request::FindValue { .. } => "FIND_VALUE",
            Request::Store { .. } => "STORE",
        }
    }
}

/// A request plus the requester's contact.
///
/// `sender` is `None` for client-mode requesters, which must not be added
/// to the responder's routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub sender: Option<Contact>,
    pub request: Request,
}

impl Query {
    /// Create a new query
    pub fn new(sender: Option<Contact>, request: Request) -> Self {
        Self { sender, request }
    }
}

/// Answers to a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Answer to PING
    Pong,
    /// Closest known contacts, for FIND_NODE or a FIND_VALUE miss
    Nodes { closer: Vec<Contact> },
    /// The stored record, for a FIND_VALUE hit
    Value { record: Record },
    /// STORE accepted
    Stored,
    /// STORE refused by the validator or the size limit
    Rejected { reason: String },
    /// The request could not be handled
    Error { message: String },
}

/// A response plus the responder's id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub responder: PeerId,
    pub response: Response,
}

impl Reply {
    /// Create a new reply
    pub fn new(responder: PeerId, response: Response) -> Self {
        Self {
            responder,
            response,
        }
    }
}
