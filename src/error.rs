//! Error types for the DHT node
//!
//! This module defines the error taxonomy shared by every component
//! of the node: addressing, networking, validation and the PUT/GET
//! orchestrators.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while parsing a layered peer address
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The string is not a well-formed layered address
    #[error("Malformed address '{address}': {reason}")]
    Malformed { address: String, reason: String },

    /// The address carries no `/p2p/<id>` component
    #[error("Address '{0}' has no peer identifier component")]
    MissingPeerComponent(String),

    /// The peer identifier component could not be decoded
    #[error("Invalid peer id '{value}': {reason}")]
    InvalidPeerId { value: String, reason: String },
}

impl AddressError {
    /// Create a new Malformed error
    pub fn malformed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        AddressError::Malformed {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidPeerId error
    pub fn invalid_peer_id(value: impl Into<String>, reason: impl Into<String>) -> Self {
        AddressError::InvalidPeerId {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from a single RPC exchange with a remote peer
///
/// These are absorbed by the lookup engine and the PUT fan-out; they only
/// reach callers that talk to the RPC layer directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The peer could not be dialled or the connection broke
    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    /// The peer did not answer within the per-RPC timeout
    #[error("RPC to {peer} timed out")]
    Timeout { peer: String },

    /// The peer answered with something we could not decode or did not expect
    #[error("Protocol error with {peer}: {reason}")]
    Protocol { peer: String, reason: String },

    /// A different peer than the one we dialled answered
    #[error("Expected peer {expected} but {actual} answered")]
    UnexpectedPeer { expected: String, actual: String },

    /// The peer reported an error while handling the request
    #[error("Peer {peer} returned an error: {message}")]
    Remote { peer: String, message: String },
}

impl NetworkError {
    /// Create a new Unreachable error
    pub fn unreachable(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        NetworkError::Unreachable {
            peer: peer.into(),
            reason: reason.into(),
        }
    }

    /// Create a new Timeout error
    pub fn timeout(peer: impl Into<String>) -> Self {
        NetworkError::Timeout { peer: peer.into() }
    }

    /// Create a new Protocol error
    pub fn protocol(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        NetworkError::Protocol {
            peer: peer.into(),
            reason: reason.into(),
        }
    }
}

/// Comprehensive error type for DHT operations
#[derive(Debug, Error)]
pub enum DhtError {
    /// Address parsing errors
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// RPC errors that escaped the lookup layer
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// A record was rejected by the validator
    #[error("Validation error for key '{key}': {reason}")]
    Validation { key: String, reason: String },

    /// A GET collected no usable value
    #[error("Quorum not met for key '{key}': found {found} of {required} values")]
    QuorumNotMet {
        key: String,
        required: usize,
        found: usize,
    },

    /// No peer among the closest accepted a PUT
    #[error("Put failed for key '{key}': no peer accepted the record ({attempted} attempted)")]
    PutFailed { key: String, attempted: usize },

    /// The overall lookup deadline passed before convergence
    #[error("Lookup for {target} timed out after {elapsed:?} ({found} peers found)")]
    LookupTimeout {
        target: String,
        elapsed: Duration,
        found: usize,
    },

    /// The key generation primitive failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Invalid configuration
    #[error("Config error: {message} (field: {field})")]
    Config { message: String, field: String },

    /// Socket level errors outside a single RPC (binding, accepting)
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DhtError {
    /// Create a new Validation error
    pub fn validation(key: impl Into<String>, reason: impl Into<String>) -> Self {
        DhtError::Validation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>, field: impl Into<String>) -> Self {
        DhtError::Config {
            message: message.into(),
            field: field.into(),
        }
    }
}

/// Result type for DHT operations
pub type Result<T> = std::result::Result<T, DhtError>;
