//! DHT protocol parameters
//!
//! Bucket size, lookup parallelism, timeouts and record limits.

use crate::error::{DhtError, Result};
use std::time::Duration;

/// Default bucket capacity and replication factor
pub const DEFAULT_K: usize = 20;

/// Default lookup parallelism
pub const DEFAULT_ALPHA: usize = 3;

/// Default per-RPC timeout
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Default overall lookup deadline
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default lifetime of a stored record
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(36 * 60 * 60);

/// Default maximum record value size (64 KiB)
pub const DEFAULT_MAX_VALUE_SIZE: usize = 64 * 1024;

/// Default age after which an untouched bucket is refreshed
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Whether the node offers itself for routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// Serves queries and is advertised to peers
    Server,
    /// Issues queries only; peers never add it to their tables
    Client,
}

/// Runtime parameters of a DHT node
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Bucket capacity, also the number of peers a record is stored on
    pub k: usize,
    /// Concurrent RPCs per lookup round
    pub alpha: usize,
    /// Timeout of a single RPC
    pub rpc_timeout: Duration,
    /// Deadline of a whole lookup
    pub lookup_timeout: Duration,
    /// How long an accepted record is served
    pub record_ttl: Duration,
    /// Largest value the record store accepts
    pub max_value_size: usize,
    /// Buckets untouched for this long are refreshed
    pub refresh_interval: Duration,
    /// Server or client mode
    pub mode: NodeMode,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            record_ttl: DEFAULT_RECORD_TTL,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            mode: NodeMode::Server,
        }
    }
}

impl DhtConfig {
    /// Check that every parameter is usable
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(DhtError::config("must be at least 1", "k"));
        }
        if self.alpha == 0 {
            return Err(DhtError::config("must be at least 1", "alpha"));
        }
        if self.alpha > self.k {
            return Err(DhtError::config(
                format!("must not exceed k ({})", self.k),
                "alpha",
            ));
        }
        if self.rpc_timeout.is_zero() {
            return Err(DhtError::config("must be greater than zero", "rpc_timeout"));
        }
        if self.lookup_timeout.is_zero() {
            return Err(DhtError::config("must be greater than zero", "lookup_timeout"));
        }
        if self.record_ttl.is_zero() {
            return Err(DhtError::config("must be greater than zero", "record_ttl"));
        }
        if self.max_value_size == 0 {
            return Err(DhtError::config("must be at least 1", "max_value_size"));
        }
        Ok(())
    }

    /// Check if the node runs in client mode
    pub fn is_client(&self) -> bool {
        self.mode == NodeMode::Client
    }
}
