//! Peer identifier module
//!
//! 160-bit peer identifiers and the XOR distance metric between them.

use crate::error::AddressError;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::ops::BitXor;
use std::str::FromStr;

/// Length of a peer identifier in bytes
pub const ID_LEN: usize = 20;

/// Length of a peer identifier in bits, and the number of routing buckets
pub const ID_BITS: usize = ID_LEN * 8;

/// Peer identifier (20 bytes)
///
/// Doubles as a point in the XOR metric space, so record keys are mapped
/// onto the same type through [`PeerId::digest`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId([u8; ID_LEN]);

impl PeerId {
    /// Create a new PeerId from bytes
    pub fn new(id: [u8; ID_LEN]) -> Self {
        Self(id)
    }

    /// Generate a random PeerId
    pub fn random() -> Self {
        use rand::Rng;
        let mut id = [0u8; ID_LEN];
        rand::thread_rng().fill(&mut id);
        Self(id)
    }

    /// SHA-1 digest of arbitrary bytes, as a point in the id space
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data.as_ref());
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&hasher.finalize());
        Self(id)
    }

    /// Get the PeerId as bytes
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Get the PeerId as a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a PeerId from a hex string
    pub fn from_hex(hex_str: &str) -> Result<Self, AddressError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| AddressError::invalid_peer_id(hex_str, e.to_string()))?;
        if bytes.len() != ID_LEN {
            return Err(AddressError::invalid_peer_id(
                hex_str,
                format!("expected {} bytes, got {}", ID_LEN, bytes.len()),
            ));
        }
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }

    /// XOR distance to another id
    pub fn distance(&self, other: &PeerId) -> Distance {
        *self ^ *other
    }

    /// First eight hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl BitXor for PeerId {
    type Output = Distance;

    fn bitxor(self, rhs: PeerId) -> Distance {
        let mut out = [0u8; ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ rhs.0[i];
        }
        Distance(out)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for PeerId {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.to_hex()
    }
}

/// XOR distance between two ids, ordered as a 160-bit big-endian integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Distance([u8; ID_LEN]);

impl Distance {
    /// Distance from an id to itself
    pub const ZERO: Distance = Distance([0u8; ID_LEN]);

    /// Get the raw distance bytes
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Check if this is the zero distance
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Position of the highest set bit, counted from the least significant bit.
    ///
    /// This is the routing bucket a peer at this distance belongs to.
    /// Returns `None` for the zero distance.
    pub fn bucket_index(&self) -> Option<usize> {
        self.0.iter().enumerate().find(|(_, b)| **b != 0).map(|(i, b)| {
            let from_msb = i * 8 + b.leading_zeros() as usize;
            ID_BITS - 1 - from_msb
        })
    }
}
