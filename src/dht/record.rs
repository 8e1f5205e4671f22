//! DHT records
//!
//! A record is a UTF-8 key, an opaque value and validator metadata. It
//! lives at `H(key)` in the id space.

use crate::peer::PeerId;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

/// Prefix of keys owned by an ed25519 public key
pub const SIGNED_KEY_PREFIX: &str = "/pk/";

/// Length of signed-record metadata: public key, sequence, signature
pub const SIGNED_METADATA_LEN: usize = 32 + 8 + 64;

/// A key/value record as stored and exchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record key
    pub key: String,
    /// Record value
    #[serde(with = "hex::serde")]
    pub value: Vec<u8>,
    /// Validator-specific metadata
    #[serde(with = "hex::serde", default)]
    pub metadata: Vec<u8>,
}

impl Record {
    /// Create a record without metadata
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            metadata: Vec::new(),
        }
    }

    /// Create a record carrying a big-endian timestamp
    pub fn timestamped(key: impl Into<String>, value: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            metadata: timestamp.to_be_bytes().to_vec(),
        }
    }

    /// Create a record signed by `signer`.
    ///
    /// The key becomes `/pk/<public key hex>/<name>` and the metadata holds
    /// the public key, the sequence number and the signature over
    /// `key || seq || value`.
    pub fn signed(signer: &SigningKey, name: &str, value: impl Into<Vec<u8>>, seq: u64) -> Self {
        let public = signer.verifying_key();
        let key = format!("{}{}/{}", SIGNED_KEY_PREFIX, hex::encode(public.as_bytes()), name);
        let value = value.into();
        let signature = signer.sign(&signable_bytes(&key, seq, &value));

        let mut metadata = Vec::with_capacity(SIGNED_METADATA_LEN);
        metadata.extend_from_slice(public.as_bytes());
        metadata.extend_from_slice(&seq.to_be_bytes());
        metadata.extend_from_slice(&signature.to_bytes());

        Self {
            key,
            value,
            metadata,
        }
    }

    /// Location of this record in the id space
    pub fn target(&self) -> PeerId {
        key_target(&self.key)
    }

    /// Timestamp metadata, if the metadata is exactly eight bytes
    pub fn timestamp(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.metadata.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    /// Sequence number of a signed record
    pub fn sequence(&self) -> Option<u64> {
        if self.metadata.len() != SIGNED_METADATA_LEN {
            return None;
        }
        let bytes: [u8; 8] = self.metadata[32..40].try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }
}

/// Location of a key in the id space
pub fn key_target(key: &str) -> PeerId {
    PeerId::digest(key.as_bytes())
}

/// Bytes covered by a signed record's signature
pub fn signable_bytes(key: &str, seq: u64, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 8 + value.len());
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(value);
    out
}
