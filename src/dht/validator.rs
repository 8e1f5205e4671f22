//! Record validation and selection
//!
//! A [`Validator`] decides whether a record may be stored and which of
//! several conflicting records for one key wins.

use crate::dht::record::{signable_bytes, Record, SIGNED_KEY_PREFIX, SIGNED_METADATA_LEN};
use crate::error::{DhtError, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::sync::Arc;

/// Accept/reject policy plus conflict resolution for one record namespace
pub trait Validator: Send + Sync {
    /// Check a record before it is stored or returned
    fn validate(&self, record: &Record) -> Result<()>;

    /// Index of the best record among `candidates`, all for `key`
    fn select(&self, key: &str, candidates: &[Record]) -> Result<usize>;
}

/// Validator policies selectable at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ValidatorKind {
    /// Accept everything, keep the first value seen
    Null,
    /// Eight-byte timestamp metadata, newest wins
    Timestamp,
    /// ed25519-signed sequence numbers, highest wins
    Signature,
}

impl ValidatorKind {
    /// Build the validator for this policy
    pub fn build(self) -> Arc<dyn Validator> {
        match self {
            ValidatorKind::Null => Arc::new(NullValidator),
            ValidatorKind::Timestamp => Arc::new(TimestampValidator),
            ValidatorKind::Signature => Arc::new(SignatureValidator),
        }
    }
}

fn no_candidates(key: &str) -> DhtError {
    DhtError::validation(key, "no candidates to select from")
}

/// Index of the largest item; the earliest wins ties
fn first_max<T: Ord>(items: impl Iterator<Item = T>) -> Option<usize> {
    let mut best: Option<(usize, T)> = None;
    for (i, item) in items.enumerate() {
        let better = match &best {
            Some((_, current)) => item > *current,
            None => true,
        };
        if better {
            best = Some((i, item));
        }
    }
    best.map(|(i, _)| i)
}

/// Accepts every record and selects the first candidate.
///
/// Provides no conflict resolution at all; useful for tests and closed
/// networks only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullValidator;

impl Validator for NullValidator {
    fn validate(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    fn select(&self, key: &str, candidates: &[Record]) -> Result<usize> {
        if candidates.is_empty() {
            return Err(no_candidates(key));
        }
        Ok(0)
    }
}

/// Requires an 8-byte big-endian timestamp and selects the newest record
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampValidator;

impl Validator for TimestampValidator {
    fn validate(&self, record: &Record) -> Result<()> {
        match record.timestamp() {
            Some(_) => Ok(()),
            None => Err(DhtError::validation(
                &record.key,
                format!(
                    "expected 8 bytes of timestamp metadata, got {}",
                    record.metadata.len()
                ),
            )),
        }
    }

    fn select(&self, key: &str, candidates: &[Record]) -> Result<usize> {
        first_max(candidates.iter().map(|r| r.timestamp())).ok_or_else(|| no_candidates(key))
    }
}

/// Requires records under `/pk/<public key>/<name>` signed by that key and
/// selects the highest sequence number
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureValidator;

impl SignatureValidator {
    fn owner(key: &str) -> std::result::Result<[u8; 32], String> {
        let rest = key
            .strip_prefix(SIGNED_KEY_PREFIX)
            .ok_or_else(|| format!("key must start with '{}'", SIGNED_KEY_PREFIX))?;
        let (owner_hex, name) = rest
            .split_once('/')
            .ok_or_else(|| "key must be /pk/<public key>/<name>".to_string())?;
        if name.is_empty() {
            return Err("key has an empty name".to_string());
        }
        let bytes = hex::decode(owner_hex).map_err(|e| format!("bad public key hex: {}", e))?;
        bytes
            .try_into()
            .map_err(|_| "public key must be 32 bytes".to_string())
    }

    fn check(record: &Record) -> std::result::Result<(), String> {
        let owner = Self::owner(&record.key)?;
        if record.metadata.len() != SIGNED_METADATA_LEN {
            return Err(format!(
                "expected {} bytes of signature metadata, got {}",
                SIGNED_METADATA_LEN,
                record.metadata.len()
            ));
        }
        if record.metadata[..32] != owner {
            return Err("metadata public key does not match the key owner".to_string());
        }

        let public = VerifyingKey::from_bytes(&owner).map_err(|e| format!("bad public key: {}", e))?;
        let seq = record.sequence().ok_or_else(|| "missing sequence".to_string())?;
        let signature = Signature::from_slice(&record.metadata[40..])
            .map_err(|e| format!("bad signature encoding: {}", e))?;

        public
            .verify(&signable_bytes(&record.key, seq, &record.value), &signature)
            .map_err(|_| "signature does not verify".to_string())
    }
}

impl Validator for SignatureValidator {
    fn validate(&self, record: &Record) -> Result<()> {
        Self::check(record).map_err(|reason| DhtError::validation(&record.key, reason))
    }

    fn select(&self, key: &str, candidates: &[Record]) -> Result<usize> {
        first_max(candidates.iter().map(|r| r.sequence())).ok_or_else(|| no_candidates(key))
    }
}
