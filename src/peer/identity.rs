//! Peer identity
//!
//! An ed25519 keypair and the PeerId derived from its public half.

use crate::error::{DhtError, Result};
use crate::peer::id::PeerId;
use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use std::fmt;
use tracing::debug;

/// Keypair plus the PeerId it names
#[derive(Clone)]
pub struct PeerIdentity {
    signing_key: SigningKey,
    peer_id: PeerId,
}

impl PeerIdentity {
    /// Derive a reproducible identity from a numeric seed.
    ///
    /// The same seed always yields the same keypair and PeerId, which lets
    /// local test networks address nodes by their seed.
    pub fn derive(seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let identity = Self::from_rng(&mut rng)?;
        debug!("Derived identity {} from seed {}", identity.peer_id.short(), seed);
        Ok(identity)
    }

    /// Generate an ephemeral identity from the operating system RNG
    pub fn generate() -> Result<Self> {
        Self::from_rng(&mut OsRng)
    }

    /// Build an identity from an existing signing key
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let peer_id = PeerId::digest(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            peer_id,
        }
    }

    fn from_rng<R: RngCore>(rng: &mut R) -> Result<Self> {
        let mut secret = [0u8; SECRET_KEY_LENGTH];
        rng.try_fill_bytes(&mut secret)
            .map_err(|e| DhtError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&secret)))
    }

    /// Get the PeerId
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Get the signing key
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Get the public key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerIdentity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}
