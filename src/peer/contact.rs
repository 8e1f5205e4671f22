//! Routing contacts

use crate::peer::address::{self, NetworkAddress};
use crate::peer::id::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A peer and the address it can be reached at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub id: PeerId,
    pub addr: NetworkAddress,
}

impl Contact {
    /// Create a new contact
    pub fn new(id: PeerId, addr: NetworkAddress) -> Self {
        Self { id, addr }
    }

    /// Parse a contact from a full `/.../p2p/<id>` address
    pub fn parse(s: &str) -> Result<Self, crate::error::AddressError> {
        let (id, addr) = address::parse(s)?;
        Ok(Self { id, addr })
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&address::compose(&self.id, &self.addr))
    }
}
