//! Peer module
//!
//! Peer identifiers, keypair identities, layered addresses and the
//! address book.

pub mod address;
pub mod address_book;
pub mod contact;
pub mod id;
pub mod identity;

// Re-export main types
pub use address::{Host, NetworkAddress, Transport};
pub use address_book::{AddressBook, AddressTtl};
pub use contact::Contact;
pub use id::{Distance, PeerId, ID_BITS, ID_LEN};
pub use identity::PeerIdentity;
