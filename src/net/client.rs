//! TCP RPC client
//!
//! Opens one connection per RPC, writes a framed [`Query`] and reads back a
//! framed [`Reply`].

use crate::dht::rpc::RpcClient;
use crate::error::NetworkError;
use crate::peer::{AddressBook, Contact, NetworkAddress, Transport};
use crate::protocol::message::{Query, Reply, Request};
use crate::protocol::wire::{read_frame, write_frame};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace};

/// Time allowed for the TCP handshake with one address
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials peers over TCP
#[derive(Clone)]
pub struct TcpRpcClient {
    /// Sent with every query; `None` in client mode
    local: Option<Contact>,
    address_book: Arc<AddressBook>,
}

impl TcpRpcClient {
    /// Create a client announcing `local` as the sender of its queries
    pub fn new(local: Option<Contact>, address_book: Arc<AddressBook>) -> Self {
        Self {
            local,
            address_book,
        }
    }

    /// Addresses to try for `to`: the contact's own first, then remembered ones
    fn candidates(&self, to: &Contact) -> Vec<NetworkAddress> {
        let mut addrs = vec![to.addr.clone()];
        for addr in self.address_book.addresses(&to.id) {
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        addrs.retain(|a| a.transport == Transport::Tcp);
        addrs
    }

    async fn exchange(&self, addr: &NetworkAddress, request: &Request) -> io::Result<Reply> {
        let (host, port) = addr.dial_target();
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

        let query = Query::new(self.local.clone(), request.clone());
        write_frame(&mut stream, &query).await?;
        read_frame(&mut stream).await
    }
}

#[async_trait]
impl RpcClient for TcpRpcClient {
    async fn call(&self, to: &Contact, request: Request) -> Result<Reply, NetworkError> {
        let addrs = self.candidates(to);
        if addrs.is_empty() {
            return Err(NetworkError::unreachable(to.id.to_hex(), "no TCP address known"));
        }

        let mut last_error = String::new();
        for addr in addrs {
            trace!("{} -> {} at {}", request.name(), to.id.short(), addr);
            match self.exchange(&addr, &request).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(NetworkError::protocol(to.id.to_hex(), e.to_string()));
                }
                Err(e) => {
                    debug!("Failed to reach {} at {}: {}", to.id.short(), addr, e);
                    last_error = format!("{}: {}", addr, e);
                }
            }
        }
        Err(NetworkError::unreachable(to.id.to_hex(), last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{AddressTtl, PeerId};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_candidates_prefer_contact_address() {
        let book = Arc::new(AddressBook::new());
        let id = PeerId::random();
        let primary: NetworkAddress = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        let backup: NetworkAddress = "/ip4/127.0.0.1/tcp/4002".parse().unwrap();
        let udp: NetworkAddress = "/ip4/127.0.0.1/udp/4003".parse().unwrap();
        book.add(id, primary.clone(), AddressTtl::Permanent);
        book.add(id, backup.clone(), AddressTtl::Permanent);
        book.add(id, udp, AddressTtl::Permanent);

        let client = TcpRpcClient::new(None, book);
        let addrs = client.candidates(&Contact::new(id, primary.clone()));
        assert_eq!(addrs, vec![primary, backup]);
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = TcpRpcClient::new(None, Arc::new(AddressBook::new()));
        let contact = Contact::new(PeerId::random(), NetworkAddress::tcp(addr));
        let err = client.call(&contact, Request::Ping).await.unwrap_err();
        assert!(matches!(err, NetworkError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_garbage_reply_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _query: Query = read_frame(&mut socket).await.unwrap();
            let body = b"not json";
            socket.write_u32(body.len() as u32).await.unwrap();
            socket.write_all(body).await.unwrap();
        });

        let client = TcpRpcClient::new(None, Arc::new(AddressBook::new()));
        let contact = Contact::new(PeerId::random(), NetworkAddress::tcp(addr));
        let err = client.call(&contact, Request::Ping).await.unwrap_err();
        assert!(matches!(err, NetworkError::Protocol { .. }));
    }
}
