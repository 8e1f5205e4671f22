//! Layered peer addresses
//!
//! Parses and composes addresses of the form
//! `/ip4/127.0.0.1/tcp/3001/p2p/<peer id hex>`.

use crate::error::AddressError;
use crate::peer::id::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// Network host layer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Dns(String),
    Dns4(String),
    Dns6(String),
}

impl Host {
    fn protocol(&self) -> &'static str {
        match self {
            Host::Ip4(_) => "ip4",
            Host::Ip6(_) => "ip6",
            Host::Dns(_) => "dns",
            Host::Dns4(_) => "dns4",
            Host::Dns6(_) => "dns6",
        }
    }

    fn value(&self) -> String {
        match self {
            Host::Ip4(ip) => ip.to_string(),
            Host::Ip6(ip) => ip.to_string(),
            Host::Dns(name) | Host::Dns4(name) | Host::Dns6(name) => name.clone(),
        }
    }
}

/// Transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    fn protocol(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

/// A dialable address without the peer layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkAddress {
    pub host: Host,
    pub transport: Transport,
    pub port: u16,
}

impl NetworkAddress {
    /// Create a TCP address for an IP socket address
    pub fn tcp(addr: SocketAddr) -> Self {
        let host = match addr.ip() {
            IpAddr::V4(ip) => Host::Ip4(ip),
            IpAddr::V6(ip) => Host::Ip6(ip),
        };
        Self {
            host,
            transport: Transport::Tcp,
            port: addr.port(),
        }
    }

    /// Host and port in a form accepted by `TcpStream::connect`
    pub fn dial_target(&self) -> (String, u16) {
        (self.host.value(), self.port)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{}/{}/{}/{}",
            self.host.protocol(),
            self.host.value(),
            self.transport.protocol(),
            self.port
        )
    }
}

impl FromStr for NetworkAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_layers(s)? {
            (address, None) => Ok(address),
            (_, Some(_)) => Err(AddressError::malformed(
                s,
                "expected an address without a peer component",
            )),
        }
    }
}

impl TryFrom<String> for NetworkAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NetworkAddress> for String {
    fn from(addr: NetworkAddress) -> Self {
        addr.to_string()
    }
}

/// Parse a full peer address into its PeerId and dialable address.
///
/// The peer component (`/p2p/<id>` or `/ipfs/<id>`) must be the last layer;
/// the returned address is the input with that layer stripped.
pub fn parse(s: &str) -> Result<(PeerId, NetworkAddress), AddressError> {
    match parse_layers(s)? {
        (address, Some(peer)) => Ok((peer, address)),
        (_, None) => Err(AddressError::MissingPeerComponent(s.to_string())),
    }
}

/// Append the peer layer to an address
pub fn compose(peer: &PeerId, address: &NetworkAddress) -> String {
    format!("{}/p2p/{}", address, peer)
}

fn parse_layers(s: &str) -> Result<(NetworkAddress, Option<PeerId>), AddressError> {
    let rest = s
        .strip_prefix('/')
        .ok_or_else(|| AddressError::malformed(s, "address must start with '/'"))?;

    let mut parts = rest.split('/');
    let mut host = None;
    let mut transport = None;
    let mut peer = None;

    while let Some(protocol) = parts.next() {
        if protocol.is_empty() {
            return Err(AddressError::malformed(s, "empty component"));
        }
        if peer.is_some() {
            return Err(AddressError::malformed(s, "peer component must be the last layer"));
        }
        let value = match parts.next() {
            Some(v) if !v.is_empty() => v,
            _ => {
                return Err(AddressError::malformed(
                    s,
                    format!("protocol '{}' has no value", protocol),
                ))
            }
        };

        match protocol {
            "ip4" | "ip6" | "dns" | "dns4" | "dns6" => {
                if host.is_some() {
                    return Err(AddressError::malformed(s, "duplicate host layer"));
                }
                host = Some(parse_host(s, protocol, value)?);
            }
            "tcp" | "udp" => {
                if host.is_none() {
                    return Err(AddressError::malformed(s, "transport layer before host layer"));
                }
                if transport.is_some() {
                    return Err(AddressError::malformed(s, "duplicate transport layer"));
                }
                let port = value
                    .parse::<u16>()
                    .map_err(|e| AddressError::malformed(s, format!("invalid port '{}': {}", value, e)))?;
                let kind = if protocol == "tcp" { Transport::Tcp } else { Transport::Udp };
                transport = Some((kind, port));
            }
            "p2p" | "ipfs" => {
                if transport.is_none() {
                    return Err(AddressError::malformed(s, "peer component before transport layer"));
                }
                peer = Some(PeerId::from_hex(value)?);
            }
            other => {
                return Err(AddressError::malformed(s, format!("unknown protocol '{}'", other)));
            }
        }
    }

    let host = host.ok_or_else(|| AddressError::malformed(s, "missing host layer"))?;
    let (transport, port) =
        transport.ok_or_else(|| AddressError::malformed(s, "missing transport layer"))?;

    Ok((
        NetworkAddress {
            host,
            transport,
            port,
        },
        peer,
    ))
}

fn parse_host(s: &str, protocol: &str, value: &str) -> Result<Host, AddressError> {
    let host = match protocol {
        "ip4" => Host::Ip4(
            value
                .parse()
                .map_err(|_| AddressError::malformed(s, format!("invalid ip4 address '{}'", value)))?,
        ),
        "ip6" => Host::Ip6(
            value
                .parse()
                .map_err(|_| AddressError::malformed(s, format!("invalid ip6 address '{}'", value)))?,
        ),
        "dns" => Host::Dns(value.to_string()),
        "dns4" => Host::Dns4(value.to_string()),
        _ => Host::Dns6(value.to_string()),
    };
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_hex() -> String {
        "0123456789abcdef0123456789abcdef01234567".to_string()
    }

    #[test]
    fn test_parse_full_address() {
        let s = format!("/ip4/127.0.0.1/tcp/3001/p2p/{}", peer_hex());
        let (peer, addr) = parse(&s).unwrap();
        assert_eq!(peer.to_hex(), peer_hex());
        assert_eq!(addr.host, Host::Ip4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.transport, Transport::Tcp);
        assert_eq!(addr.port, 3001);
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/3001");
    }

    #[test]
    fn test_ipfs_alias() {
        let s = format!("/dns4/node.example/tcp/4001/ipfs/{}", peer_hex());
        let (_, addr) = parse(&s).unwrap();
        assert_eq!(addr.host, Host::Dns4("node.example".to_string()));
    }

    #[test]
    fn test_compose_round_trip() {
        let inputs = [
            format!("/ip4/10.0.0.2/tcp/3002/p2p/{}", peer_hex()),
            format!("/ip6/::1/udp/9000/p2p/{}", peer_hex()),
            format!("/dns/localhost/tcp/1/ipfs/{}", peer_hex()),
        ];
        for s in inputs.iter() {
            let (peer, addr) = parse(s).unwrap();
            let again = parse(&compose(&peer, &addr)).unwrap();
            assert_eq!(again, (peer, addr));
        }
    }

    #[test]
    fn test_missing_peer_component() {
        assert_eq!(
            parse("/ip4/127.0.0.1/tcp/3001"),
            Err(AddressError::MissingPeerComponent("/ip4/127.0.0.1/tcp/3001".to_string()))
        );
    }

    #[test]
    fn test_invalid_peer_id() {
        let err = parse("/ip4/127.0.0.1/tcp/3001/p2p/QmNotHex").unwrap_err();
        assert!(matches!(err, AddressError::InvalidPeerId { .. }));
    }

    #[test]
    fn test_malformed_inputs() {
        let cases = [
            "ip4/127.0.0.1/tcp/3001".to_string(),
            "/ip4/127.0.0.1/tcp".to_string(),
            "/ip4/300.0.0.1/tcp/3001".to_string(),
            "/ip4/127.0.0.1/tcp/99999".to_string(),
            "/ip4/127.0.0.1/sctp/5".to_string(),
            "/tcp/3001/ip4/127.0.0.1".to_string(),
            format!("/p2p/{}", peer_hex()),
            format!("/ip4/127.0.0.1/tcp/3001/p2p/{}/tcp/4", peer_hex()),
            "/ip4/127.0.0.1/tcp/3001/".to_string(),
        ];
        for s in cases.iter() {
            assert!(
                matches!(parse(s), Err(AddressError::Malformed { .. })),
                "expected malformed for {}",
                s
            );
        }
    }

    #[test]
    fn test_network_address_from_str() {
        let addr: NetworkAddress = "/ip4/127.0.0.1/tcp/3001".parse().unwrap();
        assert_eq!(addr.dial_target(), ("127.0.0.1".to_string(), 3001));

        let with_peer = format!("/ip4/127.0.0.1/tcp/3001/p2p/{}", peer_hex());
        assert!(with_peer.parse::<NetworkAddress>().is_err());
    }

    #[test]
    fn test_from_socket_addr() {
        let addr = NetworkAddress::tcp("127.0.0.1:4000".parse().unwrap());
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/4000");
    }
}
