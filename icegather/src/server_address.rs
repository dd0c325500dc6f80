use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A configured STUN server endpoint. Hostnames stay unresolved until the
/// port runs them through its resolver, after which the entry is replaced
/// by its resolved form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServerAddress {
    Resolved(SocketAddr),
    Unresolved { host: String, port: u16 },
}

impl ServerAddress {
    /// Builds a server address from a host and port, keeping IP literals resolved.
    pub fn new(host: &str, port: u16) -> Self {
        let trimmed = host.trim_start_matches('[').trim_end_matches(']');
        match trimmed.parse::<IpAddr>() {
            Ok(ip) => ServerAddress::Resolved(SocketAddr::new(ip, port)),
            Err(_) => ServerAddress::Unresolved {
                host: host.to_owned(),
                port,
            },
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, ServerAddress::Unresolved { .. })
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            ServerAddress::Resolved(addr) => Some(*addr),
            ServerAddress::Unresolved { .. } => None,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            ServerAddress::Resolved(addr) => addr.port(),
            ServerAddress::Unresolved { port, .. } => *port,
        }
    }
}

impl From<SocketAddr> for ServerAddress {
    fn from(addr: SocketAddr) -> Self {
        ServerAddress::Resolved(addr)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddress::Resolved(addr) => write!(f, "{addr}"),
            ServerAddress::Unresolved { host, port } => write!(f, "{host}:{port}"),
        }
    }
}
