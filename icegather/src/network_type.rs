use serde::{Deserialize, Serialize};
use shared::error::*;
use std::fmt;
use std::net::IpAddr;

pub(crate) const UDP: &str = "udp";

/// Represents the type of network a candidate lives on.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    /// Indicates UDP over IPv4.
    #[serde(rename = "udp4")]
    Udp4,
    /// Indicates UDP over IPv6.
    #[serde(rename = "udp6")]
    Udp6,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Udp4 => "udp4",
            Self::Udp6 => "udp6",
        };
        write!(f, "{s}")
    }
}

impl NetworkType {
    /// Returns the short network description.
    #[must_use]
    pub fn network_short(self) -> String {
        UDP.to_owned()
    }

    /// Returns whether the network type is IPv4 or not.
    #[must_use]
    pub const fn is_ipv4(self) -> bool {
        matches!(self, Self::Udp4)
    }

    /// Returns whether the network type is IPv6 or not.
    #[must_use]
    pub const fn is_ipv6(self) -> bool {
        matches!(self, Self::Udp6)
    }
}

/// Determines the type of network based on the network string and ip address.
pub(crate) fn determine_network_type(network: &str, ip: &IpAddr) -> Result<NetworkType> {
    if !network.to_lowercase().starts_with(UDP) {
        return Err(Error::ErrUnsupportedProtocol);
    }

    if ip.is_ipv4() || ip.to_canonical().is_ipv4() {
        Ok(NetworkType::Udp4)
    } else {
        Ok(NetworkType::Udp6)
    }
}
