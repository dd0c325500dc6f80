
pub mod candidate_host;
pub mod candidate_server_reflexive;

use crc::{CRC_32_ISCSI, Crc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::network_type::NetworkType;

pub(crate) const DEFAULT_LOCAL_PREFERENCE: u16 = 65535;

/// Indicates that the candidate is used for RTP.
pub const COMPONENT_RTP: u16 = 1;
/// Indicates that the candidate is used for RTCP.
pub const COMPONENT_RTCP: u16 = 2;

/// Represents the type of candidate `CandidateType` enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateType {
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
}

// String makes CandidateType printable
impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
        };
        write!(f, "{s}")
    }
}

impl CandidateType {
    /// Returns the preference weight of a `CandidateType`.
    ///
    /// 4.1.2.2.  Guidelines for Choosing Type and Local Preferences
    /// The RECOMMENDED values are 126 for host candidates and 100
    /// for server reflexive candidates.
    #[must_use]
    pub const fn preference(self) -> u16 {
        match self {
            Self::Host => 126,
            Self::ServerReflexive => 100,
        }
    }
}

#[derive(Default)]
pub struct CandidateConfig {
    pub candidate_id: String,
    pub network: String,
    pub address: Option<SocketAddr>,
    pub component: u16,
    pub local_preference: Option<u16>,
    pub username: String,
    pub password: String,
}

/// A transport address discovered by a port, together with the ICE
/// attributes a signaling layer needs to advertise it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub(crate) id: String,
    pub(crate) network_type: NetworkType,
    pub(crate) candidate_type: CandidateType,

    pub(crate) component: u16,
    pub(crate) address: SocketAddr,
    pub(crate) base_address: SocketAddr,
    pub(crate) related_address: Option<SocketAddr>,
    pub(crate) local_preference: u16,

    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) is_final: bool,
}

// String makes the candidate printable
impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.network_type, self.candidate_type, self.address
        )?;
        if let Some(related_address) = self.related_address {
            write!(f, " related {related_address}")?;
        }
        Ok(())
    }
}

impl Candidate {
    /// Foundation groups candidates of the same type, base IP and protocol,
    /// see <https://tools.ietf.org/html/rfc5245#section-4.1.1.3>.
    pub fn foundation(&self) -> String {
        let mut buf = vec![];
        buf.extend_from_slice(self.candidate_type.to_string().as_bytes());
        buf.extend_from_slice(self.base_address.ip().to_string().as_bytes());
        buf.extend_from_slice(self.network_type.network_short().as_bytes());

        let checksum = Crc::<u32>::new(&CRC_32_ISCSI).checksum(&buf);

        format!("{checksum}")
    }

    /// Returns Candidate ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns candidate component.
    pub fn component(&self) -> u16 {
        self.component
    }

    /// Returns candidate NetworkType.
    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    /// Returns the transport protocol tag, always "udp" for this port.
    pub fn protocol(&self) -> String {
        self.network_type.network_short()
    }

    /// Returns the advertised transport address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns the local address the candidate is sent from.
    pub fn base_address(&self) -> SocketAddr {
        self.base_address
    }

    pub fn related_address(&self) -> Option<SocketAddr> {
        self.related_address
    }

    /// Returns candidate type.
    pub fn candidate_type(&self) -> CandidateType {
        self.candidate_type
    }

    /// Returns the type preference tier used in the priority.
    pub fn type_preference(&self) -> u16 {
        self.candidate_type.preference()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// A port may produce more candidates later, so none of its candidates
    /// are final.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Computes the priority for this ICE Candidate.
    pub fn priority(&self) -> u32 {
        // The local preference MUST be an integer from 0 (lowest preference) to
        // 65535 (highest preference) inclusive.  When there is only a single IP
        // address, this value SHOULD be set to 65535.
        (1 << 24) * u32::from(self.candidate_type.preference())
            + (1 << 8) * u32::from(self.local_preference)
            + (256 - u32::from(self.component))
    }
}
