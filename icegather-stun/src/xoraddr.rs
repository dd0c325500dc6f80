
use crate::addr::*;
use crate::attributes::*;
use crate::message::*;
use shared::error::*;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

fn xor_bytes(dst: &mut [u8], a: &[u8], b: &[u8]) -> usize {
    let n = std::cmp::min(a.len(), b.len()).min(dst.len());
    for i in 0..n {
        dst[i] = a[i] ^ b[i];
    }
    n
}

/// XorMappedAddress implements XOR-MAPPED-ADDRESS attribute.
///
/// RFC 5389 Section 15.2
pub struct XorMappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for XorMappedAddress {
    fn default() -> Self {
        XorMappedAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl From<SocketAddr> for XorMappedAddress {
    fn from(addr: SocketAddr) -> Self {
        XorMappedAddress {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for XorMappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(_) => write!(f, "{}:{}", self.ip, self.port),
            IpAddr::V6(_) => write!(f, "[{}]:{}", self.ip, self.port),
        }
    }
}

impl Setter for XorMappedAddress {
    /// add_to adds XOR-MAPPED-ADDRESS to m.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.add_to_as(m, ATTR_XORMAPPED_ADDRESS)
    }
}

impl Getter for XorMappedAddress {
    /// get_from decodes XOR-MAPPED-ADDRESS attribute in message.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.get_from_as(m, ATTR_XORMAPPED_ADDRESS)
    }
}

impl XorMappedAddress {
    /// socket_addr returns the decoded address as a SocketAddr.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// add_to_as adds XOR-MAPPED-ADDRESS value to m as t attribute.
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<()> {
        let (family, ip_len, ip) = match self.ip {
            IpAddr::V4(ipv4) => (FAMILY_IPV4, IPV4LEN, ipv4.octets().to_vec()),
            IpAddr::V6(ipv6) => (FAMILY_IPV6, IPV6LEN, ipv6.octets().to_vec()),
        };

        let mut value = vec![0u8; 4 + ip_len];
        value[0..2].copy_from_slice(&family.to_be_bytes());
        value[2..4].copy_from_slice(&(self.port ^ (MAGIC_COOKIE >> 16) as u16).to_be_bytes());
        xor_bytes(&mut value[4..4 + ip_len], &ip, &xor_key(&m.transaction_id));
        m.add(t, &value);
        Ok(())
    }

    /// get_from_as decodes XOR-MAPPED-ADDRESS attribute value in message
    /// getting it as for t type.
    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() <= 4 {
            return Err(Error::ErrUnexpectedEof);
        }

        let family = u16::from_be_bytes([v[0], v[1]]);
        if family != FAMILY_IPV6 && family != FAMILY_IPV4 {
            return Err(Error::ErrBadFamily);
        }

        let ip_len = if family == FAMILY_IPV4 {
            IPV4LEN
        } else {
            IPV6LEN
        };
        if v[4..].len() != ip_len {
            return Err(Error::ErrBadIpLength);
        }

        self.port = u16::from_be_bytes([v[2], v[3]]) ^ (MAGIC_COOKIE >> 16) as u16;

        let key = xor_key(&m.transaction_id);
        if family == FAMILY_IPV6 {
            let mut ip = [0u8; IPV6LEN];
            xor_bytes(&mut ip, &v[4..], &key);
            self.ip = IpAddr::V6(Ipv6Addr::from(ip));
        } else {
            let mut ip = [0u8; IPV4LEN];
            xor_bytes(&mut ip, &v[4..], &key);
            self.ip = IpAddr::V4(Ipv4Addr::from(ip));
        }

        Ok(())
    }
}

// xor_key is the magic cookie followed by the transaction id.
fn xor_key(transaction_id: &TransactionId) -> [u8; 4 + TRANSACTION_ID_SIZE] {
    let mut key = [0u8; 4 + TRANSACTION_ID_SIZE];
    key[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    key[4..].copy_from_slice(&transaction_id.0);
    key
}
