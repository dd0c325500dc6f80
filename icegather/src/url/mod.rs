
use std::fmt;

use shared::error::*;

use crate::server_address::ServerAddress;

/// The scheme of a server URL.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub enum SchemeType {
    /// The URL represents a STUN server.
    Stun,

    /// The URL represents a STUNS (secure) server.
    Stuns,

    /// The URL represents a TURN server.
    Turn,

    /// The URL represents a TURNS (secure) server.
    Turns,

    /// Any other scheme.
    #[default]
    Unknown,
}

impl From<&str> for SchemeType {
    /// Defines a procedure for creating a new `SchemeType` from a raw
    /// string naming the scheme type.
    fn from(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "stun" => Self::Stun,
            "stuns" => Self::Stuns,
            "turn" => Self::Turn,
            "turns" => Self::Turns,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            SchemeType::Stun => "stun",
            SchemeType::Stuns => "stuns",
            SchemeType::Turn => "turn",
            SchemeType::Turns => "turns",
            SchemeType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Represents a STUN (rfc7064) server URL a port binds against.
/// Only plain `stun:` servers are usable by a UDP port; relay and secure
/// schemes are rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: SchemeType,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') {
            "[".to_owned() + self.host.as_str() + "]"
        } else {
            self.host.clone()
        };
        write!(f, "{}:{}:{}", self.scheme, host, self.port)
    }
}

impl Url {
    /// Parses a STUN server address, either a `stun:host[:port]` URI or a
    /// bare `host:port`. The port defaults to 3478.
    pub fn parse_url(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::ErrHostnameEmpty);
        }

        let s = match raw.split_once(':') {
            Some((scheme, _)) if SchemeType::from(scheme) != SchemeType::Unknown => {
                // "stun:host:port" is not a hierarchical url, so the scheme
                // separator is rewritten before handing it to the url crate
                raw.replacen(':', "://", 1)
            }
            _ => format!("stun://{raw}"),
        };

        let raw_parts = url::Url::parse(&s)?;

        let scheme = raw_parts.scheme().into();
        if scheme != SchemeType::Stun {
            return Err(Error::ErrSchemeType);
        }
        if raw_parts.query().is_some() {
            return Err(Error::ErrStunQuery);
        }
        if !raw_parts.username().is_empty() || raw_parts.password().is_some() {
            return Err(Error::ErrHost);
        }
        if !raw_parts.path().is_empty() && raw_parts.path() != "/" {
            return Err(Error::ErrHost);
        }

        let host = match raw_parts.host_str() {
            Some(host) => host
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_owned(),
            None => return Err(Error::ErrHost),
        };
        if host.is_empty() {
            return Err(Error::ErrHost);
        }

        let port = match raw_parts.port() {
            Some(0) => return Err(Error::ErrPort),
            Some(port) => port,
            None => stun::DEFAULT_PORT,
        };

        Ok(Url { scheme, host, port })
    }

    /// Returns the server address the port gathers against, resolved when
    /// the host is an IP literal.
    pub fn server_address(&self) -> ServerAddress {
        ServerAddress::new(&self.host, self.port)
    }
}
