use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use shared::error::*;
use stun::transaction::{DEFAULT_MAX_RTO_FACTOR, DEFAULT_MAX_SENDS, DEFAULT_RTO};

use crate::candidate::COMPONENT_RTP;
use crate::rand::{generate_pwd, generate_ufrag};
use crate::url::Url;

/// The interval between keepalive Binding Requests on a working mapping.
pub(crate) const DEFAULT_STUN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// How long a keepalive chain keeps retrying after errors or timeouts.
pub(crate) const DEFAULT_STUN_RETRY_TIMEOUT: Duration = Duration::from_secs(50);

/// The delay before a timed out Binding Request is sent again.
pub(crate) const DEFAULT_STUN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// How often pending hostname lookups are polled.
pub(crate) const DEFAULT_RESOLVER_POLL_INTERVAL: Duration = Duration::from_millis(20);

const MIN_UFRAG_BITS: usize = 24;
const MIN_PWD_BITS: usize = 128;

/// Collects the arguments to [`crate::UdpPort`] construction into a single
/// structure.
#[derive(Default, Clone, Debug)]
pub struct PortConfig {
    /// STUN servers the port gathers server reflexive candidates from.
    pub urls: Vec<Url>,

    /// The address the socket is bound on. Defaults to `0.0.0.0`.
    pub local_ip: Option<IpAddr>,
    /// Port range for the socket. Both zero lets the system pick.
    pub min_port: u16,
    pub max_port: u16,

    /// Credentials stamped on every candidate. They MUST be unguessable, with
    /// at least 24 bits of randomness for the username fragment and 128 bits
    /// for the password. Generated when empty.
    pub local_ufrag: String,
    pub local_pwd: String,

    /// ICE component id. Defaults to 1 (RTP).
    pub component: Option<u16>,

    /// Defaults to 10 seconds.
    pub stun_keepalive_interval: Option<Duration>,
    /// Defaults to 50 seconds.
    pub stun_retry_timeout: Option<Duration>,
    /// Defaults to 50 milliseconds.
    pub stun_retry_delay: Option<Duration>,

    /// Retransmission time unit of Binding Requests, 100ms by default.
    pub rto: Option<Duration>,
    /// Sends of a Binding Request before it times out, 9 by default.
    pub max_sends: Option<u32>,
    /// Backoff multiplier cap, 16 by default.
    pub max_rto_factor: Option<u32>,

    pub resolver_poll_interval: Option<Duration>,

    /// SOFTWARE attribute added to Binding Requests.
    pub software: Option<String>,
    /// Appends FINGERPRINT to Binding Requests.
    pub fingerprint: bool,
}

impl PortConfig {
    pub fn with_urls(mut self, urls: Vec<Url>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_local_ip(mut self, ip: IpAddr) -> Self {
        self.local_ip = Some(ip);
        self
    }

    pub fn with_port_range(mut self, min_port: u16, max_port: u16) -> Self {
        self.min_port = min_port;
        self.max_port = max_port;
        self
    }

    pub fn with_credentials(mut self, ufrag: impl Into<String>, pwd: impl Into<String>) -> Self {
        self.local_ufrag = ufrag.into();
        self.local_pwd = pwd.into();
        self
    }

    pub fn with_component(mut self, component: u16) -> Self {
        self.component = Some(component);
        self
    }

    pub fn with_stun_keepalive_interval(mut self, interval: Duration) -> Self {
        self.stun_keepalive_interval = Some(interval);
        self
    }

    pub fn with_stun_retry_timeout(mut self, timeout: Duration) -> Self {
        self.stun_retry_timeout = Some(timeout);
        self
    }

    pub fn with_stun_retry_delay(mut self, delay: Duration) -> Self {
        self.stun_retry_delay = Some(delay);
        self
    }

    pub fn with_rto(mut self, rto: Duration) -> Self {
        self.rto = Some(rto);
        self
    }

    pub fn with_max_sends(mut self, max_sends: u32) -> Self {
        self.max_sends = Some(max_sends);
        self
    }

    pub fn with_max_rto_factor(mut self, factor: u32) -> Self {
        self.max_rto_factor = Some(factor);
        self
    }

    pub fn with_resolver_poll_interval(mut self, interval: Duration) -> Self {
        self.resolver_poll_interval = Some(interval);
        self
    }

    pub fn with_software(mut self, software: impl Into<String>) -> Self {
        self.software = Some(software.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: bool) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Resolves every unset field against its default and validates the
    /// credentials.
    pub(crate) fn settings(&self) -> Result<PortSettings> {
        let local_ufrag = if self.local_ufrag.is_empty() {
            generate_ufrag()
        } else {
            self.local_ufrag.clone()
        };
        let local_pwd = if self.local_pwd.is_empty() {
            generate_pwd()
        } else {
            self.local_pwd.clone()
        };

        if local_ufrag.len() * 8 < MIN_UFRAG_BITS {
            return Err(Error::ErrLocalUfragInsufficientBits(
                local_ufrag.len() * 8,
                MIN_UFRAG_BITS,
            ));
        }
        if local_pwd.len() * 8 < MIN_PWD_BITS {
            return Err(Error::ErrLocalPwdInsufficientBits(
                local_pwd.len() * 8,
                MIN_PWD_BITS,
            ));
        }

        Ok(PortSettings {
            local_ip: self
                .local_ip
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            min_port: self.min_port,
            max_port: self.max_port,
            local_ufrag,
            local_pwd,
            component: self.component.unwrap_or(COMPONENT_RTP),
            keepalive_interval: self
                .stun_keepalive_interval
                .unwrap_or(DEFAULT_STUN_KEEPALIVE_INTERVAL),
            retry_timeout: self
                .stun_retry_timeout
                .unwrap_or(DEFAULT_STUN_RETRY_TIMEOUT),
            retry_delay: self.stun_retry_delay.unwrap_or(DEFAULT_STUN_RETRY_DELAY),
            rto: self.rto.unwrap_or(DEFAULT_RTO),
            max_sends: self.max_sends.unwrap_or(DEFAULT_MAX_SENDS),
            max_rto_factor: self.max_rto_factor.unwrap_or(DEFAULT_MAX_RTO_FACTOR),
            resolver_poll_interval: self
                .resolver_poll_interval
                .unwrap_or(DEFAULT_RESOLVER_POLL_INTERVAL),
            software: self.software.clone(),
            fingerprint: self.fingerprint,
        })
    }
}

/// PortConfig with every default applied.
#[derive(Clone, Debug)]
pub(crate) struct PortSettings {
    pub(crate) local_ip: IpAddr,
    pub(crate) min_port: u16,
    pub(crate) max_port: u16,
    pub(crate) local_ufrag: String,
    pub(crate) local_pwd: String,
    pub(crate) component: u16,
    pub(crate) keepalive_interval: Duration,
    pub(crate) retry_timeout: Duration,
    pub(crate) retry_delay: Duration,
    pub(crate) rto: Duration,
    pub(crate) max_sends: u32,
    pub(crate) max_rto_factor: u32,
    pub(crate) resolver_poll_interval: Duration,
    pub(crate) software: Option<String>,
    pub(crate) fingerprint: bool,
}
