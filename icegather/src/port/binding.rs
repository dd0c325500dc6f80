
use log::error;
use shared::error::*;
use std::net::SocketAddr;
use std::time::Duration;
use stun::addr::MappedAddress;
use stun::attributes::ATTR_SOFTWARE;
use stun::error_code::ErrorCodeAttribute;
use stun::fingerprint::FINGERPRINT;
use stun::message::*;
use stun::textattrs::Software;
use stun::transaction::TransactionKind;
use stun::xoraddr::XorMappedAddress;

use super::keepalive::KeepaliveTiming;

/// What a finished Binding transaction means for its server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingOutcome {
    /// The server answered. The reflexive address is missing when the
    /// response carried no usable mapped address.
    Succeeded(Option<SocketAddr>),
    Failed,
}

/// The follow-up request a chain member asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Successor {
    pub(crate) delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BindingReaction {
    pub(crate) outcome: BindingOutcome,
    pub(crate) successor: Option<Successor>,
}

/// A STUN Binding Request to one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindingRequest {
    pub(crate) server: SocketAddr,
    pub(crate) keep_alive: bool,
    pub(crate) software: Option<String>,
    pub(crate) fingerprint: bool,
}

impl BindingRequest {
    pub(crate) fn new(server: SocketAddr, software: Option<String>, fingerprint: bool) -> Self {
        BindingRequest {
            server,
            keep_alive: true,
            software,
            fingerprint,
        }
    }

    /// The next member of this request's keepalive chain.
    pub(crate) fn successor(&self) -> Self {
        BindingRequest {
            keep_alive: true,
            ..self.clone()
        }
    }

    fn prepare(&self, id: TransactionId) -> Result<Message> {
        let mut setters: Vec<Box<dyn Setter>> = vec![Box::new(BINDING_REQUEST), Box::new(id)];
        if let Some(software) = &self.software {
            setters.push(Box::new(Software::new(ATTR_SOFTWARE, software.clone())));
        }
        if self.fingerprint {
            setters.push(Box::new(FINGERPRINT));
        }

        let mut m = Message::new();
        m.build(&setters)?;
        Ok(m)
    }

    fn on_response(
        &self,
        response: &Message,
        _elapsed: Duration,
        timing: &KeepaliveTiming,
    ) -> BindingReaction {
        let reflexive = self.mapped_address(response);

        // the mapping is refreshed whether or not it could be read
        let successor = self.keep_alive.then_some(Successor {
            delay: timing.interval,
        });

        BindingReaction {
            outcome: BindingOutcome::Succeeded(reflexive),
            successor,
        }
    }

    fn on_error_response(
        &self,
        response: &Message,
        elapsed: Duration,
        timing: &KeepaliveTiming,
    ) -> BindingReaction {
        let mut code = ErrorCodeAttribute::default();
        match code.get_from(response) {
            Ok(()) => error!(
                "binding error response from {}: class={} number={} reason='{}'",
                self.server,
                code.class(),
                code.number(),
                String::from_utf8_lossy(&code.reason)
            ),
            Err(err) => error!(
                "bad binding error response from {}: {}",
                self.server, err
            ),
        }

        BindingReaction {
            outcome: BindingOutcome::Failed,
            successor: self.retry(elapsed, timing.interval, timing),
        }
    }

    fn on_timeout(&self, elapsed: Duration, timing: &KeepaliveTiming) -> BindingReaction {
        error!("binding request to {} timed out", self.server);

        BindingReaction {
            outcome: BindingOutcome::Failed,
            successor: self.retry(elapsed, timing.retry_delay, timing),
        }
    }

    fn retry(&self, elapsed: Duration, delay: Duration, timing: &KeepaliveTiming) -> Option<Successor> {
        (self.keep_alive && timing.within_window(elapsed)).then_some(Successor { delay })
    }

    // XOR-MAPPED-ADDRESS first, MAPPED-ADDRESS for RFC 3489 servers
    fn mapped_address(&self, response: &Message) -> Option<SocketAddr> {
        let mut xor_addr = XorMappedAddress::default();
        match xor_addr.get_from(response) {
            Ok(()) => return Some(xor_addr.socket_addr()),
            Err(Error::ErrAttributeNotFound) => {}
            Err(err) => {
                error!(
                    "binding response from {} has a bad xor-mapped address: {}",
                    self.server, err
                );
                return None;
            }
        }

        let mut addr = MappedAddress::default();
        match addr.get_from(response) {
            Ok(()) => Some(addr.socket_addr()),
            Err(Error::ErrAttributeNotFound) => {
                error!("binding response from {} missing mapped address", self.server);
                None
            }
            Err(err) => {
                error!(
                    "binding response from {} has a bad mapped address: {}",
                    self.server, err
                );
                None
            }
        }
    }
}

/// The transaction kinds a port runs. Each kind supplies the request to send
/// and its reaction to every outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StunRequest {
    Binding(BindingRequest),
}

impl TransactionKind for StunRequest {
    fn prepare(&self, id: TransactionId) -> Result<Message> {
        match self {
            StunRequest::Binding(req) => req.prepare(id),
        }
    }
}

impl StunRequest {
    /// Destination of the request.
    pub(crate) fn server(&self) -> SocketAddr {
        match self {
            StunRequest::Binding(req) => req.server,
        }
    }

    pub(crate) fn successor(&self) -> Self {
        match self {
            StunRequest::Binding(req) => StunRequest::Binding(req.successor()),
        }
    }

    pub(crate) fn on_response(
        &self,
        response: &Message,
        elapsed: Duration,
        timing: &KeepaliveTiming,
    ) -> BindingReaction {
        match self {
            StunRequest::Binding(req) => req.on_response(response, elapsed, timing),
        }
    }

    pub(crate) fn on_error_response(
        &self,
        response: &Message,
        elapsed: Duration,
        timing: &KeepaliveTiming,
    ) -> BindingReaction {
        match self {
            StunRequest::Binding(req) => req.on_error_response(response, elapsed, timing),
        }
    }

    pub(crate) fn on_timeout(&self, elapsed: Duration, timing: &KeepaliveTiming) -> BindingReaction {
        match self {
            StunRequest::Binding(req) => req.on_timeout(elapsed, timing),
        }
    }
}
