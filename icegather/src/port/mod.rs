#[cfg(test)]
mod port_test;

pub(crate) mod binding;
pub(crate) mod keepalive;
pub mod port_config;
mod port_proto;

use log::{debug, error, info, trace, warn};
use shared::error::*;
use shared::{TaggedBytesMut, TransportContext, TransportProtocol};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use stun::attributes::ATTR_FINGERPRINT;
use stun::fingerprint::FINGERPRINT;
use stun::message::Message;
use stun::transaction::{TransactionEngine, TransactionEngineBuilder, TransactionEvent};

use crate::candidate::candidate_host::CandidateHostConfig;
use crate::candidate::candidate_server_reflexive::CandidateServerReflexiveConfig;
use crate::candidate::{Candidate, CandidateConfig, CandidateType};
use crate::network_type::UDP;
use crate::resolver::{AddressResolver, ResolveDone};
use crate::server_address::ServerAddress;
use crate::socket::{PacketSocketFactory, SocketState};
use binding::{BindingOutcome, BindingReaction, BindingRequest, StunRequest};
use keepalive::{KeepaliveChain, KeepaliveTiming};
use port_config::{PortConfig, PortSettings};

/// Inputs a driver feeds into [`UdpPort`] through `handle_event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortInput {
    /// Starts gathering: the host candidate once the socket is bound, then
    /// one Binding transaction per configured server.
    PrepareAddress(Instant),
    /// The socket finished binding on the given address.
    LocalAddressReady(SocketAddr, Instant),
    /// The socket can take more datagrams.
    ReadyToSend,
}

/// Outputs of [`UdpPort`], drained with `poll_event`.
#[derive(Debug, Clone)]
pub enum PortEvent {
    LocalAddressReady(SocketAddr),
    CandidateReady(Candidate),
    /// Gathering finished and produced something usable.
    PortComplete,
    /// Gathering finished and every server failed.
    PortError,
    ReadyToSend,
    /// A datagram from a peer that is neither a STUN server nor a connection
    /// of this port.
    UnknownAddress(TaggedBytesMut),
}

/// UdpPort gathers the local candidates of a single UDP socket: a host
/// candidate for the socket itself and a server reflexive candidate per
/// distinct mapping learned from the configured STUN servers. Every server
/// keeps a Binding keepalive chain running for as long as the port lives.
///
/// The port is sans-I/O. Datagrams, time and socket state come in through
/// [`sansio::Protocol`], STUN requests go out through `poll_write`.
pub struct UdpPort {
    name: String,
    settings: PortSettings,
    factory: Box<dyn PacketSocketFactory>,
    shared_socket: bool,
    socket: SocketState,

    server_addresses: BTreeSet<ServerAddress>,
    succeeded: BTreeSet<ServerAddress>,
    failed: BTreeSet<ServerAddress>,

    engine: TransactionEngine<StunRequest>,
    chains: HashMap<SocketAddr, KeepaliveChain>,
    resolver: AddressResolver,
    resolve_poll_at: Option<Instant>,

    candidates: Vec<Candidate>,
    connections: HashSet<SocketAddr>,

    gathering_requested: bool,
    ready: bool,
    closed: bool,

    reads: VecDeque<TaggedBytesMut>,
    writes: VecDeque<TaggedBytesMut>,
    events: VecDeque<PortEvent>,
}

impl UdpPort {
    /// Creates a port owning its socket, which is created through factory.
    /// Fails when the socket cannot be created.
    pub fn new(config: PortConfig, factory: Box<dyn PacketSocketFactory>) -> Result<Self> {
        let mut port = UdpPort::build(&config, factory, false, SocketState::Binding)?;
        port.init()?;
        Ok(port)
    }

    /// Creates a port on a socket shared with other ports. The socket state
    /// is owned by the caller.
    pub fn new_shared(
        config: PortConfig,
        factory: Box<dyn PacketSocketFactory>,
        socket: SocketState,
    ) -> Result<Self> {
        let mut port = UdpPort::build(&config, factory, true, socket)?;
        port.init()?;
        Ok(port)
    }

    fn build(
        config: &PortConfig,
        factory: Box<dyn PacketSocketFactory>,
        shared_socket: bool,
        socket: SocketState,
    ) -> Result<Self> {
        let settings = config.settings()?;
        let engine = TransactionEngineBuilder::new()
            .with_rto(settings.rto)
            .with_max_sends(settings.max_sends)
            .with_max_rto_factor(settings.max_rto_factor)
            .build();

        let server_addresses = config
            .urls
            .iter()
            .map(|url| url.server_address())
            .collect();

        Ok(UdpPort {
            name: format!("udp:{}", settings.local_ip),
            settings,
            factory,
            shared_socket,
            socket,

            server_addresses,
            succeeded: BTreeSet::new(),
            failed: BTreeSet::new(),

            engine,
            chains: HashMap::new(),
            resolver: AddressResolver::new(),
            resolve_poll_at: None,

            candidates: vec![],
            connections: HashSet::new(),

            gathering_requested: false,
            ready: false,
            closed: false,

            reads: VecDeque::new(),
            writes: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    fn init(&mut self) -> Result<()> {
        if !self.shared_socket {
            self.socket = self
                .factory
                .create_udp_socket(
                    self.settings.local_ip,
                    self.settings.min_port,
                    self.settings.max_port,
                )
                .map_err(|err| {
                    warn!("[{}]: failed to create udp socket: {}", self.name, err);
                    err
                })?;
        }
        if let SocketState::Bound(addr) = self.socket {
            self.name = format!("udp:{addr}");
        }
        Ok(())
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Returns the bound address of the socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.socket {
            SocketState::Bound(addr) => Some(addr),
            SocketState::Binding => None,
        }
    }

    pub fn is_shared_socket(&self) -> bool {
        self.shared_socket
    }

    /// Returns the local ufrag and password stamped on candidates.
    pub fn local_credentials(&self) -> (&str, &str) {
        (&self.settings.local_ufrag, &self.settings.local_pwd)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Configured servers, hostnames replaced by their resolved form once
    /// resolution succeeded.
    pub fn server_addresses(&self) -> &BTreeSet<ServerAddress> {
        &self.server_addresses
    }

    pub fn succeeded_servers(&self) -> &BTreeSet<ServerAddress> {
        &self.succeeded
    }

    pub fn failed_servers(&self) -> &BTreeSet<ServerAddress> {
        &self.failed
    }

    /// True once gathering completed, successfully or not.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Number of servers with a running keepalive chain.
    pub fn keepalive_count(&self) -> usize {
        self.chains.len()
    }

    /// Registers a logical connection to remote. Datagrams from it are
    /// surfaced through `poll_read` instead of the unknown address path.
    pub fn create_connection(&mut self, remote: SocketAddr, protocol: TransportProtocol) -> Result<()> {
        if self.closed {
            return Err(Error::ErrPortClosed);
        }
        if protocol != TransportProtocol::UDP {
            return Err(Error::ErrUnsupportedProtocol);
        }
        if !self.is_compatible_address(&remote) {
            return Err(Error::ErrIncompatibleFamily);
        }
        if self.shared_socket
            && self
                .candidates
                .first()
                .is_none_or(|c| c.candidate_type() != CandidateType::Host)
        {
            return Err(Error::ErrSharedSocketNoHostCandidate);
        }

        if self.connections.insert(remote) {
            debug!("[{}]: created connection to {}", self.name, remote);
        }
        Ok(())
    }

    pub fn remove_connection(&mut self, remote: &SocketAddr) -> bool {
        self.connections.remove(remote)
    }

    pub fn has_connection(&self, remote: &SocketAddr) -> bool {
        self.connections.contains(remote)
    }

    fn use_ipv4(&self) -> bool {
        match self.socket {
            SocketState::Bound(addr) => addr.ip().to_canonical().is_ipv4(),
            SocketState::Binding => self.settings.local_ip.to_canonical().is_ipv4(),
        }
    }

    fn is_compatible_address(&self, addr: &SocketAddr) -> bool {
        addr.ip().to_canonical().is_ipv4() == self.use_ipv4()
    }

    pub(crate) fn prepare_address(&mut self, now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ErrPortClosed);
        }
        if !self.engine.is_empty() {
            return Err(Error::ErrTransactionsInFlight);
        }

        self.gathering_requested = true;
        match self.socket {
            SocketState::Bound(addr) => self.on_local_address_ready(addr, now),
            SocketState::Binding => {
                debug!("[{}]: waiting for the socket to be bound", self.name);
            }
        }
        Ok(())
    }

    pub(crate) fn handle_local_address_ready(&mut self, addr: SocketAddr, now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ErrPortClosed);
        }
        if let SocketState::Bound(bound) = self.socket {
            debug!("[{}]: socket already bound on {}, ignoring {}", self.name, bound, addr);
            return Ok(());
        }

        self.socket = SocketState::Bound(addr);
        self.name = format!("udp:{addr}");
        if self.gathering_requested {
            self.on_local_address_ready(addr, now);
        }
        Ok(())
    }

    fn on_local_address_ready(&mut self, addr: SocketAddr, now: Instant) {
        info!("[{}]: local address ready", self.name);
        self.events.push_back(PortEvent::LocalAddressReady(addr));

        let has_host = self
            .candidates
            .iter()
            .any(|c| c.candidate_type() == CandidateType::Host);
        if !has_host {
            let candidate = CandidateHostConfig {
                base_config: self.candidate_config(addr),
            }
            .new_candidate_host();
            self.add_candidate(candidate);
        }

        self.maybe_prepare_stun_candidate(now);
    }

    fn maybe_prepare_stun_candidate(&mut self, now: Instant) {
        if self.server_addresses.is_empty() {
            self.maybe_set_port_complete_or_error();
            return;
        }

        let servers: Vec<ServerAddress> = self.server_addresses.iter().cloned().collect();
        for server in servers {
            self.send_stun_binding_request(&server, now);
        }
    }

    fn send_stun_binding_request(&mut self, server: &ServerAddress, now: Instant) {
        let addr = match server {
            ServerAddress::Unresolved { .. } => {
                if self.resolver.resolve(server, self.factory.as_mut()) {
                    self.schedule_resolver_poll(now);
                }
                return;
            }
            ServerAddress::Resolved(addr) => *addr,
        };

        if self.local_addr().is_none() {
            debug!("[{}]: socket not bound, not sending to {}", self.name, addr);
            return;
        }
        if !self.is_compatible_address(&addr) {
            warn!(
                "[{}]: stun server {} has an incompatible address family",
                self.name, addr
            );
            self.on_stun_binding_or_resolve_request_failed(server.clone());
            return;
        }
        if self.chains.contains_key(&addr) {
            trace!("[{}]: keepalive chain for {} already running", self.name, addr);
            return;
        }

        let request = StunRequest::Binding(BindingRequest::new(
            addr,
            self.settings.software.clone(),
            self.settings.fingerprint,
        ));
        match self.engine.send(request, now) {
            Ok(id) => {
                debug!("[{}]: sent binding request {} to {}", self.name, id, addr);
                self.chains.insert(addr, KeepaliveChain::new(now));
            }
            Err(err) => {
                error!(
                    "[{}]: failed to send binding request to {}: {}",
                    self.name, addr, err
                );
                self.on_stun_binding_or_resolve_request_failed(server.clone());
            }
        }
    }

    fn schedule_resolver_poll(&mut self, now: Instant) {
        if self.resolve_poll_at.is_none() {
            self.resolve_poll_at = Some(now + self.settings.resolver_poll_interval);
        }
    }

    fn poll_resolver(&mut self, now: Instant) {
        let Some(poll_at) = self.resolve_poll_at else {
            return;
        };
        if poll_at > now {
            return;
        }

        self.resolver.poll_resolvers();
        while let Some(done) = self.resolver.poll_event() {
            self.on_resolve_result(done, now);
        }

        self.resolve_poll_at = self
            .resolver
            .is_pending()
            .then(|| now + self.settings.resolver_poll_interval);
    }

    fn on_resolve_result(&mut self, done: ResolveDone, now: Instant) {
        let ResolveDone { input, result } = done;

        let resolved = match result {
            Ok(()) => self.resolver.get_resolved_address(&input, self.use_ipv4()),
            Err(err) => Err(err),
        };
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!("[{}]: stun server {} resolution failed: {}", self.name, input, err);
                self.on_stun_binding_or_resolve_request_failed(input);
                return;
            }
        };

        debug!("[{}]: stun server {} resolved to {}", self.name, input, resolved);
        self.server_addresses.remove(&input);
        let server = ServerAddress::Resolved(resolved);
        if self.server_addresses.insert(server.clone()) {
            self.send_stun_binding_request(&server, now);
        } else {
            // another entry already covers this address, the hostname no
            // longer counts toward completion
            self.maybe_set_port_complete_or_error();
        }
    }

    fn on_stun_binding_request_succeeded(&mut self, server: SocketAddr, reflexive: Option<SocketAddr>) {
        let key = ServerAddress::Resolved(server);
        if self.succeeded.contains(&key) {
            return;
        }
        // a keepalive may revive a server that failed earlier
        self.failed.remove(&key);
        self.succeeded.insert(key);

        if let (Some(reflexive), Some(local_addr)) = (reflexive, self.local_addr()) {
            if !self.shared_socket || reflexive != local_addr {
                let candidate = CandidateServerReflexiveConfig {
                    base_config: self.candidate_config(reflexive),
                    base_address: Some(local_addr),
                    rel_addr: Some(local_addr),
                }
                .new_candidate_server_reflexive();
                self.add_candidate(candidate);
            }
        }

        self.maybe_set_port_complete_or_error();
    }

    fn on_stun_binding_or_resolve_request_failed(&mut self, server: ServerAddress) {
        if self.failed.contains(&server) || self.succeeded.contains(&server) {
            return;
        }
        self.failed.insert(server);

        self.maybe_set_port_complete_or_error();
    }

    fn maybe_set_port_complete_or_error(&mut self) {
        if self.ready {
            return;
        }

        let accounted = self
            .server_addresses
            .iter()
            .all(|server| self.succeeded.contains(server) || self.failed.contains(server));
        if !accounted {
            return;
        }

        self.ready = true;
        if self.server_addresses.is_empty() || !self.succeeded.is_empty() || self.shared_socket {
            info!("[{}]: gathering complete", self.name);
            self.events.push_back(PortEvent::PortComplete);
        } else {
            warn!("[{}]: gathering failed, no stun server answered", self.name);
            self.events.push_back(PortEvent::PortError);
        }
    }

    fn candidate_config(&self, address: SocketAddr) -> CandidateConfig {
        CandidateConfig {
            network: UDP.to_owned(),
            address: Some(address),
            component: self.settings.component,
            username: self.settings.local_ufrag.clone(),
            password: self.settings.local_pwd.clone(),
            ..Default::default()
        }
    }

    fn add_candidate(&mut self, candidate: Result<Candidate>) {
        let candidate = match candidate {
            Ok(candidate) => candidate,
            Err(err) => {
                error!("[{}]: failed to create candidate: {}", self.name, err);
                return;
            }
        };

        let duplicate = self.candidates.iter().any(|c| {
            c.candidate_type() == candidate.candidate_type() && c.address() == candidate.address()
        });
        if duplicate {
            debug!("[{}]: candidate {} already gathered", self.name, candidate);
            return;
        }

        info!("[{}]: gathered candidate {}", self.name, candidate);
        self.candidates.push(candidate.clone());
        self.events.push_back(PortEvent::CandidateReady(candidate));
    }

    fn process_transaction_events(&mut self, now: Instant) {
        let timing = KeepaliveTiming {
            interval: self.settings.keepalive_interval,
            retry_timeout: self.settings.retry_timeout,
            retry_delay: self.settings.retry_delay,
        };

        while let Some(event) = self.engine.poll_event() {
            let (kind, reaction) = match event {
                TransactionEvent::Response { kind, response, .. } => {
                    let elapsed = self.chain_elapsed(&kind, now);
                    let reaction = kind.on_response(&response, elapsed, &timing);
                    (kind, reaction)
                }
                TransactionEvent::ErrorResponse { kind, response, .. } => {
                    let elapsed = self.chain_elapsed(&kind, now);
                    let reaction = kind.on_error_response(&response, elapsed, &timing);
                    (kind, reaction)
                }
                TransactionEvent::Timeout { kind, .. } => {
                    let elapsed = self.chain_elapsed(&kind, now);
                    let reaction = kind.on_timeout(elapsed, &timing);
                    (kind, reaction)
                }
            };
            self.apply_reaction(kind, reaction, now);
        }
    }

    fn chain_elapsed(&self, kind: &StunRequest, now: Instant) -> Duration {
        self.chains
            .get(&kind.server())
            .map(|chain| chain.elapsed(now))
            .unwrap_or_default()
    }

    fn apply_reaction(&mut self, kind: StunRequest, reaction: BindingReaction, now: Instant) {
        let server = kind.server();
        match reaction.outcome {
            BindingOutcome::Succeeded(reflexive) => {
                self.on_stun_binding_request_succeeded(server, reflexive)
            }
            BindingOutcome::Failed => {
                self.on_stun_binding_or_resolve_request_failed(ServerAddress::Resolved(server))
            }
        }

        let Some(chain) = self.chains.get_mut(&server) else {
            return;
        };
        let Some(successor) = reaction.successor else {
            debug!(
                "[{}]: keepalive chain for {} ended after {} successors",
                self.name, server, chain.successors
            );
            self.chains.remove(&server);
            return;
        };

        chain.successors += 1;
        match self.engine.send_delayed(kind.successor(), successor.delay, now) {
            Ok(id) => trace!(
                "[{}]: keepalive {} to {} scheduled in {:?}",
                self.name, id, server, successor.delay
            ),
            Err(err) => {
                warn!("[{}]: keepalive chain for {} stopped: {}", self.name, server, err);
                self.chains.remove(&server);
            }
        }
    }

    fn flush_transmits(&mut self, now: Instant) {
        let Some(local_addr) = self.local_addr() else {
            return;
        };
        while let Some(transmit) = self.engine.poll_transmit() {
            self.writes.push_back(TaggedBytesMut {
                now,
                transport: TransportContext {
                    local_addr,
                    peer_addr: transmit.tag.server(),
                    transport_protocol: TransportProtocol::UDP,
                },
                message: transmit.payload,
            });
        }
    }

    fn send_to(&mut self, msg: TaggedBytesMut) -> Result<()> {
        let local_addr = self.local_addr().ok_or(Error::ErrPortNotReady)?;
        let peer_addr = msg.transport.peer_addr;
        if !self.is_compatible_address(&peer_addr) {
            return Err(Error::ErrIncompatibleFamily);
        }

        self.writes.push_back(TaggedBytesMut {
            now: msg.now,
            transport: TransportContext {
                local_addr,
                peer_addr,
                transport_protocol: TransportProtocol::UDP,
            },
            message: msg.message,
        });
        Ok(())
    }

    fn on_read_packet(&mut self, msg: TaggedBytesMut) {
        let peer_addr = msg.transport.peer_addr;
        if self
            .server_addresses
            .contains(&ServerAddress::Resolved(peer_addr))
        {
            if !self.has_valid_fingerprint(&msg.message) {
                trace!("[{}]: fingerprint mismatch in packet from {}", self.name, peer_addr);
                return;
            }
            if !self.engine.check_response(&msg.message, msg.now) {
                trace!("[{}]: unmatched packet from stun server {}", self.name, peer_addr);
            }
            self.process_transaction_events(msg.now);
            return;
        }

        if self.connections.contains(&peer_addr) {
            self.reads.push_back(msg);
        } else {
            trace!("[{}]: packet from unknown address {}", self.name, peer_addr);
            self.events.push_back(PortEvent::UnknownAddress(msg));
        }
    }

    // a FINGERPRINT that is present must match when fingerprints are in use
    fn has_valid_fingerprint(&self, raw: &[u8]) -> bool {
        if !self.settings.fingerprint {
            return true;
        }
        let mut m = Message::new();
        if m.unmarshal_binary(raw).is_err() || !m.contains(ATTR_FINGERPRINT) {
            return true;
        }
        FINGERPRINT.check(&m).is_ok()
    }

    fn close_port(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ErrPortClosed);
        }
        debug!(
            "[{}]: closing with {} live transactions and {} keepalive chains",
            self.name,
            self.engine.len(),
            self.chains.len()
        );

        self.closed = true;
        self.engine.close();
        self.chains.clear();
        self.resolver.close();
        self.resolve_poll_at = None;
        self.connections.clear();
        self.writes.clear();
        Ok(())
    }
}
