use super::*;
use crate::resolver::AsyncResolver;
use crate::url::Url;
use bytes::BytesMut;
use sansio::Protocol;
use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;
use stun::addr::MappedAddress;
use stun::error_code::{CODE_SERVER_ERROR, ErrorCodeAttribute};
use stun::message::*;
use stun::xoraddr::XorMappedAddress;

const LOCAL: &str = "192.168.1.2:5000";
const SERVER: &str = "203.0.113.1:3478";
const MAPPED: &str = "198.51.100.7:40000";

#[derive(Default)]
struct Lookups {
    answers: HashMap<String, Vec<SocketAddr>>,
    ready: bool,
    started: Vec<String>,
}

type SharedLookups = Rc<RefCell<Lookups>>;

struct FakeResolver {
    lookups: SharedLookups,
    host: Option<String>,
    delivered: bool,
}

impl AsyncResolver for FakeResolver {
    fn start(&mut self, addr: &ServerAddress) {
        if let ServerAddress::Unresolved { host, .. } = addr {
            self.lookups.borrow_mut().started.push(host.clone());
            self.host = Some(host.clone());
        }
    }

    fn poll(&mut self) -> Option<Result<()>> {
        if !self.lookups.borrow().ready || self.delivered {
            return None;
        }
        self.delivered = true;
        let lookups = self.lookups.borrow();
        match self.host.as_ref().and_then(|h| lookups.answers.get(h)) {
            Some(_) => Some(Ok(())),
            None => Some(Err(Error::Other("host not found".to_owned()))),
        }
    }

    fn resolved_address(&self, use_ipv4: bool) -> Option<SocketAddr> {
        let lookups = self.lookups.borrow();
        self.host
            .as_ref()
            .and_then(|h| lookups.answers.get(h))?
            .iter()
            .find(|addr| addr.is_ipv4() == use_ipv4)
            .copied()
    }

    fn destroy(&mut self) {}
}

struct FakeFactory {
    bind: Option<SocketState>,
    lookups: SharedLookups,
}

impl PacketSocketFactory for FakeFactory {
    fn create_udp_socket(&mut self, _ip: IpAddr, _min: u16, _max: u16) -> Result<SocketState> {
        self.bind.ok_or(Error::ErrBindFailed)
    }

    fn create_async_resolver(&mut self) -> Box<dyn AsyncResolver> {
        Box::new(FakeResolver {
            lookups: Rc::clone(&self.lookups),
            host: None,
            delivered: false,
        })
    }
}

fn config(urls: &[&str]) -> Result<PortConfig> {
    let urls = urls
        .iter()
        .map(|raw| Url::parse_url(raw))
        .collect::<Result<Vec<_>>>()?;
    Ok(PortConfig::default().with_urls(urls))
}

fn factory(bind: Option<SocketState>, lookups: &SharedLookups) -> Box<dyn PacketSocketFactory> {
    Box::new(FakeFactory {
        bind,
        lookups: Rc::clone(lookups),
    })
}

fn new_port(urls: &[&str], lookups: &SharedLookups) -> Result<UdpPort> {
    let bound = SocketState::Bound(LOCAL.parse::<SocketAddr>()?);
    UdpPort::new(config(urls)?, factory(Some(bound), lookups))
}

fn drain_events(port: &mut UdpPort) -> Vec<PortEvent> {
    let mut events = vec![];
    while let Some(event) = port.poll_event() {
        events.push(event);
    }
    events
}

fn completions(events: &[PortEvent]) -> (usize, usize) {
    let complete = events
        .iter()
        .filter(|e| matches!(e, PortEvent::PortComplete))
        .count();
    let error = events
        .iter()
        .filter(|e| matches!(e, PortEvent::PortError))
        .count();
    (complete, error)
}

fn gathered(events: &[PortEvent]) -> Vec<Candidate> {
    events
        .iter()
        .filter_map(|e| match e {
            PortEvent::CandidateReady(c) => Some(c.clone()),
            _ => None,
        })
        .collect()
}

/// Drains poll_write and decodes every datagram as a STUN request.
fn take_requests(port: &mut UdpPort) -> Result<Vec<(SocketAddr, Message)>> {
    let mut requests = vec![];
    while let Some(out) = port.poll_write() {
        assert_eq!(out.transport.local_addr, LOCAL.parse::<SocketAddr>()?);
        let mut m = Message::new();
        m.unmarshal_binary(&out.message)?;
        assert_eq!(m.typ, BINDING_REQUEST);
        requests.push((out.transport.peer_addr, m));
    }
    Ok(requests)
}

fn inbound(from: SocketAddr, payload: &[u8], now: Instant) -> Result<TaggedBytesMut> {
    Ok(TaggedBytesMut {
        now,
        transport: TransportContext {
            local_addr: LOCAL.parse::<SocketAddr>()?,
            peer_addr: from,
            transport_protocol: TransportProtocol::UDP,
        },
        message: BytesMut::from(payload),
    })
}

fn success_response(request: &Message, mapped: SocketAddr) -> Result<Vec<u8>> {
    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_SUCCESS),
        Box::new(request.transaction_id),
        Box::new(XorMappedAddress::from(mapped)),
    ])?;
    Ok(m.raw)
}

fn error_response(request: &Message) -> Result<Vec<u8>> {
    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_ERROR),
        Box::new(request.transaction_id),
        Box::new(ErrorCodeAttribute {
            code: CODE_SERVER_ERROR,
            reason: b"Server Error".to_vec(),
        }),
    ])?;
    Ok(m.raw)
}

#[test]
fn test_no_servers_completes_with_host_candidate() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[], &lookups)?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;

    let local: SocketAddr = LOCAL.parse()?;
    let events = drain_events(&mut port);
    assert!(matches!(
        events.first(),
        Some(PortEvent::LocalAddressReady(addr)) if *addr == local
    ));
    let candidates = gathered(&events);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].candidate_type(), CandidateType::Host);
    assert_eq!(candidates[0].address(), LOCAL.parse::<SocketAddr>()?);
    assert_eq!(candidates[0].base_address(), LOCAL.parse::<SocketAddr>()?);
    assert_eq!(candidates[0].protocol(), "udp");
    assert!(!candidates[0].is_final());
    assert_eq!(completions(&events), (1, 0));
    assert!(matches!(events.last(), Some(PortEvent::PortComplete)));

    assert!(port.is_ready());
    assert!(port.poll_write().is_none());
    assert!(port.poll_timeout().is_none());

    Ok(())
}

#[test]
fn test_single_server_success() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&["stun:203.0.113.1:3478"], &lookups)?;
    let server: SocketAddr = SERVER.parse()?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    let requests = take_requests(&mut port)?;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, server);
    assert_eq!(completions(&drain_events(&mut port)), (0, 0));
    assert!(!port.is_ready());

    let answered_at = now + Duration::from_millis(30);
    let raw = success_response(&requests[0].1, MAPPED.parse::<SocketAddr>()?)?;
    port.handle_read(inbound(server, &raw, answered_at)?)?;

    let events = drain_events(&mut port);
    let candidates = gathered(&events);
    assert_eq!(candidates.len(), 1);
    let srflx = &candidates[0];
    assert_eq!(srflx.candidate_type(), CandidateType::ServerReflexive);
    assert_eq!(srflx.address(), MAPPED.parse::<SocketAddr>()?);
    assert_eq!(srflx.base_address(), LOCAL.parse::<SocketAddr>()?);
    assert_eq!(srflx.related_address(), Some(LOCAL.parse::<SocketAddr>()?));
    assert_eq!(srflx.type_preference(), 100);
    assert_eq!(srflx.username(), port.local_credentials().0);
    assert_eq!(completions(&events), (1, 0));

    assert!(port.succeeded_servers().contains(&ServerAddress::Resolved(server)));
    assert!(port.failed_servers().is_empty());
    assert_eq!(port.candidates().len(), 2);
    assert_eq!(port.keepalive_count(), 1);

    // keepalive after the interval
    let keepalive_at = answered_at + Duration::from_secs(10);
    assert_eq!(port.poll_timeout(), Some(keepalive_at));
    port.handle_timeout(keepalive_at - Duration::from_millis(1))?;
    assert!(port.poll_write().is_none());
    port.handle_timeout(keepalive_at)?;
    let keepalive = take_requests(&mut port)?;
    assert_eq!(keepalive.len(), 1);
    assert_eq!(keepalive[0].0, server);
    assert_ne!(
        keepalive[0].1.transaction_id,
        requests[0].1.transaction_id
    );

    // the refreshed mapping neither duplicates the candidate nor completes again
    let raw = success_response(&keepalive[0].1, MAPPED.parse::<SocketAddr>()?)?;
    port.handle_read(inbound(server, &raw, keepalive_at)?)?;
    let events = drain_events(&mut port);
    assert!(gathered(&events).is_empty());
    assert_eq!(completions(&events), (0, 0));

    Ok(())
}

#[test]
fn test_mapped_address_only_response() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[SERVER], &lookups)?;
    let server: SocketAddr = SERVER.parse()?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    let requests = take_requests(&mut port)?;

    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_SUCCESS),
        Box::new(requests[0].1.transaction_id),
        Box::new(MappedAddress::from(MAPPED.parse::<SocketAddr>()?)),
    ])?;
    port.handle_read(inbound(server, &m.raw, now)?)?;

    let candidates = gathered(&drain_events(&mut port));
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[1].address(), MAPPED.parse::<SocketAddr>()?);

    Ok(())
}

#[test]
fn test_success_without_mapped_address_counts_as_succeeded() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[SERVER], &lookups)?;
    let server: SocketAddr = SERVER.parse()?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    let requests = take_requests(&mut port)?;
    drain_events(&mut port);

    let mut m = Message::new();
    m.build(&[Box::new(BINDING_SUCCESS), Box::new(requests[0].1.transaction_id)])?;
    port.handle_read(inbound(server, &m.raw, now)?)?;

    let events = drain_events(&mut port);
    assert!(gathered(&events).is_empty());
    assert_eq!(completions(&events), (1, 0));
    assert!(port.succeeded_servers().contains(&ServerAddress::Resolved(server)));
    assert_eq!(port.keepalive_count(), 1);

    Ok(())
}

#[test]
fn test_timeouts_until_retry_window_closes() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[SERVER], &lookups)?;
    let start = Instant::now();

    port.handle_event(PortInput::PrepareAddress(start))?;
    drain_events(&mut port);

    let mut transactions = HashSet::new();
    let mut errors_at = vec![];
    let mut last_deadline = start;
    for (_, m) in take_requests(&mut port)? {
        transactions.insert(m.transaction_id);
    }

    let mut steps = 0;
    while let Some(deadline) = port.poll_timeout() {
        steps += 1;
        assert!(steps < 1000, "keepalive chain never ended");

        port.handle_timeout(deadline)?;
        last_deadline = deadline;
        for (_, m) in take_requests(&mut port)? {
            transactions.insert(m.transaction_id);
        }
        let events = drain_events(&mut port);
        assert!(gathered(&events).is_empty());
        if completions(&events).1 > 0 {
            errors_at.push((deadline - start).as_millis());
        }
    }

    // timeouts at 9.5, 19.05, 28.6, 38.15 and 47.7 s retry, the one at
    // 57.25 s falls outside the window
    assert_eq!(errors_at, vec![9_500]);
    assert_eq!((last_deadline - start).as_millis(), 57_250);
    assert_eq!(transactions.len(), 6);
    assert_eq!(port.keepalive_count(), 0);
    assert_eq!(port.candidates().len(), 1);
    assert!(port.is_ready());
    assert!(
        port.failed_servers()
            .contains(&ServerAddress::Resolved(SERVER.parse::<SocketAddr>()?))
    );

    // nothing is in flight any more, gathering can be requested again
    port.handle_event(PortInput::PrepareAddress(last_deadline))?;
    assert_eq!(take_requests(&mut port)?.len(), 1);

    Ok(())
}

#[test]
fn test_retry_window_counts_from_chain_start() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[SERVER], &lookups)?;
    let server: SocketAddr = SERVER.parse()?;
    let mapped: SocketAddr = MAPPED.parse()?;
    let start = Instant::now();
    let silent_after = start + Duration::from_secs(60);

    port.handle_event(PortInput::PrepareAddress(start))?;
    let mut requests = take_requests(&mut port)?;
    let mut now = start;
    let mut answered = 0;
    let mut unanswered = HashSet::new();

    let mut steps = 0;
    loop {
        for (_, m) in requests.drain(..) {
            if now <= silent_after {
                let raw = success_response(&m, mapped)?;
                port.handle_read(inbound(server, &raw, now)?)?;
                answered += 1;
            } else {
                unanswered.insert(m.transaction_id);
            }
        }

        let Some(deadline) = port.poll_timeout() else {
            break;
        };
        steps += 1;
        assert!(steps < 1000, "keepalive chain never ended");
        now = deadline;
        port.handle_timeout(now)?;
        requests = take_requests(&mut port)?;
    }

    // keepalives at 0, 10, ..., 60 s are answered, the one sent at 70 s
    // times out past the window and ends the chain
    assert_eq!(answered, 7);
    assert_eq!(unanswered.len(), 1);
    assert_eq!((now - start).as_millis(), 79_500);
    assert_eq!(port.keepalive_count(), 0);

    // the server keeps its earlier success
    let events = drain_events(&mut port);
    assert_eq!(completions(&events), (1, 0));
    assert!(port.succeeded_servers().contains(&ServerAddress::Resolved(server)));
    assert!(port.failed_servers().is_empty());

    Ok(())
}

#[test]
fn test_error_response_then_recovery() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[SERVER], &lookups)?;
    let server: SocketAddr = SERVER.parse()?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    let requests = take_requests(&mut port)?;
    drain_events(&mut port);

    let failed_at = now + Duration::from_millis(10);
    port.handle_read(inbound(server, &error_response(&requests[0].1)?, failed_at)?)?;
    let events = drain_events(&mut port);
    assert_eq!(completions(&events), (0, 1));
    assert!(port.failed_servers().contains(&ServerAddress::Resolved(server)));

    // the chain retries after the keepalive interval
    let retry_at = failed_at + Duration::from_secs(10);
    assert_eq!(port.poll_timeout(), Some(retry_at));
    port.handle_timeout(retry_at)?;
    let retry = take_requests(&mut port)?;
    assert_eq!(retry.len(), 1);

    // a later success still delivers the candidate, the latch stays
    let raw = success_response(&retry[0].1, MAPPED.parse::<SocketAddr>()?)?;
    port.handle_read(inbound(server, &raw, retry_at)?)?;
    let events = drain_events(&mut port);
    assert_eq!(gathered(&events).len(), 1);
    assert_eq!(completions(&events), (0, 0));
    assert!(port.succeeded_servers().contains(&ServerAddress::Resolved(server)));
    assert!(port.failed_servers().is_empty());

    Ok(())
}

#[test]
fn test_hostname_resolving_to_configured_literal() -> Result<()> {
    let lookups = SharedLookups::default();
    let server: SocketAddr = SERVER.parse()?;
    lookups
        .borrow_mut()
        .answers
        .insert("stun.example.org".to_owned(), vec![server]);
    let mut port = new_port(&[SERVER, "stun:stun.example.org:3478"], &lookups)?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    let requests = take_requests(&mut port)?;
    assert_eq!(requests.len(), 1);
    assert_eq!(lookups.borrow().started, vec!["stun.example.org".to_owned()]);

    // the literal answers first, the hostname is still outstanding
    let raw = success_response(&requests[0].1, MAPPED.parse::<SocketAddr>()?)?;
    port.handle_read(inbound(server, &raw, now)?)?;
    let events = drain_events(&mut port);
    assert_eq!(gathered(&events).len(), 2);
    assert_eq!(completions(&events), (0, 0));

    let poll_at = now + Duration::from_millis(20);
    assert_eq!(port.poll_timeout(), Some(poll_at));
    lookups.borrow_mut().ready = true;
    port.handle_timeout(poll_at)?;

    assert!(take_requests(&mut port)?.is_empty());
    assert_eq!(completions(&drain_events(&mut port)), (1, 0));
    assert_eq!(port.server_addresses().len(), 1);
    assert!(port.server_addresses().contains(&ServerAddress::Resolved(server)));
    assert_eq!(port.keepalive_count(), 1);

    Ok(())
}

#[test]
fn test_hostname_resolving_to_new_address() -> Result<()> {
    let lookups = SharedLookups::default();
    let resolved: SocketAddr = "203.0.113.9:3478".parse()?;
    {
        let mut l = lookups.borrow_mut();
        l.answers.insert(
            "stun.example.org".to_owned(),
            vec!["[2001:db8::9]:3478".parse::<SocketAddr>()?, resolved],
        );
        l.ready = true;
    }
    let mut port = new_port(&["stun.example.org"], &lookups)?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    assert!(take_requests(&mut port)?.is_empty());

    let poll_at = port.poll_timeout().expect("resolver poll should be scheduled");
    port.handle_timeout(poll_at)?;

    let requests = take_requests(&mut port)?;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, resolved);
    assert!(port.server_addresses().contains(&ServerAddress::Resolved(resolved)));
    assert!(!port.server_addresses().iter().any(|s| s.is_unresolved()));

    // only the engine schedule is left
    assert_eq!(port.poll_timeout(), Some(poll_at + Duration::from_millis(100)));

    Ok(())
}

#[test]
fn test_resolution_failure() -> Result<()> {
    let lookups = SharedLookups::default();
    lookups.borrow_mut().ready = true;
    let mut port = new_port(&["stun:nowhere.invalid"], &lookups)?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    drain_events(&mut port);
    let poll_at = port.poll_timeout().expect("resolver poll should be scheduled");
    port.handle_timeout(poll_at)?;

    assert_eq!(completions(&drain_events(&mut port)), (0, 1));
    assert!(port.failed_servers().contains(&ServerAddress::Unresolved {
        host: "nowhere.invalid".to_owned(),
        port: 3478,
    }));
    assert!(port.poll_timeout().is_none());

    Ok(())
}

#[test]
fn test_shared_socket_all_servers_fail_completes() -> Result<()> {
    let lookups = SharedLookups::default();
    let server: SocketAddr = SERVER.parse()?;
    let mut port = UdpPort::new_shared(
        config(&[SERVER])?,
        factory(None, &lookups),
        SocketState::Bound(LOCAL.parse::<SocketAddr>()?),
    )?;
    assert!(port.is_shared_socket());
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    let requests = take_requests(&mut port)?;
    port.handle_read(inbound(server, &error_response(&requests[0].1)?, now)?)?;

    let events = drain_events(&mut port);
    assert_eq!(completions(&events), (1, 0));
    assert_eq!(gathered(&events).len(), 1);

    Ok(())
}

#[test]
fn test_shared_socket_skips_mapping_equal_to_local() -> Result<()> {
    let lookups = SharedLookups::default();
    let server: SocketAddr = SERVER.parse()?;
    let mut port = UdpPort::new_shared(
        config(&[SERVER])?,
        factory(None, &lookups),
        SocketState::Bound(LOCAL.parse::<SocketAddr>()?),
    )?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    let requests = take_requests(&mut port)?;
    let raw = success_response(&requests[0].1, LOCAL.parse::<SocketAddr>()?)?;
    port.handle_read(inbound(server, &raw, now)?)?;

    let events = drain_events(&mut port);
    let candidates = gathered(&events);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].candidate_type(), CandidateType::Host);
    assert_eq!(completions(&events), (1, 0));

    Ok(())
}

#[test]
fn test_incompatible_family_fails_immediately() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&["stun:[2001:db8::1]:3478", SERVER], &lookups)?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;

    let requests = take_requests(&mut port)?;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, SERVER.parse::<SocketAddr>()?);
    assert!(port.failed_servers().contains(&ServerAddress::Resolved(
        "[2001:db8::1]:3478".parse::<SocketAddr>()?
    )));
    // the compatible server is still outstanding
    assert_eq!(completions(&drain_events(&mut port)), (0, 0));

    Ok(())
}

#[test]
fn test_two_servers_same_mapping() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[SERVER, "203.0.113.2:3478"], &lookups)?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    let requests = take_requests(&mut port)?;
    assert_eq!(requests.len(), 2);
    drain_events(&mut port);

    let mut events = vec![];
    for (server, request) in &requests {
        let raw = success_response(request, MAPPED.parse::<SocketAddr>()?)?;
        port.handle_read(inbound(*server, &raw, now)?)?;
        events.extend(drain_events(&mut port));
    }

    assert_eq!(gathered(&events).len(), 1);
    assert_eq!(completions(&events), (1, 0));
    assert_eq!(port.succeeded_servers().len(), 2);
    assert_eq!(port.keepalive_count(), 2);

    Ok(())
}

#[test]
fn test_stray_responses_are_ignored() -> Result<()> {
    let lookups = SharedLookups::default();
    let server: SocketAddr = SERVER.parse()?;
    let mut port = new_port(&[SERVER], &lookups)?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    take_requests(&mut port)?;
    drain_events(&mut port);

    let mut stray = Message::new();
    stray.build(&[Box::new(BINDING_SUCCESS), Box::new(TransactionId::new())])?;
    port.handle_read(inbound(server, &stray.raw, now)?)?;
    port.handle_read(inbound(server, &[0xde, 0xad], now)?)?;

    assert!(drain_events(&mut port).is_empty());
    assert!(!port.is_ready());
    assert_eq!(port.keepalive_count(), 1);

    Ok(())
}

#[test]
fn test_prepare_with_transactions_in_flight() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[SERVER], &lookups)?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    assert_eq!(
        port.handle_event(PortInput::PrepareAddress(now)),
        Err(Error::ErrTransactionsInFlight)
    );

    Ok(())
}

#[test]
fn test_waits_for_local_address() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = UdpPort::new(
        config(&[SERVER])?,
        factory(Some(SocketState::Binding), &lookups),
    )?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    assert!(drain_events(&mut port).is_empty());
    assert!(port.poll_write().is_none());
    assert!(port.local_addr().is_none());

    let local: SocketAddr = LOCAL.parse()?;
    port.handle_event(PortInput::LocalAddressReady(local, now))?;
    let events = drain_events(&mut port);
    assert!(matches!(events[0], PortEvent::LocalAddressReady(addr) if addr == local));
    assert_eq!(gathered(&events).len(), 1);
    assert_eq!(take_requests(&mut port)?.len(), 1);
    assert_eq!(port.get_name(), format!("udp:{LOCAL}"));

    Ok(())
}

#[test]
fn test_bind_failure_is_fatal() -> Result<()> {
    let lookups = SharedLookups::default();
    let port = UdpPort::new(config(&[SERVER])?, factory(None, &lookups));
    assert_eq!(port.err(), Some(Error::ErrBindFailed));

    Ok(())
}

#[test]
fn test_weak_credentials_rejected() -> Result<()> {
    let lookups = SharedLookups::default();
    let bound = SocketState::Bound(LOCAL.parse::<SocketAddr>()?);

    let port = UdpPort::new(
        PortConfig::default().with_credentials("ab", "0123456789abcdef"),
        factory(Some(bound), &lookups),
    );
    assert_eq!(port.err(), Some(Error::ErrLocalUfragInsufficientBits(16, 24)));

    let port = UdpPort::new(
        PortConfig::default().with_credentials("abcd", "short"),
        factory(Some(bound), &lookups),
    );
    assert_eq!(port.err(), Some(Error::ErrLocalPwdInsufficientBits(40, 128)));

    let port = UdpPort::new(PortConfig::default(), factory(Some(bound), &lookups))?;
    let (ufrag, pwd) = port.local_credentials();
    assert_eq!(ufrag.len(), 16);
    assert_eq!(pwd.len(), 32);

    Ok(())
}

#[test]
fn test_close_cancels_everything() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[SERVER, "stun.example.org"], &lookups)?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    drain_events(&mut port);
    assert!(port.poll_timeout().is_some());

    port.close()?;
    assert!(port.poll_timeout().is_none());
    assert!(port.poll_write().is_none());
    assert!(port.poll_event().is_none());
    assert_eq!(port.keepalive_count(), 0);

    assert_eq!(
        port.handle_timeout(now + Duration::from_secs(60)),
        Err(Error::ErrPortClosed)
    );
    assert_eq!(
        port.handle_event(PortInput::PrepareAddress(now)),
        Err(Error::ErrPortClosed)
    );
    assert_eq!(port.close(), Err(Error::ErrPortClosed));

    Ok(())
}

#[test]
fn test_unknown_address_and_connections() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[SERVER], &lookups)?;
    let now = Instant::now();
    let peer: SocketAddr = "192.0.2.50:6000".parse()?;

    port.handle_event(PortInput::PrepareAddress(now))?;
    drain_events(&mut port);

    port.handle_read(inbound(peer, b"hello", now)?)?;
    let events = drain_events(&mut port);
    assert_eq!(events.len(), 1);
    match &events[0] {
        PortEvent::UnknownAddress(msg) => {
            assert_eq!(msg.transport.peer_addr, peer);
            assert_eq!(&msg.message[..], b"hello");
        }
        other => panic!("expected unknown address event, got {other:?}"),
    }
    assert!(port.poll_read().is_none());

    port.create_connection(peer, TransportProtocol::UDP)?;
    assert!(port.has_connection(&peer));
    port.handle_read(inbound(peer, b"data", now)?)?;
    let read = port.poll_read().expect("connection data should be readable");
    assert_eq!(&read.message[..], b"data");
    assert!(drain_events(&mut port).is_empty());

    assert_eq!(
        port.create_connection("[2001:db8::50]:6000".parse::<SocketAddr>()?, TransportProtocol::UDP),
        Err(Error::ErrIncompatibleFamily)
    );
    assert_eq!(
        port.create_connection(peer, TransportProtocol::TCP),
        Err(Error::ErrUnsupportedProtocol)
    );

    assert!(port.remove_connection(&peer));
    port.handle_read(inbound(peer, b"again", now)?)?;
    assert!(matches!(
        drain_events(&mut port).as_slice(),
        [PortEvent::UnknownAddress(_)]
    ));

    Ok(())
}

#[test]
fn test_shared_socket_connection_needs_host_candidate() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = UdpPort::new_shared(
        config(&[])?,
        factory(None, &lookups),
        SocketState::Bound(LOCAL.parse::<SocketAddr>()?),
    )?;
    let peer: SocketAddr = "192.0.2.50:6000".parse()?;

    assert_eq!(
        port.create_connection(peer, TransportProtocol::UDP),
        Err(Error::ErrSharedSocketNoHostCandidate)
    );

    port.handle_event(PortInput::PrepareAddress(Instant::now()))?;
    port.create_connection(peer, TransportProtocol::UDP)?;

    Ok(())
}

#[test]
fn test_handle_write() -> Result<()> {
    let lookups = SharedLookups::default();
    let peer: SocketAddr = "192.0.2.50:6000".parse()?;
    let now = Instant::now();
    let msg = TaggedBytesMut {
        now,
        transport: TransportContext {
            peer_addr: peer,
            ..Default::default()
        },
        message: BytesMut::from(&b"payload"[..]),
    };

    let mut unbound = UdpPort::new(
        config(&[])?,
        factory(Some(SocketState::Binding), &lookups),
    )?;
    assert_eq!(
        unbound.handle_write(msg.clone()),
        Err(Error::ErrPortNotReady)
    );

    let mut port = new_port(&[], &lookups)?;
    port.handle_write(msg)?;
    let out = port.poll_write().expect("datagram should be queued");
    assert_eq!(out.transport.local_addr, LOCAL.parse::<SocketAddr>()?);
    assert_eq!(out.transport.peer_addr, peer);
    assert_eq!(&out.message[..], b"payload");

    Ok(())
}

#[test]
fn test_ready_to_send_passes_through() -> Result<()> {
    let lookups = SharedLookups::default();
    let mut port = new_port(&[], &lookups)?;

    port.handle_event(PortInput::ReadyToSend)?;
    assert!(matches!(port.poll_event(), Some(PortEvent::ReadyToSend)));

    Ok(())
}

#[test]
fn test_software_and_fingerprint_on_requests() -> Result<()> {
    let lookups = SharedLookups::default();
    let bound = SocketState::Bound(LOCAL.parse::<SocketAddr>()?);
    let cfg = config(&[SERVER])?
        .with_software("icegather test")
        .with_fingerprint(true);
    let mut port = UdpPort::new(cfg, factory(Some(bound), &lookups))?;

    port.handle_event(PortInput::PrepareAddress(Instant::now()))?;
    let requests = take_requests(&mut port)?;
    let request = &requests[0].1;
    assert!(request.contains(stun::attributes::ATTR_SOFTWARE));
    stun::fingerprint::FINGERPRINT.check(request)?;

    Ok(())
}

#[test]
fn test_fingerprint_mismatch_is_discarded() -> Result<()> {
    let lookups = SharedLookups::default();
    let bound = SocketState::Bound(LOCAL.parse::<SocketAddr>()?);
    let cfg = config(&[SERVER])?.with_fingerprint(true);
    let mut port = UdpPort::new(cfg, factory(Some(bound), &lookups))?;
    let server: SocketAddr = SERVER.parse()?;
    let now = Instant::now();

    port.handle_event(PortInput::PrepareAddress(now))?;
    let requests = take_requests(&mut port)?;
    drain_events(&mut port);

    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_SUCCESS),
        Box::new(requests[0].1.transaction_id),
        Box::new(XorMappedAddress::from(MAPPED.parse::<SocketAddr>()?)),
        Box::new(stun::fingerprint::FINGERPRINT),
    ])?;

    // flip a byte of the mapped address
    let mut corrupted = m.raw.clone();
    corrupted[MESSAGE_HEADER_SIZE + ATTRIBUTE_HEADER_SIZE + 4] ^= 0xff;
    port.handle_read(inbound(server, &corrupted, now)?)?;
    let events = drain_events(&mut port);
    assert!(gathered(&events).is_empty());
    assert_eq!(completions(&events), (0, 0));
    assert!(port.succeeded_servers().is_empty());
    // the transaction is still waiting for its first retransmission
    assert_eq!(port.poll_timeout(), Some(now + Duration::from_millis(100)));

    port.handle_read(inbound(server, &m.raw, now)?)?;
    let events = drain_events(&mut port);
    assert_eq!(gathered(&events).len(), 1);
    assert_eq!(completions(&events), (1, 0));

    Ok(())
}
