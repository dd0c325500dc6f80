//! Gathers host and server reflexive candidates for one UDP socket.
//!
//! ```
//! cargo run --package icegather --example stun_gather -- --server stun:stun.l.google.com:19302
//! ```

use bytes::BytesMut;
use clap::Parser;
use icegather::socket::StdSocketFactory;
use icegather::url::Url;
use icegather::{PortConfig, PortEvent, PortInput, UdpPort};
use sansio::Protocol;
use shared::error::{Error, Result};
use shared::{TaggedBytesMut, TransportContext, TransportProtocol};
use std::io::ErrorKind;
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "STUN Gather")]
#[command(version = "0.1.0")]
#[command(about = "An example of candidate gathering with a sans-I/O UDP port", long_about = None)]
struct Cli {
    /// STUN servers, as stun:host[:port] or host:port
    #[arg(long, default_value = "stun:stun.l.google.com:19302")]
    server: Vec<String>,

    /// Local address to bind
    #[arg(long, default_value = "0.0.0.0")]
    local_ip: IpAddr,

    /// Keep the keepalive chains running until the duration elapses
    #[arg(long)]
    keepalive: bool,

    /// Run time in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let urls = cli
        .server
        .iter()
        .map(|raw| Url::parse_url(raw))
        .collect::<Result<Vec<_>>>()?;

    let config = PortConfig::default()
        .with_urls(urls)
        .with_local_ip(cli.local_ip)
        .with_software("icegather stun_gather");

    let factory = StdSocketFactory::new();
    let mut port = UdpPort::new(config, Box::new(factory.clone()))?;
    let socket = factory.take_socket().ok_or(Error::ErrBindFailed)?;
    let local_addr = socket.local_addr()?;
    println!("Local address: {local_addr}");

    port.handle_event(PortInput::PrepareAddress(Instant::now()))?;

    let stop_at = Instant::now() + Duration::from_secs(cli.duration);
    let mut buf = vec![0u8; 1500];
    let mut done = false;
    while !done && Instant::now() < stop_at {
        while let Some(transmit) = port.poll_write() {
            socket.send_to(&transmit.message, transmit.transport.peer_addr)?;
        }

        while let Some(event) = port.poll_event() {
            match event {
                PortEvent::CandidateReady(candidate) => {
                    println!(
                        "Candidate: {} foundation={} priority={}",
                        candidate,
                        candidate.foundation(),
                        candidate.priority()
                    );
                }
                PortEvent::PortComplete => {
                    println!("Gathering complete");
                    done = !cli.keepalive;
                }
                PortEvent::PortError => {
                    println!("Gathering failed");
                    done = !cli.keepalive;
                }
                PortEvent::UnknownAddress(msg) => {
                    println!("Datagram from unknown peer {}", msg.transport.peer_addr);
                }
                _ => {}
            }
        }
        if done {
            break;
        }

        let wait = port
            .poll_timeout()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(100))
            .clamp(Duration::from_millis(1), Duration::from_millis(100));
        socket.set_read_timeout(Some(wait))?;

        match socket.recv_from(&mut buf) {
            Ok((n, peer_addr)) => {
                port.handle_read(TaggedBytesMut {
                    now: Instant::now(),
                    transport: TransportContext {
                        local_addr,
                        peer_addr,
                        transport_protocol: TransportProtocol::UDP,
                    },
                    message: BytesMut::from(&buf[..n]),
                })?;
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => return Err(err.into()),
        }

        let now = Instant::now();
        if port.poll_timeout().is_some_and(|deadline| deadline <= now) {
            port.handle_timeout(now)?;
        }
    }

    for server in port.succeeded_servers() {
        println!("Succeeded: {server}");
    }
    for server in port.failed_servers() {
        println!("Failed: {server}");
    }
    port.close()?;

    Ok(())
}
