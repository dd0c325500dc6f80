use log::trace;
use shared::error::*;
use shared::util::lookup_all;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use super::AsyncResolver;
use crate::server_address::ServerAddress;

/// ThreadedResolver runs the blocking system lookup on a helper thread and
/// hands the result back through a channel that is polled from the event loop.
#[derive(Default)]
pub struct ThreadedResolver {
    rx: Option<Receiver<Result<Vec<SocketAddr>>>>,
    addresses: Vec<SocketAddr>,
    outcome: Option<Result<()>>,
}

impl ThreadedResolver {
    pub fn new() -> Self {
        ThreadedResolver::default()
    }

    fn finish(&mut self, result: Result<Vec<SocketAddr>>) {
        self.rx = None;
        self.outcome = Some(match result {
            Ok(addresses) if addresses.is_empty() => Err(Error::ErrNoCompatibleAddress),
            Ok(addresses) => {
                self.addresses = addresses;
                Ok(())
            }
            Err(err) => Err(err),
        });
    }
}

impl AsyncResolver for ThreadedResolver {
    fn start(&mut self, addr: &ServerAddress) {
        match addr {
            ServerAddress::Resolved(addr) => self.finish(Ok(vec![*addr])),
            ServerAddress::Unresolved { host, .. } if host.trim().is_empty() => {
                self.finish(Err(Error::ErrHostnameEmpty))
            }
            ServerAddress::Unresolved { host, port } => {
                let (tx, rx) = mpsc::channel();
                let host = host.clone();
                let port = *port;
                thread::spawn(move || {
                    let result = lookup_all((host.as_str(), port));
                    // the receiver is gone when the lookup was destroyed
                    let _ = tx.send(result);
                });
                self.rx = Some(rx);
            }
        }
    }

    fn poll(&mut self) -> Option<Result<()>> {
        let received = match &self.rx {
            Some(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    Some(Err(Error::Other("resolver thread exited".to_owned())))
                }
            },
            None => None,
        };
        if let Some(result) = received {
            self.finish(result);
        }

        self.outcome.take()
    }

    fn resolved_address(&self, use_ipv4: bool) -> Option<SocketAddr> {
        self.addresses
            .iter()
            .find(|addr| addr.ip().to_canonical().is_ipv4() == use_ipv4)
            .copied()
    }

    fn destroy(&mut self) {
        if self.rx.take().is_some() {
            trace!("discarding pending lookup");
        }
        self.addresses.clear();
    }
}
