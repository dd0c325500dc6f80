
pub mod threaded;

use log::{debug, trace, warn};
use shared::error::*;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use crate::server_address::ServerAddress;
use crate::socket::PacketSocketFactory;

/// A single hostname lookup driven by polling. Implementations must not block.
pub trait AsyncResolver {
    /// Kicks off resolution of addr.
    fn start(&mut self, addr: &ServerAddress);

    /// Returns None while the lookup is pending, then its outcome once.
    fn poll(&mut self) -> Option<Result<()>>;

    /// Returns a resolved address of the requested family, if any.
    fn resolved_address(&self, use_ipv4: bool) -> Option<SocketAddr>;

    /// Releases the lookup. A pending result is discarded.
    fn destroy(&mut self);
}

/// Completion of a resolution, keyed by the address that was asked for.
/// The resolved form is fetched with [`AddressResolver::get_resolved_address`].
#[derive(Debug, PartialEq)]
pub struct ResolveDone {
    pub input: ServerAddress,
    pub result: Result<()>,
}

struct ResolverEntry {
    handle: Box<dyn AsyncResolver>,
    done: bool,
}

/// AddressResolver fans out one lookup per unique input address and reports
/// each completion exactly once.
#[derive(Default)]
pub struct AddressResolver {
    resolvers: HashMap<ServerAddress, ResolverEntry>,
    events: VecDeque<ResolveDone>,
}

impl AddressResolver {
    pub fn new() -> Self {
        AddressResolver::default()
    }

    /// Starts resolving input unless a lookup for it already exists, whether
    /// in flight or completed. Returns true when a new lookup was started.
    pub fn resolve(&mut self, input: &ServerAddress, factory: &mut dyn PacketSocketFactory) -> bool {
        if self.resolvers.contains_key(input) {
            trace!("resolution of {} already requested", input);
            return false;
        }

        debug!("resolving {}", input);
        let mut handle = factory.create_async_resolver();
        handle.start(input);
        self.resolvers.insert(
            input.clone(),
            ResolverEntry {
                handle,
                done: false,
            },
        );
        true
    }

    /// Returns the resolved form of input for the requested family.
    pub fn get_resolved_address(&self, input: &ServerAddress, use_ipv4: bool) -> Result<SocketAddr> {
        let entry = self
            .resolvers
            .get(input)
            .ok_or(Error::ErrResolveNotStarted)?;
        if !entry.done {
            return Err(Error::ErrResolvePending);
        }
        entry
            .handle
            .resolved_address(use_ipv4)
            .ok_or(Error::ErrNoCompatibleAddress)
    }

    /// Polls every pending lookup and queues a [`ResolveDone`] for each one
    /// that finished.
    pub fn poll_resolvers(&mut self) {
        for (input, entry) in self.resolvers.iter_mut() {
            if entry.done {
                continue;
            }
            if let Some(result) = entry.handle.poll() {
                entry.done = true;
                if let Err(err) = &result {
                    warn!("lookup of {} failed: {}", input, err);
                }
                self.events.push_back(ResolveDone {
                    input: input.clone(),
                    result,
                });
            }
        }
    }

    pub fn poll_event(&mut self) -> Option<ResolveDone> {
        self.events.pop_front()
    }

    /// True while any lookup has not completed.
    pub fn is_pending(&self) -> bool {
        self.resolvers.values().any(|entry| !entry.done)
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Releases every lookup handle and drops undelivered completions.
    pub fn close(&mut self) {
        for (_, mut entry) in self.resolvers.drain() {
            entry.handle.destroy();
        }
        self.events.clear();
    }
}

impl Drop for AddressResolver {
    fn drop(&mut self) {
        self.close();
    }
}
