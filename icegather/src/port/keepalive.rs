use std::time::{Duration, Instant};

/// Timing knobs shared by every keepalive chain of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KeepaliveTiming {
    /// Delay before the next request after a response or an error response.
    pub(crate) interval: Duration,
    /// How long after the chain started errors and timeouts are retried.
    pub(crate) retry_timeout: Duration,
    /// Delay before the next request after a timeout.
    pub(crate) retry_delay: Duration,
}

impl KeepaliveTiming {
    pub(crate) fn within_window(&self, elapsed: Duration) -> bool {
        elapsed <= self.retry_timeout
    }
}

/// The ongoing Binding relationship with one server.
///
/// A chain is owned by the port and keyed by server address. Removing the
/// record cancels the chain: an outcome for a server without a chain
/// schedules no successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeepaliveChain {
    /// Creation of the first request. Successors keep it.
    pub(crate) started_at: Instant,
    /// Successor requests scheduled so far.
    pub(crate) successors: u32,
}

impl KeepaliveChain {
    pub(crate) fn new(now: Instant) -> Self {
        KeepaliveChain {
            started_at: now,
            successors: 0,
        }
    }

    pub(crate) fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}
