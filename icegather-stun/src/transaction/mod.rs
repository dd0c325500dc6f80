
use bytes::BytesMut;
use log::{debug, trace};
use shared::error::*;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::message::*;

pub const DEFAULT_RTO: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_RTO_FACTOR: u32 = 16;
pub const DEFAULT_MAX_SENDS: u32 = 9;

/// TransactionKind is the per-kind behaviour the engine needs to start a
/// transaction. Outcome handling is left to the owner, which receives the
/// kind back in every [`TransactionEvent`].
pub trait TransactionKind {
    /// prepare builds the request carrying the assigned transaction id.
    fn prepare(&self, id: TransactionId) -> Result<Message>;
}

/// OutboundRequest is a serialized request the owner must put on the wire.
/// The tag tells the owner which kind (and so which destination) it belongs to.
#[derive(Debug, Clone)]
pub struct OutboundRequest<T> {
    pub id: TransactionId,
    pub tag: T,
    pub payload: BytesMut,
}

/// TransactionEvent is the final outcome of a transaction. Exactly one event
/// is emitted per transaction unless the engine is closed first.
#[derive(Debug)]
pub enum TransactionEvent<T> {
    Response {
        id: TransactionId,
        kind: T,
        response: Message,
        rtt: Duration,
    },
    ErrorResponse {
        id: TransactionId,
        kind: T,
        response: Message,
    },
    Timeout {
        id: TransactionId,
        kind: T,
    },
}

struct Transaction<T> {
    kind: T,
    method: Method,
    raw: BytesMut,
    sends: u32,
    last_sent: Option<Instant>,
    deadline: Instant,
}

struct EngineSettings {
    rto: Duration,
    max_rto_factor: u32,
    max_sends: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            rto: DEFAULT_RTO,
            max_rto_factor: DEFAULT_MAX_RTO_FACTOR,
            max_sends: DEFAULT_MAX_SENDS,
        }
    }
}

impl EngineSettings {
    // delay to wait after a send, given the sends that went out before it
    fn delay_after(&self, sends: u32) -> Duration {
        let factor = 1u32
            .checked_shl(sends)
            .unwrap_or(u32::MAX)
            .min(self.max_rto_factor.max(1));
        self.rto * factor
    }
}

#[derive(Default)]
pub struct TransactionEngineBuilder {
    settings: EngineSettings,
}

impl TransactionEngineBuilder {
    pub fn new() -> Self {
        TransactionEngineBuilder::default()
    }

    /// with_rto sets the retransmission time unit.
    pub fn with_rto(mut self, rto: Duration) -> Self {
        self.settings.rto = rto;
        self
    }

    /// with_max_rto_factor caps the exponential backoff multiplier.
    pub fn with_max_rto_factor(mut self, factor: u32) -> Self {
        self.settings.max_rto_factor = factor;
        self
    }

    /// with_max_sends sets how many times a request is sent before the
    /// transaction times out.
    pub fn with_max_sends(mut self, max_sends: u32) -> Self {
        self.settings.max_sends = max_sends;
        self
    }

    pub fn build<T>(self) -> TransactionEngine<T> {
        TransactionEngine {
            settings: self.settings,
            transactions: HashMap::new(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            closed: false,
        }
    }
}

/// TransactionEngine owns outstanding request/response transactions.
///
/// The n-th send (counting from zero) is followed by a wait of
/// `rto * min(2^n, max_rto_factor)`. Once `max_sends` sends have gone out the
/// next expiry times the transaction out. With the defaults the sends go out
/// at 0, 100, 300, 700, 1500, 3100, ... ms and the transaction times out at
/// 9.5 s.
pub struct TransactionEngine<T> {
    settings: EngineSettings,
    transactions: HashMap<TransactionId, Transaction<T>>,
    transmits: VecDeque<OutboundRequest<T>>,
    events: VecDeque<TransactionEvent<T>>,
    closed: bool,
}

impl<T> Default for TransactionEngine<T> {
    fn default() -> Self {
        TransactionEngineBuilder::new().build()
    }
}

impl<T: TransactionKind + Clone> TransactionEngine<T> {
    /// send assigns a fresh id, prepares the request and queues it for
    /// transmission right away.
    pub fn send(&mut self, kind: T, now: Instant) -> Result<TransactionId> {
        self.start(kind, None, now)
    }

    /// send_delayed registers the transaction now but defers its first
    /// transmission by delay. A delayed transaction is live for [`Self::is_empty`].
    pub fn send_delayed(&mut self, kind: T, delay: Duration, now: Instant) -> Result<TransactionId> {
        self.start(kind, Some(delay), now)
    }

    fn start(&mut self, kind: T, delay: Option<Duration>, now: Instant) -> Result<TransactionId> {
        if self.closed {
            return Err(Error::ErrEngineClosed);
        }

        let mut id = TransactionId::new();
        while self.transactions.contains_key(&id) {
            id = TransactionId::new();
        }

        let msg = kind.prepare(id)?;
        if msg.transaction_id != id {
            return Err(Error::OtherStunErr(format!(
                "prepared request carries id {} instead of {}",
                msg.transaction_id, id
            )));
        }

        let mut tr = Transaction {
            kind,
            method: msg.typ.method,
            raw: BytesMut::from(&msg.raw[..]),
            sends: 0,
            last_sent: None,
            deadline: now + delay.unwrap_or_default(),
        };

        match delay {
            Some(delay) => {
                debug!("transaction {} scheduled in {:?}", id, delay);
            }
            None => {
                debug!("transaction {} started", id);
                self.transmit(id, &mut tr, now);
            }
        }
        self.transactions.insert(id, tr);

        Ok(id)
    }

    fn transmit(&mut self, id: TransactionId, tr: &mut Transaction<T>, now: Instant) {
        tr.deadline = now + self.settings.delay_after(tr.sends);
        tr.sends += 1;
        tr.last_sent = Some(now);

        self.transmits.push_back(OutboundRequest {
            id,
            tag: tr.kind.clone(),
            payload: tr.raw.clone(),
        });
    }

    /// check_response matches a received datagram against live transactions.
    /// Returns true when it completed one. Corrupt messages, non-responses
    /// and unknown ids are discarded.
    pub fn check_response(&mut self, buf: &[u8], now: Instant) -> bool {
        if self.closed {
            return false;
        }

        let mut msg = Message::new();
        if let Err(err) = msg.unmarshal_binary(buf) {
            trace!("discarding undecodable response: {}", err);
            return false;
        }
        if !msg.typ.class.is_response() {
            trace!("discarding non-response {}", msg.typ);
            return false;
        }

        let id = msg.transaction_id;
        let method = match self.transactions.get(&id) {
            Some(tr) => tr.method,
            None => {
                trace!("discarding response for unknown transaction {}", id);
                return false;
            }
        };
        if method != msg.typ.method {
            debug!(
                "discarding response for transaction {}: method {} does not match request method {}",
                id, msg.typ.method, method
            );
            return false;
        }

        let Some(tr) = self.transactions.remove(&id) else {
            return false;
        };

        if msg.typ.class == CLASS_SUCCESS_RESPONSE {
            let rtt = tr
                .last_sent
                .map(|sent| now.saturating_duration_since(sent))
                .unwrap_or_default();
            debug!("transaction {} succeeded after {:?}", id, rtt);
            self.events.push_back(TransactionEvent::Response {
                id,
                kind: tr.kind,
                response: msg,
                rtt,
            });
        } else {
            debug!("transaction {} got error response", id);
            self.events.push_back(TransactionEvent::ErrorResponse {
                id,
                kind: tr.kind,
                response: msg,
            });
        }

        true
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        let expired: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|(_, tr)| tr.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            let Some(mut tr) = self.transactions.remove(&id) else {
                continue;
            };

            if tr.sends >= self.settings.max_sends {
                debug!("transaction {} timed out after {} sends", id, tr.sends);
                self.events
                    .push_back(TransactionEvent::Timeout { id, kind: tr.kind });
                continue;
            }

            if tr.sends > 0 {
                trace!("retransmitting transaction {} (sends={})", id, tr.sends);
            }
            self.transmit(id, &mut tr, now);
            self.transactions.insert(id, tr);
        }
    }
}

impl<T> TransactionEngine<T> {
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.transactions.values().map(|tr| tr.deadline).min()
    }

    pub fn poll_transmit(&mut self) -> Option<OutboundRequest<T>> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<TransactionEvent<T>> {
        self.events.pop_front()
    }

    /// is_empty is true iff no transaction is live, delayed ones included.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.transactions.contains_key(id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// close discards every live transaction and pending output without
    /// emitting any event.
    pub fn close(&mut self) {
        if !self.transactions.is_empty() {
            debug!("closing engine with {} live transactions", self.transactions.len());
        }
        self.closed = true;
        self.transactions.clear();
        self.transmits.clear();
        self.events.clear();
    }
}
