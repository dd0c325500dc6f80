use super::*;

impl sansio::Protocol<TaggedBytesMut, TaggedBytesMut, PortInput> for UdpPort {
    type Rout = TaggedBytesMut;
    type Wout = TaggedBytesMut;
    type Eout = PortEvent;
    type Error = Error;
    type Time = Instant;

    /// Takes a datagram received on the port's socket. Responses from STUN
    /// servers feed the Binding transactions, data from a connection is
    /// queued for `poll_read` and anything else becomes
    /// [`PortEvent::UnknownAddress`].
    fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()> {
        if self.closed {
            return Err(Error::ErrPortClosed);
        }
        let now = msg.now;
        self.on_read_packet(msg);
        self.flush_transmits(now);
        Ok(())
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        self.reads.pop_front()
    }

    /// Sends application data from the port's socket. The local address is
    /// filled in from the bound socket.
    fn handle_write(&mut self, msg: TaggedBytesMut) -> Result<()> {
        if self.closed {
            return Err(Error::ErrPortClosed);
        }
        self.send_to(msg)
    }

    /// Datagrams to put on the wire, STUN requests included.
    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.writes.pop_front()
    }

    fn handle_event(&mut self, evt: PortInput) -> Result<()> {
        match evt {
            PortInput::PrepareAddress(now) => {
                self.prepare_address(now)?;
                self.flush_transmits(now);
            }
            PortInput::LocalAddressReady(addr, now) => {
                self.handle_local_address_ready(addr, now)?;
                self.flush_transmits(now);
            }
            PortInput::ReadyToSend => {
                if self.closed {
                    return Err(Error::ErrPortClosed);
                }
                self.events.push_back(PortEvent::ReadyToSend);
            }
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        self.events.pop_front()
    }

    /// Drives retransmissions, delayed keepalives and hostname lookups.
    fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::ErrPortClosed);
        }

        self.engine.handle_timeout(now);
        self.process_transaction_events(now);
        self.poll_resolver(now);
        self.flush_transmits(now);
        Ok(())
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        match (self.engine.poll_timeout(), self.resolve_poll_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Destroys the port. Live transactions and keepalive chains are
    /// dropped without reporting an outcome and lookups are released.
    fn close(&mut self) -> Result<()> {
        self.close_port()
    }
}
