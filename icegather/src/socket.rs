use log::{debug, warn};
use shared::error::*;
use std::cell::RefCell;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::rc::Rc;

use crate::resolver::AsyncResolver;
use crate::resolver::threaded::ThreadedResolver;

/// Binding state of the packet socket a port sends from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// The socket exists but its local address is not known yet. The port
    /// waits for [`crate::PortInput::LocalAddressReady`].
    Binding,
    Bound(SocketAddr),
}

/// Creates the I/O resources a port needs. The port itself never touches a
/// socket, it only learns the socket's state and hands datagrams back to
/// the caller.
pub trait PacketSocketFactory {
    /// Creates a UDP socket on ip with a port in [min_port, max_port]. A zero
    /// range lets the system pick.
    fn create_udp_socket(&mut self, ip: IpAddr, min_port: u16, max_port: u16)
    -> Result<SocketState>;

    fn create_async_resolver(&mut self) -> Box<dyn AsyncResolver>;
}

/// StdSocketFactory binds real `std::net::UdpSocket`s and resolves through
/// [`ThreadedResolver`]. Bound sockets are kept until the driver takes them;
/// clones share the same sockets, so a driver keeps one clone and hands the
/// other to the port.
#[derive(Default, Clone)]
pub struct StdSocketFactory {
    sockets: Rc<RefCell<Vec<UdpSocket>>>,
}

impl StdSocketFactory {
    pub fn new() -> Self {
        StdSocketFactory::default()
    }

    /// Takes the most recently bound socket.
    pub fn take_socket(&self) -> Option<UdpSocket> {
        self.sockets.borrow_mut().pop()
    }
}

impl PacketSocketFactory for StdSocketFactory {
    fn create_udp_socket(
        &mut self,
        ip: IpAddr,
        min_port: u16,
        max_port: u16,
    ) -> Result<SocketState> {
        if min_port == 0 && max_port == 0 {
            let socket = UdpSocket::bind(SocketAddr::new(ip, 0))?;
            let local_addr = socket.local_addr()?;
            debug!("bound udp socket {}", local_addr);
            self.sockets.borrow_mut().push(socket);
            return Ok(SocketState::Bound(local_addr));
        }
        if max_port < min_port {
            return Err(Error::ErrEndPortLessThanStart);
        }

        for port in min_port..=max_port {
            match UdpSocket::bind(SocketAddr::new(ip, port)) {
                Ok(socket) => {
                    let local_addr = socket.local_addr()?;
                    debug!("bound udp socket {}", local_addr);
                    self.sockets.borrow_mut().push(socket);
                    return Ok(SocketState::Bound(local_addr));
                }
                Err(err) => {
                    debug!("failed to bind {}:{}: {}", ip, port, err);
                }
            }
        }

        warn!("no free port in [{}, {}] on {}", min_port, max_port, ip);
        Err(Error::ErrBindFailed)
    }

    fn create_async_resolver(&mut self) -> Box<dyn AsyncResolver> {
        Box::new(ThreadedResolver::new())
    }
}
