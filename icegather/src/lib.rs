#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod candidate;
pub mod network_type;
pub mod port;
pub mod rand;
pub mod resolver;
pub mod server_address;
pub mod socket;
pub mod url;

pub use port::port_config::PortConfig;
pub use port::{PortEvent, PortInput, UdpPort};
