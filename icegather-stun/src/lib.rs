#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod addr;
pub mod attributes;
pub mod error_code;
pub mod fingerprint;
pub mod message;
pub mod textattrs;
pub mod transaction;
pub mod xoraddr;

// IANA assigned ports for "stun" protocol.
pub const DEFAULT_PORT: u16 = 3478;
