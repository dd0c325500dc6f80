use std::io;
use std::net;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    //STUN errors
    #[error("attribute not found")]
    ErrAttributeNotFound,
    #[error("unexpected EOF")]
    ErrUnexpectedEof,
    #[error("attribute size is invalid")]
    ErrAttributeSizeInvalid,
    #[error("attribute size overflow")]
    ErrAttributeSizeOverflow,
    #[error("unexpected EOF: not enough bytes to read header")]
    ErrUnexpectedHeaderEof,
    #[error("fingerprint check failed")]
    ErrFingerprintMismatch,
    #[error("invalid length of IP value")]
    ErrBadIpLength,
    #[error("unsupported address family")]
    ErrBadFamily,
    #[error("not a STUN message")]
    ErrNonStunMessage,
    #[error("engine is closed")]
    ErrEngineClosed,

    //URL errors
    #[error("unknown scheme type")]
    ErrSchemeType,
    #[error("invalid hostname")]
    ErrHost,
    #[error("invalid port number")]
    ErrPort,
    #[error("queries not supported in stun address")]
    ErrStunQuery,

    //Resolver errors
    #[error("host name must not be empty")]
    ErrHostnameEmpty,
    #[error("failed to parse address")]
    ErrAddressParseFailed,
    #[error("no address of a compatible family")]
    ErrNoCompatibleAddress,
    #[error("resolution is still pending")]
    ErrResolvePending,
    #[error("no resolution started for address")]
    ErrResolveNotStarted,

    //Port errors
    #[error("bind failed")]
    ErrBindFailed,
    #[error("end port is less than the start")]
    ErrEndPortLessThanStart,
    #[error("port is closed")]
    ErrPortClosed,
    #[error("port socket is not bound yet")]
    ErrPortNotReady,
    #[error("binding transactions are still in flight")]
    ErrTransactionsInFlight,
    #[error("connection type is not supported by a udp port")]
    ErrUnsupportedProtocol,
    #[error("remote address family is not compatible with the port")]
    ErrIncompatibleFamily,
    #[error("shared socket port has no host candidate to connect from")]
    ErrSharedSocketNoHostCandidate,
    #[error("local username fragment insufficient bits are provided (have {0}, want {1})")]
    ErrLocalUfragInsufficientBits(usize, usize),
    #[error("local password insufficient bits are provided (have {0}, want {1})")]
    ErrLocalPwdInsufficientBits(usize, usize),

    //Third Party Error
    #[error("parse ip: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("url parse: {0}")]
    Url(#[from] url::ParseError),

    #[error("Other STUN Err: {0}")]
    OtherStunErr(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
