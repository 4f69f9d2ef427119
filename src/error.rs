use std::fmt::{Display, Formatter};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// A prober error result.
pub type Result<T> = std::result::Result<T, Error>;

/// A prober error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to {1}: {0}")]
    Socket(io::Error, SocketOperation),
    #[error("failed to drop privileges ({1}): {0}")]
    Privilege(io::Error, &'static str),
    #[cfg(target_os = "linux")]
    #[error("capability error: {0}")]
    Capabilities(#[from] caps::errors::CapsError),
    #[error("bind error for {1}: {0}")]
    Bind(io::Error, SocketAddr),
    #[error("connect error for {1}: {0}")]
    Connect(io::Error, SocketAddr),
    #[error("invalid target message: {0}")]
    InvalidTarget(String),
    #[error("invalid result record of {0} bytes")]
    InvalidRecord(usize),
    #[error("target feed closed")]
    FeedClosed,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A raw socket operation, used to name the failing step of socket setup and use.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SocketOperation {
    NewSocket,
    SetTimestamp,
    SetHeaderIncluded,
    SetIcmpFilter,
    SendTo,
    Poll,
    RecvMsg,
}

impl Display for SocketOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewSocket => write!(f, "create raw ICMP socket"),
            Self::SetTimestamp => write!(f, "set SO_TIMESTAMP"),
            Self::SetHeaderIncluded => write!(f, "set IP_HDRINCL"),
            Self::SetIcmpFilter => write!(f, "set ICMP_FILTER"),
            Self::SendTo => write!(f, "send to"),
            Self::Poll => write!(f, "poll"),
            Self::RecvMsg => write!(f, "recvmsg"),
        }
    }
}
