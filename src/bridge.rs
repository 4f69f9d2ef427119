//! The messaging bridge between the probing engine and the outside world.
//!
//! Target addresses come in through a [`TargetFeed`] and results leave through a
//! [`ResultSink`]. Neither side knows what sits on the other end of the channel.

pub mod feed;
pub mod publisher;

use crate::error::{Error, Result};
use crate::net::icmp::{ProbeReply, Rtt};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{info, trace};

/// The longest valid target message, `255.255.255.255`.
pub const MAX_TARGET_BYTE_SIZE: usize = 15;

pub const RECORD_IP_BYTE_SIZE: usize = 16;

/// The size of an encoded [`ResultRecord`].
pub const RECORD_BYTE_SIZE: usize = RECORD_IP_BYTE_SIZE + 8;

/// Parse a target message: a dotted quad IPv4 address of at most 15 bytes.
///
/// Trailing NULs and whitespace are ignored.
pub fn parse_target(msg: &[u8]) -> Result<Ipv4Addr> {
    let end = msg
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    let msg = &msg[..end];
    if msg.len() > MAX_TARGET_BYTE_SIZE {
        return Err(Error::InvalidTarget(format!(
            "{} bytes exceeds {MAX_TARGET_BYTE_SIZE}",
            msg.len()
        )));
    }
    let text = std::str::from_utf8(msg)
        .map_err(|_| Error::InvalidTarget(format!("{msg:02x?} is not UTF-8")))?;
    text.parse()
        .map_err(|_| Error::InvalidTarget(format!("{text:?} is not an IPv4 address")))
}

/// The latency measured for one target, as published on the result feed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResultRecord {
    pub ip: Ipv4Addr,
    pub rtt: Rtt,
}

impl ResultRecord {
    /// Encode as 16 bytes of NUL padded address text followed by the seconds and
    /// microseconds, both big endian.
    pub fn encode(&self) -> [u8; RECORD_BYTE_SIZE] {
        let mut buf = [0u8; RECORD_BYTE_SIZE];
        let text = self.ip.to_string();
        buf[..text.len()].copy_from_slice(text.as_bytes());
        buf[16..20].copy_from_slice(&self.rtt.secs.to_be_bytes());
        buf[20..24].copy_from_slice(&self.rtt.micros.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != RECORD_BYTE_SIZE {
            return Err(Error::InvalidRecord(buf.len()));
        }
        let ip = parse_target(&buf[..RECORD_IP_BYTE_SIZE])
            .map_err(|_| Error::InvalidRecord(buf.len()))?;
        let secs = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let micros = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
        Ok(Self {
            ip,
            rtt: Rtt { secs, micros },
        })
    }
}

impl From<ProbeReply> for ResultRecord {
    fn from(reply: ProbeReply) -> Self {
        Self {
            ip: reply.source,
            rtt: reply.rtt,
        }
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: time={}", self.ip, self.rtt)
    }
}

/// A source of raw target messages.
pub trait TargetFeed: Send {
    /// Wait up to `timeout` for the next message; `Ok(None)` if nothing arrived.
    ///
    /// Returns [`Error::FeedClosed`] once no more messages can ever arrive.
    fn next_target(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// A best effort destination for results.
///
/// Publishing never blocks; a record that cannot be delivered right away is dropped.
pub trait ResultSink: Send {
    fn publish(&mut self, record: &ResultRecord);
}

impl TargetFeed for Receiver<Vec<u8>> {
    fn next_target(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::FeedClosed),
        }
    }
}

impl ResultSink for Sender<ResultRecord> {
    fn publish(&mut self, record: &ResultRecord) {
        match self.try_send(*record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!(%record, "result dropped, channel full"),
            Err(TrySendError::Disconnected(_)) => trace!(%record, "result dropped, no receiver"),
        }
    }
}

/// Writes results to the log, for running without a subscriber.
#[derive(Debug, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn publish(&mut self, record: &ResultRecord) {
        info!(ip = %record.ip, rtt_ms = record.rtt.as_millis_f64(), "ping response");
    }
}
