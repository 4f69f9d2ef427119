use crate::bridge::{ResultRecord, ResultSink};
use crate::net::icmp::ProbeCodec;
use crate::net::rawsock::Datagram;
use crate::net::ProbeSocket;
use crate::shutdown::Shutdown;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Large enough for any datagram on an Ethernet link.
const RECV_BYTE_SIZE: usize = 1500;

/// Counters kept by the receive engine.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct ReceiveStats {
    pub received: u64,
    pub matched: u64,
    pub discarded: u64,
    pub missing_timestamp: u64,
    pub recv_errors: u64,
}

/// Reads the shared socket and turns echo replies to our probes into results.
pub struct ReceiveEngine<S: ?Sized> {
    socket: Arc<S>,
    codec: ProbeCodec,
    stats: ReceiveStats,
}

impl<S: ProbeSocket + ?Sized> ReceiveEngine<S> {
    pub fn new(socket: Arc<S>, codec: ProbeCodec) -> Self {
        Self {
            socket,
            codec,
            stats: ReceiveStats::default(),
        }
    }

    /// Publish a result for every reply until cancelled.
    ///
    /// `poll` bounds each wait on the socket so that cancellation is noticed; an
    /// idle engine otherwise waits indefinitely.
    pub fn run<K: ResultSink + ?Sized>(
        mut self,
        sink: &mut K,
        poll: Duration,
        shutdown: &Shutdown,
    ) -> ReceiveStats {
        info!("waiting for echo replies");
        let mut buf = [0u8; RECV_BYTE_SIZE];

        while !shutdown.is_cancelled() {
            let datagram = match self.socket.recv_datagram(&mut buf, poll) {
                Ok(Some(datagram)) => datagram,
                Ok(None) => continue,
                Err(err) => {
                    warn!("{err}");
                    self.stats.recv_errors += 1;
                    continue;
                }
            };
            let len = datagram.len.min(buf.len());
            if let Some(record) = self.correlate(&buf[..len], &datagram) {
                sink.publish(&record);
            }
        }

        self.stats
    }

    /// Match one datagram against our own probes.
    pub fn correlate(&mut self, raw: &[u8], datagram: &Datagram) -> Option<ResultRecord> {
        self.stats.received += 1;
        let Some(received) = datagram.timestamp else {
            warn!(from = ?datagram.from, "no timestamp provided by the kernel");
            self.stats.missing_timestamp += 1;
            return None;
        };
        match self.codec.parse_reply(raw, received) {
            Some(reply) => {
                debug!(source = %reply.source, rtt = %reply.rtt, "echo reply");
                self.stats.matched += 1;
                Some(ResultRecord::from(reply))
            }
            None => {
                self.stats.discarded += 1;
                None
            }
        }
    }
}
