use crate::bridge::{parse_target, TargetFeed};
use crate::error::Error;
use crate::net::icmp::{ProbeCodec, Timestamp};
use crate::net::ProbeSocket;
use crate::shutdown::Shutdown;

use crossbeam_channel::{select, tick};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters kept by the transmit engine.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct TransmitStats {
    pub sent: u64,
    pub send_failures: u64,
    pub invalid_targets: u64,
}

/// Emits probes on the shared socket.
pub struct TransmitEngine<S: ?Sized> {
    socket: Arc<S>,
    codec: ProbeCodec,
    stats: TransmitStats,
}

impl<S: ProbeSocket + ?Sized> TransmitEngine<S> {
    pub fn new(socket: Arc<S>, codec: ProbeCodec) -> Self {
        Self {
            socket,
            codec,
            stats: TransmitStats::default(),
        }
    }

    /// Send one probe stamped with the current time. Failures are logged, not retried.
    pub fn send_probe(&mut self, target: Ipv4Addr) {
        let probe = self.codec.build_probe(target, Timestamp::now());
        match self.socket.send_probe(&probe, target) {
            Ok(()) => {
                debug!(%target, "probe sent");
                self.stats.sent += 1;
            }
            Err(err) => {
                warn!(%target, "fail to send probe: {err}");
                self.stats.send_failures += 1;
            }
        }
    }

    /// Probe `target` right away and then once every `interval`.
    pub fn run_fixed(
        mut self,
        target: Ipv4Addr,
        interval: Duration,
        shutdown: &Shutdown,
    ) -> TransmitStats {
        info!(%target, ?interval, "probing at a fixed cadence");
        let ticks = tick(interval);
        self.send_probe(target);

        loop {
            select! {
                recv(ticks) -> _ => self.send_probe(target),
                recv(shutdown.signal()) -> _ => break,
            }
        }

        self.stats
    }

    /// Probe every target that arrives on `feed` until cancelled or the feed closes.
    pub fn run_feed<F: TargetFeed + ?Sized>(
        mut self,
        feed: &mut F,
        poll: Duration,
        shutdown: &Shutdown,
    ) -> TransmitStats {
        info!("probing targets from the feed");
        while !shutdown.is_cancelled() {
            let msg = match feed.next_target(poll) {
                Ok(Some(msg)) => msg,
                Ok(None) => continue,
                Err(Error::FeedClosed) => {
                    info!("target feed closed");
                    break;
                }
                Err(err) => {
                    warn!("fail to read target: {err}");
                    continue;
                }
            };
            match parse_target(&msg) {
                Ok(target) => {
                    debug!(%target, "read address");
                    self.send_probe(target);
                }
                Err(err) => {
                    warn!("{err}");
                    self.stats.invalid_targets += 1;
                }
            }
        }

        self.stats
    }
}
