use crate::bridge::{TargetFeed, MAX_TARGET_BYTE_SIZE};
use crate::error::{Error, Result};

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, instrument};

/// Room for an oversized message to be seen, and rejected, as such.
const RECV_BYTE_SIZE: usize = 64;

/// The inbound target feed: every datagram received on the bound endpoint is one
/// target message, from any sender.
#[derive(Debug)]
pub struct UdpTargetFeed {
    socket: UdpSocket,
}

impl UdpTargetFeed {
    #[instrument(level = "debug")]
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|err| Error::Bind(err, addr))?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl TargetFeed for UdpTargetFeed {
    fn next_target(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        // a zero timeout would block forever
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut buf = [0u8; RECV_BYTE_SIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                debug!(%from, len, "target message");
                Ok(Some(buf[..len].to_vec()))
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Publish `targets` to the inbound feed of the daemon at `addr`, one message each.
pub fn send_targets(addr: SocketAddr, targets: &[Ipv4Addr]) -> Result<usize> {
    let local: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).map_err(|err| Error::Bind(err, local))?;
    let mut sent = 0;
    for target in targets {
        let msg = target.to_string();
        debug_assert!(msg.len() <= MAX_TARGET_BYTE_SIZE);
        socket.send_to(msg.as_bytes(), addr)?;
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::parse_target;

    fn loopback_feed() -> (UdpTargetFeed, SocketAddr) {
        let feed = UdpTargetFeed::bind((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
        let addr = feed.local_addr().unwrap();
        (feed, addr)
    }

    #[test]
    fn idle_feed_times_out() {
        let (mut feed, _) = loopback_feed();
        assert_eq!(feed.next_target(Duration::from_millis(20)).unwrap(), None);
    }

    #[test]
    fn receives_published_targets_in_order() {
        let (mut feed, addr) = loopback_feed();
        let targets = [Ipv4Addr::new(203, 0, 113, 7), Ipv4Addr::new(198, 51, 100, 5)];
        assert_eq!(send_targets(addr, &targets).unwrap(), 2);

        for expected in targets {
            let msg = feed
                .next_target(Duration::from_secs(2))
                .unwrap()
                .expect("message");
            assert_eq!(parse_target(&msg).unwrap(), expected);
        }
    }

    #[test]
    fn oversized_message_is_delivered_whole() {
        let (mut feed, addr) = loopback_feed();
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender.send_to(b"192.168.100.100.1", addr).unwrap();
        let msg = feed.next_target(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(msg.len(), 17);
        assert!(parse_target(&msg).is_err());
    }
}
