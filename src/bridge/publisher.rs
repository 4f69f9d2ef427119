use crate::bridge::{ResultRecord, ResultSink, RECORD_BYTE_SIZE};
use crate::error::{Error, Result};

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, instrument, trace, warn};

/// The outbound result feed: subscribers connect to the bound endpoint and receive
/// a stream of fixed size records.
///
/// The stream is raw 24 byte [`ResultRecord`] frames back to back, with no
/// envelope or handshake, so it is not compatible with ZeroMQ subscribers.
///
/// Publishing never blocks. A subscriber whose send buffer is full misses the
/// record; one that cannot take a whole record is disconnected, since a partial
/// write would break the framing of everything after it.
#[derive(Debug)]
pub struct TcpResultPublisher {
    listener: TcpListener,
    subscribers: Vec<(SocketAddr, TcpStream)>,
}

impl TcpResultPublisher {
    #[instrument(level = "debug")]
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|err| Error::Bind(err, addr))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            subscribers: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Take on every subscriber waiting to connect.
    pub fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!(%peer, "rejecting subscriber: {err}");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    self.subscribers.push((peer, stream));
                    debug!(%peer, subscribers = self.subscriber_count(), "subscriber connected");
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("accept failed: {err}");
                    break;
                }
            }
        }
    }
}

impl ResultSink for TcpResultPublisher {
    fn publish(&mut self, record: &ResultRecord) {
        self.accept_pending();
        let buf = record.encode();
        self.subscribers.retain_mut(|(peer, stream)| match stream.write(&buf) {
            Ok(RECORD_BYTE_SIZE) => true,
            Ok(n) => {
                debug!(%peer, "subscriber dropped after partial write of {n} bytes");
                false
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                trace!(%peer, %record, "result dropped, subscriber busy");
                true
            }
            Err(err) => {
                debug!(%peer, "subscriber dropped: {err}");
                false
            }
        });
    }
}

/// A connection to the result feed of a daemon.
#[derive(Debug)]
pub struct Subscription {
    stream: TcpStream,
}

impl Subscription {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|err| Error::Connect(err, addr))?;
        Ok(Self { stream })
    }
}

impl Iterator for Subscription {
    type Item = Result<ResultRecord>;

    /// Blocks until the next record; ends when the publisher goes away.
    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; RECORD_BYTE_SIZE];
        match self.stream.read_exact(&mut buf) {
            Ok(()) => Some(ResultRecord::decode(&buf)),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => None,
            Err(err) => Some(Err(err.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::icmp::Rtt;
    use std::net::Ipv4Addr;
    use std::thread;
    use std::time::{Duration, Instant};

    fn record(last: u8, micros: u32) -> ResultRecord {
        ResultRecord {
            ip: Ipv4Addr::new(192, 0, 2, last),
            rtt: Rtt { secs: 0, micros },
        }
    }

    fn wait_for_subscribers(publisher: &mut TcpResultPublisher, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while publisher.subscriber_count() < n && Instant::now() < deadline {
            publisher.accept_pending();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(publisher.subscriber_count(), n);
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let mut publisher = TcpResultPublisher::bind((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
        publisher.publish(&record(1, 10));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn fans_out_to_every_subscriber() {
        let mut publisher = TcpResultPublisher::bind((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
        let addr = publisher.local_addr().unwrap();
        let first = Subscription::connect(addr).unwrap();
        let second = Subscription::connect(addr).unwrap();
        wait_for_subscribers(&mut publisher, 2);

        publisher.publish(&record(1, 100));
        publisher.publish(&record(2, 200));

        for sub in [first, second] {
            let got: Vec<_> = sub.take(2).map(|r| r.unwrap()).collect();
            assert_eq!(got, vec![record(1, 100), record(2, 200)]);
        }
    }

    #[test]
    fn stream_is_bare_records() {
        let mut publisher = TcpResultPublisher::bind((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
        let addr = publisher.local_addr().unwrap();
        let mut raw = TcpStream::connect(addr).unwrap();
        wait_for_subscribers(&mut publisher, 1);

        publisher.publish(&record(5, 500));
        publisher.publish(&record(6, 600));
        drop(publisher);

        let mut wire = Vec::new();
        raw.read_to_end(&mut wire).unwrap();
        let mut expected = record(5, 500).encode().to_vec();
        expected.extend_from_slice(&record(6, 600).encode());
        assert_eq!(wire, expected);
    }

    #[test]
    fn closed_subscriber_is_removed() {
        let mut publisher = TcpResultPublisher::bind((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
        let addr = publisher.local_addr().unwrap();
        let sub = Subscription::connect(addr).unwrap();
        wait_for_subscribers(&mut publisher, 1);
        drop(sub);

        let deadline = Instant::now() + Duration::from_secs(2);
        while publisher.subscriber_count() > 0 && Instant::now() < deadline {
            publisher.publish(&record(3, 300));
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn subscription_ends_with_publisher() {
        let mut publisher = TcpResultPublisher::bind((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
        let addr = publisher.local_addr().unwrap();
        let mut sub = Subscription::connect(addr).unwrap();
        wait_for_subscribers(&mut publisher, 1);
        publisher.publish(&record(4, 400));
        drop(publisher);

        assert_eq!(sub.next().unwrap().unwrap(), record(4, 400));
        assert!(sub.next().is_none());
    }
}
