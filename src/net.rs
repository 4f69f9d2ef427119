pub mod cmsg;
pub mod icmp;
pub mod privilege;
pub mod rawsock;

use crate::error::{Error, Result, SocketOperation};
use rawsock::{Datagram, RawSocket};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::instrument;

/// The socket as seen by the transmit and receive engines.
#[cfg_attr(test, mockall::automock)]
pub trait ProbeSocket: Send + Sync {
    fn send_probe(&self, probe: &[u8], target: Ipv4Addr) -> Result<()>;
    /// Wait up to `timeout` for a datagram; `Ok(None)` if none arrived.
    fn recv_datagram(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<Datagram>>;
}

impl ProbeSocket for RawSocket {
    fn send_probe(&self, probe: &[u8], target: Ipv4Addr) -> Result<()> {
        let sent = self.sendto(probe, SocketAddr::new(IpAddr::V4(target), 0))?;
        if sent != probe.len() {
            return Err(Error::Socket(
                io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("sent {sent} of {} bytes", probe.len()),
                ),
                SocketOperation::SendTo,
            ));
        }
        Ok(())
    }

    fn recv_datagram(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<Datagram>> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }
        self.recvmsg(buf).map(Some)
    }
}

/// The privileged steps of bringing the prober up.
#[cfg_attr(test, mockall::automock(type Socket = u32;))]
pub trait Platform {
    type Socket;
    fn new_icmp_socket(&mut self) -> Result<Self::Socket>;
    fn set_timestamp(&mut self, socket: &Self::Socket) -> Result<()>;
    fn set_header_included(&mut self, socket: &Self::Socket) -> Result<()>;
    fn set_echo_reply_filter(&mut self, socket: &Self::Socket) -> Result<()>;
    fn drop_privileges(&mut self, uid: u32, gid: u32) -> Result<()>;
}

/// The host operating system.
#[derive(Debug, Default)]
pub struct System;

impl Platform for System {
    type Socket = RawSocket;

    fn new_icmp_socket(&mut self) -> Result<RawSocket> {
        RawSocket::new_icmp()
    }
    fn set_timestamp(&mut self, socket: &RawSocket) -> Result<()> {
        socket.set_timestamp(true)
    }
    fn set_header_included(&mut self, socket: &RawSocket) -> Result<()> {
        socket.set_header_included(true)
    }
    fn set_echo_reply_filter(&mut self, socket: &RawSocket) -> Result<()> {
        socket.set_echo_reply_filter()
    }
    fn drop_privileges(&mut self, uid: u32, gid: u32) -> Result<()> {
        privilege::drop_to(uid, gid)
    }
}

/// Open and configure the raw ICMP socket, then give up privileges.
///
/// Privileges are dropped only after every socket option is in place, and before
/// the caller gets to read anything from the network.
#[instrument(skip(platform), level = "debug")]
pub fn acquire<P: Platform>(platform: &mut P, uid: u32, gid: u32) -> Result<P::Socket> {
    let socket = platform.new_icmp_socket()?;
    platform.set_timestamp(&socket)?;
    platform.set_header_included(&socket)?;
    platform.set_echo_reply_filter(&socket)?;
    platform.drop_privileges(uid, gid)?;
    Ok(socket)
}
