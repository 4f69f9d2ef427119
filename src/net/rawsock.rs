use crate::error::{Error, Result, SocketOperation};
use crate::net::cmsg::ControlMessages;
use crate::net::icmp::Timestamp;

use os_socketaddr::OsSocketAddr;
use tracing::{instrument, warn};

use libc::close;
use libc::{c_int, c_void, size_t, socklen_t};
use std::io;
use std::mem::size_of;
use std::net::SocketAddr;
use std::time::Duration;

/// Large enough for a timestamp and anything else the kernel may attach.
const CONTROL_BYTE_SIZE: usize = 512;

#[cfg(target_os = "linux")]
const SOL_RAW: c_int = 255;
#[cfg(target_os = "linux")]
const ICMP_FILTER: c_int = 1;
#[cfg(target_os = "linux")]
const ICMP_ECHO_REPLY: u32 = 0;

/// The `ICMP_FILTER` mask: a set bit blocks that ICMP type.
#[cfg(target_os = "linux")]
const fn echo_reply_filter() -> u32 {
    !(1 << ICMP_ECHO_REPLY)
}

/// A datagram read from the raw socket.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Datagram {
    pub len: usize,
    pub from: Option<SocketAddr>,
    /// The kernel receive time, absent if the kernel attached none.
    pub timestamp: Option<Timestamp>,
}

/// A raw `IPPROTO_ICMP` socket.
///
/// All operations take `&self` so one socket can be shared by the transmit and
/// receive threads; the kernel serialises concurrent use of the descriptor.
#[derive(Debug)]
pub struct RawSocket {
    sock: c_int,
}

impl RawSocket {
    #[cfg(target_family = "unix")]
    #[instrument(level = "debug")]
    pub fn new_icmp() -> Result<Self> {
        let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_ICMP) };
        if sock < 0 {
            return Err(Error::Socket(
                io::Error::last_os_error(),
                SocketOperation::NewSocket,
            ));
        }

        Ok(RawSocket { sock })
    }

    /// Ask the kernel to attach a receive timestamp to every datagram.
    pub fn set_timestamp(&self, enable: bool) -> Result<()> {
        self.set_option(
            libc::SOL_SOCKET,
            libc::SO_TIMESTAMP,
            &c_int::from(enable),
            SocketOperation::SetTimestamp,
        )
    }

    /// Send datagrams with a caller supplied IPv4 header.
    pub fn set_header_included(&self, enable: bool) -> Result<()> {
        self.set_option(
            libc::IPPROTO_IP,
            libc::IP_HDRINCL,
            &c_int::from(enable),
            SocketOperation::SetHeaderIncluded,
        )
    }

    /// Filter out every ICMP type except echo reply in the kernel.
    #[cfg(target_os = "linux")]
    pub fn set_echo_reply_filter(&self) -> Result<()> {
        self.set_option(
            SOL_RAW,
            ICMP_FILTER,
            &echo_reply_filter(),
            SocketOperation::SetIcmpFilter,
        )
    }

    /// `ICMP_FILTER` is Linux only; elsewhere every ICMP type is delivered.
    #[cfg(not(target_os = "linux"))]
    pub fn set_echo_reply_filter(&self) -> Result<()> {
        Ok(())
    }

    #[cfg(target_family = "unix")]
    pub fn sendto(&self, payload: &[u8], dst: SocketAddr) -> Result<usize> {
        let addr: OsSocketAddr = dst.into();
        let nb = unsafe {
            libc::sendto(
                self.sock,
                payload.as_ptr() as *const c_void,
                payload.len() as size_t,
                0,
                addr.as_ptr(),
                addr.len(),
            )
        };
        if nb < 0 {
            return Err(Error::Socket(
                io::Error::last_os_error(),
                SocketOperation::SendTo,
            ));
        }
        Ok(nb as usize)
    }

    /// Wait until a datagram can be read, or `timeout` passes.
    ///
    /// An interrupted wait is reported as not readable.
    #[cfg(target_family = "unix")]
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let mut fds = libc::pollfd {
            fd: self.sock,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
        let rc = unsafe { libc::poll(&mut fds, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(Error::Socket(err, SocketOperation::Poll));
        }
        Ok(rc > 0 && fds.revents & libc::POLLIN != 0)
    }

    /// Read one datagram into `payload` together with its ancillary data.
    #[cfg(target_family = "unix")]
    pub fn recvmsg(&self, payload: &mut [u8]) -> Result<Datagram> {
        let mut addr = OsSocketAddr::new();
        let mut control = [0u8; CONTROL_BYTE_SIZE];
        let mut entry = libc::iovec {
            iov_base: payload.as_mut_ptr() as *mut c_void,
            iov_len: payload.len(),
        };

        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_name = addr.as_mut_ptr() as *mut c_void;
        msg.msg_namelen = addr.capacity();
        msg.msg_iov = &mut entry;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = CONTROL_BYTE_SIZE as _;

        let nb = unsafe { libc::recvmsg(self.sock, &mut msg, 0) };
        if nb < 0 {
            return Err(Error::Socket(
                io::Error::last_os_error(),
                SocketOperation::RecvMsg,
            ));
        }

        let control_len = (msg.msg_controllen as usize).min(CONTROL_BYTE_SIZE);
        let timestamp = ControlMessages::new(&control[..control_len]).timestamp();

        Ok(Datagram {
            len: nb as usize,
            from: addr.into(),
            timestamp,
        })
    }

    fn set_option<T>(
        &self,
        level: c_int,
        name: c_int,
        value: &T,
        op: SocketOperation,
    ) -> Result<()> {
        let rc = unsafe {
            libc::setsockopt(
                self.sock,
                level,
                name,
                value as *const T as *const c_void,
                size_of::<T>() as socklen_t,
            )
        };
        if rc < 0 {
            return Err(Error::Socket(io::Error::last_os_error(), op));
        }
        Ok(())
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        let code = unsafe { close(self.sock) };
        if code < 0 {
            warn!(
                "fail to close the socket: {}",
                io::Error::last_os_error()
            );
        }
    }
}
