//! A bounds checked cursor over the ancillary data filled in by `recvmsg`.
//!
//! The control buffer is a sequence of `cmsghdr` headers, each followed by its
//! payload and padded to the platform alignment. Rather than walking it with raw
//! pointer arithmetic, [`ControlMessages`] yields typed [`ControlMessage`] entries
//! and stops at the first header that does not fit in the buffer.

use crate::net::icmp::Timestamp;
use std::mem::size_of;

const HDR_SIZE: usize = size_of::<libc::cmsghdr>();

const fn align(len: usize) -> usize {
    let a = size_of::<usize>();
    (len + a - 1) & !(a - 1)
}

/// One entry of ancillary data.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ControlMessage<'a> {
    pub level: i32,
    pub kind: i32,
    pub data: &'a [u8],
}

impl<'a> ControlMessage<'a> {
    /// The kernel receive time, if this is an `SCM_TIMESTAMP` message.
    pub fn timestamp(&self) -> Option<Timestamp> {
        if self.level != libc::SOL_SOCKET || self.kind != libc::SCM_TIMESTAMP {
            return None;
        }
        if self.data.len() < size_of::<libc::timeval>() {
            return None;
        }
        // length checked above; the payload is not guaranteed to be aligned
        let tv = unsafe { std::ptr::read_unaligned(self.data.as_ptr().cast::<libc::timeval>()) };
        Some(Timestamp::from_timeval(&tv))
    }
}

/// Iterator over the entries of a control buffer.
#[derive(Debug, Clone)]
pub struct ControlMessages<'a> {
    buf: &'a [u8],
}

impl<'a> ControlMessages<'a> {
    /// `buf` must be trimmed to the `msg_controllen` reported by the kernel.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// The first kernel receive timestamp in the buffer.
    pub fn timestamp(mut self) -> Option<Timestamp> {
        self.find_map(|cmsg| cmsg.timestamp())
    }
}

impl<'a> Iterator for ControlMessages<'a> {
    type Item = ControlMessage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < HDR_SIZE {
            return None;
        }
        // length checked above; the header is not guaranteed to be aligned
        let hdr = unsafe { std::ptr::read_unaligned(self.buf.as_ptr().cast::<libc::cmsghdr>()) };
        let len = hdr.cmsg_len as usize;
        let data_start = align(HDR_SIZE);
        if len < data_start || len > self.buf.len() {
            self.buf = &[];
            return None;
        }
        let msg = ControlMessage {
            level: hdr.cmsg_level,
            kind: hdr.cmsg_type,
            data: &self.buf[data_start..len],
        };
        let advance = align(len).min(self.buf.len());
        self.buf = &self.buf[advance..];
        Some(msg)
    }
}
