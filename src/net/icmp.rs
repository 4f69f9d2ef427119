use std::fmt;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const IPV4_HDR_BYTE_SIZE: usize = 20;
pub const HDR_BYTE_SIZE: usize = 8;
pub const PAYLOAD_BYTE_SIZE: usize = 12;

/// The exact size of a probe on the wire, and of the echo reply it provokes.
pub const PROBE_BYTE_SIZE: usize = IPV4_HDR_BYTE_SIZE + HDR_BYTE_SIZE + PAYLOAD_BYTE_SIZE;

const ECHO_REQUEST_TYPE: u8 = 8;
const ECHO_REQUEST_CODE: u8 = 0;
#[cfg(test)]
const ECHO_REPLY_TYPE: u8 = 0;

const IPV4_VERSION_IHL: u8 = 0x45;
const IPPROTO_ICMP: u8 = 1;

// offsets into the full probe
const IP_TOTAL_LEN: usize = 2;
const IP_TTL: usize = 8;
const IP_PROTOCOL: usize = 9;
const IP_CHECKSUM: usize = 10;
const IP_SOURCE: usize = 12;
const IP_DESTINATION: usize = 16;
const ICMP: usize = IPV4_HDR_BYTE_SIZE;
const ICMP_CHECKSUM: usize = ICMP + 2;
const PAYLOAD: usize = ICMP + HDR_BYTE_SIZE;
const PAYLOAD_SECS: usize = PAYLOAD;
const PAYLOAD_MICROS: usize = PAYLOAD + 4;
const PAYLOAD_MAGIC: usize = PAYLOAD + 8;

const MICROS_PER_SEC: i64 = 1_000_000;

/// A wall clock instant with microsecond resolution, as carried in a probe payload.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Timestamp {
    pub secs: u32,
    pub micros: u32,
}

impl Timestamp {
    pub const fn new(secs: u32, micros: u32) -> Self {
        Self { secs, micros }
    }

    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: since_epoch.as_secs() as u32,
            micros: since_epoch.subsec_micros(),
        }
    }

    /// Whether the microseconds are within a second.
    pub const fn is_normalized(&self) -> bool {
        self.micros < MICROS_PER_SEC as u32
    }

    pub fn from_timeval(tv: &libc::timeval) -> Self {
        Self {
            secs: tv.tv_sec as u32,
            micros: tv.tv_usec as u32,
        }
    }

    /// The time elapsed from `earlier` to `self`, borrowing a second when the
    /// microsecond difference is negative.
    ///
    /// Returns `None` if `earlier` is after `self`.
    pub fn delta_since(self, earlier: Timestamp) -> Option<Rtt> {
        let mut secs = i64::from(self.secs) - i64::from(earlier.secs);
        let mut micros = i64::from(self.micros) - i64::from(earlier.micros);
        if micros < 0 {
            secs -= 1;
            micros += MICROS_PER_SEC;
        }
        if secs < 0 {
            return None;
        }
        Some(Rtt {
            secs: u32::try_from(secs).ok()?,
            micros: micros as u32,
        })
    }
}

/// A round trip time split into whole seconds and remaining microseconds.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Rtt {
    pub secs: u32,
    pub micros: u32,
}

impl Rtt {
    pub fn as_millis_f64(&self) -> f64 {
        f64::from(self.secs) * 1000.0 + f64::from(self.micros) / 1000.0
    }
}

impl fmt::Display for Rtt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} ms", self.as_millis_f64())
    }
}

/// A reply correlated with one of our own probes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ProbeReply {
    pub source: Ipv4Addr,
    pub rtt: Rtt,
}

/// Builds probes and recognises the echo replies they provoke.
///
/// Correlation is carried entirely in-band: the send time and `magic` travel in
/// the payload and come back in the echo reply.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ProbeCodec {
    magic: u32,
    ttl: u8,
}

impl ProbeCodec {
    pub const fn new(magic: u32, ttl: u8) -> Self {
        Self { magic, ttl }
    }

    /// Build a complete IPv4 + ICMP echo request to `target`.
    ///
    /// The source address is left unspecified for the kernel to fill in.
    pub fn build_probe(&self, target: Ipv4Addr, sent: Timestamp) -> [u8; PROBE_BYTE_SIZE] {
        let mut pck = [0u8; PROBE_BYTE_SIZE];

        pck[0] = IPV4_VERSION_IHL;
        put_u16(&mut pck, IP_TOTAL_LEN, PROBE_BYTE_SIZE as u16);
        pck[IP_TTL] = self.ttl;
        pck[IP_PROTOCOL] = IPPROTO_ICMP;
        pck[IP_DESTINATION..IP_DESTINATION + 4].copy_from_slice(&target.octets());

        pck[ICMP] = ECHO_REQUEST_TYPE;
        pck[ICMP + 1] = ECHO_REQUEST_CODE;
        put_u32(&mut pck, PAYLOAD_SECS, sent.secs);
        put_u32(&mut pck, PAYLOAD_MICROS, sent.micros);
        put_u32(&mut pck, PAYLOAD_MAGIC, self.magic);

        fill_checksums(&mut pck);
        pck
    }

    /// Correlate a datagram read from the raw socket with the probe that caused it.
    ///
    /// Anything that is not exactly probe sized or does not carry our magic is
    /// traffic from somebody else and yields `None`, as is a reply whose send or
    /// receive time has a microsecond field of a second or more.
    pub fn parse_reply(&self, raw: &[u8], received: Timestamp) -> Option<ProbeReply> {
        if raw.len() != PROBE_BYTE_SIZE {
            return None;
        }
        if get_u32(raw, PAYLOAD_MAGIC) != self.magic {
            return None;
        }
        let sent = Timestamp::new(get_u32(raw, PAYLOAD_SECS), get_u32(raw, PAYLOAD_MICROS));
        if !sent.is_normalized() || !received.is_normalized() {
            return None;
        }
        let rtt = received.delta_since(sent)?;
        let source = Ipv4Addr::new(
            raw[IP_SOURCE],
            raw[IP_SOURCE + 1],
            raw[IP_SOURCE + 2],
            raw[IP_SOURCE + 3],
        );
        Some(ProbeReply { source, rtt })
    }
}

/// The Internet checksum of `data`: the complement of the one's complement sum of
/// its big endian 16 bit words.
///
/// A trailing odd byte is padded with zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for w in data.chunks(2) {
        let word = match *w {
            [hi, lo] => u16::from_be_bytes([hi, lo]),
            [hi] => u16::from_be_bytes([hi, 0]),
            _ => 0,
        };

        sum += u32::from(word);

        let carry = (0xFFFF_0000 & sum) >> 16;
        sum &= 0x0000_FFFF;
        sum += carry;
    }

    let carry = (0xFFFF_0000 & sum) >> 16;
    sum &= 0x0000_FFFF;
    sum += carry;

    !(sum as u16)
}

fn fill_checksums(pck: &mut [u8; PROBE_BYTE_SIZE]) {
    put_u16(pck, ICMP_CHECKSUM, 0);
    let icmp = checksum(&pck[ICMP..]);
    put_u16(pck, ICMP_CHECKSUM, icmp);

    put_u16(pck, IP_CHECKSUM, 0);
    let ip = checksum(&pck[..IPV4_HDR_BYTE_SIZE]);
    put_u16(pck, IP_CHECKSUM, ip);
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Turn a probe into the echo reply its target would send back.
#[cfg(test)]
pub(crate) fn echo_reply_for(probe: &[u8; PROBE_BYTE_SIZE], local: Ipv4Addr) -> Vec<u8> {
    let mut reply = *probe;
    let target = [
        probe[IP_DESTINATION],
        probe[IP_DESTINATION + 1],
        probe[IP_DESTINATION + 2],
        probe[IP_DESTINATION + 3],
    ];
    reply[IP_SOURCE..IP_SOURCE + 4].copy_from_slice(&target);
    reply[IP_DESTINATION..IP_DESTINATION + 4].copy_from_slice(&local.octets());
    reply[IP_TTL] = 64;
    reply[ICMP] = ECHO_REPLY_TYPE;
    fill_checksums(&mut reply);
    reply.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const MAGIC: u32 = 0xc001_c0de;

    fn codec() -> ProbeCodec {
        ProbeCodec::new(MAGIC, 128)
    }

    #[test]
    fn checksum_known_echo_request() {
        let mut raw_pck: [u8; 40] = [
            0x08, 0x00, 0x00, 0x00, 0x00, 0x01, 0x10, 0x08, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66,
            0x67, 0x68, 0x69, 0x6a, 0x6b, 0x6c, 0x6d, 0x6e, 0x6f, 0x70, 0x71, 0x72, 0x73, 0x74,
            0x75, 0x76, 0x77, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69,
        ];
        assert_eq!(checksum(&raw_pck), 0x3d53);

        raw_pck[2..4].copy_from_slice(&0x3d53u16.to_be_bytes());
        assert_eq!(checksum(&raw_pck), 0);
    }

    #[test]
    fn checksum_known_ipv4_header() {
        let hdr: [u8; 20] = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(checksum(&hdr), 0xb861);
    }

    #[test_case(&[0x00, 0x00, 0x00, 0x00]; "all zero")]
    #[test_case(&[0xff, 0xff, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00]; "end around carry")]
    #[test_case(&[0x12, 0x34, 0x00, 0x00, 0xab, 0xcd, 0xef, 0x01, 0x99, 0x88]; "mixed words")]
    fn checksum_of_filled_buffer_is_zero(data: &[u8]) {
        let mut buf = data.to_vec();
        let sum = checksum(&buf);
        buf[2..4].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(checksum(&buf), 0);
    }

    #[test]
    fn checksum_odd_length_pads_with_zero() {
        assert_eq!(checksum(&[0x12, 0x34, 0x56]), checksum(&[0x12, 0x34, 0x56, 0x00]));
    }

    #[test]
    fn build_probe_layout() {
        let target = Ipv4Addr::new(198, 51, 100, 5);
        let pck = codec().build_probe(target, Timestamp::new(0x0102_0304, 0x0005_0607));

        assert_eq!(pck.len(), 40);
        assert_eq!(pck[0], 0x45);
        assert_eq!(&pck[2..4], &[0x00, 0x28]);
        assert_eq!(pck[8], 128);
        assert_eq!(pck[9], 1);
        assert_eq!(&pck[12..16], &[0, 0, 0, 0]);
        assert_eq!(&pck[16..20], &[198, 51, 100, 5]);
        assert_eq!(pck[20], 8);
        assert_eq!(pck[21], 0);
        assert_eq!(&pck[28..32], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&pck[32..36], &[0x00, 0x05, 0x06, 0x07]);
        assert_eq!(&pck[36..40], &[0xc0, 0x01, 0xc0, 0xde]);
    }

    #[test]
    fn build_probe_checksums_verify() {
        let pck = codec().build_probe(Ipv4Addr::new(10, 0, 0, 1), Timestamp::now());
        assert_eq!(checksum(&pck[..IPV4_HDR_BYTE_SIZE]), 0);
        assert_eq!(checksum(&pck[IPV4_HDR_BYTE_SIZE..]), 0);
    }

    #[test]
    fn build_probe_uses_configured_values() {
        let pck = ProbeCodec::new(0xdead_beef, 7).build_probe(Ipv4Addr::LOCALHOST, Timestamp::default());
        assert_eq!(pck[8], 7);
        assert_eq!(&pck[36..40], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn delta_with_microsecond_borrow() {
        let rtt = Timestamp::new(11, 100_000).delta_since(Timestamp::new(10, 900_000));
        assert_eq!(rtt, Some(Rtt { secs: 0, micros: 200_000 }));
    }

    #[test]
    fn delta_of_identical_timestamps_is_zero() {
        let now = Timestamp::new(1_700_000_000, 123_456);
        assert_eq!(now.delta_since(now), Some(Rtt { secs: 0, micros: 0 }));
    }

    #[test]
    fn delta_backwards_is_rejected() {
        assert_eq!(Timestamp::new(10, 0).delta_since(Timestamp::new(10, 1)), None);
        assert_eq!(Timestamp::new(9, 999_999).delta_since(Timestamp::new(10, 0)), None);
    }

    #[test]
    fn round_trip_through_echo_reply() {
        let target = Ipv4Addr::new(198, 51, 100, 5);
        let sent = Timestamp::new(1_700_000_000, 997_000);
        let probe = codec().build_probe(target, sent);
        let reply = echo_reply_for(&probe, Ipv4Addr::new(192, 0, 2, 1));

        let parsed = codec().parse_reply(&reply, Timestamp::new(1_700_000_001, 2_000));

        assert_eq!(
            parsed,
            Some(ProbeReply {
                source: target,
                rtt: Rtt { secs: 0, micros: 5000 },
            })
        );
    }

    #[test_case(0; "empty")]
    #[test_case(28; "headers only")]
    #[test_case(39; "one short")]
    #[test_case(41; "one long")]
    #[test_case(84; "default ping size")]
    fn parse_reply_rejects_wrong_length(len: usize) {
        let probe = codec().build_probe(Ipv4Addr::new(198, 51, 100, 5), Timestamp::new(10, 0));
        let mut raw = echo_reply_for(&probe, Ipv4Addr::LOCALHOST);
        raw.resize(len, 0);
        assert_eq!(codec().parse_reply(&raw, Timestamp::new(11, 0)), None);
    }

    #[test_case(0; "zero")]
    #[test_case(0xc001_c0df; "off by one")]
    #[test_case(0xdec0_01c0; "byte swapped")]
    fn parse_reply_rejects_foreign_magic(magic: u32) {
        let foreign = ProbeCodec::new(magic, 64);
        let probe = foreign.build_probe(Ipv4Addr::new(198, 51, 100, 5), Timestamp::new(10, 0));
        let raw = echo_reply_for(&probe, Ipv4Addr::LOCALHOST);
        assert_eq!(codec().parse_reply(&raw, Timestamp::new(11, 0)), None);
    }

    #[test_case(Timestamp::new(10, 1_000_000), Timestamp::new(11, 0); "sent micros of a second")]
    #[test_case(Timestamp::new(10, u32::MAX), Timestamp::new(5000, 100_000); "sent micros maxed")]
    #[test_case(Timestamp::new(10, 0), Timestamp::new(11, 1_000_000); "received micros of a second")]
    #[test_case(Timestamp::new(10, 0), Timestamp::new(11, u32::MAX); "received micros maxed")]
    fn parse_reply_rejects_out_of_range_micros(sent: Timestamp, received: Timestamp) {
        let probe = codec().build_probe(Ipv4Addr::new(198, 51, 100, 5), sent);
        let raw = echo_reply_for(&probe, Ipv4Addr::LOCALHOST);
        assert_eq!(codec().parse_reply(&raw, received), None);
    }

    #[test]
    fn parse_reply_accepts_last_microsecond() {
        let probe = codec().build_probe(Ipv4Addr::new(198, 51, 100, 5), Timestamp::new(10, 999_999));
        let raw = echo_reply_for(&probe, Ipv4Addr::LOCALHOST);
        let reply = codec().parse_reply(&raw, Timestamp::new(11, 999_999));
        assert_eq!(reply.map(|r| r.rtt), Some(Rtt { secs: 1, micros: 0 }));
    }

    #[test]
    fn parse_reply_uses_configured_magic() {
        let custom = ProbeCodec::new(0x1234_5678, 64);
        let probe = custom.build_probe(Ipv4Addr::new(203, 0, 113, 7), Timestamp::new(10, 0));
        let raw = echo_reply_for(&probe, Ipv4Addr::LOCALHOST);
        assert!(custom.parse_reply(&raw, Timestamp::new(10, 1)).is_some());
        assert_eq!(codec().parse_reply(&raw, Timestamp::new(10, 1)), None);
    }
}
