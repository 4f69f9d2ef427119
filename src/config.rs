use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// The default value embedded in every probe payload.
pub const DEFAULT_MAGIC: u32 = 0xc001_c0de;

/// The default TTL of outgoing probes.
pub const DEFAULT_TTL: u8 = 128;

/// The default endpoint the inbound target feed is bound to.
pub const DEFAULT_TARGETS_BIND: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5560));

/// The default endpoint the outbound result publisher is bound to.
pub const DEFAULT_RESULTS_BIND: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5561));

/// The `nobody` user and group.
pub const DEFAULT_UNPRIVILEGED_ID: u32 = 65534;

/// How often blocked loops wake up to observe cancellation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The cadence of the fixed-target self-test.
pub const DEFAULT_SELF_TEST_INTERVAL: Duration = Duration::from_secs(1);

/// Runtime configuration of the prober.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    pub magic: u32,
    pub ttl: u8,
    pub targets_bind: SocketAddr,
    pub results_bind: SocketAddr,
    pub uid: u32,
    pub gid: u32,
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            magic: DEFAULT_MAGIC,
            ttl: DEFAULT_TTL,
            targets_bind: DEFAULT_TARGETS_BIND,
            results_bind: DEFAULT_RESULTS_BIND,
            uid: DEFAULT_UNPRIVILEGED_ID,
            gid: DEFAULT_UNPRIVILEGED_ID,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
