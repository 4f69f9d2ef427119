use crate::config::{
    Config, DEFAULT_MAGIC, DEFAULT_POLL_INTERVAL, DEFAULT_RESULTS_BIND,
    DEFAULT_SELF_TEST_INTERVAL, DEFAULT_TARGETS_BIND, DEFAULT_TTL, DEFAULT_UNPRIVILEGED_ID,
};

use anyhow::Result;
use clap::Args;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

mod client;
mod daemon;

/// Options shared by every mode that owns the raw socket.
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// value embedded in every probe to recognise its reply.
    #[arg(long, value_parser = parse_magic, default_value_t = DEFAULT_MAGIC)]
    magic: u32,
    /// TTL of outgoing probes.
    #[arg(long, default_value_t = DEFAULT_TTL)]
    ttl: u8,
    /// user to switch to once the raw socket is open.
    #[arg(long, default_value_t = DEFAULT_UNPRIVILEGED_ID)]
    uid: u32,
    /// group to switch to once the raw socket is open.
    #[arg(long, default_value_t = DEFAULT_UNPRIVILEGED_ID)]
    gid: u32,
    /// how often, in milliseconds, idle loops check for shutdown.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    poll_ms: u64,
}

impl ProbeArgs {
    fn config(&self) -> Config {
        Config {
            magic: self.magic,
            ttl: self.ttl,
            uid: self.uid,
            gid: self.gid,
            poll_interval: Duration::from_millis(self.poll_ms.max(1)),
            ..Config::default()
        }
    }
}

#[derive(Args)]
pub struct Daemon {
    #[command(flatten)]
    probe: ProbeArgs,
    /// endpoint receiving target addresses.
    #[arg(long, default_value_t = DEFAULT_TARGETS_BIND)]
    targets_bind: SocketAddr,
    /// endpoint publishing results.
    #[arg(long, default_value_t = DEFAULT_RESULTS_BIND)]
    results_bind: SocketAddr,
}

impl Daemon {
    pub fn exec(self) -> Result<()> {
        let cfg = Config {
            targets_bind: self.targets_bind,
            results_bind: self.results_bind,
            ..self.probe.config()
        };
        daemon::serve(&cfg)
    }
}

#[derive(Args)]
pub struct SelfTest {
    #[command(flatten)]
    probe: ProbeArgs,
    /// host to probe.
    #[arg(default_value_t = Ipv4Addr::LOCALHOST)]
    target: Ipv4Addr,
    /// milliseconds between probes.
    #[arg(long, default_value_t = DEFAULT_SELF_TEST_INTERVAL.as_millis() as u64)]
    interval_ms: u64,
}

impl SelfTest {
    pub fn exec(self) -> Result<()> {
        let interval = Duration::from_millis(self.interval_ms.max(1));
        daemon::self_test(&self.probe.config(), self.target, interval)
    }
}

#[derive(Args)]
pub struct SendTargets {
    /// inbound feed of the daemon.
    #[arg(long, default_value = "127.0.0.1:5560")]
    to: SocketAddr,
    /// addresses to probe.
    #[arg(required = true)]
    targets: Vec<Ipv4Addr>,
}

impl SendTargets {
    pub fn exec(self) -> Result<()> {
        client::send(self.to, &self.targets)
    }
}

#[derive(Args)]
pub struct Watch {
    /// result feed of the daemon.
    #[arg(long, default_value = "127.0.0.1:5561")]
    from: SocketAddr,
    /// stop after this many results.
    #[arg(long)]
    count: Option<usize>,
}

impl Watch {
    pub fn exec(self) -> Result<()> {
        client::watch(self.from, self.count)
    }
}

fn parse_magic(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("invalid magic {s:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("0xc001c0de", 0xc001_c0de; "hex")]
    #[test_case("0XFF", 0xff; "upper hex")]
    #[test_case("42", 42; "decimal")]
    fn magic_values(s: &str, expected: u32) {
        assert_eq!(parse_magic(s), Ok(expected));
    }

    #[test_case("0x"; "empty hex")]
    #[test_case("0x1_0000_0000"; "separators")]
    #[test_case("4294967296"; "overflow")]
    #[test_case("cafe"; "hex without prefix")]
    fn bad_magic_values(s: &str) {
        assert!(parse_magic(s).is_err());
    }
}
