use crate::bridge::feed::UdpTargetFeed;
use crate::bridge::publisher::TcpResultPublisher;
use crate::bridge::{LogSink, ResultSink, TargetFeed};
use crate::config::Config;
use crate::net::icmp::ProbeCodec;
use crate::net::{self, System};
use crate::probe::{self, Mode};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Probe every address arriving on the target feed and publish the results.
pub fn serve(cfg: &Config) -> Result<()> {
    let ctrl_c_events = ctrl_channel()?;
    let socket = open_socket(cfg)?;

    let feed = UdpTargetFeed::bind(cfg.targets_bind)?;
    let publisher = TcpResultPublisher::bind(cfg.results_bind)?;
    info!(
        targets = %feed.local_addr()?,
        results = %publisher.local_addr()?,
        "pinger daemon started"
    );

    start(socket, cfg, Mode::Feed(feed), publisher, &ctrl_c_events)
}

/// Probe `target` at a fixed cadence and log every response.
pub fn self_test(cfg: &Config, target: Ipv4Addr, interval: Duration) -> Result<()> {
    let ctrl_c_events = ctrl_channel()?;
    let socket = open_socket(cfg)?;
    info!(%target, "pinger self test started");

    start::<UdpTargetFeed, _>(
        socket,
        cfg,
        Mode::Fixed { target, interval },
        LogSink,
        &ctrl_c_events,
    )
}

fn open_socket(cfg: &Config) -> Result<Arc<net::rawsock::RawSocket>> {
    let socket = net::acquire(&mut System, cfg.uid, cfg.gid)
        .context("raw ICMP socket setup failed, are we running as root?")?;
    Ok(Arc::new(socket))
}

fn start<F, K>(
    socket: Arc<net::rawsock::RawSocket>,
    cfg: &Config,
    mode: Mode<F>,
    sink: K,
    stop: &Receiver<()>,
) -> Result<()>
where
    F: TargetFeed + 'static,
    K: ResultSink + 'static,
{
    let codec = ProbeCodec::new(cfg.magic, cfg.ttl);
    probe::run(socket, codec, mode, sink, cfg.poll_interval, stop)?;
    Ok(())
}

fn ctrl_channel() -> Result<Receiver<()>, ctrlc::Error> {
    let (sender, receiver) = bounded(100);
    ctrlc::set_handler(move || {
        let _ = sender.try_send(());
    })?;

    Ok(receiver)
}
