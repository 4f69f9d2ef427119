pub mod receive;
pub mod transmit;

use crate::bridge::{ResultSink, TargetFeed};
use crate::net::icmp::ProbeCodec;
use crate::net::ProbeSocket;
use crate::shutdown::Shutdown;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, select, Receiver};
use receive::{ReceiveEngine, ReceiveStats};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use transmit::{TransmitEngine, TransmitStats};

/// Where the transmit engine takes its targets from.
pub enum Mode<F> {
    /// Probe one target at a steady cadence.
    Fixed { target: Ipv4Addr, interval: Duration },
    /// Probe each target delivered by the feed.
    Feed(F),
}

/// Run the transmit and receive engines on one shared socket until `stop` fires
/// or either engine exits, then cancel both and wait for them to unwind.
pub fn run<S, F, K>(
    socket: Arc<S>,
    codec: ProbeCodec,
    mode: Mode<F>,
    mut sink: K,
    poll: Duration,
    stop: &Receiver<()>,
) -> Result<(TransmitStats, ReceiveStats)>
where
    S: ProbeSocket + 'static,
    F: TargetFeed + 'static,
    K: ResultSink + 'static,
{
    let (trigger, shutdown) = Shutdown::channel();
    let (done_tx, done_rx) = bounded::<&'static str>(2);

    let transmit = {
        let engine = TransmitEngine::new(Arc::clone(&socket), codec);
        let shutdown = shutdown.clone();
        let done = done_tx.clone();
        thread::Builder::new()
            .name("transmit".to_string())
            .spawn(move || {
                let stats = match mode {
                    Mode::Fixed { target, interval } => {
                        engine.run_fixed(target, interval, &shutdown)
                    }
                    Mode::Feed(mut feed) => engine.run_feed(&mut feed, poll, &shutdown),
                };
                let _ = done.send("transmit");
                stats
            })?
    };

    let receive = {
        let engine = ReceiveEngine::new(socket, codec);
        let done = done_tx;
        thread::Builder::new()
            .name("receive".to_string())
            .spawn(move || {
                let stats = engine.run(&mut sink, poll, &shutdown);
                let _ = done.send("receive");
                stats
            })?
    };

    select! {
        recv(stop) -> _ => info!("shutting down"),
        recv(done_rx) -> engine => warn!("{} engine stopped, shutting down", engine.unwrap_or("an")),
    }
    trigger.cancel();

    let transmit = transmit
        .join()
        .map_err(|_| anyhow!("transmit engine panicked"))?;
    let receive = receive
        .join()
        .map_err(|_| anyhow!("receive engine panicked"))?;
    info!(
        sent = transmit.sent,
        send_failures = transmit.send_failures,
        invalid_targets = transmit.invalid_targets,
        "transmit engine stopped"
    );
    info!(
        received = receive.received,
        matched = receive.matched,
        discarded = receive.discarded,
        missing_timestamp = receive.missing_timestamp,
        recv_errors = receive.recv_errors,
        "receive engine stopped"
    );
    Ok((transmit, receive))
}
