use crate::bridge::feed::send_targets;
use crate::bridge::publisher::Subscription;

use anyhow::Result;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::info;

pub fn send(to: SocketAddr, targets: &[Ipv4Addr]) -> Result<()> {
    let sent = send_targets(to, targets)?;
    info!(%to, sent, "targets published");
    Ok(())
}

/// Print results from a daemon until it goes away or `count` have been seen.
pub fn watch(from: SocketAddr, count: Option<usize>) -> Result<()> {
    let subscription = Subscription::connect(from)?;
    info!(%from, "subscribed to results");

    for record in subscription.take(count.unwrap_or(usize::MAX)) {
        let record = record?;
        println!(
            "{} {} {}",
            record.ip, record.rtt.secs, record.rtt.micros
        );
    }

    Ok(())
}
