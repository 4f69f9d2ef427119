use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

mod bridge;
mod cmd;
mod config;
mod error;
mod net;
mod probe;
mod shutdown;

/// Stateless ICMP round trip time prober.
#[derive(Parser)]
#[command(name = "pingerd", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// tracing filter directives, overridden by `RUST_LOG`.
    #[arg(long, global = true, default_value = "info")]
    log_filter: String,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Command {
    /// Probe addresses from the target feed and publish the results.
    Daemon(cmd::Daemon),
    /// Probe a single host at a fixed cadence and log the results.
    SelfTest(cmd::SelfTest),
    /// Publish target addresses to a running daemon.
    Send(cmd::SendTargets),
    /// Print the results published by a running daemon.
    Watch(cmd::Watch),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Compact,
    Pretty,
    Full,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_logging(&cli.log_filter, cli.log_format);

    match cli.command {
        Command::Daemon(daemon) => daemon.exec(),
        Command::SelfTest(self_test) => self_test.exec(),
        Command::Send(send) => send.exec(),
        Command::Watch(watch) => watch.exec(),
    }
}

fn configure_logging(filter: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Full => builder.init(),
    }
}
