//! Hueble daemon entry point.
//!
//! Holds a persistent Bluetooth link to one Hue bulb and serves local clients
//! over line-delimited JSON on a loopback TCP port.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hueble_core::BleTransport;
use hueble_core::config::{ConfigStore, Directories, PidFile};
use hueble_daemon::logging::setup_logging;
use hueble_daemon::{Daemon, DaemonConfig, spawn_signal_handler};
use hueble_rpc::DEFAULT_PORT;
use tracing::info;

/// Hueble daemon - keeps a Hue bulb connected for fast local control
#[derive(Parser, Debug)]
#[command(name = "hueble-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Loopback TCP port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for the bulb when connecting
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    connect_timeout: u64,

    /// Seconds allowed for a single read or write to the bulb
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    operation_timeout: u64,

    /// Seconds a client may take to send its request
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    request_timeout: u64,

    /// Do not reconnect to the last-used bulb on start
    #[arg(long)]
    no_auto_connect: bool,
}

impl Args {
    fn config(&self) -> DaemonConfig {
        let mut config = DaemonConfig::default().with_port(self.port);
        config.request_timeout = Duration::from_secs(self.request_timeout);
        config.auto_connect = !self.no_auto_connect;
        config.manager.connect_timeout = Duration::from_secs(self.connect_timeout);
        config.manager.operation_timeout = Duration::from_secs(self.operation_timeout);
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging();

    info!("Starting hueble daemon...");

    let dirs = Directories::new()?;
    dirs.ensure_exists()
        .context("Failed to create config directories")?;

    let daemon = Daemon::new(
        args.config(),
        BleTransport::new(),
        Arc::new(ConfigStore::new(&dirs.config_file)),
        Arc::new(PidFile::new(&dirs.pid_file)),
    );

    let handle = daemon.start().await?;
    spawn_signal_handler(handle.stopper()).context("Failed to install signal handler")?;

    handle.wait().await?;

    info!("Hueble daemon stopped");
    Ok(())
}
