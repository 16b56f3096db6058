//! Hueble CLI
//!
//! Controls a Hue bulb over Bluetooth. Bulb commands go through the daemon
//! when it is running and fall back to a one-off connection otherwise.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hueble_core::config::{ConfigStore, Directories, IdentityStore, PidFile};
use hueble_core::{BleTransport, BulbCommand, BulbReply, ConnectionManager, LinkError};
use hueble_daemon::logging::{setup_cli_logging, setup_logging};
use hueble_daemon::{Daemon, DaemonConfig, spawn_signal_handler};
use hueble_rpc::{DEFAULT_PORT, DaemonClient, NO_ADDRESS, Request, Response};
use hueble_types::{Brightness, PeripheralId};
use tokio::time::sleep;
use tracing::debug;

const DAEMON_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Find a binary, preferring one next to the running executable
fn find_binary(name: &str) -> PathBuf {
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join(name);
        if sibling.exists() {
            return sibling;
        }
    }
    PathBuf::from(name)
}

/// Hueble - control a Philips Hue bulb over Bluetooth
#[derive(Parser)]
#[command(name = "hueble")]
#[command(version)]
#[command(after_help = "\
Examples:
  hueble scan                       Find nearby Hue bulbs
  hueble connect AA:BB:CC:DD:EE:FF  Connect and remember a bulb
  hueble on                         Turn the remembered bulb on
  hueble brightness 40              Set brightness to 40%
  hueble daemon start               Keep the bulb connected in the background
")]
struct Cli {
    /// Bulb address; defaults to the last one used
    #[arg(long, short, global = true)]
    address: Option<String>,

    /// Daemon port
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby Hue bulbs
    Scan {
        /// Seconds to scan for
        #[arg(long, short, default_value_t = 10)]
        timeout: u64,
    },

    /// Turn the bulb on
    On,

    /// Turn the bulb off
    Off,

    /// Flip the bulb's power
    Toggle,

    /// Set brightness as a percentage
    Brightness {
        /// Level from 1 to 100
        level: i64,
    },

    /// Show power and brightness
    Status,

    /// Connect to a bulb and remember it
    Connect {
        /// Bulb address; falls back to --address or the last one used
        address: Option<String>,
    },

    /// Drop the daemon's link to the bulb
    Disconnect,

    /// Daemon control
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Start the daemon
    Start {
        /// Run in this process instead of in the background
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the daemon
    Stop,

    /// Show whether the daemon is running and linked
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start { foreground: true }
        }
    ) {
        setup_logging();
    } else {
        setup_cli_logging();
    }

    let address = cli.address.map(PeripheralId::new);
    let client = DaemonClient::with_port(cli.port);

    match cli.command {
        Commands::Scan { timeout } => run_scan(Duration::from_secs(timeout)).await,
        Commands::On => run_bulb(&client, address, BulbCommand::TurnOn).await,
        Commands::Off => run_bulb(&client, address, BulbCommand::TurnOff).await,
        Commands::Toggle => run_bulb(&client, address, BulbCommand::Toggle).await,
        Commands::Brightness { level } => {
            let brightness = Brightness::new(level)?;
            run_bulb(&client, address, BulbCommand::SetBrightness(brightness)).await
        }
        Commands::Status => run_bulb(&client, address, BulbCommand::ReadState).await,
        Commands::Connect { address: positional } => {
            run_connect(&client, positional.map(PeripheralId::new).or(address)).await
        }
        Commands::Disconnect => run_disconnect(&client).await,
        Commands::Daemon { command } => match command {
            DaemonCommand::Start { foreground: true } => run_daemon_foreground(cli.port).await,
            DaemonCommand::Start { foreground: false } => run_daemon_start(&client).await,
            DaemonCommand::Stop => run_daemon_stop(&client).await,
            DaemonCommand::Status => run_daemon_status(&client).await,
        },
    }
}

async fn run_scan(duration: Duration) -> Result<()> {
    eprintln!("Scanning for {}s...", duration.as_secs());

    let bulbs = hueble_core::scan(duration)
        .await
        .context("Bluetooth scan failed")?;

    if bulbs.is_empty() {
        println!("No Hue bulbs found");
        return Ok(());
    }

    for bulb in bulbs {
        println!("{}  {}", bulb.address, bulb.name);
    }
    Ok(())
}

fn request_for(command: BulbCommand, address: Option<PeripheralId>) -> Request {
    match command {
        BulbCommand::TurnOn => Request::On { address },
        BulbCommand::TurnOff => Request::Off { address },
        BulbCommand::SetBrightness(level) => Request::Brightness {
            level: i64::from(level.percent()),
            address,
        },
        BulbCommand::ReadState => Request::Status { address },
        BulbCommand::Toggle => Request::Toggle { address },
    }
}

fn response_for(reply: BulbReply) -> Response {
    match reply {
        BulbReply::Applied => Response::ok(),
        BulbReply::Power(power) => Response::power(power),
        BulbReply::State(state) => Response::state(state),
    }
}

/// Human-readable line for a successful reply
fn describe(command: BulbCommand, response: &Response) -> String {
    if let Some(state) = response.bulb_state() {
        return format!("Power: {}\nBrightness: {}", state.power, state.brightness);
    }
    match command {
        BulbCommand::TurnOn => "Bulb on".to_string(),
        BulbCommand::TurnOff => "Bulb off".to_string(),
        BulbCommand::SetBrightness(level) => format!("Brightness set to {level}"),
        BulbCommand::Toggle => match response.power {
            Some(power) => format!("Bulb {power}"),
            None => "Toggled".to_string(),
        },
        BulbCommand::ReadState => "No state reported".to_string(),
    }
}

async fn run_bulb(
    client: &DaemonClient,
    address: Option<PeripheralId>,
    command: BulbCommand,
) -> Result<()> {
    let response = if client.is_daemon_running().await {
        debug!("Sending {:?} through the daemon", command);
        via_daemon(client, address, command).await?
    } else {
        debug!("Daemon not running, connecting directly");
        one_off(address, command).await?
    };

    if !response.ok {
        bail!("{}", response.error_message());
    }
    println!("{}", describe(command, &response));
    Ok(())
}

/// Connect through the daemon, then act
async fn via_daemon(
    client: &DaemonClient,
    address: Option<PeripheralId>,
    command: BulbCommand,
) -> Result<Response> {
    let connected = client
        .send(Request::Connect {
            address: address.clone(),
        })
        .await
        .context("Failed to reach daemon")?;
    if !connected.ok {
        bail!("{}", connected.error_message());
    }

    client
        .send(request_for(command, address))
        .await
        .context("Failed to reach daemon")
}

/// Connect, act and disconnect without the daemon
async fn one_off(address: Option<PeripheralId>, command: BulbCommand) -> Result<Response> {
    let store = config_store()?;
    let Some(identity) = address.or_else(|| store.load_last_identity()) else {
        bail!("{NO_ADDRESS}. Pass --address or run `hueble connect <address>` first");
    };

    let manager = ConnectionManager::new(BleTransport::new(), store);
    let result = match manager.connect(identity.clone()).await {
        Ok(_) => manager.perform(command, None).await,
        Err(e) => {
            manager.close().await;
            bail!("Connection to {identity} failed: {e}");
        }
    };
    manager.close().await;

    Ok(match result {
        Ok(reply) => response_for(reply),
        Err(LinkError::NotConnected) => Response::not_connected(),
        Err(e) => Response::error(e.to_string()),
    })
}

fn config_store() -> Result<Arc<dyn IdentityStore>> {
    let dirs = Directories::new()?;
    Ok(Arc::new(ConfigStore::new(dirs.config_file)))
}

async fn run_connect(client: &DaemonClient, address: Option<PeripheralId>) -> Result<()> {
    if client.is_daemon_running().await {
        let response = client
            .send(Request::Connect { address })
            .await
            .context("Failed to reach daemon")?;
        if !response.ok {
            bail!("{}", response.error_message());
        }
        println!("{}", response.message.as_deref().unwrap_or("Connected"));
        return Ok(());
    }

    let store = config_store()?;
    let Some(identity) = address.or_else(|| store.load_last_identity()) else {
        bail!("{NO_ADDRESS}");
    };

    // A direct connect verifies the bulb and records it as last-known
    let manager = ConnectionManager::new(BleTransport::new(), store);
    let result = manager.connect(identity.clone()).await;
    manager.close().await;
    result.with_context(|| format!("Connection to {identity} failed"))?;

    println!("Connected to {identity} (saved as default)");
    Ok(())
}

async fn run_disconnect(client: &DaemonClient) -> Result<()> {
    if !client.is_daemon_running().await {
        println!("Daemon not running, nothing to disconnect");
        return Ok(());
    }

    let response = client.send(Request::Disconnect).await?;
    if !response.ok {
        bail!("{}", response.error_message());
    }
    println!("Disconnected");
    Ok(())
}

/// Run the daemon in this process until a signal or a shutdown request
async fn run_daemon_foreground(port: u16) -> Result<()> {
    let dirs = Directories::new()?;
    dirs.ensure_exists()
        .context("Failed to create config directories")?;

    let daemon = Daemon::new(
        DaemonConfig::default().with_port(port),
        BleTransport::new(),
        Arc::new(ConfigStore::new(&dirs.config_file)),
        Arc::new(PidFile::new(&dirs.pid_file)),
    );

    let handle = daemon.start().await?;
    spawn_signal_handler(handle.stopper()).context("Failed to install signal handler")?;

    handle.wait().await?;
    Ok(())
}

/// Spawn the daemon binary in the background and wait for it to listen
async fn run_daemon_start(client: &DaemonClient) -> Result<()> {
    if client.is_daemon_running().await {
        println!("Daemon already running on {}", client.addr());
        return Ok(());
    }

    let daemon_binary = find_binary("hueble-daemon");
    Command::new(&daemon_binary)
        .arg("--port")
        .arg(client.addr().port().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| {
            format!(
                "Failed to spawn {}. Is it installed?",
                daemon_binary.display()
            )
        })?;

    if !wait_for_daemon(client, DAEMON_START_TIMEOUT).await {
        bail!(
            "Daemon failed to start within {} seconds",
            DAEMON_START_TIMEOUT.as_secs()
        );
    }
    println!("Daemon started on {}", client.addr());
    Ok(())
}

async fn wait_for_daemon(client: &DaemonClient, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    let poll_interval = Duration::from_millis(100);

    while start.elapsed() < timeout {
        if client.is_daemon_running().await {
            return true;
        }
        sleep(poll_interval).await;
    }

    false
}

async fn run_daemon_stop(client: &DaemonClient) -> Result<()> {
    if !client.is_daemon_running().await {
        println!("Daemon not running");
        return Ok(());
    }

    let response = client
        .send(Request::Shutdown)
        .await
        .context("Failed to send shutdown")?;
    println!(
        "{}",
        response.message.as_deref().unwrap_or("Shutdown requested")
    );
    Ok(())
}

async fn run_daemon_status(client: &DaemonClient) -> Result<()> {
    if !client.is_daemon_running().await {
        println!("Daemon not running");
        return Ok(());
    }

    let response = client.send(Request::Ping).await?;
    let link = if response.connected == Some(true) {
        "bulb connected"
    } else {
        "bulb not connected"
    };
    println!("Daemon running on {} ({link})", client.addr());
    Ok(())
}
