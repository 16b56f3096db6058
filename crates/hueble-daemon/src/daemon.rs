//! Daemon lifecycle: `Starting -> Serving -> Stopping -> Stopped`.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hueble_core::config::{IdentityStore, LivenessMarker};
use hueble_core::{ConnectionManager, ManagerConfig, PeripheralTransport};
use hueble_rpc::{DEFAULT_PORT, DaemonClient};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, Result};
use crate::handlers::Router;
use crate::server::{self, DEFAULT_REQUEST_TIMEOUT, Server};

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonPhase {
    Starting,
    Serving,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Loopback address to listen on; port 0 picks a free port
    pub addr: SocketAddr,
    /// How long a client may take to send its request line
    pub request_timeout: Duration,
    /// How long stopping waits for in-flight sessions before aborting them
    pub drain_timeout: Duration,
    /// Whether to reconnect to the last-known bulb on start
    pub auto_connect: bool,
    pub manager: ManagerConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            auto_connect: true,
            manager: ManagerConfig::default(),
        }
    }
}

impl DaemonConfig {
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }
}

pub struct Daemon<T> {
    config: DaemonConfig,
    manager: Arc<ConnectionManager<T>>,
    store: Arc<dyn IdentityStore>,
    marker: Arc<dyn LivenessMarker>,
    phase: watch::Sender<DaemonPhase>,
    stop: CancellationToken,
}

impl<T: PeripheralTransport> Daemon<T> {
    pub fn new(
        config: DaemonConfig,
        transport: T,
        store: Arc<dyn IdentityStore>,
        marker: Arc<dyn LivenessMarker>,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::with_config(
            transport,
            Arc::clone(&store),
            config.manager,
        ));
        let (phase, _) = watch::channel(DaemonPhase::Starting);

        Self {
            config,
            manager,
            store,
            marker,
            phase,
            stop: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager<T>> {
        &self.manager
    }

    /// Bind, write the liveness marker, and start serving in the background.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if another daemon answers on the address, or
    /// an error if binding or writing the marker fails.
    pub async fn start(self) -> Result<DaemonHandle> {
        if self.config.addr.port() != 0
            && DaemonClient::with_addr(self.config.addr)
                .is_daemon_running()
                .await
        {
            return Err(DaemonError::AlreadyRunning(self.config.addr));
        }

        let listener = TcpListener::bind(self.config.addr).await?;
        let addr = listener.local_addr()?;
        info!("Daemon listening on {}", addr);

        if self.marker.exists() {
            debug!("Replacing stale liveness marker");
        }
        self.marker.write(&std::process::id().to_string())?;

        if self.config.auto_connect {
            self.spawn_auto_connect();
        }

        let phase = self.phase.subscribe();
        let stop = self.stop.clone();
        self.phase.send_replace(DaemonPhase::Serving);

        let task = tokio::spawn(self.serve(listener));

        Ok(DaemonHandle {
            addr,
            stop,
            phase,
            task,
        })
    }

    /// Reconnect to the last-known bulb without holding up serving
    fn spawn_auto_connect(&self) {
        let Some(identity) = self.store.load_last_identity() else {
            debug!("No last-known bulb, skipping auto-connect");
            return;
        };

        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            info!("Auto-connecting to {}", identity);
            if let Err(e) = manager.connect(identity).await {
                warn!("Auto-connect failed: {}", e);
            }
        });
    }

    async fn serve(self, listener: TcpListener) -> Result<()> {
        let server = Server::new(
            listener,
            Router::new(Arc::clone(&self.manager)),
            self.config.request_timeout,
            self.stop.clone(),
        );

        let sessions = server.accept_until_stopped().await;

        self.phase.send_replace(DaemonPhase::Stopping);
        info!("Stopping");

        self.manager.close().await;
        drop(server);
        server::drain(sessions, self.config.drain_timeout).await;

        let removed = self.marker.remove();
        self.phase.send_replace(DaemonPhase::Stopped);
        info!("Stopped");

        removed.map_err(DaemonError::from)
    }
}

/// Control handle for a started daemon
#[derive(Debug)]
pub struct DaemonHandle {
    addr: SocketAddr,
    stop: CancellationToken,
    phase: watch::Receiver<DaemonPhase>,
    task: JoinHandle<Result<()>>,
}

impl DaemonHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn phase(&self) -> DaemonPhase {
        *self.phase.borrow()
    }

    #[must_use]
    pub fn phases(&self) -> watch::Receiver<DaemonPhase> {
        self.phase.clone()
    }

    /// Token that stops the daemon when cancelled, for signal handlers
    #[must_use]
    pub fn stopper(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Request a stop. Repeated calls are harmless.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait until the daemon has fully stopped.
    ///
    /// # Errors
    ///
    /// Returns the error that ended serving, if any.
    pub async fn wait(self) -> Result<()> {
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();

        assert_eq!(config.addr.to_string(), "127.0.0.1:19847");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert!(config.auto_connect);
        assert_eq!(config.manager.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.manager.operation_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_with_port() {
        let config = DaemonConfig::default().with_port(0);
        assert_eq!(config.addr.port(), 0);
        assert!(config.addr.ip().is_loopback());
    }
}
