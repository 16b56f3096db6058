//! Client helper for talking to the hueble daemon.
//!
//! Every call opens a fresh TCP connection, sends one request line and reads
//! one response line; the daemon closes the connection afterwards.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::protocol::{Request, Response};
use crate::transport::{ClientCodec, CodecError};

/// Well-known local port the daemon listens on.
pub const DEFAULT_PORT: u16 = 19847;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Loopback address of the daemon on `port`.
#[must_use]
pub fn daemon_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Errors that can occur with the daemon client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    NotRunning,

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// One-shot request client for the daemon
#[derive(Debug, Clone)]
pub struct DaemonClient {
    addr: SocketAddr,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl DaemonClient {
    /// Client for the daemon on the default port.
    #[must_use]
    pub fn new() -> Self {
        Self::with_port(DEFAULT_PORT)
    }

    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self::with_addr(daemon_addr(port))
    }

    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: CONNECT_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send one request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotRunning` if nothing listens on the port,
    /// `ClientError::Timeout` if connecting or waiting for the reply exceeds
    /// its bound, and `ClientError::ConnectionClosed` if the daemon hangs up
    /// without replying.
    pub async fn send(&self, request: Request) -> Result<Response, ClientError> {
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await
        {
            Err(_) => return Err(ClientError::Timeout),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(ClientError::NotRunning);
            }
            Ok(Err(e)) => return Err(ClientError::Io(e)),
            Ok(Ok(stream)) => stream,
        };

        let mut framed = Framed::new(stream, ClientCodec::new());
        debug!("Sending {} to {}", request.name(), self.addr);
        framed.send(request).await?;

        match tokio::time::timeout(self.response_timeout, framed.next()).await {
            Err(_) => Err(ClientError::Timeout),
            Ok(None) => Err(ClientError::ConnectionClosed),
            Ok(Some(result)) => Ok(result?),
        }
    }

    /// Like [`send`](Self::send), but folds transport failures into
    /// `{ok: false, error}` so callers handle a single shape.
    pub async fn request(&self, request: Request) -> Response {
        match self.send(request).await {
            Ok(response) => response,
            Err(e) => Response::error(e.to_string()),
        }
    }

    /// Probe the listening endpoint. This is the authoritative liveness check.
    pub async fn is_daemon_running(&self) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(self.addr)).await,
            Ok(Ok(_))
        )
    }
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ServerCodec;
    use tokio::net::TcpListener;

    async fn one_shot_server(reply: Option<Response>) -> SocketAddr {
        let listener = TcpListener::bind(daemon_addr(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, ServerCodec::new());
            let _request = framed.next().await;
            if let Some(reply) = reply {
                framed.send(reply).await.unwrap();
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let addr = one_shot_server(Some(Response::ping(true))).await;
        let client = DaemonClient::with_addr(addr);

        let response = client.send(Request::Ping).await.unwrap();

        assert_eq!(response, Response::ping(true));
    }

    #[tokio::test]
    async fn test_send_connection_closed_without_reply() {
        let addr = one_shot_server(None).await;
        let client = DaemonClient::with_addr(addr);

        let err = client.send(Request::Ping).await.unwrap_err();

        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_request_folds_refused_connection() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind(daemon_addr(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = DaemonClient::with_addr(addr);
        let response = client.request(Request::Ping).await;

        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("Daemon not running"));
        assert!(!client.is_daemon_running().await);
    }

    #[tokio::test]
    async fn test_is_daemon_running_with_listener() {
        let listener = TcpListener::bind(daemon_addr(0)).await.unwrap();
        let client = DaemonClient::with_addr(listener.local_addr().unwrap());

        assert!(client.is_daemon_running().await);
    }

    #[test]
    fn test_daemon_addr_is_loopback() {
        let addr = daemon_addr(DEFAULT_PORT);
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 19847);
    }
}
