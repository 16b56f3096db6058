//! TCP session server for the hueble daemon.
//!
//! Each accepted connection carries exactly one newline-terminated JSON
//! request and receives at most one response line before the daemon closes
//! it. Sessions run as tasks in a `JoinSet` so shutdown can drain them.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use hueble_core::PeripheralTransport;
use hueble_rpc::{Response, ServerCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::handlers::{Routed, Router};
use crate::session::{Session, SessionPhase};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Server<T> {
    listener: TcpListener,
    router: Router<T>,
    request_timeout: Duration,
    stop: CancellationToken,
}

impl<T: PeripheralTransport> Server<T> {
    pub fn new(
        listener: TcpListener,
        router: Router<T>,
        request_timeout: Duration,
        stop: CancellationToken,
    ) -> Self {
        Self {
            listener,
            router,
            request_timeout,
            stop,
        }
    }

    /// Address the listener is bound to
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the stop token fires. Returns the sessions
    /// still in flight; the listener stays bound until `self` is dropped.
    pub async fn accept_until_stopped(&self) -> JoinSet<()> {
        let mut sessions: JoinSet<()> = JoinSet::new();

        info!("Ready to accept connections");
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let router = self.router.clone();
                            let stop = self.stop.clone();
                            let timeout = self.request_timeout;
                            sessions.spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, Some(peer), router, timeout, stop).await
                                {
                                    warn!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                () = self.stop.cancelled() => {
                    info!("Stop requested, no longer accepting connections");
                    break;
                }
            }
        }

        sessions
    }
}

/// Wait up to `timeout` for in-flight sessions, then abort the rest.
pub async fn drain(mut sessions: JoinSet<()>, timeout: Duration) {
    if sessions.is_empty() {
        return;
    }

    info!("Waiting for {} in-flight session(s)", sessions.len());
    let drained = tokio::time::timeout(timeout, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "Drain timed out after {:?}, aborting {} session(s)",
            timeout,
            sessions.len()
        );
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}

/// Serve one request on `stream`.
///
/// A read timeout or EOF before a full request closes the connection without
/// a response. The socket is dropped on every return path.
pub async fn handle_connection<T: PeripheralTransport>(
    stream: TcpStream,
    peer: Option<SocketAddr>,
    router: Router<T>,
    request_timeout: Duration,
    stop: CancellationToken,
) -> Result<()> {
    let mut session = Session::new(peer);
    let mut framed = Framed::new(stream, ServerCodec::new());

    let read = tokio::time::timeout(request_timeout, framed.next()).await;
    let routed = match read {
        Err(_) => {
            debug!("[{}] No request within {:?}", session.id, request_timeout);
            session.advance(SessionPhase::Closed);
            return Ok(());
        }
        Ok(None) => {
            debug!("[{}] Closed before sending a request", session.id);
            session.advance(SessionPhase::Closed);
            return Ok(());
        }
        Ok(Some(Err(e))) if e.is_malformed() => {
            debug!("[{}] Malformed request: {}", session.id, e);
            Routed::from(Response::error(format!("Invalid request: {e}")))
        }
        Ok(Some(Err(e))) => {
            session.advance(SessionPhase::Closed);
            return Err(e.into());
        }
        Ok(Some(Ok(request))) => {
            session.advance(SessionPhase::Dispatching);
            dispatch(&session, &router, request).await
        }
    };

    session.advance(SessionPhase::Responding);
    let sent = framed.send(routed.response).await;
    session.advance(SessionPhase::Closed);
    drop(framed);

    if routed.shutdown {
        stop.cancel();
    }

    sent?;
    Ok(())
}

/// Route under a panic guard so a failing handler still yields a response.
async fn dispatch<T: PeripheralTransport>(
    session: &Session,
    router: &Router<T>,
    request: hueble_rpc::Request,
) -> Routed {
    match AssertUnwindSafe(router.route(request)).catch_unwind().await {
        Ok(routed) => routed,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(
                "[{}] Handler for {} panicked: {}",
                session.id,
                session.peer_label(),
                reason
            );
            Routed::from(Response::error(format!("Internal error: {reason}")))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
