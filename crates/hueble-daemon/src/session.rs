//! Per-connection session bookkeeping.

use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a session is in its single request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingRequest,
    Dispatching,
    Responding,
    Closed,
}

/// One accepted connection. Carries exactly one request.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    peer: Option<SocketAddr>,
    phase: SessionPhase,
}

impl Session {
    #[must_use]
    pub fn new(peer: Option<SocketAddr>) -> Self {
        let session = Self {
            id: SessionId::new(),
            peer,
            phase: SessionPhase::AwaitingRequest,
        };
        debug!("[{}] Accepted connection from {}", session.id, session.peer_label());
        session
    }

    /// Peer address for log lines
    #[must_use]
    pub fn peer_label(&self) -> String {
        self.peer
            .map_or_else(|| "unknown peer".to_string(), |peer| peer.to_string())
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn advance(&mut self, phase: SessionPhase) {
        trace!("[{}] {:?} -> {:?}", self.id, self.phase, phase);
        self.phase = phase;
    }
}
