//! Error types for the hueble daemon.

use std::net::SocketAddr;

/// Errors that can stop the daemon from starting or serving
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config or liveness marker error
    #[error("Core error: {0}")]
    Core(#[from] hueble_core::Error),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] hueble_rpc::CodecError),

    /// Another daemon answers on the listening address
    #[error("Another daemon is already running on {0}")]
    AlreadyRunning(SocketAddr),

    /// The serving task ended abnormally
    #[error("Daemon task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
