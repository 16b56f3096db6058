//! Hueble daemon library: command routing, the TCP session server, and the
//! daemon lifecycle.
//!
//! The daemon owns one [`ConnectionManager`](hueble_core::ConnectionManager)
//! and shares it between every client connection.

pub mod daemon;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod server;
pub mod signals;
pub(crate) mod session;

pub use daemon::{
    DEFAULT_DRAIN_TIMEOUT, Daemon, DaemonConfig, DaemonHandle, DaemonPhase,
};
pub use error::{DaemonError, Result};
pub use handlers::{Routed, Router};
pub use server::{DEFAULT_REQUEST_TIMEOUT, Server};
pub use signals::spawn_signal_handler;
pub use session::{SessionId, SessionPhase};
