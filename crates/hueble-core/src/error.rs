use std::time::Duration;

use hueble_types::BrightnessOutOfRange;
use thiserror::Error;

/// Errors from config and liveness marker storage.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures at the connection manager boundary.
///
/// Transport implementations report through the same type so the manager can
/// tell an authorization failure (which triggers pairing) from everything else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Timed out after {}s", .0.as_secs_f32())]
    TransportTimeout(Duration),

    #[error("Peripheral unreachable: {0}")]
    TransportRefused(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Authorization required")]
    AuthorizationRequired,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection manager is closed")]
    Closed,

    #[error("{0}")]
    Unknown(String),
}

impl From<BrightnessOutOfRange> for LinkError {
    fn from(err: BrightnessOutOfRange) -> Self {
        LinkError::InvalidArgument(err.to_string())
    }
}
