//! Request/response types for the daemon IPC protocol.
//!
//! Each request is a JSON object tagged by `cmd`; each response is a flat
//! object that always carries `ok` plus whichever result fields apply.

use hueble_types::{Brightness, BulbState, PeripheralId, Power};
use serde::{Deserialize, Serialize};

/// Error text for operations attempted without a live link.
pub const NOT_CONNECTED: &str = "Not connected";

/// Error text for a `cmd` outside the protocol vocabulary.
pub const UNKNOWN_COMMAND: &str = "Unknown command";

/// Error text for `connect` with neither an address nor a remembered one.
pub const NO_ADDRESS: &str = "No address specified";

/// Brightness used when a `brightness` request omits `level`.
pub const DEFAULT_LEVEL: i64 = 50;

fn default_level() -> i64 {
    DEFAULT_LEVEL
}

/// A single client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Request {
    Ping,
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<PeripheralId>,
    },
    Disconnect,
    On {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<PeripheralId>,
    },
    Off {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<PeripheralId>,
    },
    Brightness {
        /// Requested percentage; validated by the daemon, not the decoder.
        #[serde(default = "default_level")]
        level: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<PeripheralId>,
    },
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<PeripheralId>,
    },
    Toggle {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<PeripheralId>,
    },
    Shutdown,
    /// Any `cmd` not listed above.
    #[serde(other)]
    Unknown,
}

impl Request {
    /// Protocol name of the command, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Connect { .. } => "connect",
            Request::Disconnect => "disconnect",
            Request::On { .. } => "on",
            Request::Off { .. } => "off",
            Request::Brightness { .. } => "brightness",
            Request::Status { .. } => "status",
            Request::Toggle { .. } => "toggle",
            Request::Shutdown => "shutdown",
            Request::Unknown => "unknown",
        }
    }

    /// Explicit peripheral address carried by the request, if any.
    #[must_use]
    pub fn address(&self) -> Option<&PeripheralId> {
        match self {
            Request::Connect { address }
            | Request::On { address }
            | Request::Off { address }
            | Request::Brightness { address, .. }
            | Request::Status { address }
            | Request::Toggle { address } => address.as_ref(),
            Request::Ping | Request::Disconnect | Request::Shutdown | Request::Unknown => None,
        }
    }
}

/// Reply to a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<Power>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<Brightness>,
}

impl Response {
    /// Bare `{ok: true}`.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ping(connected: bool) -> Self {
        Self {
            ok: true,
            connected: Some(connected),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn state(state: BulbState) -> Self {
        Self {
            ok: true,
            power: Some(state.power),
            brightness: Some(state.brightness),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn power(power: Power) -> Self {
        Self {
            ok: true,
            power: Some(power),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn not_connected() -> Self {
        Self::error(NOT_CONNECTED)
    }

    #[must_use]
    pub fn unknown_command() -> Self {
        Self::error(UNKNOWN_COMMAND)
    }

    /// Bulb state carried by a successful `status` reply.
    #[must_use]
    pub fn bulb_state(&self) -> Option<BulbState> {
        Some(BulbState {
            power: self.power?,
            brightness: self.brightness?,
        })
    }

    /// Error text, or a generic fallback for a failed reply without one.
    #[must_use]
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }
}
