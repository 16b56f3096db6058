//! IPC protocol shared by the hueble daemon and its clients.
//!
//! The daemon listens on a loopback TCP port. A client opens a connection,
//! writes one JSON request line, reads one JSON response line, and the daemon
//! closes the connection.
//!
//! - [`protocol`]: `Request` (tagged by `cmd`) and `Response` (`{ok, ...}`)
//! - [`transport`]: newline-delimited JSON codec
//! - [`client`]: one-shot `DaemonClient`
//!
//! # Example
//!
//! ```no_run
//! use hueble_rpc::{DaemonClient, Request};
//!
//! # async fn example() -> Result<(), hueble_rpc::ClientError> {
//! let client = DaemonClient::new();
//! let response = client.send(Request::Ping).await?;
//! println!("connected: {:?}", response.connected);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{ClientError, DEFAULT_PORT, DaemonClient, daemon_addr};

pub use protocol::{
    DEFAULT_LEVEL, NO_ADDRESS, NOT_CONNECTED, Request, Response, UNKNOWN_COMMAND,
};

pub use transport::{ClientCodec, CodecError, LineCodec, MAX_LINE_LENGTH, ServerCodec};

pub use hueble_types::{Brightness, BulbState, PeripheralId, Power};
