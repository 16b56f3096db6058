pub mod config;
pub mod link;
pub mod manager;

mod error;

#[cfg(test)]
mod tests;

pub use error::{Error, LinkError, Result};
pub use link::ble::{BleTransport, scan};
pub use link::{Characteristic, LinkEvent, LinkEvents, PeripheralTransport};
pub use manager::{
    BulbCommand, BulbReply, ConnectOutcome, ConnectionManager, LinkState, LinkStatus,
    ManagerConfig,
};

pub use hueble_types::*;
