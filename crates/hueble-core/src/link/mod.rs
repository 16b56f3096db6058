//! Peripheral transport abstraction.
//!
//! A [`PeripheralTransport`] performs raw GATT I/O against one bulb. The
//! [`ConnectionManager`](crate::ConnectionManager) owns exactly one transport
//! and serializes every call into it.

pub mod ble;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;

use std::future::Future;
use std::time::Duration;

use hueble_types::PeripheralId;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::LinkError;

/// Philips Hue light control GATT service.
pub const HUE_SERVICE_UUID: Uuid = Uuid::from_u128(0x932c_32bd_0000_47a2_835a_a8d4_55b8_59dd);

const POWER_CHAR_UUID: Uuid = Uuid::from_u128(0x932c_32bd_0002_47a2_835a_a8d4_55b8_59dd);
const BRIGHTNESS_CHAR_UUID: Uuid = Uuid::from_u128(0x932c_32bd_0003_47a2_835a_a8d4_55b8_59dd);

/// Characteristics of the Hue service this crate touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// One byte: `0x01` on, `0x00` off
    Power,
    /// One byte in the firmware range `1..=254`
    Brightness,
}

impl Characteristic {
    #[must_use]
    pub fn uuid(self) -> Uuid {
        match self {
            Characteristic::Power => POWER_CHAR_UUID,
            Characteristic::Brightness => BRIGHTNESS_CHAR_UUID,
        }
    }
}

/// Unsolicited notifications from a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The peripheral dropped the connection without being asked to.
    Lost,
}

/// Handle a transport uses to report events for the connection it was given
/// to. Dropping every clone ends the manager's watch on that connection.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEvents {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn link_lost(&self) {
        // Receiver gone means nobody cares about this connection any more
        let _ = self.tx.send(LinkEvent::Lost);
    }
}

/// Raw wire access to a single peripheral.
///
/// Implementations need no internal locking; the manager never issues two
/// calls concurrently.
pub trait PeripheralTransport: Send + Sync + 'static {
    /// Establish the link. `events` must be kept for the life of the
    /// connection and used to report an unsolicited disconnect.
    fn connect(
        &mut self,
        identity: &PeripheralId,
        timeout: Duration,
        events: LinkEvents,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Tear the link down. Must succeed when already disconnected.
    fn disconnect(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn is_connected(&self) -> impl Future<Output = bool> + Send;

    fn read_characteristic(
        &mut self,
        characteristic: Characteristic,
    ) -> impl Future<Output = Result<Vec<u8>, LinkError>> + Send;

    fn write_characteristic(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Bond with the peripheral after a read reported `AuthorizationRequired`.
    fn pair(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;
}
