//! Bluetooth LE transport for Hue bulbs
//!
//! Scans for the bulb by address, connects, and resolves the Hue light
//! service characteristics. Disconnects reported by the adapter are forwarded
//! through [`LinkEvents`].

use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic as GattCharacteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use hueble_types::{DiscoveredBulb, PeripheralId};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Characteristic, HUE_SERVICE_UUID, LinkEvents, PeripheralTransport};
use crate::LinkError;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Delay before re-reading after the OS bonding agent was triggered
const PAIRING_SETTLE: Duration = Duration::from_secs(2);

/// Markers of an ATT "insufficient authentication/encryption" failure across
/// BlueZ, CoreBluetooth and WinRT error texts
const AUTHORIZATION_MARKERS: [&str; 5] = [
    "insufficient encryption",
    "insufficient authentication",
    "notauthorized",
    "not authorized",
    "0x0f",
];

/// Whether a transport error text means the bulb wants to be paired first.
#[must_use]
pub fn requires_authorization(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    AUTHORIZATION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

fn link_error(err: btleplug::Error) -> LinkError {
    let text = err.to_string();
    if requires_authorization(&text) {
        return LinkError::AuthorizationRequired;
    }

    match err {
        btleplug::Error::PermissionDenied => LinkError::AuthorizationRequired,
        btleplug::Error::DeviceNotFound => LinkError::TransportRefused(text),
        btleplug::Error::NotConnected => LinkError::NotConnected,
        btleplug::Error::TimedOut(duration) => LinkError::TransportTimeout(duration),
        _ => LinkError::Unknown(text),
    }
}

/// Get the first Bluetooth adapter on the system
async fn default_adapter() -> Result<Adapter, LinkError> {
    let manager = Manager::new().await.map_err(link_error)?;
    let adapters = manager.adapters().await.map_err(link_error)?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| LinkError::TransportRefused("No Bluetooth adapter found".to_string()))
}

/// Scan for Hue bulbs for `duration`.
///
/// A device counts as a bulb if it advertises the Hue light service or its
/// name mentions "Hue".
///
/// # Errors
///
/// Returns an error if no adapter is available or scanning fails.
pub async fn scan(duration: Duration) -> Result<Vec<DiscoveredBulb>, LinkError> {
    let adapter = default_adapter().await?;

    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(link_error)?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await.map_err(link_error)?;
    let mut bulbs = Vec::new();

    for peripheral in peripherals {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };

        let advertises_hue = props.services.contains(&HUE_SERVICE_UUID);
        let named_hue = props
            .local_name
            .as_deref()
            .is_some_and(|name| name.contains("Hue"));

        if advertises_hue || named_hue {
            bulbs.push(DiscoveredBulb {
                address: PeripheralId::new(peripheral.address().to_string()),
                name: props
                    .local_name
                    .unwrap_or_else(|| "Unknown Hue Bulb".to_string()),
            });
        }
    }

    adapter.stop_scan().await.map_err(link_error)?;
    Ok(bulbs)
}

/// Scan until a peripheral with `identity` shows up or `timeout` passes
async fn find_peripheral(
    adapter: &Adapter,
    identity: &PeripheralId,
    timeout: Duration,
) -> Result<Peripheral, LinkError> {
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(link_error)?;

    let deadline = Instant::now() + timeout;
    let found = loop {
        let peripherals = adapter.peripherals().await.map_err(link_error)?;
        if let Some(peripheral) = peripherals
            .into_iter()
            .find(|p| identity.matches(&p.address().to_string()))
        {
            break Some(peripheral);
        }
        if Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
    };

    if let Err(e) = adapter.stop_scan().await {
        debug!("Failed to stop scan: {}", e);
    }

    found.ok_or_else(|| LinkError::TransportRefused(format!("{identity} not found")))
}

/// GATT handles resolved for one connection
struct Session {
    peripheral: Peripheral,
    power: GattCharacteristic,
    brightness: GattCharacteristic,
    watcher: JoinHandle<()>,
}

/// `btleplug`-backed transport
#[derive(Default)]
pub struct BleTransport {
    adapter: Option<Adapter>,
    session: Option<Session>,
}

impl BleTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&mut self) -> Result<Adapter, LinkError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let adapter = default_adapter().await?;
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    fn session(&self) -> Result<&Session, LinkError> {
        self.session.as_ref().ok_or(LinkError::NotConnected)
    }

    fn handle(&self, characteristic: Characteristic) -> Result<(&Peripheral, &GattCharacteristic), LinkError> {
        let session = self.session()?;
        let handle = match characteristic {
            Characteristic::Power => &session.power,
            Characteristic::Brightness => &session.brightness,
        };
        Ok((&session.peripheral, handle))
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    characteristic: Characteristic,
) -> Result<GattCharacteristic, LinkError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic.uuid())
        .ok_or_else(|| {
            LinkError::TransportRefused(format!("{characteristic:?} characteristic not found"))
        })
}

/// Forward the adapter's disconnect event for `peripheral` as `LinkEvent::Lost`
async fn watch_disconnect(
    adapter: &Adapter,
    peripheral: &Peripheral,
    events: LinkEvents,
) -> Result<JoinHandle<()>, LinkError> {
    let mut stream = adapter.events().await.map_err(link_error)?;
    let target = peripheral.id();

    Ok(tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            if let CentralEvent::DeviceDisconnected(id) = event
                && id == target
            {
                events.link_lost();
                break;
            }
        }
    }))
}

impl PeripheralTransport for BleTransport {
    async fn connect(
        &mut self,
        identity: &PeripheralId,
        timeout: Duration,
        events: LinkEvents,
    ) -> Result<(), LinkError> {
        if self.session.is_some() {
            self.disconnect().await?;
        }

        let adapter = self.adapter().await?;
        let peripheral = find_peripheral(&adapter, identity, timeout).await?;

        peripheral.connect().await.map_err(link_error)?;
        peripheral.discover_services().await.map_err(link_error)?;

        let resolved = find_characteristic(&peripheral, Characteristic::Power).and_then(|power| {
            find_characteristic(&peripheral, Characteristic::Brightness)
                .map(|brightness| (power, brightness))
        });
        let (power, brightness) = match resolved {
            Ok(handles) => handles,
            Err(e) => {
                let _ = peripheral.disconnect().await;
                return Err(e);
            }
        };

        let watcher = watch_disconnect(&adapter, &peripheral, events).await?;
        self.session = Some(Session {
            peripheral,
            power,
            brightness,
            watcher,
        });
        debug!("GATT session ready for {}", identity);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        // Stop forwarding first so our own disconnect is not reported as lost
        session.watcher.abort();

        if session.peripheral.is_connected().await.unwrap_or(false) {
            session
                .peripheral
                .disconnect()
                .await
                .map_err(link_error)?;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match &self.session {
            Some(session) => session.peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn read_characteristic(
        &mut self,
        characteristic: Characteristic,
    ) -> Result<Vec<u8>, LinkError> {
        let (peripheral, handle) = self.handle(characteristic)?;
        peripheral.read(handle).await.map_err(link_error)
    }

    async fn write_characteristic(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), LinkError> {
        let (peripheral, handle) = self.handle(characteristic)?;
        peripheral
            .write(handle, data, WriteType::WithResponse)
            .await
            .map_err(link_error)
    }

    /// `btleplug` exposes no bonding call; the platform agent bonds when an
    /// encrypted characteristic is touched. Give it time, then confirm with a
    /// single re-read.
    async fn pair(&mut self) -> Result<(), LinkError> {
        info!("Pairing required, waiting for the system to bond");
        tokio::time::sleep(PAIRING_SETTLE).await;

        let (peripheral, handle) = self.handle(Characteristic::Power)?;
        match peripheral.read(handle).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Bulb still refuses access after pairing: {}", e);
                Err(link_error(e))
            }
        }
    }
}
