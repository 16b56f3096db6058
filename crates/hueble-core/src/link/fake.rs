//! Scriptable in-memory transport.
//!
//! [`FakeTransport`] plays a single bulb. The paired [`FakeBulb`] handle lets a
//! test change how the bulb behaves, drop the link from the bulb's side, and
//! inspect every wire call with its begin and end so overlapping calls can be
//! detected.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hueble_types::{Brightness, PeripheralId, Power};

use super::{Characteristic, LinkEvents, PeripheralTransport};
use crate::LinkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCall {
    Connect(PeripheralId),
    Disconnect,
    Read(Characteristic),
    Write(Characteristic, Vec<u8>),
    Pair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEdge {
    Begin(WireCall),
    End(WireCall),
}

#[derive(Debug)]
struct BulbState {
    reachable: bool,
    connected: Option<PeripheralId>,
    events: Option<LinkEvents>,
    power: u8,
    brightness: u8,
    requires_pairing: bool,
    paired: bool,
    pairing_fails: bool,
    panics: bool,
    connect_delay: Duration,
    io_delay: Duration,
    calls: Vec<CallEdge>,
}

impl Default for BulbState {
    fn default() -> Self {
        Self {
            reachable: true,
            connected: None,
            events: None,
            power: Power::Off.to_wire(),
            brightness: 254,
            requires_pairing: false,
            paired: false,
            pairing_fails: false,
            panics: false,
            connect_delay: Duration::ZERO,
            io_delay: Duration::ZERO,
            calls: Vec::new(),
        }
    }
}

fn lock(state: &Mutex<BulbState>) -> MutexGuard<'_, BulbState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Test-side handle onto the simulated bulb
#[derive(Debug, Clone)]
pub struct FakeBulb {
    state: Arc<Mutex<BulbState>>,
}

impl FakeBulb {
    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).reachable = reachable;
    }

    /// How long `connect` takes before it resolves
    pub fn set_connect_delay(&self, delay: Duration) {
        lock(&self.state).connect_delay = delay;
    }

    /// How long each read, write and pair takes
    pub fn set_io_delay(&self, delay: Duration) {
        lock(&self.state).io_delay = delay;
    }

    /// Reads fail with `AuthorizationRequired` until `pair` succeeds
    pub fn require_pairing(&self) {
        let mut state = lock(&self.state);
        state.requires_pairing = true;
        state.paired = false;
    }

    pub fn fail_pairing(&self) {
        lock(&self.state).pairing_fails = true;
    }

    /// Make every later read and write panic
    pub fn panic_on_io(&self) {
        lock(&self.state).panics = true;
    }

    /// Simulate the bulb going out of range.
    pub fn drop_link(&self) {
        let events = {
            let mut state = lock(&self.state);
            state.connected = None;
            state.events.take()
        };
        if let Some(events) = events {
            events.link_lost();
        }
    }

    /// Lose the link without reporting it, so only polling the transport
    /// reveals it.
    pub fn sever_silently(&self) {
        lock(&self.state).connected = None;
    }

    pub fn set_power(&self, power: Power) {
        lock(&self.state).power = power.to_wire();
    }

    #[must_use]
    pub fn power(&self) -> Power {
        Power::from_wire(&[lock(&self.state).power])
    }

    pub fn set_brightness_raw(&self, raw: u8) {
        lock(&self.state).brightness = raw;
    }

    #[must_use]
    pub fn brightness_raw(&self) -> u8 {
        lock(&self.state).brightness
    }

    #[must_use]
    pub fn brightness(&self) -> Brightness {
        Brightness::from_wire(self.brightness_raw())
    }

    #[must_use]
    pub fn connected_to(&self) -> Option<PeripheralId> {
        lock(&self.state).connected.clone()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<CallEdge> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Number of completed calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&WireCall) -> bool) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|edge| matches!(edge, CallEdge::End(call) if predicate(call)))
            .count()
    }

    /// Whether any call began before the previous one ended
    #[must_use]
    pub fn saw_overlap(&self) -> bool {
        let mut open = 0usize;
        for edge in &lock(&self.state).calls {
            match edge {
                CallEdge::Begin(_) => {
                    open += 1;
                    if open > 1 {
                        return true;
                    }
                }
                CallEdge::End(_) => open = open.saturating_sub(1),
            }
        }
        false
    }
}

/// Transport side of the simulated bulb
#[derive(Debug)]
pub struct FakeTransport {
    state: Arc<Mutex<BulbState>>,
}

impl FakeTransport {
    #[must_use]
    pub fn new() -> (Self, FakeBulb) {
        let state = Arc::new(Mutex::new(BulbState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            FakeBulb { state },
        )
    }

    fn begin(&self, call: &WireCall) {
        lock(&self.state).calls.push(CallEdge::Begin(call.clone()));
    }

    fn end(&self, call: WireCall) {
        lock(&self.state).calls.push(CallEdge::End(call));
    }

    fn io_delay(&self) -> Duration {
        lock(&self.state).io_delay
    }

    fn check_link(&self) -> Result<(), LinkError> {
        let state = lock(&self.state);
        if state.panics {
            drop(state);
            panic!("fake bulb asked to panic");
        }
        if state.connected.is_none() {
            return Err(LinkError::NotConnected);
        }
        if state.requires_pairing && !state.paired {
            return Err(LinkError::AuthorizationRequired);
        }
        Ok(())
    }
}

impl PeripheralTransport for FakeTransport {
    async fn connect(
        &mut self,
        identity: &PeripheralId,
        _timeout: Duration,
        events: LinkEvents,
    ) -> Result<(), LinkError> {
        let call = WireCall::Connect(identity.clone());
        self.begin(&call);

        let delay = lock(&self.state).connect_delay;
        tokio::time::sleep(delay).await;

        let result = {
            let mut state = lock(&self.state);
            if state.reachable {
                state.connected = Some(identity.clone());
                state.events = Some(events);
                Ok(())
            } else {
                Err(LinkError::TransportRefused(format!("{identity} not found")))
            }
        };

        self.end(call);
        result
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.begin(&WireCall::Disconnect);
        {
            let mut state = lock(&self.state);
            state.connected = None;
            state.events = None;
        }
        self.end(WireCall::Disconnect);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        lock(&self.state).connected.is_some()
    }

    async fn read_characteristic(
        &mut self,
        characteristic: Characteristic,
    ) -> Result<Vec<u8>, LinkError> {
        let call = WireCall::Read(characteristic);
        self.begin(&call);
        tokio::time::sleep(self.io_delay()).await;

        let result = self.check_link().map(|()| {
            let state = lock(&self.state);
            match characteristic {
                Characteristic::Power => vec![state.power],
                Characteristic::Brightness => vec![state.brightness],
            }
        });

        self.end(call);
        result
    }

    async fn write_characteristic(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), LinkError> {
        let call = WireCall::Write(characteristic, data.to_vec());
        self.begin(&call);
        tokio::time::sleep(self.io_delay()).await;

        let result = self.check_link().map(|()| {
            let mut state = lock(&self.state);
            let value = data.first().copied().unwrap_or_default();
            match characteristic {
                Characteristic::Power => state.power = value,
                Characteristic::Brightness => state.brightness = value,
            }
        });

        self.end(call);
        result
    }

    async fn pair(&mut self) -> Result<(), LinkError> {
        self.begin(&WireCall::Pair);
        tokio::time::sleep(self.io_delay()).await;

        let result = {
            let mut state = lock(&self.state);
            if state.connected.is_none() {
                Err(LinkError::NotConnected)
            } else if state.pairing_fails {
                Err(LinkError::AuthorizationRequired)
            } else {
                state.paired = true;
                Ok(())
            }
        };

        self.end(WireCall::Pair);
        result
    }
}
