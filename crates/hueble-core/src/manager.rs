//! Connection manager: sole owner of the peripheral link.
//!
//! Every wire operation runs while holding one async lock around the
//! transport, so operations from any number of callers never overlap. Link
//! state is published separately through a watch channel so that an
//! unsolicited disconnect is visible immediately, even while an operation is
//! still holding the lock.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hueble_types::{Brightness, BulbState, PeripheralId, Power};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use crate::LinkError;
use crate::config::IdentityStore;
use crate::link::{Characteristic, LinkEvent, LinkEvents, PeripheralTransport};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the link as seen by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    /// Peripheral of the current or most recent connection attempt
    pub identity: Option<PeripheralId>,
    /// Bumped on every connect and disconnect so late events from an old
    /// connection can be ignored
    generation: u64,
}

impl LinkStatus {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            identity: None,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// The requested peripheral was already linked; nothing touched the wire
    AlreadyConnected,
}

/// A bulb operation that needs a live link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulbCommand {
    TurnOn,
    TurnOff,
    SetBrightness(Brightness),
    ReadState,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulbReply {
    Applied,
    /// Power after a toggle
    Power(Power),
    State(BulbState),
}

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

pub struct ConnectionManager<T> {
    link: Mutex<T>,
    status: Arc<watch::Sender<LinkStatus>>,
    store: Arc<dyn IdentityStore>,
    config: ManagerConfig,
    closed: AtomicBool,
}

impl<T: PeripheralTransport> ConnectionManager<T> {
    pub fn new(transport: T, store: Arc<dyn IdentityStore>) -> Self {
        Self::with_config(transport, store, ManagerConfig::default())
    }

    pub fn with_config(transport: T, store: Arc<dyn IdentityStore>, config: ManagerConfig) -> Self {
        let (status, _) = watch::channel(LinkStatus::default());
        Self {
            link: Mutex::new(transport),
            status: Arc::new(status),
            store,
            config,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.status.borrow().state
    }

    /// Peripheral of the current or most recent connection attempt
    #[must_use]
    pub fn current_identity(&self) -> Option<PeripheralId> {
        self.status.borrow().identity.clone()
    }

    /// Identity to fall back on when a request names none: the one in use,
    /// else the persisted one.
    #[must_use]
    pub fn last_known_identity(&self) -> Option<PeripheralId> {
        self.current_identity()
            .or_else(|| self.store.load_last_identity())
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Connect to `identity`, replacing any link to a different peripheral.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, a timeout, or `Closed` after `close`.
    pub async fn connect(&self, identity: PeripheralId) -> Result<ConnectOutcome, LinkError> {
        let mut link = self.link.lock().await;
        self.connect_locked(&mut link, identity).await
    }

    /// Drop the link. Succeeds when already disconnected.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        self.disconnect_locked(&mut link).await;
    }

    /// Answers from local state when not connected, without waiting for an
    /// in-flight operation.
    pub async fn is_connected(&self) -> bool {
        if !self.status.borrow().is_connected() {
            return false;
        }
        let link = self.link.lock().await;
        self.link_alive(&link).await
    }

    /// # Errors
    ///
    /// Returns `NotConnected` without a live link, or the wire failure.
    pub async fn turn_on(&self) -> Result<(), LinkError> {
        self.perform(BulbCommand::TurnOn, None).await.map(|_| ())
    }

    /// # Errors
    ///
    /// Returns `NotConnected` without a live link, or the wire failure.
    pub async fn turn_off(&self) -> Result<(), LinkError> {
        self.perform(BulbCommand::TurnOff, None).await.map(|_| ())
    }

    /// # Errors
    ///
    /// Returns `NotConnected` without a live link, or the wire failure.
    pub async fn set_brightness(&self, brightness: Brightness) -> Result<(), LinkError> {
        self.perform(BulbCommand::SetBrightness(brightness), None)
            .await
            .map(|_| ())
    }

    /// # Errors
    ///
    /// Returns `NotConnected` without a live link, or the wire failure.
    pub async fn get_state(&self) -> Result<BulbState, LinkError> {
        match self.perform(BulbCommand::ReadState, None).await? {
            BulbReply::State(state) => Ok(state),
            reply => Err(unexpected(reply)),
        }
    }

    /// Flip power. The read and the write happen under one lock hold.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a live link, or the wire failure.
    pub async fn toggle(&self) -> Result<Power, LinkError> {
        match self.perform(BulbCommand::Toggle, None).await? {
            BulbReply::Power(power) => Ok(power),
            reply => Err(unexpected(reply)),
        }
    }

    /// Run `command` against `address`, or against the linked bulb when no
    /// address is given.
    ///
    /// An address naming a different bulb than the linked one switches the
    /// link first. With no address and no link, the last-known identity is
    /// connected. The implicit connect and the command share one lock hold,
    /// so no other caller can disconnect in between.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` when there is no link and none could be made,
    /// otherwise the wire failure.
    pub async fn perform(
        &self,
        command: BulbCommand,
        address: Option<PeripheralId>,
    ) -> Result<BulbReply, LinkError> {
        let mut link = self.link.lock().await;
        let alive = self.link_alive(&link).await;

        let target = match address {
            Some(requested) if alive && self.is_linked_to(&requested) => None,
            Some(requested) => Some(requested),
            None if alive => None,
            None => Some(
                self.last_known_identity()
                    .ok_or(LinkError::NotConnected)?,
            ),
        };

        if let Some(identity) = target
            && let Err(e) = self.connect_locked(&mut link, identity).await
        {
            debug!("Implicit connect failed: {}", e);
            return Err(match e {
                LinkError::Closed => LinkError::Closed,
                _ => LinkError::NotConnected,
            });
        }

        self.apply(&mut link, command).await
    }

    /// Whether the current link belongs to `identity`. Addresses compare
    /// without regard to hex case.
    fn is_linked_to(&self, identity: &PeripheralId) -> bool {
        self.status
            .borrow()
            .identity
            .as_ref()
            .is_some_and(|current| current.matches(identity.as_str()))
    }

    /// Disconnect and refuse any later connect.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut link = self.link.lock().await;
        self.disconnect_locked(&mut link).await;
    }

    async fn connect_locked(
        &self,
        link: &mut T,
        identity: PeripheralId,
    ) -> Result<ConnectOutcome, LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }

        let current = self.status();
        if current.is_connected() {
            if self.is_linked_to(&identity) && link.is_connected().await {
                debug!("Already connected to {}", identity);
                return Ok(ConnectOutcome::AlreadyConnected);
            }
            if let Some(previous) = &current.identity {
                info!("Switching from {} to {}", previous, identity);
            }
            self.disconnect_locked(link).await;
        }

        let generation = self.begin_connecting(&identity);
        info!("Connecting to {}", identity);

        if let Err(e) = self.establish(link, &identity, generation).await {
            warn!("Connection to {} failed: {}", identity, e);
            self.mark_disconnected(generation);
            if let Err(err) = link.disconnect().await {
                debug!("Cleanup after failed connect: {}", err);
            }
            return Err(e);
        }

        if !self.mark_connected(generation) {
            warn!("Link to {} dropped during connect", identity);
            if let Err(err) = link.disconnect().await {
                debug!("Cleanup after lost connect: {}", err);
            }
            return Err(LinkError::TransportRefused(
                "link lost during connect".to_string(),
            ));
        }

        info!("Connected to {}", identity);
        if let Err(e) = self.store.save_last_identity(&identity) {
            warn!("Failed to remember {}: {}", identity, e);
        }
        Ok(ConnectOutcome::Connected)
    }

    /// Open the link and prove it with a power read, pairing once if the bulb
    /// demands it.
    async fn establish(
        &self,
        link: &mut T,
        identity: &PeripheralId,
        generation: u64,
    ) -> Result<(), LinkError> {
        let (events, rx) = LinkEvents::channel();
        tokio::spawn(watch_link(rx, Arc::clone(&self.status), generation));

        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, link.connect(identity, timeout, events)).await {
            Ok(result) => result?,
            Err(_) => return Err(LinkError::TransportTimeout(timeout)),
        }

        if !link.is_connected().await {
            return Err(LinkError::TransportRefused(format!(
                "{identity} did not stay connected"
            )));
        }

        match self
            .bounded(link.read_characteristic(Characteristic::Power))
            .await
        {
            Ok(_) => Ok(()),
            Err(LinkError::AuthorizationRequired) => {
                info!("{} requires pairing", identity);
                self.bounded(link.pair()).await
            }
            Err(e) => Err(e),
        }
    }

    async fn disconnect_locked(&self, link: &mut T) {
        let was_linked = self.status.send_if_modified(|status| {
            status.generation += 1;
            let changed = status.state != LinkState::Disconnected;
            status.state = LinkState::Disconnected;
            changed
        });

        if let Err(e) = self.bounded(link.disconnect()).await {
            warn!("Disconnect failed: {}", e);
        }
        if was_linked {
            info!("Disconnected");
        }
    }

    /// Whether the link is usable, correcting local state when the transport
    /// disagrees with it.
    async fn link_alive(&self, link: &T) -> bool {
        let status = self.status();
        if !status.is_connected() {
            return false;
        }
        if link.is_connected().await {
            return true;
        }
        if self.mark_disconnected(status.generation) {
            warn!("Transport reports the link gone");
        }
        false
    }

    async fn apply(&self, link: &mut T, command: BulbCommand) -> Result<BulbReply, LinkError> {
        match command {
            BulbCommand::TurnOn => {
                self.write(link, Characteristic::Power, Power::On.to_wire())
                    .await?;
                Ok(BulbReply::Applied)
            }
            BulbCommand::TurnOff => {
                self.write(link, Characteristic::Power, Power::Off.to_wire())
                    .await?;
                Ok(BulbReply::Applied)
            }
            BulbCommand::SetBrightness(brightness) => {
                self.write(link, Characteristic::Brightness, brightness.to_wire())
                    .await?;
                Ok(BulbReply::Applied)
            }
            BulbCommand::ReadState => {
                let power = Power::from_wire(&self.read(link, Characteristic::Power).await?);
                let raw = self.read(link, Characteristic::Brightness).await?;
                let brightness = Brightness::from_wire(raw.first().copied().unwrap_or_default());
                Ok(BulbReply::State(BulbState { power, brightness }))
            }
            BulbCommand::Toggle => {
                let current = Power::from_wire(&self.read(link, Characteristic::Power).await?);
                let next = current.toggled();
                self.write(link, Characteristic::Power, next.to_wire())
                    .await?;
                Ok(BulbReply::Power(next))
            }
        }
    }

    async fn read(&self, link: &mut T, characteristic: Characteristic) -> Result<Vec<u8>, LinkError> {
        self.bounded(link.read_characteristic(characteristic))
            .await
            .map_err(|e| self.wire_failure(characteristic, e))
    }

    async fn write(
        &self,
        link: &mut T,
        characteristic: Characteristic,
        value: u8,
    ) -> Result<(), LinkError> {
        self.bounded(link.write_characteristic(characteristic, &[value]))
            .await
            .map_err(|e| self.wire_failure(characteristic, e))
    }

    /// A failure against a link that has since gone away reads as
    /// `NotConnected`.
    fn wire_failure(&self, characteristic: Characteristic, err: LinkError) -> LinkError {
        warn!("{:?} operation failed: {}", characteristic, err);
        if self.status.borrow().is_connected() {
            err
        } else {
            LinkError::NotConnected
        }
    }

    async fn bounded<R>(
        &self,
        operation: impl Future<Output = Result<R, LinkError>>,
    ) -> Result<R, LinkError> {
        let timeout = self.config.operation_timeout;
        tokio::time::timeout(timeout, operation)
            .await
            .unwrap_or(Err(LinkError::TransportTimeout(timeout)))
    }

    fn begin_connecting(&self, identity: &PeripheralId) -> u64 {
        let mut generation = 0;
        self.status.send_modify(|status| {
            status.generation += 1;
            status.state = LinkState::Connecting;
            status.identity = Some(identity.clone());
            generation = status.generation;
        });
        generation
    }

    fn mark_connected(&self, generation: u64) -> bool {
        self.status.send_if_modified(|status| {
            if status.generation == generation && status.state == LinkState::Connecting {
                status.state = LinkState::Connected;
                true
            } else {
                false
            }
        })
    }

    fn mark_disconnected(&self, generation: u64) -> bool {
        mark_lost(&self.status, generation)
    }
}

fn mark_lost(status: &watch::Sender<LinkStatus>, generation: u64) -> bool {
    status.send_if_modified(|status| {
        if status.generation == generation && status.state != LinkState::Disconnected {
            status.state = LinkState::Disconnected;
            true
        } else {
            false
        }
    })
}

/// Flip state to `Disconnected` when the connection of `generation` reports
/// itself lost. Ends once the transport drops its `LinkEvents`.
async fn watch_link(
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    status: Arc<watch::Sender<LinkStatus>>,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Lost => {
                if mark_lost(&status, generation) {
                    warn!("Link lost unexpectedly");
                }
            }
        }
    }
}

fn unexpected(reply: BulbReply) -> LinkError {
    LinkError::Unknown(format!("unexpected reply {reply:?}"))
}
