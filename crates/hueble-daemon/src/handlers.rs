//! Command routing for the daemon.
//!
//! Every request kind maps to exactly one handler arm. Bulb commands run
//! through [`ConnectionManager::perform`] so an implicit connect (or a switch
//! to the requested bulb) and the command itself happen under a single hold
//! of the link. A blank `address` counts as no address.

use std::sync::Arc;

use hueble_core::{
    BulbCommand, BulbReply, ConnectOutcome, ConnectionManager, LinkError, PeripheralTransport,
};
use hueble_rpc::{NO_ADDRESS, Request, Response};
use hueble_types::{Brightness, PeripheralId};
use tracing::{debug, info, warn};

/// Result of routing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub response: Response,
    /// Stop the daemon once `response` has been written
    pub shutdown: bool,
}

impl From<Response> for Routed {
    fn from(response: Response) -> Self {
        Self {
            response,
            shutdown: false,
        }
    }
}

pub struct Router<T> {
    manager: Arc<ConnectionManager<T>>,
}

impl<T> Clone for Router<T> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<T: PeripheralTransport> Router<T> {
    pub fn new(manager: Arc<ConnectionManager<T>>) -> Self {
        Self { manager }
    }

    pub async fn route(&self, request: Request) -> Routed {
        debug!("Routing {} (address {:?})", request.name(), request.address());

        match request {
            Request::Ping => Response::ping(self.manager.is_connected().await).into(),
            Request::Connect { address } => self.connect(address).await.into(),
            Request::Disconnect => {
                self.manager.disconnect().await;
                Response::ok().into()
            }
            Request::On { address } => self.perform(BulbCommand::TurnOn, address).await.into(),
            Request::Off { address } => self.perform(BulbCommand::TurnOff, address).await.into(),
            Request::Brightness { level, address } => match Brightness::new(level) {
                Ok(brightness) => self
                    .perform(BulbCommand::SetBrightness(brightness), address)
                    .await
                    .into(),
                Err(e) => Response::error(LinkError::from(e).to_string()).into(),
            },
            Request::Status { address } => {
                self.perform(BulbCommand::ReadState, address).await.into()
            }
            Request::Toggle { address } => self.perform(BulbCommand::Toggle, address).await.into(),
            Request::Shutdown => {
                info!("Shutdown requested by client");
                Routed {
                    response: Response::message("Shutting down"),
                    shutdown: true,
                }
            }
            Request::Unknown => Response::unknown_command().into(),
        }
    }

    async fn connect(&self, address: Option<PeripheralId>) -> Response {
        let Some(identity) = explicit(address).or_else(|| self.manager.last_known_identity())
        else {
            return Response::error(NO_ADDRESS);
        };

        match self.manager.connect(identity.clone()).await {
            Ok(ConnectOutcome::Connected) => Response::message(format!("Connected to {identity}")),
            Ok(ConnectOutcome::AlreadyConnected) => {
                Response::message(format!("Already connected to {identity}"))
            }
            Err(e) => Response::error(format!("Connection failed: {e}")),
        }
    }

    async fn perform(&self, command: BulbCommand, address: Option<PeripheralId>) -> Response {
        match self.manager.perform(command, explicit(address)).await {
            Ok(BulbReply::Applied) => Response::ok(),
            Ok(BulbReply::Power(power)) => Response::power(power),
            Ok(BulbReply::State(state)) => Response::state(state),
            Err(LinkError::NotConnected) => Response::not_connected(),
            Err(e) => {
                warn!("{:?} failed: {}", command, e);
                match command {
                    BulbCommand::ReadState => {
                        Response::error(format!("Failed to read state: {e}"))
                    }
                    _ => Response::error(e.to_string()),
                }
            }
        }
    }
}

/// Requested address, treating an empty or whitespace-only one as absent
fn explicit(address: Option<PeripheralId>) -> Option<PeripheralId> {
    address.filter(|a| !a.as_str().trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hueble_core::config::MemoryStore;
    use hueble_core::link::fake::{FakeBulb, FakeTransport, WireCall};
    use hueble_rpc::NOT_CONNECTED;
    use hueble_types::Power;

    const BULB: &str = "AA:BB:CC:DD:EE:FF";
    const OTHER_BULB: &str = "11:22:33:44:55:66";

    fn router_with(store: MemoryStore) -> (Router<FakeTransport>, FakeBulb) {
        let (transport, bulb) = FakeTransport::new();
        let manager = Arc::new(ConnectionManager::new(transport, Arc::new(store)));
        (Router::new(manager), bulb)
    }

    fn router() -> (Router<FakeTransport>, FakeBulb) {
        router_with(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_ping_reports_link() {
        let (router, _bulb) = router();

        let routed = router.route(Request::Ping).await;

        assert_eq!(routed.response, Response::ping(false));
        assert!(!routed.shutdown);
    }

    #[tokio::test]
    async fn test_connect_without_any_address() {
        let (router, bulb) = router();

        let routed = router.route(Request::Connect { address: None }).await;

        assert_eq!(routed.response.error.as_deref(), Some(NO_ADDRESS));
        assert!(bulb.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_uses_stored_address() {
        let (router, bulb) = router_with(MemoryStore::with_identity(BULB));

        let routed = router.route(Request::Connect { address: None }).await;

        assert!(routed.response.ok);
        assert_eq!(
            routed.response.message.as_deref(),
            Some("Connected to AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(bulb.connected_to(), Some(PeripheralId::new(BULB)));
    }

    #[tokio::test]
    async fn test_connect_blank_address_uses_stored_address() {
        let (router, bulb) = router_with(MemoryStore::with_identity(BULB));

        for blank in ["", "  "] {
            let routed = router
                .route(Request::Connect {
                    address: Some(blank.into()),
                })
                .await;

            assert!(routed.response.ok);
            assert_eq!(bulb.connected_to(), Some(PeripheralId::new(BULB)));
        }
        assert_eq!(
            router.manager.last_known_identity(),
            Some(PeripheralId::new(BULB))
        );
    }

    #[tokio::test]
    async fn test_connect_blank_address_without_stored_address() {
        let (router, bulb) = router();

        let routed = router
            .route(Request::Connect {
                address: Some("".into()),
            })
            .await;

        assert_eq!(routed.response.error.as_deref(), Some(NO_ADDRESS));
        assert!(bulb.calls().is_empty());
    }

    #[tokio::test]
    async fn test_on_with_other_address_switches_bulb() {
        let (router, bulb) = router();
        router
            .route(Request::Connect {
                address: Some(BULB.into()),
            })
            .await;

        let routed = router
            .route(Request::On {
                address: Some(OTHER_BULB.into()),
            })
            .await;

        assert_eq!(routed.response, Response::ok());
        assert_eq!(bulb.connected_to(), Some(PeripheralId::new(OTHER_BULB)));
        assert_eq!(bulb.power(), Power::On);
    }

    #[tokio::test]
    async fn test_on_with_blank_address_uses_linked_bulb() {
        let (router, bulb) = router_with(MemoryStore::with_identity(BULB));

        let routed = router
            .route(Request::On {
                address: Some(" ".into()),
            })
            .await;

        assert_eq!(routed.response, Response::ok());
        assert_eq!(bulb.connected_to(), Some(PeripheralId::new(BULB)));
    }

    #[tokio::test]
    async fn test_connect_twice_reports_already_connected() {
        let (router, _bulb) = router();
        let request = Request::Connect {
            address: Some(BULB.into()),
        };

        router.route(request.clone()).await;
        let routed = router.route(request).await;

        assert_eq!(
            routed.response.message.as_deref(),
            Some("Already connected to AA:BB:CC:DD:EE:FF")
        );
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (router, bulb) = router();
        bulb.set_reachable(false);

        let routed = router
            .route(Request::Connect {
                address: Some(BULB.into()),
            })
            .await;

        assert!(!routed.response.ok);
        assert!(routed.response.error_message().starts_with("Connection failed"));
    }

    #[tokio::test]
    async fn test_bulb_commands_without_identity_are_not_connected() {
        let (router, bulb) = router();

        for request in [
            Request::On { address: None },
            Request::Off { address: None },
            Request::Brightness {
                level: 40,
                address: None,
            },
            Request::Status { address: None },
            Request::Toggle { address: None },
        ] {
            let routed = router.route(request).await;
            assert_eq!(routed.response.error.as_deref(), Some(NOT_CONNECTED));
        }
        assert!(bulb.calls().is_empty());
    }

    #[tokio::test]
    async fn test_on_connects_implicitly() {
        let (router, bulb) = router_with(MemoryStore::with_identity(BULB));

        let routed = router.route(Request::On { address: None }).await;

        assert_eq!(routed.response, Response::ok());
        assert_eq!(bulb.power(), Power::On);
    }

    #[tokio::test]
    async fn test_brightness_out_of_range_never_reaches_wire() {
        let (router, bulb) = router_with(MemoryStore::with_identity(BULB));

        for level in [0, 101, -5] {
            let routed = router
                .route(Request::Brightness {
                    level,
                    address: None,
                })
                .await;
            assert!(!routed.response.ok);
            assert!(routed.response.error_message().starts_with("Invalid argument"));
            assert!(routed.response.error_message().contains("between 1 and 100"));
        }
        assert!(bulb.calls().is_empty());
    }

    #[tokio::test]
    async fn test_status_and_toggle() {
        let (router, bulb) = router_with(MemoryStore::with_identity(BULB));
        bulb.set_brightness_raw(254);

        let routed = router.route(Request::Toggle { address: None }).await;
        assert_eq!(routed.response, Response::power(Power::On));

        let routed = router.route(Request::Status { address: None }).await;
        assert_eq!(routed.response.power, Some(Power::On));
        assert_eq!(routed.response.brightness, Some(Brightness::MAX));
    }

    #[tokio::test]
    async fn test_disconnect_is_always_ok() {
        let (router, bulb) = router();

        let routed = router.route(Request::Disconnect).await;

        assert_eq!(routed.response, Response::ok());
        assert_eq!(bulb.count(|c| matches!(c, WireCall::Disconnect)), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flags_stop() {
        let (router, _bulb) = router();

        let routed = router.route(Request::Shutdown).await;

        assert!(routed.shutdown);
        assert_eq!(routed.response.message.as_deref(), Some("Shutting down"));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (router, _bulb) = router();

        let routed = router.route(Request::Unknown).await;

        assert_eq!(routed.response, Response::unknown_command());
    }
}
