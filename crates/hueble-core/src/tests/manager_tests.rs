//! Tests for the connection manager state machine

use std::time::Duration;

use proptest::prelude::*;
use tokio::task::JoinSet;

use super::fixtures::{BULB, OTHER_BULB, bulb_id, harness, harness_with};
use crate::config::{IdentityStore, MemoryStore};
use crate::link::fake::{FakeTransport, WireCall};
use crate::{
    Brightness, BulbCommand, BulbReply, Characteristic, ConnectOutcome, ConnectionManager,
    LinkError, LinkState, ManagerConfig, PeripheralId, Power,
};

fn is_connect(call: &WireCall) -> bool {
    matches!(call, WireCall::Connect(_))
}

// ============================================================================
// Connect / disconnect
// ============================================================================

#[tokio::test]
async fn test_connect_sets_state_and_remembers_identity() {
    let h = harness();

    let outcome = h.manager.connect(bulb_id()).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::Connected);
    assert_eq!(h.manager.state(), LinkState::Connected);
    assert_eq!(h.manager.current_identity(), Some(bulb_id()));
    assert!(h.manager.is_connected().await);
    assert_eq!(h.store.load_last_identity(), Some(bulb_id()));
}

#[tokio::test]
async fn test_connect_same_identity_is_idempotent() {
    let h = harness();

    h.manager.connect(bulb_id()).await.unwrap();
    let second = h.manager.connect(bulb_id()).await.unwrap();

    assert_eq!(second, ConnectOutcome::AlreadyConnected);
    assert_eq!(h.bulb.count(is_connect), 1);
    assert_eq!(h.bulb.count(|c| matches!(c, WireCall::Disconnect)), 0);
}

#[tokio::test]
async fn test_connect_different_identity_replaces_link() {
    let h = harness();

    h.manager.connect(bulb_id()).await.unwrap();
    let outcome = h.manager.connect(PeripheralId::new(OTHER_BULB)).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::Connected);
    assert_eq!(h.bulb.connected_to(), Some(PeripheralId::new(OTHER_BULB)));
    assert_eq!(h.manager.current_identity(), Some(PeripheralId::new(OTHER_BULB)));
    assert_eq!(h.bulb.count(is_connect), 2);
    assert_eq!(h.bulb.count(|c| matches!(c, WireCall::Disconnect)), 1);
}

#[tokio::test]
async fn test_connect_unreachable_leaves_disconnected() {
    let h = harness();
    h.bulb.set_reachable(false);

    let err = h.manager.connect(bulb_id()).await.unwrap_err();

    assert!(matches!(err, LinkError::TransportRefused(_)));
    assert_eq!(h.manager.state(), LinkState::Disconnected);
    assert!(!h.manager.is_connected().await);
    assert_eq!(h.store.load_last_identity(), None);
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out() {
    let h = harness_with(ManagerConfig {
        connect_timeout: Duration::from_secs(2),
        operation_timeout: Duration::from_secs(1),
    });
    h.bulb.set_connect_delay(Duration::from_secs(60));

    let err = h.manager.connect(bulb_id()).await.unwrap_err();

    assert_eq!(err, LinkError::TransportTimeout(Duration::from_secs(2)));
    assert_eq!(h.manager.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_when_disconnected_succeeds() {
    let h = harness();

    h.manager.disconnect().await;

    assert_eq!(h.manager.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_keeps_identity_for_reconnect() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();

    h.manager.disconnect().await;

    assert_eq!(h.manager.state(), LinkState::Disconnected);
    assert_eq!(h.bulb.connected_to(), None);
    assert_eq!(h.manager.last_known_identity(), Some(bulb_id()));
}

#[tokio::test]
async fn test_last_known_identity_falls_back_to_store() {
    let (transport, _bulb) = FakeTransport::new();
    let store = std::sync::Arc::new(MemoryStore::with_identity(BULB));
    let manager = ConnectionManager::new(transport, store);

    assert_eq!(manager.current_identity(), None);
    assert_eq!(manager.last_known_identity(), Some(bulb_id()));
}

// ============================================================================
// Pairing
// ============================================================================

#[tokio::test]
async fn test_pairing_attempted_exactly_once() {
    let h = harness();
    h.bulb.require_pairing();

    h.manager.connect(bulb_id()).await.unwrap();

    assert_eq!(h.bulb.count(|c| matches!(c, WireCall::Pair)), 1);
    assert!(h.manager.is_connected().await);
}

#[tokio::test]
async fn test_pairing_failure_fails_connect() {
    let h = harness();
    h.bulb.require_pairing();
    h.bulb.fail_pairing();

    let err = h.manager.connect(bulb_id()).await.unwrap_err();

    assert_eq!(err, LinkError::AuthorizationRequired);
    assert_eq!(h.bulb.count(|c| matches!(c, WireCall::Pair)), 1);
    assert_eq!(h.manager.state(), LinkState::Disconnected);
    assert_eq!(h.bulb.connected_to(), None);
}

#[tokio::test]
async fn test_no_pairing_when_not_required() {
    let h = harness();

    h.manager.connect(bulb_id()).await.unwrap();

    assert_eq!(h.bulb.count(|c| matches!(c, WireCall::Pair)), 0);
}

// ============================================================================
// Bulb operations
// ============================================================================

#[tokio::test]
async fn test_operations_fail_fast_when_disconnected() {
    let h = harness();

    assert_eq!(h.manager.turn_on().await, Err(LinkError::NotConnected));
    assert_eq!(h.manager.turn_off().await, Err(LinkError::NotConnected));
    assert_eq!(
        h.manager.set_brightness(Brightness::MAX).await,
        Err(LinkError::NotConnected)
    );
    assert_eq!(h.manager.get_state().await, Err(LinkError::NotConnected));
    assert_eq!(h.manager.toggle().await, Err(LinkError::NotConnected));
    assert!(h.bulb.calls().is_empty());
}

#[tokio::test]
async fn test_turn_on_and_off_write_power() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();

    h.manager.turn_on().await.unwrap();
    assert_eq!(h.bulb.power(), Power::On);

    h.manager.turn_off().await.unwrap();
    assert_eq!(h.bulb.power(), Power::Off);

    assert_eq!(
        h.bulb
            .count(|c| *c == WireCall::Write(Characteristic::Power, vec![0x01])),
        1
    );
}

#[tokio::test]
async fn test_set_brightness_writes_mapped_value() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();

    h.manager.set_brightness(Brightness::MAX).await.unwrap();
    assert_eq!(h.bulb.brightness_raw(), 254);

    h.manager.set_brightness(Brightness::MIN).await.unwrap();
    assert_eq!(h.bulb.brightness_raw(), 4);

    h.manager
        .set_brightness(Brightness::new(50).unwrap())
        .await
        .unwrap();
    assert_eq!(h.bulb.brightness_raw(), 128);
}

#[tokio::test]
async fn test_get_state_reads_power_and_brightness() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    h.bulb.set_power(Power::On);
    h.bulb.set_brightness_raw(128);

    let state = h.manager.get_state().await.unwrap();

    assert_eq!(state.power, Power::On);
    assert_eq!(state.brightness.percent(), 50);
}

#[tokio::test]
async fn test_get_state_clamps_floor_brightness() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    h.bulb.set_brightness_raw(1);

    let state = h.manager.get_state().await.unwrap();

    assert_eq!(state.brightness, Brightness::MIN);
}

#[tokio::test]
async fn test_toggle_reads_then_writes_inverse() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    h.bulb.clear_calls();

    assert_eq!(h.manager.toggle().await, Ok(Power::On));
    assert_eq!(h.bulb.power(), Power::On);
    assert_eq!(h.manager.toggle().await, Ok(Power::Off));
    assert_eq!(h.bulb.power(), Power::Off);

    assert_eq!(h.bulb.count(|c| matches!(c, WireCall::Read(_))), 2);
    assert_eq!(h.bulb.count(|c| matches!(c, WireCall::Write(_, _))), 2);
}

#[tokio::test(start_paused = true)]
async fn test_operation_times_out() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    h.bulb.set_io_delay(Duration::from_secs(30));

    let err = h.manager.turn_on().await.unwrap_err();

    assert_eq!(err, LinkError::TransportTimeout(Duration::from_secs(1)));
    assert_eq!(err.to_string(), "Timed out after 1s");
}

// ============================================================================
// Implicit connect
// ============================================================================

#[tokio::test]
async fn test_perform_connects_requested_bulb() {
    let h = harness();

    let reply = h
        .manager
        .perform(BulbCommand::TurnOn, Some(bulb_id()))
        .await
        .unwrap();

    assert_eq!(reply, BulbReply::Applied);
    assert_eq!(h.manager.state(), LinkState::Connected);
    assert_eq!(h.bulb.power(), Power::On);
}

#[tokio::test]
async fn test_perform_failed_implicit_connect_is_not_connected() {
    let h = harness();
    h.bulb.set_reachable(false);

    let err = h
        .manager
        .perform(BulbCommand::ReadState, Some(bulb_id()))
        .await
        .unwrap_err();

    assert_eq!(err, LinkError::NotConnected);
}

#[tokio::test]
async fn test_perform_switches_to_requested_bulb() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();

    h.manager
        .perform(BulbCommand::TurnOn, Some(PeripheralId::new(OTHER_BULB)))
        .await
        .unwrap();

    assert_eq!(h.bulb.connected_to(), Some(PeripheralId::new(OTHER_BULB)));
    assert_eq!(h.manager.current_identity(), Some(PeripheralId::new(OTHER_BULB)));
    assert_eq!(h.bulb.count(is_connect), 2);
    assert_eq!(h.bulb.count(|c| matches!(c, WireCall::Disconnect)), 1);
    assert_eq!(h.store.load_last_identity(), Some(PeripheralId::new(OTHER_BULB)));
}

#[tokio::test]
async fn test_perform_keeps_link_for_same_bulb_in_other_case() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();

    h.manager
        .perform(
            BulbCommand::TurnOff,
            Some(PeripheralId::new(BULB.to_ascii_lowercase())),
        )
        .await
        .unwrap();

    assert_eq!(h.bulb.count(is_connect), 1);
    assert_eq!(h.bulb.connected_to(), Some(bulb_id()));
}

#[tokio::test]
async fn test_perform_without_address_uses_linked_bulb() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    h.store
        .save_last_identity(&PeripheralId::new(OTHER_BULB))
        .unwrap();

    h.manager.perform(BulbCommand::TurnOn, None).await.unwrap();

    assert_eq!(h.bulb.connected_to(), Some(bulb_id()));
    assert_eq!(h.bulb.count(is_connect), 1);
}

#[tokio::test]
async fn test_perform_without_address_connects_stored_bulb() {
    let h = harness();
    h.store.save_last_identity(&bulb_id()).unwrap();

    let reply = h.manager.perform(BulbCommand::Toggle, None).await.unwrap();

    assert_eq!(reply, BulbReply::Power(Power::On));
    assert_eq!(h.bulb.connected_to(), Some(bulb_id()));
}

#[tokio::test]
async fn test_perform_without_any_identity_is_not_connected() {
    let h = harness();

    let err = h.manager.perform(BulbCommand::TurnOn, None).await.unwrap_err();

    assert_eq!(err, LinkError::NotConnected);
    assert!(h.bulb.calls().is_empty());
}

#[tokio::test]
async fn test_connect_same_identity_ignores_case() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();

    let outcome = h
        .manager
        .connect(PeripheralId::new(BULB.to_ascii_lowercase()))
        .await
        .unwrap();

    assert_eq!(outcome, ConnectOutcome::AlreadyConnected);
    assert_eq!(h.bulb.count(is_connect), 1);
}

// ============================================================================
// Unsolicited disconnect
// ============================================================================

#[tokio::test]
async fn test_link_loss_flips_state() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    let mut status = h.manager.subscribe();

    h.bulb.drop_link();

    status
        .wait_for(|s| s.state == LinkState::Disconnected)
        .await
        .unwrap();
    assert!(!h.manager.is_connected().await);
    assert_eq!(h.manager.turn_on().await, Err(LinkError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_during_operation() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    h.bulb.set_io_delay(Duration::from_millis(500));
    let mut status = h.manager.subscribe();

    let manager = h.manager.clone();
    let in_flight = tokio::spawn(async move { manager.get_state().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    h.bulb.drop_link();

    // Visible before the in-flight read completes
    status
        .wait_for(|s| s.state == LinkState::Disconnected)
        .await
        .unwrap();
    assert!(!in_flight.is_finished());

    let result = in_flight.await.unwrap();
    assert_eq!(result, Err(LinkError::NotConnected));
    assert_eq!(h.manager.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_after_link_loss() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    let mut status = h.manager.subscribe();
    h.bulb.drop_link();
    status
        .wait_for(|s| s.state == LinkState::Disconnected)
        .await
        .unwrap();

    let outcome = h.manager.connect(bulb_id()).await.unwrap();

    assert_eq!(outcome, ConnectOutcome::Connected);
    assert!(h.manager.is_connected().await);
}

#[tokio::test]
async fn test_transport_disagreement_corrects_state() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();

    h.bulb.sever_silently();
    assert_eq!(h.manager.state(), LinkState::Connected);

    assert!(!h.manager.is_connected().await);
    assert_eq!(h.manager.state(), LinkState::Disconnected);
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_close_disconnects_and_refuses_connect() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();

    h.manager.close().await;

    assert_eq!(h.manager.state(), LinkState::Disconnected);
    assert_eq!(h.bulb.connected_to(), None);
    assert_eq!(h.manager.connect(bulb_id()).await, Err(LinkError::Closed));
    assert_eq!(
        h.manager.perform(BulbCommand::TurnOn, Some(bulb_id())).await,
        Err(LinkError::Closed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_waits_for_in_flight_operation() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    h.bulb.set_io_delay(Duration::from_millis(200));

    let manager = h.manager.clone();
    let in_flight = tokio::spawn(async move { manager.turn_on().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.manager.close().await;

    assert_eq!(in_flight.await.unwrap(), Ok(()));
    assert_eq!(h.bulb.power(), Power::On);
    assert!(!h.bulb.saw_overlap());
}

// ============================================================================
// Serialization
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_operations_never_overlap() {
    let h = harness();
    h.manager.connect(bulb_id()).await.unwrap();
    h.bulb.set_io_delay(Duration::from_millis(5));

    let mut tasks = JoinSet::new();
    for i in 0..20_i64 {
        let manager = h.manager.clone();
        tasks.spawn(async move {
            if i % 2 == 0 {
                manager.get_state().await.map(|_| ())
            } else {
                manager.set_brightness(Brightness::clamped(i * 5)).await
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert!(!h.bulb.saw_overlap());
}

#[derive(Debug, Clone)]
enum Op {
    Status,
    Brightness(i64),
    Toggle,
    Ping,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Status),
        (1_i64..=100).prop_map(Op::Brightness),
        Just(Op::Toggle),
        Just(Op::Ping),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_concurrent_ops_are_serialized(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let overlapped = rt.block_on(async {
            let h = harness();
            h.manager.connect(bulb_id()).await.unwrap();
            h.bulb.set_io_delay(Duration::from_millis(3));

            let mut tasks = JoinSet::new();
            for op in ops {
                let manager = h.manager.clone();
                tasks.spawn(async move {
                    match op {
                        Op::Status => manager.get_state().await.map(|_| ()),
                        Op::Brightness(level) => {
                            manager.set_brightness(Brightness::clamped(level)).await
                        }
                        Op::Toggle => manager.toggle().await.map(|_| ()),
                        Op::Ping => {
                            manager.is_connected().await;
                            Ok(())
                        }
                    }
                });
            }
            while let Some(result) = tasks.join_next().await {
                result.unwrap().unwrap();
            }
            h.bulb.saw_overlap()
        });

        prop_assert!(!overlapped);
    }
}
