use async_trait::async_trait;
use ecolit::clock::ManualClock;
use ecolit::config::{EvChargingConfig, VehicleConfig};
use ecolit::error::Result;
use ecolit::orchestrator::{CHARGER_NOT_CONNECTED, CommandOrchestrator};
use ecolit::policy::{ChargingPolicy, EnergyMetrics, PolicyKind};
use ecolit::vehicle::{
    ChargingState, PollOutcome, SimulatedVehicle, SimulatedWallConnector, VehicleApi, VehicleCall,
    WallConnector,
};
use std::sync::Arc;
use std::time::Duration;

fn vehicle_config() -> VehicleConfig {
    VehicleConfig {
        enabled: true,
        wake_settle_secs: 0.0,
        ..VehicleConfig::default()
    }
}

fn orchestrator(
    vehicle: Arc<dyn VehicleApi>,
    wall_connector: Option<Arc<dyn WallConnector>>,
) -> (CommandOrchestrator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let orch = CommandOrchestrator::new(vehicle_config(), vehicle, wall_connector, clock.clone());
    (orch, clock)
}

fn eco() -> ChargingPolicy {
    ChargingPolicy::from_config(PolicyKind::Eco, &EvChargingConfig::default())
}

fn sunny() -> EnergyMetrics {
    EnergyMetrics {
        battery_soc: Some(99.5),
        battery_power: Some(0),
        grid_power_flow: Some(-1500),
        solar_power: Some(4000),
    }
}

#[tokio::test]
async fn stop_with_idle_cache_makes_no_vendor_calls() {
    let vehicle = Arc::new(SimulatedVehicle::new().with_state(ChargingState::Stopped, 0.0));
    let (mut orch, _) = orchestrator(vehicle.clone(), None);
    orch.sync_vehicle_state().await.unwrap();
    vehicle.clear_calls();

    let outcome = orch.apply(0, &sunny(), &eco()).await;

    assert!(outcome.success);
    assert_eq!(outcome.actions_taken, vec!["Already not charging"]);
    assert!(vehicle.calls().is_empty());
}

#[tokio::test]
async fn stop_with_empty_cache_never_wakes() {
    let vehicle = Arc::new(SimulatedVehicle::new().asleep());
    let (mut orch, _) = orchestrator(vehicle.clone(), None);

    let outcome = orch.apply(0, &sunny(), &eco()).await;

    assert!(outcome.success);
    assert_eq!(vehicle.count(&VehicleCall::WakeUp), 0);
    assert_eq!(vehicle.count(&VehicleCall::Poll { allow_wake: true }), 0);
    assert!(vehicle.is_asleep());
}

#[tokio::test]
async fn wall_connector_zero_amps_skips_vehicle() {
    let vehicle = Arc::new(SimulatedVehicle::new().asleep());
    let wc = Arc::new(SimulatedWallConnector::new(Some(0.0)));
    let (mut orch, _) = orchestrator(vehicle.clone(), Some(wc.clone()));

    let outcome = orch.apply(0, &sunny(), &eco()).await;

    assert!(outcome.success);
    assert_eq!(outcome.actions_taken, vec!["Already not charging (WC shows 0A)"]);
    assert_eq!(wc.reads(), 1);
    assert!(vehicle.calls().is_empty());
}

#[tokio::test]
async fn wall_connector_current_triggers_stop() {
    let vehicle = Arc::new(SimulatedVehicle::new().with_state(ChargingState::Charging, 12.0));
    let wc = Arc::new(SimulatedWallConnector::new(Some(11.8)));
    let (mut orch, _) = orchestrator(vehicle.clone(), Some(wc));

    let outcome = orch.apply(0, &sunny(), &eco()).await;

    assert!(outcome.success);
    assert_eq!(outcome.actions_taken, vec!["Stopped charging"]);
    assert_eq!(vehicle.count(&VehicleCall::ChargeStop), 1);
    assert_eq!(vehicle.charging_state(), ChargingState::Stopped);
}

#[tokio::test]
async fn failed_wake_sends_no_commands() {
    let vehicle = Arc::new(SimulatedVehicle::new().asleep().with_failing_wake());
    let (mut orch, _) = orchestrator(vehicle.clone(), None);

    let outcome = orch.apply(16, &sunny(), &eco()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.errors, vec!["Wake-up command failed"]);
    assert_eq!(vehicle.count(&VehicleCall::ChargeStart), 0);
    assert!(
        !vehicle
            .calls()
            .iter()
            .any(|c| matches!(c, VehicleCall::SetChargingAmps(_)))
    );
}

#[tokio::test]
async fn charger_never_detected_after_wake() {
    let vehicle = Arc::new(SimulatedVehicle::new().asleep().with_post_wake_states([
        ChargingState::Disconnected,
        ChargingState::Disconnected,
        ChargingState::Disconnected,
    ]));
    let (mut orch, _) = orchestrator(vehicle.clone(), None);

    let outcome = orch.apply(16, &sunny(), &eco()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.errors, vec![CHARGER_NOT_CONNECTED]);
    assert_eq!(outcome.actions_taken, vec!["Vehicle woken up"]);
    assert_eq!(vehicle.poll_count(), 4);
    assert_eq!(vehicle.count(&VehicleCall::ChargeStart), 0);
}

#[tokio::test]
async fn charger_detected_on_second_poll_stops_retrying() {
    let vehicle = Arc::new(
        SimulatedVehicle::new()
            .asleep()
            .with_post_wake_states([ChargingState::Disconnected, ChargingState::Stopped]),
    );
    let (mut orch, _) = orchestrator(vehicle.clone(), None);

    let outcome = orch.apply(16, &sunny(), &eco()).await;

    assert!(outcome.success, "{:?}", outcome);
    assert_eq!(vehicle.poll_count(), 3);
    assert_eq!(
        outcome.actions_taken,
        vec!["Vehicle woken up", "Started charging", "Set charging to 16A"]
    );
}

#[tokio::test]
async fn repeated_start_is_rate_limited_softly() {
    let vehicle = Arc::new(SimulatedVehicle::new().with_failing_commands());
    let (mut orch, clock) = orchestrator(vehicle.clone(), None);

    let first = orch.apply(10, &sunny(), &eco()).await;
    assert!(first.warnings.contains(&"Failed to start charging".to_string()));

    clock.advance_secs(60.0);
    let second = orch.apply(10, &sunny(), &eco()).await;
    assert!(
        second
            .warnings
            .iter()
            .any(|w| w.starts_with("Rate limited: last charge command"))
    );
    assert_eq!(vehicle.count(&VehicleCall::ChargeStart), 1);
}

#[tokio::test]
async fn amps_within_tolerance_are_not_resent() {
    let vehicle = Arc::new(SimulatedVehicle::new().with_state(ChargingState::Charging, 16.0));
    let (mut orch, _) = orchestrator(vehicle.clone(), None);

    let outcome = orch.apply(16, &sunny(), &eco()).await;

    assert!(outcome.success);
    assert_eq!(outcome.actions_taken, vec!["Already at 16A (no change needed)"]);
    assert_eq!(vehicle.count(&VehicleCall::SetChargingAmps(16)), 0);
    assert!(orch.has_started_charging_this_surplus());
}

#[tokio::test]
async fn restart_after_stop_within_same_surplus_event() {
    let vehicle = Arc::new(SimulatedVehicle::new().with_state(ChargingState::Stopped, 0.0));
    let (mut orch, clock) = orchestrator(vehicle.clone(), None);

    let first = orch.apply(16, &sunny(), &eco()).await;
    assert_eq!(first.actions_taken, vec!["Started charging", "Set charging to 16A"]);

    clock.advance_secs(301.0);
    let stop = orch.apply(0, &sunny(), &eco()).await;
    assert_eq!(stop.actions_taken, vec!["Stopped charging"]);
    assert_eq!(vehicle.charging_state(), ChargingState::Stopped);

    clock.advance_secs(301.0);
    let restart = orch.apply(16, &sunny(), &eco()).await;
    assert!(restart.success, "{:?}", restart);
    assert_eq!(
        restart.actions_taken,
        vec!["Started charging", "Already at 16A (no change needed)"]
    );
    assert_eq!(vehicle.count(&VehicleCall::ChargeStart), 2);
    assert_eq!(vehicle.charging_state(), ChargingState::Charging);
}

#[tokio::test]
async fn wake_attempts_are_rate_limited() {
    let vehicle = Arc::new(SimulatedVehicle::new().asleep().with_failing_wake());
    let (mut orch, clock) = orchestrator(vehicle.clone(), None);

    let first = orch.apply(16, &sunny(), &eco()).await;
    assert_eq!(first.errors, vec!["Wake-up command failed"]);

    clock.advance_secs(10.0);
    let second = orch.apply(16, &sunny(), &eco()).await;

    assert!(!second.success);
    assert!(second.errors[0].starts_with("Rate limited: last wake attempt"));
    assert_eq!(vehicle.count(&VehicleCall::WakeUp), 1);
    assert_eq!(vehicle.count(&VehicleCall::ChargeStart), 0);
    assert!(
        !vehicle
            .calls()
            .iter()
            .any(|c| matches!(c, VehicleCall::SetChargingAmps(_)))
    );
}

#[tokio::test]
async fn amps_changes_are_rate_limited() {
    let vehicle = Arc::new(SimulatedVehicle::new().with_state(ChargingState::Charging, 10.0));
    let (mut orch, clock) = orchestrator(vehicle.clone(), None);

    let first = orch.apply(16, &sunny(), &eco()).await;
    assert_eq!(first.actions_taken, vec!["Set charging to 16A"]);

    clock.advance_secs(10.0);
    let second = orch.apply(20, &sunny(), &eco()).await;

    assert!(!second.success);
    assert!(second.errors[0].starts_with("Rate limited: last amps command"));
    assert_eq!(vehicle.count(&VehicleCall::SetChargingAmps(20)), 0);
    assert_eq!(vehicle.charge_amps(), 16.0);

    clock.advance_secs(30.0);
    let third = orch.apply(20, &sunny(), &eco()).await;
    assert!(third.success);
    assert_eq!(vehicle.charge_amps(), 20.0);
}

#[tokio::test]
async fn stop_shares_the_start_rate_limit() {
    let vehicle = Arc::new(SimulatedVehicle::new().with_state(ChargingState::Stopped, 0.0));
    let (mut orch, clock) = orchestrator(vehicle.clone(), None);

    let start = orch.apply(16, &sunny(), &eco()).await;
    assert!(start.actions_taken.contains(&"Started charging".to_string()));

    clock.advance_secs(60.0);
    let stop = orch.apply(0, &sunny(), &eco()).await;

    assert!(!stop.success);
    assert!(stop.errors[0].starts_with("Rate limited: last charge command"));
    assert_eq!(vehicle.count(&VehicleCall::ChargeStop), 0);
    assert_eq!(vehicle.charging_state(), ChargingState::Charging);
}

#[tokio::test]
async fn disabled_orchestrator_reports_failure() {
    let vehicle = Arc::new(SimulatedVehicle::new());
    let clock = Arc::new(ManualClock::default());
    let mut orch = CommandOrchestrator::new(VehicleConfig::default(), vehicle.clone(), None, clock);

    let outcome = orch.apply(10, &sunny(), &eco()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.errors, vec!["Vehicle control not enabled"]);
    assert!(vehicle.calls().is_empty());
}

/// Vehicle whose every call hangs longer than the command timeout
struct HangingVehicle;

#[async_trait]
impl VehicleApi for HangingVehicle {
    async fn poll_vehicle_state(&self, _allow_wake: bool) -> Result<PollOutcome> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(PollOutcome {
            state: None,
            was_asleep: true,
        })
    }

    async fn wake_up(&self) -> Result<bool> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(true)
    }

    async fn charge_start(&self) -> Result<bool> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(true)
    }

    async fn charge_stop(&self) -> Result<bool> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(true)
    }

    async fn set_charging_amps(&self, _amps: u32) -> Result<bool> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(true)
    }
}

#[tokio::test]
async fn timed_out_poll_is_reported_not_raised() {
    let clock = Arc::new(ManualClock::default());
    let config = VehicleConfig {
        command_timeout_secs: 1,
        ..vehicle_config()
    };
    let mut orch = CommandOrchestrator::new(config, Arc::new(HangingVehicle), None, clock);

    let outcome = orch.apply(10, &sunny(), &eco()).await;

    assert!(!outcome.success);
    assert!(outcome.warnings.is_empty());
    assert_eq!(
        outcome.errors,
        vec!["Vehicle state unknown: Timeout error: vehicle poll timed out after 1s"]
    );
}
