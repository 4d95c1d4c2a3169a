//! Rate-limited charging controller
//!
//! Wraps the active [`ChargingPolicy`] with hardware clamping and a decision
//! gate so that the vehicle is not asked to change current on every reading.

use crate::clock::{Clock, seconds_between};
use crate::config::EvChargingConfig;
use crate::error::{EcolitError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::policy::{ChargingPolicy, EnergyMetrics, MIN_AMPS, PolicyKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Amperage bookkeeping owned by the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargingPolicyState {
    pub current_amps: u32,
    pub target_amps: u32,
    /// Last time `current_amps` actually changed
    pub last_adjustment_time: Option<DateTime<Utc>>,
}

/// Snapshot for logs and the status API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub enabled: bool,
    pub policy: String,
    pub current_amps: u32,
    pub target_amps: u32,
    pub max_amps: u32,
    pub seconds_since_adjustment: Option<f64>,
    pub next_adjustment_in_secs: f64,
}

pub struct ChargingRateController {
    enabled: bool,
    config: EvChargingConfig,
    policy: ChargingPolicy,
    state: ChargingPolicyState,
    last_evaluation_time: Option<DateTime<Utc>>,
    last_measurement_time: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
}

impl ChargingRateController {
    pub fn new(config: &EvChargingConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.max_amps < MIN_AMPS {
            return Err(EcolitError::config(format!(
                "ev_charging.max_amps ({}) is below the {} A vehicle minimum",
                config.max_amps, MIN_AMPS
            )));
        }
        let policy = ChargingPolicy::from_config(config.policy, config);
        let logger = get_logger("controller");

        if config.enabled {
            logger.info(&format!(
                "EV charging controller initialized: policy={}, max_amps={}",
                policy.name(),
                config.max_amps
            ));
        } else {
            logger.info("EV charging controller disabled");
        }

        Ok(Self {
            enabled: config.enabled,
            config: config.clone(),
            policy,
            state: ChargingPolicyState {
                current_amps: MIN_AMPS,
                target_amps: MIN_AMPS,
                last_adjustment_time: None,
            },
            last_evaluation_time: None,
            last_measurement_time: None,
            clock,
            logger,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn policy(&self) -> &ChargingPolicy {
        &self.policy
    }

    /// Active policy name, or `DISABLED`
    pub fn policy_name(&self) -> &'static str {
        if self.enabled {
            self.policy.name()
        } else {
            "DISABLED"
        }
    }

    pub fn state(&self) -> &ChargingPolicyState {
        &self.state
    }

    pub fn current_amps(&self) -> u32 {
        if self.enabled { self.state.current_amps } else { 0 }
    }

    /// Amps for this cycle
    ///
    /// Evaluates the policy at most once per adjustment interval; between
    /// evaluations the previously committed value is returned unchanged.
    pub fn calculate(&mut self, metrics: &EnergyMetrics) -> u32 {
        if !self.enabled {
            return 0;
        }
        let now = self.clock.now();

        if self.interval_elapsed(self.last_measurement_time, now, self.config.measurement_interval_secs) {
            self.last_measurement_time = Some(now);
        }

        if !self.interval_elapsed(self.last_evaluation_time, now, self.config.adjustment_interval_secs) {
            self.logger.trace(&format!(
                "Rate limited, next adjustment in {:.1}s",
                self.next_adjustment_in(now)
            ));
            return self.state.current_amps;
        }
        self.last_evaluation_time = Some(now);

        let raw = self
            .policy
            .calculate_target_amps(self.state.current_amps, metrics);
        let target = self.clamp(raw);
        self.state.target_amps = target;

        if target != self.state.current_amps {
            self.logger.info(&format!(
                "🔌 EV CHARGING: {} policy → {}A to {}A",
                self.policy.name(),
                self.state.current_amps,
                target
            ));
            self.state.current_amps = target;
            self.state.last_adjustment_time = Some(now);
        } else {
            self.logger.debug(&format!(
                "{} policy maintains {}A",
                self.policy.name(),
                self.state.current_amps
            ));
        }

        self.state.current_amps
    }

    fn clamp(&self, raw: u32) -> u32 {
        let rounded = if raw > 0 && raw < MIN_AMPS { MIN_AMPS } else { raw };
        rounded.min(self.config.max_amps)
    }

    fn interval_elapsed(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_secs: u64) -> bool {
        match last {
            None => true,
            Some(t) => {
                let elapsed = seconds_between(t, now);
                elapsed < 0.0 || elapsed >= interval_secs as f64
            }
        }
    }

    fn next_adjustment_in(&self, now: DateTime<Utc>) -> f64 {
        match self.last_evaluation_time {
            None => 0.0,
            Some(t) => {
                (self.config.adjustment_interval_secs as f64 - seconds_between(t, now)).max(0.0)
            }
        }
    }

    /// Swap the active policy; it is evaluated on the next cycle
    pub fn set_policy(&mut self, kind: PolicyKind) {
        let old = self.policy.name();
        self.policy = ChargingPolicy::from_config(kind, &self.config);
        self.last_evaluation_time = None;
        self.logger
            .info(&format!("EV charging policy updated: {} → {}", old, self.policy.name()));
    }

    /// Swap the active policy by name; unknown names leave it unchanged
    pub fn set_policy_by_name(&mut self, name: &str) -> Result<PolicyKind> {
        let kind = name.parse::<PolicyKind>().inspect_err(|e| {
            self.logger.error(&format!("Failed to update policy: {}", e));
        })?;
        self.set_policy(kind);
        Ok(kind)
    }

    /// Align with what the vehicle actually reports (e.g. at start-up)
    pub fn sync_with_actual_state(&mut self, charging_amps: Option<u32>, is_charging: bool) {
        if !self.enabled {
            return;
        }
        self.state.current_amps = match (is_charging, charging_amps) {
            (true, Some(amps)) => amps.clamp(MIN_AMPS, self.config.max_amps),
            _ => 0,
        };
        self.state.target_amps = self.state.current_amps;
        self.logger.info(&format!(
            "Synced EV controller with actual state: {}A",
            self.state.current_amps
        ));
    }

    pub fn status(&self) -> ControllerStatus {
        let now = self.clock.now();
        ControllerStatus {
            enabled: self.enabled,
            policy: self.policy_name().to_string(),
            current_amps: self.current_amps(),
            target_amps: if self.enabled { self.state.target_amps } else { 0 },
            max_amps: self.config.max_amps,
            seconds_since_adjustment: self
                .state
                .last_adjustment_time
                .map(|t| seconds_between(t, now)),
            next_adjustment_in_secs: self.next_adjustment_in(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn setup(policy: PolicyKind) -> (ChargingRateController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let config = EvChargingConfig {
            enabled: true,
            policy,
            max_amps: 16,
            ..EvChargingConfig::default()
        };
        let controller = ChargingRateController::new(&config, clock.clone()).unwrap();
        (controller, clock)
    }

    fn battery(soc: f64, power: i64) -> EnergyMetrics {
        EnergyMetrics {
            battery_soc: Some(soc),
            battery_power: Some(power),
            ..EnergyMetrics::default()
        }
    }

    #[test]
    fn starts_at_minimum() {
        let (controller, _) = setup(PolicyKind::Eco);
        assert_eq!(controller.current_amps(), MIN_AMPS);
        assert!(controller.state().last_adjustment_time.is_none());
    }

    #[test]
    fn max_amps_below_minimum_is_rejected() {
        let config = EvChargingConfig {
            max_amps: 4,
            ..EvChargingConfig::default()
        };
        let err = ChargingRateController::new(&config, Arc::new(ManualClock::default()));
        assert!(matches!(err, Err(EcolitError::Config { .. })));
    }

    #[test]
    fn disabled_controller_returns_zero() {
        let config = EvChargingConfig::default();
        let mut controller =
            ChargingRateController::new(&config, Arc::new(ManualClock::default())).unwrap();
        assert_eq!(controller.calculate(&battery(100.0, 0)), 0);
        assert_eq!(controller.policy_name(), "DISABLED");
        assert!(!controller.status().enabled);
    }

    #[test]
    fn small_targets_round_up_to_minimum() {
        let (mut controller, _) = setup(PolicyKind::Hurry);
        controller.sync_with_actual_state(None, false);
        assert_eq!(controller.current_amps(), 0);
        // Hurry proposes 1 A one step up from zero
        assert_eq!(controller.calculate(&battery(90.5, 200)), MIN_AMPS);
    }

    #[test]
    fn rate_limited_between_evaluations() {
        let (mut controller, clock) = setup(PolicyKind::Eco);
        assert_eq!(controller.calculate(&battery(98.7, 500)), 7);
        clock.advance_secs(10.0);
        assert_eq!(controller.calculate(&battery(98.7, 500)), 7);
        assert!(controller.status().next_adjustment_in_secs > 19.0);
        clock.advance_secs(20.0);
        assert_eq!(controller.calculate(&battery(98.7, 500)), 8);
    }

    #[test]
    fn hold_does_not_move_adjustment_time() {
        let (mut controller, clock) = setup(PolicyKind::Eco);
        controller.calculate(&battery(98.7, 500));
        let committed = controller.state().last_adjustment_time;
        clock.advance_secs(30.0);
        assert_eq!(controller.calculate(&battery(98.7, 0)), 7);
        assert_eq!(controller.state().last_adjustment_time, committed);
    }

    #[test]
    fn policy_swap_is_evaluated_next_cycle() {
        let (mut controller, clock) = setup(PolicyKind::Eco);
        assert_eq!(controller.calculate(&battery(50.0, 0)), 0);
        clock.advance_secs(1.0);
        controller.set_policy(PolicyKind::Emergency);
        assert_eq!(controller.calculate(&battery(50.0, 0)), 16);
    }

    #[test]
    fn unknown_policy_name_keeps_active_policy() {
        let (mut controller, _) = setup(PolicyKind::Hurry);
        assert!(controller.set_policy_by_name("turbo").is_err());
        assert_eq!(controller.policy().kind(), PolicyKind::Hurry);
        assert_eq!(
            controller.set_policy_by_name("ECO").unwrap(),
            PolicyKind::Eco
        );
    }

    #[test]
    fn sync_clamps_to_hardware_range() {
        let (mut controller, _) = setup(PolicyKind::Eco);
        controller.sync_with_actual_state(Some(3), true);
        assert_eq!(controller.current_amps(), MIN_AMPS);
        controller.sync_with_actual_state(Some(40), true);
        assert_eq!(controller.current_amps(), 16);
        controller.sync_with_actual_state(Some(12), false);
        assert_eq!(controller.current_amps(), 0);
    }
}
