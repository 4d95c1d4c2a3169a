//! Vehicle command orchestration
//!
//! Gets a remote, intermittently sleeping vehicle to adopt the target current.
//! Two asymmetric paths: starting may wake the vehicle, stopping never does.
//! No error escapes [`CommandOrchestrator::apply`]; every failure ends up in
//! the returned [`CommandOutcome`].

use crate::clock::Clock;
use crate::config::VehicleConfig;
use crate::error::{EcolitError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::policy::{ChargingPolicy, EnergyMetrics};
use crate::rate_limit::RateLimiter;
use crate::vehicle::{ChargingState, PollOutcome, VehicleApi, VehicleState, WallConnector};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

mod cache;
mod outcome;

pub use cache::LocalVehicleStateCache;
pub use outcome::CommandOutcome;

pub const CHARGER_NOT_CONNECTED: &str = "🔌 Charger not connected";

pub struct CommandOrchestrator {
    config: VehicleConfig,
    vehicle: Arc<dyn VehicleApi>,
    wall_connector: Option<Arc<dyn WallConnector>>,
    clock: Arc<dyn Clock>,
    cache: LocalVehicleStateCache,
    wake_limiter: RateLimiter,
    charge_limiter: RateLimiter,
    amps_limiter: RateLimiter,
    /// Set once charging is confirmed during the current surplus event
    surplus_charging_started: bool,
    logger: StructuredLogger,
}

impl CommandOrchestrator {
    pub fn new(
        config: VehicleConfig,
        vehicle: Arc<dyn VehicleApi>,
        wall_connector: Option<Arc<dyn WallConnector>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let logger = get_logger("orchestrator");
        logger.info(&format!(
            "Vehicle orchestrator initialized: wake={}s, charge={}s, amps={}s, sync={}s, wall_connector={}",
            config.wake_interval_secs,
            config.charge_command_interval_secs,
            config.amps_command_interval_secs,
            config.sync_interval_secs,
            wall_connector.is_some()
        ));
        Self {
            wake_limiter: RateLimiter::new("wake attempt", config.wake_interval_secs),
            charge_limiter: RateLimiter::new("charge command", config.charge_command_interval_secs),
            amps_limiter: RateLimiter::new("amps command", config.amps_command_interval_secs),
            config,
            vehicle,
            wall_connector,
            clock,
            cache: LocalVehicleStateCache::default(),
            surplus_charging_started: false,
            logger,
        }
    }

    pub fn cache(&self) -> &LocalVehicleStateCache {
        &self.cache
    }

    pub fn has_started_charging_this_surplus(&self) -> bool {
        self.surplus_charging_started
    }

    /// Called when the surplus event ends
    pub fn reset_surplus_event(&mut self) {
        if self.surplus_charging_started {
            self.logger.debug("Surplus event ended");
        }
        self.surplus_charging_started = false;
    }

    /// Drive the vehicle towards `target_amps`
    pub async fn apply(
        &mut self,
        target_amps: u32,
        metrics: &EnergyMetrics,
        policy: &ChargingPolicy,
    ) -> CommandOutcome {
        if !self.config.enabled {
            return CommandOutcome::new(target_amps).fail("Vehicle control not enabled");
        }
        let outcome = if target_amps > 0 {
            self.start_path(target_amps, metrics, policy).await
        } else {
            self.stop_path().await
        };
        self.logger.for_policy(policy.name()).debug(&format!(
            "{}A: success={}, actions={:?}, warnings={:?}, errors={:?}",
            target_amps,
            outcome.success,
            outcome.actions_taken,
            outcome.warnings,
            outcome.errors
        ));
        outcome
    }

    /// Non-waking state refresh, e.g. at start-up
    pub async fn sync_vehicle_state(&mut self) -> Result<Option<VehicleState>> {
        let poll = self.poll(false).await?;
        Ok(poll.state)
    }

    async fn start_path(
        &mut self,
        target: u32,
        metrics: &EnergyMetrics,
        policy: &ChargingPolicy,
    ) -> CommandOutcome {
        let mut outcome = CommandOutcome::new(target);
        let window_open = policy.charging_window_open(metrics);
        let must_sync =
            window_open || self.cache.sync_due(self.clock.now(), self.config.sync_interval_secs);

        let state = if must_sync {
            match self.poll(true).await {
                Ok(poll) if poll.was_asleep => {
                    if let Err(message) = self.wake().await {
                        return outcome.fail(message);
                    }
                    outcome.action("Vehicle woken up");
                    match self.detect_charger().await {
                        Ok(state) => state,
                        Err(e) => {
                            return outcome
                                .fail(format!("Failed to read vehicle state after wake-up: {}", e));
                        }
                    }
                }
                Ok(poll) => poll.state,
                Err(e) if self.cache.is_empty() => {
                    return outcome.fail(format!("Vehicle state unknown: {}", e));
                }
                Err(e) => {
                    outcome.warning(format!("Vehicle state unknown, using cached state: {}", e));
                    self.cache.as_vehicle_state()
                }
            }
        } else {
            self.logger.trace("Using cached vehicle state within sync interval");
            self.cache.as_vehicle_state()
        };

        let state = match require_connected(state) {
            Ok(state) => state,
            Err(e) => {
                self.logger.warn(&e.to_string());
                return outcome.fail(CHARGER_NOT_CONNECTED);
            }
        };

        self.ensure_charging_started(&state, &mut outcome).await;
        self.adjust_amps(target, state.charge_amps, &mut outcome).await;
        outcome
    }

    async fn ensure_charging_started(&mut self, state: &VehicleState, outcome: &mut CommandOutcome) {
        let Some(charging_state) = state.charging_state else {
            return;
        };
        if charging_state.is_active() {
            self.surplus_charging_started = true;
            return;
        }
        if self.surplus_charging_started {
            self.logger
                .debug("Charging already started during this surplus event, not restarting");
            return;
        }
        if !charging_state.needs_start() {
            return;
        }

        if let Err(limited) = self.charge_limiter.try_acquire(self.clock.now()) {
            outcome.warning(limited.to_string());
            return;
        }
        let vehicle = Arc::clone(&self.vehicle);
        match self.call("charge start", vehicle.charge_start()).await {
            Ok(true) => {
                outcome.action("Started charging");
                self.surplus_charging_started = true;
                self.cache.record_started();
            }
            Ok(false) => outcome.warning("Failed to start charging"),
            Err(e) => outcome.warning(format!("Error starting charging: {}", e)),
        }
    }

    async fn adjust_amps(&mut self, target: u32, reported: Option<f64>, outcome: &mut CommandOutcome) {
        let tolerance = self.config.amps_tolerance;
        let needs_change = reported.is_none_or(|amps| (amps - f64::from(target)).abs() > tolerance);
        if !needs_change {
            outcome.success = true;
            outcome.action(format!("Already at {}A (no change needed)", target));
            return;
        }

        if let Err(limited) = self.amps_limiter.try_acquire(self.clock.now()) {
            outcome.error(limited.to_string());
            return;
        }
        let vehicle = Arc::clone(&self.vehicle);
        match self.call("set amps", vehicle.set_charging_amps(target)).await {
            Ok(true) => {
                outcome.success = true;
                outcome.action(format!("Set charging to {}A", target));
                self.cache.record_amps(target);
            }
            Ok(false) => outcome.error("Failed to set charging amps"),
            Err(e) => outcome.error(format!("Error setting amps: {}", e)),
        }
    }

    async fn stop_path(&mut self) -> CommandOutcome {
        let mut outcome = CommandOutcome::new(0);

        if let Some(wc) = self.wall_connector.clone() {
            match self.call("wall connector read", wc.live_amps()).await {
                Ok(amps) if amps > 0.0 => {
                    self.logger
                        .debug(&format!("Wall connector shows {:.1}A flowing", amps));
                    return self.stop_charging(outcome).await;
                }
                Ok(_) => return outcome.succeed("Already not charging (WC shows 0A)"),
                Err(e) => {
                    outcome.warning(format!("Wall connector unavailable, using cached state: {}", e));
                }
            }
        }

        if self.cache.is_empty() {
            match self.poll(false).await {
                // A sleeping vehicle is not drawing current
                Ok(poll) if poll.was_asleep => return outcome.succeed("Already not charging"),
                Ok(_) => {}
                Err(e) => return outcome.fail(format!("Vehicle state unknown: {}", e)),
            }
        }

        if self.cache.charging_state.is_some_and(|s| s.is_active()) {
            self.stop_charging(outcome).await
        } else {
            outcome.succeed("Already not charging")
        }
    }

    async fn stop_charging(&mut self, outcome: CommandOutcome) -> CommandOutcome {
        if let Err(limited) = self.charge_limiter.try_acquire(self.clock.now()) {
            return outcome.fail(limited.to_string());
        }
        let vehicle = Arc::clone(&self.vehicle);
        match self.call("charge stop", vehicle.charge_stop()).await {
            Ok(true) => {
                self.cache.record_stopped();
                // A later start in the same surplus event must be sent again
                self.surplus_charging_started = false;
                outcome.succeed("Stopped charging")
            }
            Ok(false) => outcome.fail("Failed to stop charging"),
            Err(e) => outcome.fail(format!("Error stopping charging: {}", e)),
        }
    }

    async fn wake(&mut self) -> std::result::Result<(), String> {
        if let Err(limited) = self.wake_limiter.try_acquire(self.clock.now()) {
            return Err(limited.to_string());
        }
        let vehicle = Arc::clone(&self.vehicle);
        match self.call("wake up", vehicle.wake_up()).await {
            Ok(true) => {
                self.logger.info("Vehicle woken up");
                Ok(())
            }
            Ok(false) => Err("Wake-up command failed".to_string()),
            Err(e) => Err(format!("Wake-up failed: {}", e)),
        }
    }

    /// Re-poll after a wake-up until the charger shows up or attempts run out
    async fn detect_charger(&mut self) -> Result<Option<VehicleState>> {
        let attempts = self.config.charger_detection_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            self.settle().await;
            let poll = self.poll(true).await?;
            let connected = poll.state.as_ref().is_some_and(is_connected);
            last = poll.state;
            if connected {
                return Ok(last);
            }
            self.logger.debug(&format!(
                "Charger not detected after wake-up (attempt {}/{})",
                attempt, attempts
            ));
        }
        Ok(last)
    }

    async fn settle(&self) {
        let secs = self.config.wake_settle_secs;
        if secs > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }
    }

    async fn poll(&mut self, allow_wake: bool) -> Result<PollOutcome> {
        let vehicle = Arc::clone(&self.vehicle);
        let poll = self
            .call("vehicle poll", vehicle.poll_vehicle_state(allow_wake))
            .await?;
        if let Some(state) = &poll.state {
            self.cache.sync_from(state, self.clock.now());
            self.logger.debug(&format!(
                "Vehicle state synced: soc={:?}, state={:?}, amps={:?}",
                state.battery_level, state.charging_state, state.charge_amps
            ));
        }
        Ok(poll)
    }

    /// Bound a vendor call by the command timeout and log its failure
    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = Duration::from_secs(self.config.command_timeout_secs);
        let result = match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(EcolitError::timeout(format!(
                "{} timed out after {}s",
                operation, self.config.command_timeout_secs
            ))),
        };
        if let Err(e) = &result {
            self.logger.warn(&format!("{} failed: {}", operation, e));
        }
        result
    }
}

fn is_connected(state: &VehicleState) -> bool {
    state
        .charging_state
        .is_some_and(|c| c != ChargingState::Disconnected)
}

/// Vehicle data present and cable plugged in
fn require_connected(state: Option<VehicleState>) -> Result<VehicleState> {
    state
        .filter(is_connected)
        .ok_or_else(|| EcolitError::precondition(CHARGER_NOT_CONNECTED))
}
