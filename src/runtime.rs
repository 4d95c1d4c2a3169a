//! The control loop
//!
//! Two tasks: the home monitor polls the energy source and publishes an
//! immutable [`EnergySnapshot`]; the vehicle loop reads the latest snapshot,
//! decides, and drives the vehicle. Snapshots and status travel through
//! `watch` cells, control commands through an `mpsc` channel.

use crate::clock::Clock;
use crate::config::Config;
use crate::controller::{ChargingRateController, ControllerStatus};
use crate::error::{EcolitError, Result};
use crate::estimator::{EstimateSource, SocEstimate, SocEstimator};
use crate::logging::{StructuredLogger, get_logger};
use crate::metrics_log::{MetricsLogger, MetricsRow};
use crate::orchestrator::{CommandOrchestrator, CommandOutcome, LocalVehicleStateCache};
use crate::policy::{EnergyMetrics, PolicyKind};
use crate::replay::EnergySource;
use crate::vehicle::{VehicleApi, WallConnector};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// One home poll, as handed to the vehicle loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergySnapshot {
    pub timestamp: DateTime<Utc>,
    /// Readings as reported by the devices
    pub raw: EnergyMetrics,
    /// Readings fed to the policy (SOC possibly replaced by the estimate)
    pub metrics: EnergyMetrics,
    pub soc_estimate: SocEstimate,
    pub charging_rate_percent_per_hour: Option<f64>,
}

/// Commands accepted between vehicle cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    SetPolicy(PolicyKind),
}

/// What one vehicle cycle decided and did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub surplus: bool,
    pub target_amps: u32,
    pub outcome: Option<CommandOutcome>,
}

/// Latest state published for observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeStatus {
    pub version: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub cycles: u64,
    pub controller: ControllerStatus,
    pub vehicle_cache: LocalVehicleStateCache,
    pub surplus_charging_started: bool,
    pub last_cycle: Option<CycleReport>,
    pub snapshot: Option<EnergySnapshot>,
}

/// Cloneable access to a running [`Runtime`]
#[derive(Clone)]
pub struct RuntimeHandle {
    pub status: watch::Receiver<RuntimeStatus>,
    pub commands: mpsc::Sender<ControlCommand>,
}

impl RuntimeHandle {
    pub fn latest(&self) -> RuntimeStatus {
        self.status.borrow().clone()
    }

    pub async fn set_policy(&self, kind: PolicyKind) -> Result<()> {
        self.commands
            .send(ControlCommand::SetPolicy(kind))
            .await
            .map_err(|_| EcolitError::generic("control loop is not running"))
    }
}

/// Polls the energy source and refines the home battery SOC
pub struct HomeMonitor {
    source: Arc<dyn EnergySource>,
    estimator: SocEstimator,
    confidence_threshold: f64,
    last_official_soc: Option<f64>,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
}

impl HomeMonitor {
    pub fn new(config: &Config, source: Arc<dyn EnergySource>, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            source,
            estimator: SocEstimator::from_config(&config.home_battery)?,
            confidence_threshold: config.home_battery.realtime_confidence_threshold,
            last_official_soc: None,
            clock,
            logger: get_logger("home"),
        })
    }

    pub fn estimator(&self) -> &SocEstimator {
        &self.estimator
    }

    pub async fn poll_once(&mut self) -> Result<EnergySnapshot> {
        let raw = self.source.poll().await?;
        let now = self.clock.now();

        if let Some(soc) = raw.battery_soc
            && self.last_official_soc != Some(soc)
        {
            self.estimator.update_official_soc(soc, now);
            self.last_official_soc = Some(soc);
        }
        if let Some(watts) = raw.battery_power {
            self.estimator.update_power(watts as f64, now);
        }

        let estimate = self.estimator.estimated_soc(now);
        let use_realtime =
            estimate.source != EstimateSource::NoData && estimate.confidence > self.confidence_threshold;
        let metrics = EnergyMetrics {
            battery_soc: if use_realtime {
                Some(estimate.estimated_soc)
            } else {
                raw.battery_soc
            },
            ..raw
        };

        self.logger.debug(&format!(
            "SOC:{:?}% RTSOC:{:.2}% ({:.0}% {}) Battery:{:?}W Grid:{:?}W Solar:{:?}W",
            raw.battery_soc,
            estimate.estimated_soc,
            estimate.confidence * 100.0,
            estimate.source,
            raw.battery_power,
            raw.grid_power_flow,
            raw.solar_power
        ));

        Ok(EnergySnapshot {
            timestamp: now,
            raw,
            metrics,
            soc_estimate: estimate,
            charging_rate_percent_per_hour: self.estimator.charging_rate_percent_per_hour(),
        })
    }
}

/// Decides and actuates once per vehicle cycle
pub struct VehicleLoop {
    surplus_threshold_w: i64,
    dry_run: bool,
    vehicle_enabled: bool,
    controller: ChargingRateController,
    orchestrator: CommandOrchestrator,
    metrics: MetricsLogger,
    clock: Arc<dyn Clock>,
    cycles: u64,
    logger: StructuredLogger,
}

impl VehicleLoop {
    pub fn new(
        config: &Config,
        vehicle: Arc<dyn VehicleApi>,
        wall_connector: Option<Arc<dyn WallConnector>>,
        metrics: MetricsLogger,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            surplus_threshold_w: config.polling.surplus_threshold_w,
            dry_run: config.dry_run,
            vehicle_enabled: config.vehicle.enabled,
            controller: ChargingRateController::new(&config.ev_charging, clock.clone())?,
            orchestrator: CommandOrchestrator::new(
                config.vehicle.clone(),
                vehicle,
                wall_connector,
                clock.clone(),
            ),
            metrics,
            clock,
            cycles: 0,
            logger: get_logger("runtime"),
        })
    }

    pub fn controller(&self) -> &ChargingRateController {
        &self.controller
    }

    pub fn orchestrator(&self) -> &CommandOrchestrator {
        &self.orchestrator
    }

    fn actuating(&self) -> bool {
        self.controller.is_enabled() && self.vehicle_enabled && !self.dry_run
    }

    /// Start from a safe 0 A and adopt whatever the vehicle reports without waking it
    pub async fn initialize(&mut self) {
        if self.dry_run {
            self.logger
                .info("🚀 Running in DRY-RUN mode - monitoring only, no charging control");
        } else {
            self.logger
                .info("🚀 Running in CONTROL mode - will actively control vehicle charging");
        }
        if !self.vehicle_enabled {
            return;
        }
        match self.orchestrator.sync_vehicle_state().await {
            Ok(Some(state)) => {
                let charging = state.charging_state.is_some_and(|s| s.is_active());
                let amps = state.charge_amps.map(|a| a.round().max(0.0) as u32);
                self.controller.sync_with_actual_state(amps, charging);
                self.logger.info(&format!(
                    "Vehicle data available on startup: SOC={:?}%, State={:?}",
                    state.battery_level, state.charging_state
                ));
            }
            Ok(None) => self
                .logger
                .info("Vehicle sleeping on startup - will check only when solar surplus appears"),
            Err(e) => self.logger.info(&format!(
                "Vehicle not accessible on startup: {} - will check only when solar surplus appears",
                e
            )),
        }
    }

    pub fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::SetPolicy(kind) => self.controller.set_policy(kind),
        }
    }

    pub async fn cycle(&mut self, snapshot: &EnergySnapshot) -> CycleReport {
        self.cycles += 1;
        let metrics = snapshot.metrics;
        let surplus = metrics
            .solar_power
            .is_some_and(|solar| solar > self.surplus_threshold_w);

        let target_amps = if surplus {
            self.controller.calculate(&metrics)
        } else {
            self.orchestrator.reset_surplus_event();
            0
        };

        let outcome = if self.actuating() {
            let policy = self.controller.policy().clone();
            Some(self.orchestrator.apply(target_amps, &metrics, &policy).await)
        } else {
            if self.dry_run && target_amps > 0 {
                self.logger.info(&format!(
                    "DRY-RUN: Would set vehicle charging to {}A",
                    target_amps
                ));
            }
            None
        };

        if let Some(outcome) = &outcome {
            self.log_outcome(outcome);
        }
        let report = CycleReport {
            surplus,
            target_amps,
            outcome,
        };
        self.write_metrics(snapshot, &report);
        report
    }

    fn log_outcome(&self, outcome: &CommandOutcome) {
        for action in &outcome.actions_taken {
            self.logger.info(&format!("🔋 VEHICLE CONTROL: {}", action));
        }
        for warning in &outcome.warnings {
            self.logger.warn(&format!("⚠️  VEHICLE CONTROL: {}", warning));
        }
        for error in &outcome.errors {
            self.logger.error(&format!("❌ VEHICLE CONTROL: {}", error));
        }
    }

    fn write_metrics(&self, snapshot: &EnergySnapshot, report: &CycleReport) {
        if !self.metrics.is_enabled() {
            return;
        }
        let now = self.clock.now();
        let estimate = &snapshot.soc_estimate;
        let has_estimate = estimate.source != EstimateSource::NoData;
        let cache = self.orchestrator.cache();

        let mut notes = Vec::new();
        if self.dry_run {
            notes.push("dry-run".to_string());
        }
        if !report.surplus {
            notes.push("no surplus".to_string());
        }
        if let Some(outcome) = &report.outcome {
            notes.extend(outcome.errors.iter().cloned());
        }

        let row = MetricsRow {
            timestamp: now.to_rfc3339(),
            home_batt_soc_percent: snapshot.raw.battery_soc,
            home_batt_soc_realtime_percent: has_estimate.then_some(estimate.estimated_soc),
            home_batt_soc_confidence: has_estimate.then_some(estimate.confidence),
            home_batt_soc_source: Some(estimate.source.to_string()),
            home_batt_charging_rate_pct_per_hour: snapshot.charging_rate_percent_per_hour,
            home_batt_power_w: snapshot.raw.battery_power,
            grid_power_flow_w: snapshot.raw.grid_power_flow,
            solar_power_w: snapshot.raw.solar_power,
            ev_charging_amps: report.target_amps,
            ev_policy: self.controller.policy_name().to_string(),
            ev_soc_percent: cache.soc,
            ev_charging_state: cache.charging_state.map(|s| s.to_string()),
            notes: notes.join("; "),
        };
        self.metrics.log(now, &row);
    }

    pub fn status(&self, snapshot: Option<&EnergySnapshot>, last_cycle: Option<&CycleReport>) -> RuntimeStatus {
        RuntimeStatus {
            version: crate::VERSION.to_string(),
            updated_at: Some(self.clock.now()),
            dry_run: self.dry_run,
            cycles: self.cycles,
            controller: self.controller.status(),
            vehicle_cache: self.orchestrator.cache().clone(),
            surplus_charging_started: self.orchestrator.has_started_charging_this_surplus(),
            last_cycle: last_cycle.cloned(),
            snapshot: snapshot.cloned(),
        }
    }
}

pub struct Runtime {
    home: HomeMonitor,
    vehicle: VehicleLoop,
    home_interval: Duration,
    vehicle_interval: Duration,
    status_tx: watch::Sender<RuntimeStatus>,
    commands_tx: mpsc::Sender<ControlCommand>,
    commands_rx: mpsc::Receiver<ControlCommand>,
}

impl Runtime {
    pub fn new(
        config: &Config,
        source: Arc<dyn EnergySource>,
        vehicle: Arc<dyn VehicleApi>,
        wall_connector: Option<Arc<dyn WallConnector>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let timezone = config
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| EcolitError::config(format!("Unknown timezone '{}'", config.timezone)))?;
        let metrics = MetricsLogger::new(&config.metrics, timezone);
        let home = HomeMonitor::new(config, source, clock.clone())?;
        let vehicle = VehicleLoop::new(config, vehicle, wall_connector, metrics, clock)?;
        let (status_tx, _) = watch::channel(vehicle.status(None, None));
        let (commands_tx, commands_rx) = mpsc::channel(16);

        Ok(Self {
            home,
            vehicle,
            home_interval: Duration::from_secs(config.polling.home_interval_secs.max(1)),
            vehicle_interval: Duration::from_secs(config.polling.vehicle_interval_secs.max(1)),
            status_tx,
            commands_tx,
            commands_rx,
        })
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            status: self.status_tx.subscribe(),
            commands: self.commands_tx.clone(),
        }
    }

    /// Run both tasks until `shutdown` turns true
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let Runtime {
            home,
            mut vehicle,
            home_interval,
            vehicle_interval,
            status_tx,
            commands_tx,
            commands_rx,
        } = self;
        // Only external handles keep the command channel open
        drop(commands_tx);

        vehicle.initialize().await;
        status_tx.send_replace(vehicle.status(None, None));

        let (snapshot_tx, snapshot_rx) = watch::channel::<Option<EnergySnapshot>>(None);
        let home_task = tokio::spawn(home_loop(home, snapshot_tx, home_interval, shutdown.clone()));
        let vehicle_task = tokio::spawn(vehicle_loop(
            vehicle,
            snapshot_rx,
            status_tx,
            commands_rx,
            vehicle_interval,
            shutdown,
        ));

        let (home_result, vehicle_result) = tokio::join!(home_task, vehicle_task);
        home_result.map_err(|e| EcolitError::generic(format!("home task failed: {}", e)))?;
        vehicle_result.map_err(|e| EcolitError::generic(format!("vehicle task failed: {}", e)))?;
        Ok(())
    }
}

fn should_stop(changed: std::result::Result<(), watch::error::RecvError>, shutdown: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *shutdown.borrow()
}

async fn home_loop(
    mut home: HomeMonitor,
    snapshot_tx: watch::Sender<Option<EnergySnapshot>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match home.poll_once().await {
                    Ok(snapshot) => {
                        snapshot_tx.send_replace(Some(snapshot));
                    }
                    Err(e) => home.logger.warn(&format!("Home device poll failed: {}", e)),
                }
            }
            changed = shutdown.changed() => {
                if should_stop(changed, &shutdown) {
                    break;
                }
            }
        }
    }
    home.logger.info("Home monitor stopped");
}

async fn vehicle_loop(
    mut vehicle: VehicleLoop,
    snapshot_rx: watch::Receiver<Option<EnergySnapshot>>,
    status_tx: watch::Sender<RuntimeStatus>,
    mut commands_rx: mpsc::Receiver<ControlCommand>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_cycle: Option<CycleReport> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = snapshot_rx.borrow().clone();
                let Some(snapshot) = snapshot else {
                    vehicle.logger.debug("Vehicle cycle skipped - no home data available yet");
                    continue;
                };
                let report = vehicle.cycle(&snapshot).await;
                status_tx.send_replace(vehicle.status(Some(&snapshot), Some(&report)));
                last_cycle = Some(report);
            }
            Some(command) = commands_rx.recv() => {
                vehicle.handle_command(command);
                let snapshot = snapshot_rx.borrow().clone();
                status_tx.send_replace(vehicle.status(snapshot.as_ref(), last_cycle.as_ref()));
            }
            changed = shutdown.changed() => {
                if should_stop(changed, &shutdown) {
                    break;
                }
            }
        }
    }
    vehicle.logger.info("Vehicle loop stopped");
}
