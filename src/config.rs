//! Configuration management for Ecolit
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Every section falls back to its defaults so
//! a partial file is enough.

use crate::error::{EcolitError, Result};
use crate::policy::{MIN_AMPS, PolicyKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// EV charging policy and rate-limit configuration
    pub ev_charging: EvChargingConfig,

    /// Vehicle command orchestration
    pub vehicle: VehicleConfig,

    /// Home battery parameters for the SOC estimator
    pub home_battery: HomeBatteryConfig,

    /// Polling cadence of the two control tasks
    pub polling: PollingConfig,

    /// Energy data source
    pub source: SourceConfig,

    /// CSV metrics output
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,

    /// Timezone used to name daily metrics files
    pub timezone: String,

    /// Compute decisions but never send vehicle commands
    pub dry_run: bool,
}

/// EV charging controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvChargingConfig {
    /// Whether the controller produces non-zero targets at all
    pub enabled: bool,

    /// Active policy at start-up
    pub policy: PolicyKind,

    /// Upper amperage bound
    pub max_amps: u32,

    /// Minimum seconds between policy evaluations
    pub adjustment_interval_secs: u64,

    /// Minimum seconds between recorded measurements
    pub measurement_interval_secs: u64,

    /// Home battery power deadband in watts
    pub battery_charging_threshold_w: i64,

    pub eco: SocPolicyConfig,

    pub hurry: SocPolicyConfig,

    /// Grid-flow fallback used only when battery telemetry is missing
    pub legacy_grid: LegacyGridConfig,
}

/// Thresholds for one SOC-following policy
///
/// A section in a file must be complete; omitting it keeps the defaults of
/// that policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocPolicyConfig {
    /// Below this home battery SOC the EV gets nothing
    pub target_soc: f64,

    /// At or above this SOC the home battery is considered full
    pub full_soc: f64,

    /// Amps added or removed per adjustment
    pub step_amps: u32,

    /// SOC above which the vehicle cache is refreshed every cycle
    pub window_soc: f64,
}

/// Legacy grid-flow fallback thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyGridConfig {
    /// Export (W) beyond which amps are increased
    pub export_threshold_w: i64,

    pub increase_step: u32,

    pub decrease_step: u32,
}

/// Vehicle orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Whether vehicle commands are issued
    pub enabled: bool,

    /// Minimum seconds between wake-up attempts
    pub wake_interval_secs: u64,

    /// Minimum seconds between start/stop commands
    pub charge_command_interval_secs: u64,

    /// Minimum seconds between set-amps commands
    pub amps_command_interval_secs: u64,

    /// Seconds between full vehicle state syncs outside the charging window
    pub sync_interval_secs: u64,

    /// Seconds to wait after a wake-up before polling again
    pub wake_settle_secs: f64,

    /// Re-polls after a wake-up while waiting for the charger to be detected
    pub charger_detection_attempts: u32,

    /// Timeout applied to every vendor call
    pub command_timeout_secs: u64,

    /// Amps difference below which no set-amps command is sent
    pub amps_tolerance: f64,

    /// Optional local wall connector used to avoid wake-ups
    pub wall_connector: Option<WallConnectorConfig>,
}

/// Wall connector endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallConnectorConfig {
    pub host: String,

    #[serde(default = "default_wall_connector_port")]
    pub port: u16,

    #[serde(default = "default_wall_connector_timeout")]
    pub timeout_secs: u64,
}

fn default_wall_connector_port() -> u16 {
    80
}

fn default_wall_connector_timeout() -> u64 {
    5
}

/// Home battery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeBatteryConfig {
    /// Usable capacity in kWh
    pub capacity_kwh: f64,

    /// Hours after an official reading beyond which no extrapolation happens
    pub max_extrapolation_hours: f64,

    /// Hours of power history kept for trend analysis
    pub history_hours: f64,

    /// Minimum confidence for the realtime estimate to replace the official SOC
    pub realtime_confidence_threshold: f64,
}

/// Polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Home device polling interval in seconds
    pub home_interval_secs: u64,

    /// Vehicle decision/command interval in seconds
    pub vehicle_interval_secs: u64,

    /// Solar production (W) above which a surplus event is active
    pub surplus_threshold_w: i64,
}

/// Energy data source
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SourceConfig {
    /// CSV file replayed as device readings
    pub replay_csv: Option<String>,

    /// Restart from the first row when the file is exhausted
    pub replay_loop: bool,
}

/// Metrics CSV configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Directory receiving one CSV file per day
    pub folder: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the rotated files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to write a log file at all
    pub file_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,

    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Load configuration from the environment or default locations
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os("ECOLIT_CONFIG") {
            return Self::from_file(path);
        }

        let default_paths = ["ecolit.yaml", "config.yaml", "/etc/ecolit/config.yaml"];
        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let ev = &self.ev_charging;
        if ev.max_amps < MIN_AMPS {
            return Err(EcolitError::validation(
                "ev_charging.max_amps",
                format!("Must be at least {} A", MIN_AMPS),
            ));
        }
        if ev.battery_charging_threshold_w < 0 {
            return Err(EcolitError::validation(
                "ev_charging.battery_charging_threshold_w",
                "Must not be negative",
            ));
        }
        validate_soc_policy("ev_charging.eco", &ev.eco)?;
        validate_soc_policy("ev_charging.hurry", &ev.hurry)?;
        if ev.legacy_grid.increase_step == 0 || ev.legacy_grid.decrease_step == 0 {
            return Err(EcolitError::validation(
                "ev_charging.legacy_grid",
                "Step sizes must be greater than 0",
            ));
        }
        if ev.adjustment_interval_secs == 0 || ev.measurement_interval_secs == 0 {
            return Err(EcolitError::validation(
                "ev_charging",
                "Intervals must be greater than 0",
            ));
        }

        let v = &self.vehicle;
        if v.wake_interval_secs == 0
            || v.charge_command_interval_secs == 0
            || v.amps_command_interval_secs == 0
            || v.sync_interval_secs == 0
        {
            return Err(EcolitError::validation(
                "vehicle",
                "Intervals must be greater than 0",
            ));
        }
        if v.charger_detection_attempts == 0 {
            return Err(EcolitError::validation(
                "vehicle.charger_detection_attempts",
                "Must be greater than 0",
            ));
        }
        if v.command_timeout_secs == 0 {
            return Err(EcolitError::validation(
                "vehicle.command_timeout_secs",
                "Must be greater than 0",
            ));
        }
        if v.amps_tolerance < 0.0 || v.wake_settle_secs < 0.0 {
            return Err(EcolitError::validation(
                "vehicle",
                "Tolerances and delays must not be negative",
            ));
        }
        if let Some(wc) = &v.wall_connector
            && wc.host.is_empty()
        {
            return Err(EcolitError::validation(
                "vehicle.wall_connector.host",
                "Host cannot be empty",
            ));
        }

        let hb = &self.home_battery;
        if hb.capacity_kwh <= 0.0 {
            return Err(EcolitError::validation(
                "home_battery.capacity_kwh",
                "Must be positive",
            ));
        }
        if hb.max_extrapolation_hours <= 0.0 || hb.history_hours <= 0.0 {
            return Err(EcolitError::validation(
                "home_battery",
                "Extrapolation and history windows must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&hb.realtime_confidence_threshold) {
            return Err(EcolitError::validation(
                "home_battery.realtime_confidence_threshold",
                "Must be within 0..=1",
            ));
        }

        if self.polling.home_interval_secs == 0 || self.polling.vehicle_interval_secs == 0 {
            return Err(EcolitError::validation(
                "polling",
                "Intervals must be greater than 0",
            ));
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(EcolitError::validation(
                "timezone",
                format!("Unknown timezone '{}'", self.timezone),
            ));
        }

        Ok(())
    }
}

fn validate_soc_policy(field: &str, cfg: &SocPolicyConfig) -> Result<()> {
    let in_range = |v: f64| (0.0..=100.0).contains(&v);
    if !in_range(cfg.target_soc) || !in_range(cfg.full_soc) || !in_range(cfg.window_soc) {
        return Err(EcolitError::validation(
            field,
            "SOC thresholds must be within 0..=100",
        ));
    }
    if cfg.target_soc > cfg.full_soc {
        return Err(EcolitError::validation(
            field,
            "target_soc must not exceed full_soc",
        ));
    }
    if cfg.step_amps == 0 {
        return Err(EcolitError::validation(field, "step_amps must be greater than 0"));
    }
    Ok(())
}
