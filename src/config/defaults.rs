use super::*;

impl SocPolicyConfig {
    /// Home battery first: only true surplus goes to the EV
    pub fn eco() -> Self {
        Self {
            target_soc: 98.5,
            full_soc: 99.0,
            step_amps: 1,
            window_soc: 95.0,
        }
    }

    /// Lower home battery floor so the EV starts earlier in the day
    pub fn hurry() -> Self {
        Self {
            target_soc: 90.0,
            full_soc: 91.0,
            step_amps: 1,
            window_soc: 85.0,
        }
    }
}

impl Default for LegacyGridConfig {
    fn default() -> Self {
        Self {
            export_threshold_w: 50,
            increase_step: 1,
            decrease_step: 2,
        }
    }
}

impl Default for EvChargingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: PolicyKind::Eco,
            max_amps: 20,
            adjustment_interval_secs: 30,
            measurement_interval_secs: 10,
            battery_charging_threshold_w: 100,
            eco: SocPolicyConfig::eco(),
            hurry: SocPolicyConfig::hurry(),
            legacy_grid: LegacyGridConfig::default(),
        }
    }
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            wake_interval_secs: 30,
            charge_command_interval_secs: 300,
            amps_command_interval_secs: 30,
            sync_interval_secs: 600,
            wake_settle_secs: 3.0,
            charger_detection_attempts: 3,
            command_timeout_secs: 10,
            amps_tolerance: 0.5,
            wall_connector: None,
        }
    }
}

impl Default for HomeBatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 12.7,
            max_extrapolation_hours: 2.0,
            history_hours: 1.0,
            realtime_confidence_threshold: 0.6,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            home_interval_secs: 10,
            vehicle_interval_secs: 10,
            surplus_threshold_w: 1000,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder: "data/ecolit/metrics".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/ecolit.log".to_string(),
            backup_count: 5,
            console_output: true,
            file_output: false,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ev_charging: EvChargingConfig::default(),
            vehicle: VehicleConfig::default(),
            home_battery: HomeBatteryConfig::default(),
            polling: PollingConfig::default(),
            source: SourceConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
            timezone: "UTC".to_string(),
            dry_run: false,
        }
    }
}
