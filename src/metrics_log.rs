//! Daily CSV metrics files
//!
//! One row per vehicle cycle is appended to `<folder>/YYYYMMDD.csv`. The
//! header is only written when a file is created.

use crate::config::MetricsConfig;
use crate::error::{EcolitError, Result};
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// One metrics row; absent readings become empty cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub timestamp: String,
    pub home_batt_soc_percent: Option<f64>,
    pub home_batt_soc_realtime_percent: Option<f64>,
    pub home_batt_soc_confidence: Option<f64>,
    pub home_batt_soc_source: Option<String>,
    pub home_batt_charging_rate_pct_per_hour: Option<f64>,
    pub home_batt_power_w: Option<i64>,
    pub grid_power_flow_w: Option<i64>,
    pub solar_power_w: Option<i64>,
    pub ev_charging_amps: u32,
    pub ev_policy: String,
    pub ev_soc_percent: Option<f64>,
    pub ev_charging_state: Option<String>,
    pub notes: String,
}

pub struct MetricsLogger {
    folder: Option<PathBuf>,
    timezone: Tz,
    logger: StructuredLogger,
}

impl MetricsLogger {
    pub fn new(config: &MetricsConfig, timezone: Tz) -> Self {
        let logger = get_logger("metrics");
        let folder = if config.enabled {
            logger.info(&format!("Metrics logging to {}", config.folder));
            Some(PathBuf::from(&config.folder))
        } else {
            logger.info("Metrics logging disabled");
            None
        };
        Self {
            folder,
            timezone,
            logger,
        }
    }

    pub fn disabled() -> Self {
        Self {
            folder: None,
            timezone: Tz::UTC,
            logger: get_logger("metrics"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.folder.is_some()
    }

    /// File receiving rows written at `at`
    pub fn path_for(&self, at: DateTime<Utc>) -> Option<PathBuf> {
        let folder = self.folder.as_ref()?;
        let day = at.with_timezone(&self.timezone).format("%Y%m%d");
        Some(folder.join(format!("{}.csv", day)))
    }

    /// Append a row; failures are logged and swallowed
    pub fn log(&self, at: DateTime<Utc>, row: &MetricsRow) {
        if let Err(e) = self.try_log(at, row) {
            self.logger.error(&format!("Failed to log metrics: {}", e));
        }
    }

    pub fn try_log(&self, at: DateTime<Utc>, row: &MetricsRow) -> Result<Option<PathBuf>> {
        let Some(path) = self.path_for(at) else {
            return Ok(None);
        };
        append_row(&path, row)?;
        self.logger.trace(&format!(
            "Logged metrics: SOC={:?}%, Grid={:?}W, EV={}A",
            row.home_batt_soc_percent, row.grid_power_flow_w, row.ev_charging_amps
        ));
        Ok(Some(path))
    }
}

fn append_row(path: &Path, row: &MetricsRow) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| EcolitError::io(format!("{}: {}", parent.display(), e)))?;
    }
    let is_new = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    writer.serialize(row)?;
    writer.flush()?;
    Ok(())
}
