//! Recorded energy data: a CSV-backed energy source and policy replay

use crate::clock::ManualClock;
use crate::config::EvChargingConfig;
use crate::controller::ChargingRateController;
use crate::error::{EcolitError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::policy::{EnergyMetrics, PolicyKind};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Home energy readings, one snapshot per poll
#[async_trait::async_trait]
pub trait EnergySource: Send + Sync {
    async fn poll(&self) -> Result<EnergyMetrics>;
}

/// CSV columns; the metrics file names are accepted as aliases so daily
/// metrics files can be replayed directly
#[derive(Debug, Deserialize)]
struct ReplayRow {
    #[serde(default, alias = "home_batt_soc_percent")]
    battery_soc: Option<f64>,
    #[serde(default, alias = "home_batt_power_w")]
    battery_power_w: Option<f64>,
    #[serde(default, alias = "grid_power_flow_w")]
    grid_power_w: Option<f64>,
    #[serde(default)]
    solar_power_w: Option<f64>,
}

impl From<ReplayRow> for EnergyMetrics {
    fn from(row: ReplayRow) -> Self {
        let watts = |v: Option<f64>| v.filter(|w| w.is_finite()).map(|w| w.round() as i64);
        EnergyMetrics {
            battery_soc: row.battery_soc.filter(|s| s.is_finite()),
            battery_power: watts(row.battery_power_w),
            grid_power_flow: watts(row.grid_power_w),
            solar_power: watts(row.solar_power_w),
        }
    }
}

pub struct CsvReplaySource {
    rows: Vec<EnergyMetrics>,
    next: AtomicUsize,
    looping: bool,
    logger: StructuredLogger,
}

impl CsvReplaySource {
    pub fn from_path<P: AsRef<Path>>(path: P, looping: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| EcolitError::io(format!("{}: {}", path.display(), e)))?;
        let source = Self::from_reader(file, looping)?;
        source.logger.info(&format!(
            "Loaded {} energy readings from {}",
            source.len(),
            path.display()
        ));
        Ok(source)
    }

    pub fn from_reader<R: Read>(reader: R, looping: bool) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let rows = csv_reader
            .deserialize::<ReplayRow>()
            .map(|row| row.map(EnergyMetrics::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Err(EcolitError::config("replay file contains no readings"));
        }
        Ok(Self {
            rows,
            next: AtomicUsize::new(0),
            looping,
            logger: get_logger("replay"),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn readings(&self) -> &[EnergyMetrics] {
        &self.rows
    }
}

#[async_trait::async_trait]
impl EnergySource for CsvReplaySource {
    async fn poll(&self) -> Result<EnergyMetrics> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let index = if self.looping {
            index % self.rows.len()
        } else {
            index
        };
        self.rows
            .get(index)
            .copied()
            .ok_or_else(|| EcolitError::generic("replay source exhausted"))
    }
}

/// Amps chosen by one policy over a recorded series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyReplay {
    pub policy: PolicyKind,
    pub amps: Vec<u32>,
    pub charging_changes: usize,
    pub max_charging_amps: u32,
    /// Cycles with a non-zero target
    pub charging_cycles: usize,
}

/// Run a fresh controller over `series`, one reading every `step_secs`
pub fn replay_policy(
    config: &EvChargingConfig,
    policy: PolicyKind,
    series: &[EnergyMetrics],
    step_secs: f64,
) -> Result<PolicyReplay> {
    let cfg = EvChargingConfig {
        enabled: true,
        policy,
        ..config.clone()
    };
    let start = Utc
        .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| EcolitError::generic("invalid replay start time"))?;
    let clock = Arc::new(ManualClock::new(start));
    let mut controller = ChargingRateController::new(&cfg, clock.clone())?;

    let mut amps = Vec::with_capacity(series.len());
    for metrics in series {
        amps.push(controller.calculate(metrics));
        clock.advance_secs(step_secs);
    }

    let charging_changes = amps.windows(2).filter(|w| w[0] != w[1]).count();
    Ok(PolicyReplay {
        policy,
        charging_changes,
        max_charging_amps: amps.iter().copied().max().unwrap_or(0),
        charging_cycles: amps.iter().filter(|a| **a > 0).count(),
        amps,
    })
}

/// Replay every policy over the same series
pub fn compare_policies(
    config: &EvChargingConfig,
    series: &[EnergyMetrics],
    step_secs: f64,
) -> Result<Vec<PolicyReplay>> {
    PolicyKind::ALL
        .iter()
        .map(|kind| replay_policy(config, *kind, series, step_secs))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "battery_soc,battery_power_w,grid_power_w,solar_power_w\n\
                       97.0,0,-100,3000\n\
                       99.1,250.4,,4000\n\
                       ,,120,\n";

    #[tokio::test]
    async fn rows_parse_with_missing_fields() {
        let source = CsvReplaySource::from_reader(CSV.as_bytes(), false).unwrap();
        assert_eq!(source.len(), 3);

        let first = source.poll().await.unwrap();
        assert_eq!(first.battery_soc, Some(97.0));
        assert_eq!(first.grid_power_flow, Some(-100));

        let second = source.poll().await.unwrap();
        assert_eq!(second.battery_power, Some(250));
        assert_eq!(second.grid_power_flow, None);

        let third = source.poll().await.unwrap();
        assert_eq!(third.battery_soc, None);
        assert_eq!(third.grid_power_flow, Some(120));

        assert!(source.poll().await.is_err());
    }

    #[tokio::test]
    async fn looping_source_wraps() {
        let source = CsvReplaySource::from_reader(CSV.as_bytes(), true).unwrap();
        for _ in 0..3 {
            source.poll().await.unwrap();
        }
        assert_eq!(source.poll().await.unwrap().battery_soc, Some(97.0));
    }

    #[test]
    fn metrics_file_columns_are_accepted() {
        let csv = "timestamp,home_batt_soc_percent,home_batt_power_w,grid_power_flow_w,solar_power_w,ev_charging_amps\n\
                   2025-06-01T10:00:00Z,98.6,-300,50,2500,7\n";
        let source = CsvReplaySource::from_reader(csv.as_bytes(), false).unwrap();
        let r = source.readings()[0];
        assert_eq!(r.battery_soc, Some(98.6));
        assert_eq!(r.battery_power, Some(-300));
        assert_eq!(r.solar_power, Some(2500));
    }

    #[test]
    fn empty_file_is_rejected() {
        let csv = "battery_soc,battery_power_w,grid_power_w,solar_power_w\n";
        assert!(CsvReplaySource::from_reader(csv.as_bytes(), false).is_err());
    }
}
