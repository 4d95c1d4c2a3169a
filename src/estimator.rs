//! Real-time home battery SOC estimation
//!
//! Official SOC readings arrive roughly every 30 minutes. Between them the
//! estimator integrates battery power to produce a fresher value together
//! with a confidence score.

use crate::clock::seconds_between;
use crate::config::HomeBatteryConfig;
use crate::error::{EcolitError, Result};
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::fmt;

/// Accumulated energy below this is treated as noise (Wh)
const ENERGY_NOISE_FLOOR_WH: f64 = 1.0;
/// Average power below this magnitude means "idle" (W)
const POWER_NOISE_FLOOR_W: f64 = 10.0;
/// Readings averaged by the rate helpers
const RECENT_READINGS: usize = 5;
/// Confidence of a frozen, too-old official value
const STALE_CONFIDENCE: f64 = 0.1;

/// Where an estimate came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EstimateSource {
    NoData,
    /// Official value older than the extrapolation cutoff
    OfficialTooOld { hours: f64 },
    PowerIntegration { hours: f64 },
    OfficialReading { hours: f64 },
}

impl fmt::Display for EstimateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimateSource::NoData => f.write_str("no_data"),
            EstimateSource::OfficialTooOld { hours } => write!(f, "official_too_old_{:.1}h", hours),
            EstimateSource::PowerIntegration { hours } => {
                write!(f, "power_integration_{:.1}h", hours)
            }
            EstimateSource::OfficialReading { hours } => write!(f, "official_reading_{:.1}h", hours),
        }
    }
}

impl Serialize for EstimateSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocEstimate {
    pub timestamp: DateTime<Utc>,
    pub estimated_soc: f64,
    /// 0..=1
    pub confidence: f64,
    pub source: EstimateSource,
    pub official_soc: Option<f64>,
    pub hours_since_official: Option<f64>,
    pub cumulative_energy_wh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargingInfo {
    pub average_power_w: f64,
    pub charging_rate_percent_per_hour: Option<f64>,
    pub time_to_full_hours: Option<f64>,
    pub is_charging: bool,
    pub is_discharging: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimatorStatus {
    pub estimated_soc: f64,
    pub confidence: f64,
    pub source: EstimateSource,
    pub official_soc: Option<f64>,
    pub cumulative_energy_wh: f64,
    pub hours_since_official: Option<f64>,
    pub charging_rate_percent_per_hour: Option<f64>,
    pub time_to_full_hours: Option<f64>,
    pub power_readings_count: usize,
    pub battery_capacity_kwh: f64,
}

pub struct SocEstimator {
    capacity_wh: f64,
    max_extrapolation_hours: f64,
    history: Duration,
    official: Option<(f64, DateTime<Utc>)>,
    last_power: Option<(DateTime<Utc>, f64)>,
    power_history: VecDeque<(DateTime<Utc>, f64)>,
    cumulative_energy_wh: f64,
    logger: StructuredLogger,
}

impl SocEstimator {
    /// Estimator with the default 2 h extrapolation cutoff and 1 h history
    pub fn new(capacity_kwh: f64) -> Result<Self> {
        Self::from_config(&HomeBatteryConfig {
            capacity_kwh,
            ..HomeBatteryConfig::default()
        })
    }

    pub fn from_config(config: &HomeBatteryConfig) -> Result<Self> {
        if !(config.capacity_kwh.is_finite() && config.capacity_kwh > 0.0) {
            return Err(EcolitError::config(format!(
                "home battery capacity must be positive, got {} kWh",
                config.capacity_kwh
            )));
        }
        let logger = get_logger("estimator");
        logger.info(&format!(
            "🔋 Real-time SoC Estimator initialized (capacity: {:.1}kWh)",
            config.capacity_kwh
        ));
        Ok(Self {
            capacity_wh: config.capacity_kwh * 1000.0,
            max_extrapolation_hours: config.max_extrapolation_hours,
            history: Duration::milliseconds((config.history_hours * 3_600_000.0) as i64),
            official: None,
            last_power: None,
            power_history: VecDeque::new(),
            cumulative_energy_wh: 0.0,
            logger,
        })
    }

    pub fn official_soc(&self) -> Option<f64> {
        self.official.map(|(soc, _)| soc)
    }

    pub fn cumulative_energy_wh(&self) -> f64 {
        self.cumulative_energy_wh
    }

    /// New authoritative reading: resets the baseline and the accumulator
    pub fn update_official_soc(&mut self, soc: f64, t: DateTime<Utc>) {
        if let Some((previous, at)) = self.official {
            let change = soc - previous;
            if change.abs() >= 0.1 {
                self.logger.info(&format!(
                    "📊 Official Home Battery SoC: {:.1}% → {:.1}% ({:+.1}% in {:.1}h)",
                    previous,
                    soc,
                    change,
                    hours_between(at, t)
                ));
            }
        }
        self.official = Some((soc, t));
        self.cumulative_energy_wh = 0.0;
    }

    /// Battery power sample (W, positive = charging)
    pub fn update_power(&mut self, watts: f64, t: DateTime<Utc>) {
        self.power_history.push_back((t, watts));
        let cutoff = t - self.history;
        while self
            .power_history
            .front()
            .is_some_and(|(at, _)| *at <= cutoff)
        {
            self.power_history.pop_front();
        }

        if let Some((previous_t, previous_w)) = self.last_power {
            let hours = hours_between(previous_t, t);
            if hours > 0.0 {
                // Trapezoid over the interval
                self.cumulative_energy_wh += (watts + previous_w) / 2.0 * hours;
            }
        }
        self.last_power = Some((t, watts));
    }

    pub fn estimated_soc(&self, t: DateTime<Utc>) -> SocEstimate {
        let Some((official, official_t)) = self.official else {
            return SocEstimate {
                timestamp: t,
                estimated_soc: 0.0,
                confidence: 0.0,
                source: EstimateSource::NoData,
                official_soc: None,
                hours_since_official: None,
                cumulative_energy_wh: self.cumulative_energy_wh,
            };
        };

        let hours = hours_between(official_t, t);
        let estimate = |estimated_soc: f64, confidence: f64, source: EstimateSource| SocEstimate {
            timestamp: t,
            estimated_soc,
            confidence,
            source,
            official_soc: Some(official),
            hours_since_official: Some(hours),
            cumulative_energy_wh: self.cumulative_energy_wh,
        };

        if hours > self.max_extrapolation_hours {
            return estimate(
                official,
                STALE_CONFIDENCE,
                EstimateSource::OfficialTooOld { hours },
            );
        }

        if self.cumulative_energy_wh.abs() > ENERGY_NOISE_FLOOR_WH {
            let stored_wh = official / 100.0 * self.capacity_wh + self.cumulative_energy_wh;
            let soc = (stored_wh / self.capacity_wh * 100.0).clamp(0.0, 100.0);

            let time_confidence = (1.0 - hours * 0.15).max(0.3);
            let energy_confidence =
                (1.0 - (self.cumulative_energy_wh / (self.capacity_wh * 0.05)).abs()).max(0.5);

            estimate(
                soc,
                (time_confidence * energy_confidence).clamp(0.0, 1.0),
                EstimateSource::PowerIntegration { hours },
            )
        } else {
            estimate(
                official,
                (1.0 - hours * 0.1).clamp(0.5, 1.0),
                EstimateSource::OfficialReading { hours },
            )
        }
    }

    fn recent_average_power(&self) -> Option<f64> {
        if self.power_history.is_empty() {
            return None;
        }
        let n = self.power_history.len().min(RECENT_READINGS);
        let sum: f64 = self.power_history.iter().rev().take(n).map(|(_, w)| w).sum();
        Some(sum / n as f64)
    }

    /// SOC change rate from recent power; `None` when idle
    pub fn charging_rate_percent_per_hour(&self) -> Option<f64> {
        let avg = self.recent_average_power()?;
        (avg.abs() > POWER_NOISE_FLOOR_W).then(|| avg / self.capacity_wh * 100.0)
    }

    /// Linear projection to `target_soc` (hours); 0 when already past it
    pub fn time_to_target_soc(&self, target_soc: f64, t: DateTime<Utc>) -> Option<f64> {
        let rate = self.charging_rate_percent_per_hour()?;
        if self.official.is_none() {
            return None;
        }
        let current = self.estimated_soc(t).estimated_soc;
        let remaining = if rate > 0.0 {
            target_soc - current
        } else {
            current - target_soc
        };
        if remaining <= 0.0 {
            return Some(0.0);
        }
        Some(remaining / rate.abs())
    }

    pub fn charging_info(&self, t: DateTime<Utc>) -> ChargingInfo {
        let average_power_w = self.recent_average_power().unwrap_or(0.0);
        let is_charging = average_power_w > POWER_NOISE_FLOOR_W;
        let time_to_full_hours = if is_charging {
            self.time_to_target_soc(100.0, t)
                .filter(|_| 100.0 - self.estimated_soc(t).estimated_soc > 0.1)
        } else {
            None
        };
        ChargingInfo {
            average_power_w,
            charging_rate_percent_per_hour: self.charging_rate_percent_per_hour(),
            time_to_full_hours,
            is_charging,
            is_discharging: average_power_w < -POWER_NOISE_FLOOR_W,
        }
    }

    pub fn status_summary(&self, t: DateTime<Utc>) -> EstimatorStatus {
        let estimate = self.estimated_soc(t);
        let info = self.charging_info(t);
        EstimatorStatus {
            estimated_soc: estimate.estimated_soc,
            confidence: estimate.confidence,
            source: estimate.source,
            official_soc: self.official_soc(),
            cumulative_energy_wh: self.cumulative_energy_wh,
            hours_since_official: estimate.hours_since_official,
            charging_rate_percent_per_hour: info.charging_rate_percent_per_hour,
            time_to_full_hours: info.time_to_full_hours,
            power_readings_count: self.power_history.len(),
            battery_capacity_kwh: self.capacity_wh / 1000.0,
        }
    }
}

fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    seconds_between(earlier, later) / 3600.0
}
