//! Charging policies
//!
//! A policy turns the latest home energy readings into a raw EV amperage
//! proposal. Policies are pure: no I/O, no clocks. Clamping to hardware limits
//! is done by [`crate::controller::ChargingRateController`].

use crate::config::{EvChargingConfig, LegacyGridConfig, SocPolicyConfig};
use crate::error::{EcolitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vehicle hardware floor: a charging vehicle never draws less than this
pub const MIN_AMPS: u32 = 6;

/// One control cycle's view of the home energy system
///
/// Any reading may be absent when its sensor is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyMetrics {
    /// Home battery state of charge (%)
    pub battery_soc: Option<f64>,
    /// Home battery power (W, positive = charging, negative = discharging)
    pub battery_power: Option<i64>,
    /// Grid flow (W, positive = import, negative = export)
    pub grid_power_flow: Option<i64>,
    /// Solar production (W)
    pub solar_power: Option<i64>,
}

/// Selectable policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Home battery first; the EV only gets real surplus
    #[default]
    Eco,
    /// Lower home battery floor
    Hurry,
    /// Manual override: always maximum current
    Emergency,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] = [PolicyKind::Eco, PolicyKind::Hurry, PolicyKind::Emergency];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Eco => "ECO",
            PolicyKind::Hurry => "HURRY",
            PolicyKind::Emergency => "EMERGENCY",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = EcolitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eco" => Ok(PolicyKind::Eco),
            "hurry" => Ok(PolicyKind::Hurry),
            "emergency" => Ok(PolicyKind::Emergency),
            other => Err(EcolitError::validation(
                "policy",
                format!(
                    "Unknown charging policy: {}. Available: eco, hurry, emergency",
                    other
                ),
            )),
        }
    }
}

/// Thresholds of an SOC-following policy (Eco or Hurry)
#[derive(Debug, Clone, PartialEq)]
pub struct SocFollowing {
    pub target_soc: f64,
    pub full_soc: f64,
    pub step_amps: u32,
    pub window_soc: f64,
    pub battery_threshold_w: i64,
    pub legacy: LegacyGrid,
}

/// Grid-flow rule used only when the home battery reports neither SOC nor power
///
/// Grid flow and battery power use different sign conventions and deadbands;
/// this branch is kept separate from the battery-feedback rule so the two
/// never mix.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyGrid {
    pub export_threshold_w: i64,
    pub increase_step: u32,
    pub decrease_step: u32,
}

impl From<&LegacyGridConfig> for LegacyGrid {
    fn from(cfg: &LegacyGridConfig) -> Self {
        Self {
            export_threshold_w: cfg.export_threshold_w,
            increase_step: cfg.increase_step,
            decrease_step: cfg.decrease_step,
        }
    }
}

/// A configured policy
#[derive(Debug, Clone, PartialEq)]
pub struct ChargingPolicy {
    kind: PolicyKind,
    max_amps: u32,
    rule: Rule,
}

#[derive(Debug, Clone, PartialEq)]
enum Rule {
    SocFollowing(SocFollowing),
    Emergency,
}

impl ChargingPolicy {
    /// Build the policy `kind` from the charging configuration
    pub fn from_config(kind: PolicyKind, cfg: &EvChargingConfig) -> Self {
        let soc_following = |p: &SocPolicyConfig| {
            Rule::SocFollowing(SocFollowing {
                target_soc: p.target_soc,
                full_soc: p.full_soc,
                step_amps: p.step_amps,
                window_soc: p.window_soc,
                battery_threshold_w: cfg.battery_charging_threshold_w,
                legacy: LegacyGrid::from(&cfg.legacy_grid),
            })
        };
        let rule = match kind {
            PolicyKind::Eco => soc_following(&cfg.eco),
            PolicyKind::Hurry => soc_following(&cfg.hurry),
            PolicyKind::Emergency => Rule::Emergency,
        };
        Self {
            kind,
            max_amps: cfg.max_amps,
            rule,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn max_amps(&self) -> u32 {
        self.max_amps
    }

    /// Raw target for the next cycle
    ///
    /// May be below [`MIN_AMPS`] (e.g. one step up from zero); the controller
    /// rounds such values up.
    pub fn calculate_target_amps(&self, current_amps: u32, metrics: &EnergyMetrics) -> u32 {
        match &self.rule {
            Rule::Emergency => self.max_amps,
            Rule::SocFollowing(p) => self.soc_following_target(p, current_amps, metrics),
        }
    }

    /// Whether conditions currently favor charging
    ///
    /// While open the vehicle state is re-synced every cycle.
    pub fn charging_window_open(&self, metrics: &EnergyMetrics) -> bool {
        match &self.rule {
            Rule::Emergency => true,
            Rule::SocFollowing(p) => metrics.battery_soc.is_some_and(|soc| soc > p.window_soc),
        }
    }

    fn soc_following_target(
        &self,
        p: &SocFollowing,
        current: u32,
        metrics: &EnergyMetrics,
    ) -> u32 {
        let (soc, power) = match (metrics.battery_soc, metrics.battery_power) {
            (Some(soc), power) => (soc, power),
            (None, Some(_)) => return current,
            (None, None) => return self.legacy_grid_target(&p.legacy, current, metrics),
        };

        if soc < p.target_soc {
            return 0;
        }

        let Some(power) = power else {
            return current;
        };

        if power > p.battery_threshold_w {
            // Battery still absorbing surplus
            (current + p.step_amps).min(self.max_amps)
        } else if power < -p.battery_threshold_w {
            // Battery discharging into the EV
            if current <= MIN_AMPS {
                0
            } else {
                current.saturating_sub(p.step_amps).max(MIN_AMPS)
            }
        } else if soc >= p.full_soc {
            // Full and idle: nothing left to absorb surplus but the EV
            self.max_amps
        } else {
            current
        }
    }

    fn legacy_grid_target(&self, legacy: &LegacyGrid, current: u32, metrics: &EnergyMetrics) -> u32 {
        let Some(grid) = metrics.grid_power_flow else {
            return current;
        };
        let target = if grid < -legacy.export_threshold_w {
            current.saturating_add(legacy.increase_step)
        } else if grid >= 0 {
            current.saturating_sub(legacy.decrease_step)
        } else {
            current
        };
        target.min(self.max_amps)
    }
}
