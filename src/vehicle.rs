//! Vehicle collaborator contracts
//!
//! The vendor API is an opaque async RPC set. Every call may fail or time out,
//! and a failure always means "state unknown", never "definitely off".

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod sim;
#[cfg(feature = "wall-connector")]
pub mod wall_connector;

pub use sim::{SimulatedVehicle, SimulatedWallConnector, VehicleCall};
#[cfg(feature = "wall-connector")]
pub use wall_connector::WallConnectorClient;

/// Charging state as reported by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingState {
    Disconnected,
    Stopped,
    Complete,
    Charging,
    Starting,
    NoPower,
    Unknown,
}

impl ChargingState {
    /// Vehicle is drawing (or about to draw) current
    pub fn is_active(&self) -> bool {
        matches!(self, ChargingState::Charging | ChargingState::Starting)
    }

    /// Plugged in but idle: a start command is needed
    pub fn needs_start(&self) -> bool {
        matches!(
            self,
            ChargingState::Stopped | ChargingState::Complete | ChargingState::Disconnected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargingState::Disconnected => "Disconnected",
            ChargingState::Stopped => "Stopped",
            ChargingState::Complete => "Complete",
            ChargingState::Charging => "Charging",
            ChargingState::Starting => "Starting",
            ChargingState::NoPower => "NoPower",
            ChargingState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ChargingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChargingState {
    type Err = std::convert::Infallible;

    /// Vendor strings are matched case-insensitively; anything else is `Unknown`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "disconnected" => ChargingState::Disconnected,
            "stopped" => ChargingState::Stopped,
            "complete" => ChargingState::Complete,
            "charging" => ChargingState::Charging,
            "starting" => ChargingState::Starting,
            "nopower" | "no_power" => ChargingState::NoPower,
            _ => ChargingState::Unknown,
        })
    }
}

/// Read-only snapshot of the vehicle's charge state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub charging_state: Option<ChargingState>,
    /// Requested charge current (A)
    pub charge_amps: Option<f64>,
    /// Vehicle battery level (%)
    pub battery_level: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Result of a state poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Absent when the vehicle was asleep and no data could be read
    pub state: Option<VehicleState>,
    pub was_asleep: bool,
}

/// Vendor API operations used by the orchestrator
#[async_trait::async_trait]
pub trait VehicleApi: Send + Sync {
    /// Read the charge state; `allow_wake = false` must never wake the vehicle
    async fn poll_vehicle_state(&self, allow_wake: bool) -> Result<PollOutcome>;

    async fn wake_up(&self) -> Result<bool>;

    async fn charge_start(&self) -> Result<bool>;

    async fn charge_stop(&self) -> Result<bool>;

    async fn set_charging_amps(&self, amps: u32) -> Result<bool>;
}

/// Local wall unit live telemetry
#[async_trait::async_trait]
pub trait WallConnector: Send + Sync {
    /// Current flowing to the vehicle right now (A)
    async fn live_amps(&self) -> Result<f64>;
}
