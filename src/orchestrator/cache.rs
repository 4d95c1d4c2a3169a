use crate::clock::seconds_between;
use crate::vehicle::{ChargingState, VehicleState};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Last known vehicle charge state, kept to avoid remote calls
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocalVehicleStateCache {
    pub soc: Option<f64>,
    pub charging_state: Option<ChargingState>,
    pub current_amps: Option<f64>,
    /// Last full remote sync; `None` until the first successful poll
    pub last_sync: Option<DateTime<Utc>>,
}

impl LocalVehicleStateCache {
    pub fn is_empty(&self) -> bool {
        self.last_sync.is_none()
    }

    pub fn sync_from(&mut self, state: &VehicleState, now: DateTime<Utc>) {
        self.soc = state.battery_level;
        self.charging_state = state.charging_state;
        self.current_amps = state.charge_amps;
        self.last_sync = Some(now);
    }

    pub fn sync_due(&self, now: DateTime<Utc>, interval_secs: u64) -> bool {
        match self.last_sync {
            None => true,
            Some(t) => {
                let elapsed = seconds_between(t, now);
                elapsed < 0.0 || elapsed >= interval_secs as f64
            }
        }
    }

    /// Cached state as a vehicle snapshot
    pub fn as_vehicle_state(&self) -> Option<VehicleState> {
        self.last_sync.map(|timestamp| VehicleState {
            charging_state: self.charging_state,
            charge_amps: self.current_amps,
            battery_level: self.soc,
            timestamp,
        })
    }

    pub fn record_started(&mut self) {
        self.charging_state = Some(ChargingState::Charging);
    }

    pub fn record_stopped(&mut self) {
        self.charging_state = Some(ChargingState::Stopped);
        self.current_amps = Some(0.0);
    }

    pub fn record_amps(&mut self, amps: u32) {
        self.current_amps = Some(f64::from(amps));
    }
}
