//! In-memory vehicle used by the simulation harness and tests

use super::{ChargingState, PollOutcome, VehicleApi, VehicleState, WallConnector};
use crate::error::{EcolitError, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// One recorded call against a [`SimulatedVehicle`]
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleCall {
    Poll { allow_wake: bool },
    WakeUp,
    ChargeStart,
    ChargeStop,
    SetChargingAmps(u32),
}

#[derive(Debug)]
struct SimState {
    asleep: bool,
    charging_state: ChargingState,
    charge_amps: f64,
    battery_level: f64,
    wake_succeeds: bool,
    commands_succeed: bool,
    polls_fail: bool,
    /// States reported by successive polls after a wake-up
    post_wake_states: VecDeque<ChargingState>,
    calls: Vec<VehicleCall>,
}

/// Vehicle that sleeps, wakes, and follows charge commands
#[derive(Debug)]
pub struct SimulatedVehicle {
    inner: Mutex<SimState>,
}

impl SimulatedVehicle {
    /// Awake, plugged in, not charging
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SimState {
                asleep: false,
                charging_state: ChargingState::Stopped,
                charge_amps: 0.0,
                battery_level: 60.0,
                wake_succeeds: true,
                commands_succeed: true,
                polls_fail: false,
                post_wake_states: VecDeque::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn asleep(self) -> Self {
        self.lock().asleep = true;
        self
    }

    pub fn with_state(self, state: ChargingState, amps: f64) -> Self {
        {
            let mut s = self.lock();
            s.charging_state = state;
            s.charge_amps = amps;
        }
        self
    }

    pub fn with_failing_wake(self) -> Self {
        self.lock().wake_succeeds = false;
        self
    }

    pub fn with_failing_commands(self) -> Self {
        self.lock().commands_succeed = false;
        self
    }

    pub fn with_failing_polls(self) -> Self {
        self.lock().polls_fail = true;
        self
    }

    /// States reported by the polls following a wake-up, in order
    pub fn with_post_wake_states<I: IntoIterator<Item = ChargingState>>(self, states: I) -> Self {
        self.lock().post_wake_states = states.into_iter().collect();
        self
    }

    pub fn calls(&self) -> Vec<VehicleCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, call: &VehicleCall) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn poll_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, VehicleCall::Poll { .. }))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn is_asleep(&self) -> bool {
        self.lock().asleep
    }

    pub fn charging_state(&self) -> ChargingState {
        self.lock().charging_state
    }

    pub fn charge_amps(&self) -> f64 {
        self.lock().charge_amps
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn command(&self, call: VehicleCall) -> Result<(MutexGuard<'_, SimState>, bool)> {
        let mut s = self.lock();
        s.calls.push(call);
        if s.asleep {
            return Err(EcolitError::communication("vehicle unavailable: asleep"));
        }
        let ok = s.commands_succeed;
        Ok((s, ok))
    }
}

impl Default for SimulatedVehicle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VehicleApi for SimulatedVehicle {
    async fn poll_vehicle_state(&self, allow_wake: bool) -> Result<PollOutcome> {
        let mut s = self.lock();
        s.calls.push(VehicleCall::Poll { allow_wake });
        if s.polls_fail {
            return Err(EcolitError::communication("vehicle data request failed"));
        }
        if s.asleep {
            return Ok(PollOutcome {
                state: None,
                was_asleep: true,
            });
        }
        if let Some(next) = s.post_wake_states.pop_front() {
            s.charging_state = next;
        }
        Ok(PollOutcome {
            state: Some(VehicleState {
                charging_state: Some(s.charging_state),
                charge_amps: Some(s.charge_amps),
                battery_level: Some(s.battery_level),
                timestamp: Utc::now(),
            }),
            was_asleep: false,
        })
    }

    async fn wake_up(&self) -> Result<bool> {
        let mut s = self.lock();
        s.calls.push(VehicleCall::WakeUp);
        if s.wake_succeeds {
            s.asleep = false;
        }
        Ok(s.wake_succeeds)
    }

    async fn charge_start(&self) -> Result<bool> {
        let (mut s, ok) = self.command(VehicleCall::ChargeStart)?;
        if ok && s.charging_state.needs_start() && s.charging_state != ChargingState::Disconnected {
            s.charging_state = ChargingState::Charging;
        }
        Ok(ok)
    }

    async fn charge_stop(&self) -> Result<bool> {
        let (mut s, ok) = self.command(VehicleCall::ChargeStop)?;
        if ok && s.charging_state.is_active() {
            s.charging_state = ChargingState::Stopped;
        }
        Ok(ok)
    }

    async fn set_charging_amps(&self, amps: u32) -> Result<bool> {
        let (mut s, ok) = self.command(VehicleCall::SetChargingAmps(amps))?;
        if ok {
            s.charge_amps = f64::from(amps);
        }
        Ok(ok)
    }
}

/// Wall unit reporting a settable live current; `None` simulates an outage
#[derive(Debug, Default)]
pub struct SimulatedWallConnector {
    amps: Mutex<Option<f64>>,
    reads: Mutex<usize>,
}

impl SimulatedWallConnector {
    pub fn new(amps: Option<f64>) -> Self {
        Self {
            amps: Mutex::new(amps),
            reads: Mutex::new(0),
        }
    }

    pub fn set_amps(&self, amps: Option<f64>) {
        *self.amps.lock().unwrap_or_else(|e| e.into_inner()) = amps;
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl WallConnector for SimulatedWallConnector {
    async fn live_amps(&self) -> Result<f64> {
        *self.reads.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let amps = *self.amps.lock().unwrap_or_else(|e| e.into_inner());
        amps.ok_or_else(|| EcolitError::communication("wall connector unreachable"))
    }
}
