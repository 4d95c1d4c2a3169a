//! # Ecolit - solar-surplus EV charging controller
//!
//! Steers a remotely controlled electric vehicle's charging current so the
//! car absorbs surplus solar energy once the home battery is (nearly) full,
//! without fighting the home battery for the same energy.
//!
//! ## Architecture
//!
//! - `policy`: pure amperage rules (ECO, HURRY, EMERGENCY)
//! - `controller`: rate-limited controller wrapping the active policy
//! - `orchestrator`: wake, start, set-amps and stop against a sleeping vehicle
//! - `estimator`: realtime home battery SOC between official readings
//! - `vehicle`: vehicle and wall connector abstractions plus simulators
//! - `replay`: CSV energy readings and offline policy comparison
//! - `metrics_log`: daily CSV metrics files
//! - `runtime`: the home and vehicle control tasks
//! - `web`: status and control API

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod logging;
pub mod metrics_log;
pub mod orchestrator;
pub mod policy;
pub mod rate_limit;
pub mod replay;
pub mod runtime;
pub mod vehicle;
#[cfg(feature = "web")]
pub mod web;

/// Build version, tagged with the git sha for development builds
pub const VERSION: &str = env!("APP_VERSION");

// Re-export commonly used types
pub use config::Config;
pub use controller::ChargingRateController;
pub use error::{EcolitError, Result};
pub use estimator::SocEstimator;
pub use orchestrator::{CommandOrchestrator, CommandOutcome};
pub use policy::{ChargingPolicy, EnergyMetrics, PolicyKind};
pub use runtime::{Runtime, RuntimeHandle};
