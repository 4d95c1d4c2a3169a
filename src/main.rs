use anyhow::{Context, Result};
use ecolit::clock::{Clock, SystemClock};
use ecolit::config::Config;
use ecolit::replay::{CsvReplaySource, EnergySource};
use ecolit::runtime::Runtime;
use ecolit::vehicle::{SimulatedVehicle, VehicleApi, WallConnector};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;
    ecolit::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Ecolit {} starting up", ecolit::VERSION);

    let replay_path = config
        .source
        .replay_csv
        .clone()
        .context("source.replay_csv must point at a CSV file of energy readings")?;
    let source: Arc<dyn EnergySource> = Arc::new(
        CsvReplaySource::from_path(&replay_path, config.source.replay_loop)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", replay_path, e))?,
    );

    // No vendor client ships with the binary; drive the simulated vehicle
    let vehicle: Arc<dyn VehicleApi> = Arc::new(SimulatedVehicle::new());
    if config.vehicle.enabled {
        warn!("Vehicle control runs against the simulated vehicle");
    }
    let wall_connector = build_wall_connector(&config)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let runtime = Runtime::new(&config, source, vehicle, wall_connector, clock)
        .map_err(|e| anyhow::anyhow!("Failed to create runtime: {}", e))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    #[cfg(feature = "web")]
    let web_task = if config.web.enabled {
        let state = ecolit::web::AppState {
            runtime: runtime.handle(),
            config: Arc::new(config.clone()),
        };
        let web = config.web.clone();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = ecolit::web::serve(&web, state, shutdown).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        None
    };

    let control = tokio::spawn(runtime.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    let result = control.await;
    #[cfg(feature = "web")]
    {
        if let Some(task) = web_task {
            let _ = task.await;
        }
    }

    match result {
        Ok(Ok(())) => {
            info!("Ecolit shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => Err(anyhow::anyhow!("Control loop error: {}", e)),
        Err(e) => Err(anyhow::anyhow!("Control loop task failed: {}", e)),
    }
}

#[cfg(feature = "wall-connector")]
fn build_wall_connector(config: &Config) -> Result<Option<Arc<dyn WallConnector>>> {
    let Some(wc) = &config.vehicle.wall_connector else {
        return Ok(None);
    };
    let client = ecolit::vehicle::WallConnectorClient::new(wc)
        .map_err(|e| anyhow::anyhow!("Failed to create wall connector client: {}", e))?;
    info!("Wall connector telemetry from {}", client.base_url());
    Ok(Some(Arc::new(client)))
}

#[cfg(not(feature = "wall-connector"))]
fn build_wall_connector(config: &Config) -> Result<Option<Arc<dyn WallConnector>>> {
    if config.vehicle.wall_connector.is_some() {
        warn!("vehicle.wall_connector is configured but the wall-connector feature is disabled");
    }
    Ok(None)
}
