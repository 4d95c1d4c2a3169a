use super::WallConnector;
use crate::config::WallConnectorConfig;
use crate::error::{EcolitError, Result};
use crate::logging::{StructuredLogger, get_logger};
use serde::Deserialize;
use std::time::Duration;

/// Subset of `GET /api/1/vitals`
#[derive(Debug, Clone, Deserialize)]
pub struct Vitals {
    #[serde(default)]
    pub vehicle_connected: bool,
    #[serde(default)]
    pub contactor_closed: bool,
    #[serde(default)]
    pub vehicle_current_a: f64,
    #[serde(default)]
    pub grid_v: f64,
    #[serde(default)]
    pub session_energy_wh: f64,
}

/// HTTP client for a Gen 3 wall connector on the local network
pub struct WallConnectorClient {
    base_url: String,
    client: reqwest::Client,
    logger: StructuredLogger,
}

impl WallConnectorClient {
    pub fn new(config: &WallConnectorConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(EcolitError::config("wall connector host cannot be empty"));
        }
        let base_url = if config.port == 80 {
            format!("http://{}", config.host.trim())
        } else {
            format!("http://{}:{}", config.host.trim(), config.port)
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            base_url,
            client,
            logger: get_logger("wall_connector"),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn vitals(&self) -> Result<Vitals> {
        let url = format!("{}/api/1/vitals", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            self.logger
                .warn(&format!("Wall Connector API error: HTTP {}", resp.status()));
            return Err(EcolitError::communication(format!(
                "wall connector returned HTTP {}",
                resp.status()
            )));
        }
        Ok(resp.json::<Vitals>().await?)
    }
}

#[async_trait::async_trait]
impl WallConnector for WallConnectorClient {
    async fn live_amps(&self) -> Result<f64> {
        let vitals = self.vitals().await?;
        self.logger.debug(&format!(
            "Wall connector vitals: connected={}, contactor={}, current={:.1}A",
            vitals.vehicle_connected, vitals.contactor_closed, vitals.vehicle_current_a
        ));
        Ok(vitals.vehicle_current_a)
    }
}
