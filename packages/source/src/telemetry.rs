//! Client for the traffic telemetry endpoint.
//!
//! One `GET` per rectangle with the rectangle's four edges as `top`,
//! `bottom`, `left` and `right`, plus the fixed `env` and `types`
//! parameters. The response is a JSON object whose `alerts` array may be
//! absent, which means no alerts.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use traffic_sweep_geography_models::BoundingBox;
use traffic_sweep_incident_models::{RawAlert, TelemetryResponse};

use crate::retry::{self, RetryPolicy};
use crate::{AlertSource, SourceError};

/// Connection settings for the telemetry endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Endpoint URL, without query string.
    pub base_url: String,
    /// Value of the `env` query parameter.
    pub env: String,
    /// Value of the `types` query parameter.
    pub types: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry policy for transient HTTP failures.
    pub retry: RetryPolicy,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.waze.com/live-map/api/georss".to_string(),
            env: "row".to_string(),
            types: "alerts".to_string(),
            timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl TelemetrySettings {
    /// Query parameters for `cell`, in the order the endpoint documents.
    #[must_use]
    pub fn query_for(&self, cell: &BoundingBox) -> Vec<(&'static str, String)> {
        vec![
            ("top", cell.lat_max.to_string()),
            ("bottom", cell.lat_min.to_string()),
            ("left", cell.lon_min.to_string()),
            ("right", cell.lon_max.to_string()),
            ("env", self.env.clone()),
            ("types", self.types.clone()),
        ]
    }
}

/// HTTP client for the telemetry endpoint.
pub struct TelemetryClient {
    client: reqwest::Client,
    settings: TelemetrySettings,
}

impl TelemetryClient {
    /// Builds a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn new(settings: TelemetrySettings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent("traffic-sweep/0.1")
            .build()?;
        Ok(Self { client, settings })
    }

    /// The settings this client was built with.
    #[must_use]
    pub const fn settings(&self) -> &TelemetrySettings {
        &self.settings
    }
}

#[async_trait]
impl AlertSource for TelemetryClient {
    fn name(&self) -> &str {
        "telemetry"
    }

    async fn fetch_alerts(&self, cell: &BoundingBox) -> Result<Vec<RawAlert>, SourceError> {
        let query = self.settings.query_for(cell);
        let response: TelemetryResponse = retry::send_json(&self.settings.retry, || {
            self.client.get(&self.settings.base_url).query(&query)
        })
        .await?;

        log::debug!("Cell {cell}: {} alerts", response.alerts.len());
        Ok(response.alerts)
    }
}
