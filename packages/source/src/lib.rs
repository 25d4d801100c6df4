#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Event sources and the plumbing shared by every collaborator that talks
//! to the outside world.
//!
//! * [`retry`] is the single bounded-retry utility. The locator polls the
//!   map's coordinate display with it and the HTTP helpers wrap every
//!   request in it.
//! * [`telemetry`] fetches raw alerts for one rectangle from the traffic
//!   telemetry endpoint.
//! * [`progress`] decouples progress reporting from any rendering backend.

pub mod progress;
pub mod retry;
pub mod telemetry;

use async_trait::async_trait;
use traffic_sweep_geography_models::BoundingBox;
use traffic_sweep_incident_models::RawAlert;

/// Errors that can occur while fetching from a remote source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Numeric status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
}

/// A provider of raw alerts for a rectangle.
///
/// Implemented by [`telemetry::TelemetryClient`]; the grid poller only
/// depends on this trait.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Returns a short identifier for log lines.
    fn name(&self) -> &str;

    /// Fetches every alert inside `cell`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request fails after all retries or
    /// the body is not a valid telemetry response.
    async fn fetch_alerts(&self, cell: &BoundingBox) -> Result<Vec<RawAlert>, SourceError>;
}
