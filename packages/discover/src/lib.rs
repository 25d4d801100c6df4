#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Discovery engines for traffic events.
//!
//! Two engines cover a bounding rectangle and feed the event store:
//!
//! * [`sweep::SweepDiscovery`] pans a live map in a serpentine and reads
//!   every marker it sees, with stall detection and reflection jumps.
//! * [`grid::GridPoller`] splits the rectangle into cells and asks the
//!   telemetry endpoint for each cell's alerts.
//!
//! Both implement [`Discovery`], so the driver loop does not care which
//! one a deployment runs.

pub mod grid;
pub mod sweep;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use traffic_sweep_database::{DbError, EventStore};
use traffic_sweep_discover_models::{DiscoveryMode, PassReport};
use traffic_sweep_geography_models::BoundingBox;
use traffic_sweep_scraper::SurfaceError;
use traffic_sweep_spatial::GridError;

/// Errors that end a discovery pass.
///
/// Anything recoverable is handled inside the pass and shows up in its
/// [`PassReport`] instead.
#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    /// The engine cannot continue.
    #[error("Fatal discovery error: {0}")]
    Fatal(String),

    /// The map surface failed structurally.
    #[error("Map surface error: {0}")]
    Surface(#[from] SurfaceError),

    /// The event list could not be written.
    #[error("Event store error: {0}")]
    Store(#[from] DbError),

    /// The polling grid could not be built.
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),
}

/// A way of covering a rectangle and feeding the event store.
#[async_trait]
pub trait Discovery: Send {
    /// Which engine this is.
    fn mode(&self) -> DiscoveryMode;

    /// One-time setup before the first pass.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoverError`] if the engine cannot start.
    async fn prepare(&mut self) -> Result<(), DiscoverError> {
        Ok(())
    }

    /// Covers `bounds` once, admitting records into `store`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoverError`] for failures the engine cannot recover
    /// from; the store keeps everything saved up to that point.
    async fn run_pass(
        &mut self,
        bounds: &BoundingBox,
        store: &mut EventStore,
    ) -> Result<PassReport, DiscoverError>;

    /// Releases external resources.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoverError`] if the release fails.
    async fn shutdown(&mut self) -> Result<(), DiscoverError> {
        Ok(())
    }
}

pub(crate) fn is_cancelled(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}
