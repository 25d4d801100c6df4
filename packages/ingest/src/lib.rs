#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Library for the traffic event ingestion driver: builds the configured
//! discovery engine and runs it pass after pass against the durable event
//! list.

pub mod config;
pub mod shutdown;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use traffic_sweep_database::{DbError, EventStore};
use traffic_sweep_discover::grid::GridPoller;
use traffic_sweep_discover::sweep::SweepDiscovery;
use traffic_sweep_discover::{DiscoverError, Discovery};
use traffic_sweep_discover_models::DiscoveryMode;
use traffic_sweep_geocoder::{
    FallbackGeocoder, GeocodeError, ReverseGeocoder, ServiceChainGeocoder, service_registry,
};
use traffic_sweep_geography_models::{BoundingBox, Coordinate};
use traffic_sweep_ingest_models::{EventStats, SessionSummary};
use traffic_sweep_scraper::panner::PanSettings;
use traffic_sweep_scraper::simulated::{SimulatedSurface, lattice};
use traffic_sweep_scraper::webdriver::WebDriverSurface;
use traffic_sweep_scraper::{MapSurface, SurfaceError};
use traffic_sweep_source::SourceError;
use traffic_sweep_source::progress::ProgressCallback;
use traffic_sweep_source::telemetry::TelemetryClient;
use traffic_sweep_spatial::GridError;

use crate::config::IngestConfig;
use crate::shutdown::Shutdown;

/// Errors that stop the ingestion driver.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A discovery pass failed beyond recovery.
    #[error(transparent)]
    Discover(#[from] DiscoverError),

    /// The event list could not be read or written.
    #[error(transparent)]
    Store(#[from] DbError),

    /// The map surface could not be opened.
    #[error(transparent)]
    Surface(#[from] SurfaceError),

    /// The telemetry client could not be built.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The geocoder could not be built.
    #[error(transparent)]
    Geocode(#[from] GeocodeError),
}

/// Builds the in-memory map used by simulated runs.
///
/// The map starts at the south-west corner of the bounds, so every run
/// exercises positioning, and holds a lattice of incidents spaced
/// `simulate.lattice_spacing` apart.
#[must_use]
pub fn simulated_surface(config: &IngestConfig) -> SimulatedSurface {
    let bounds = &config.bounds;
    let step = config.simulate.step_degrees;
    let incidents = lattice(bounds, config.simulate.lattice_spacing);

    log::info!(
        "Simulating a map with {} incidents over {bounds}",
        incidents.len()
    );

    SimulatedSurface::new(Coordinate::new(bounds.lat_min, bounds.lon_min), step, step)
        .with_incidents(incidents)
}

/// Builds the reverse geocoder the grid poller uses.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP client cannot be built.
pub fn build_geocoder(config: &IngestConfig) -> Result<Arc<dyn ReverseGeocoder>, GeocodeError> {
    if !config.grid.geocode {
        log::info!("Reverse geocoding disabled, using coordinate addresses");
        return Ok(Arc::new(FallbackGeocoder));
    }

    let services = if config.geocoder.services.is_empty() {
        service_registry::enabled_services()
    } else {
        service_registry::services_by_id(&config.geocoder.services)
    };
    Ok(Arc::new(ServiceChainGeocoder::new(
        services,
        config.geocoder_timeout(),
    )?))
}

/// Builds the discovery engine selected by `config.mode`.
///
/// Sweep mode opens a WebDriver session unless `simulate` is set, in
/// which case it drives [`simulated_surface`] with no waits.
///
/// # Errors
///
/// Returns [`IngestError`] if the surface, telemetry client or geocoder
/// cannot be created.
pub async fn build_discovery(
    config: &IngestConfig,
    simulate: bool,
    cancelled: Arc<AtomicBool>,
    progress: Arc<dyn ProgressCallback>,
) -> Result<Box<dyn Discovery>, IngestError> {
    match config.mode {
        DiscoveryMode::Sweep => {
            let surface: Box<dyn MapSurface> = if simulate {
                Box::new(simulated_surface(config))
            } else {
                log::info!("Connecting to WebDriver at {}", config.webdriver.endpoint);
                Box::new(WebDriverSurface::connect(config.webdriver.clone()).await?)
            };
            let pan = if simulate {
                PanSettings::instant()
            } else {
                config.pan
            };
            let discovery =
                SweepDiscovery::new(surface, config.sweep, pan, config.extractor, cancelled)
                    .with_progress(progress);
            Ok(Box::new(discovery))
        }
        DiscoveryMode::Grid => {
            let source = Arc::new(TelemetryClient::new(config.telemetry.clone())?);
            let geocoder = build_geocoder(config)?;
            let poller = GridPoller::new(source, geocoder, config.grid, cancelled)
                .with_progress(progress);
            Ok(Box::new(poller))
        }
    }
}

/// Runs `discovery` pass after pass until shutdown is requested, or for
/// a single pass when `once` is set.
///
/// The event list is reloaded before every pass and saved once more on
/// the way out, whatever the outcome. An error from a pass stops the
/// loop and is returned after that final save.
///
/// # Errors
///
/// Returns [`IngestError`] if the event list cannot be loaded or a pass
/// fails beyond recovery.
pub async fn run_discovery(
    config: &IngestConfig,
    discovery: &mut dyn Discovery,
    shutdown: &Shutdown,
    once: bool,
) -> Result<SessionSummary, IngestError> {
    let path = config.output_path();
    let mut store = EventStore::load(&path, config.repetition_cap())?;
    let mut summary = SessionSummary::new(discovery.mode(), path);

    log::info!(
        "Starting {} discovery over {} ({} events loaded, cap {})",
        discovery.mode(),
        config.bounds,
        store.len(),
        config.repetition_cap()
    );

    let result = drive(config, discovery, &mut store, &mut summary, shutdown, once).await;

    if let Err(e) = store.save() {
        log::error!("Final save to {} failed: {e}", store.path().display());
    }
    if let Err(e) = discovery.shutdown().await {
        log::warn!("Discovery shutdown failed: {e}");
    }

    summary.events = store.len();
    summary.unique_fingerprints = store.ledger().unique_fingerprints();
    log::info!("{summary}");

    result.map(|()| summary)
}

async fn drive(
    config: &IngestConfig,
    discovery: &mut dyn Discovery,
    store: &mut EventStore,
    summary: &mut SessionSummary,
    shutdown: &Shutdown,
    once: bool,
) -> Result<(), IngestError> {
    discovery.prepare().await?;

    loop {
        if shutdown.is_requested() {
            return Ok(());
        }

        store.reload()?;
        log::info!(
            "Pass {} starting with {} events ({} unique)",
            summary.passes() + 1,
            store.len(),
            store.ledger().unique_fingerprints()
        );

        let report = discovery.run_pass(&config.bounds, store).await?;
        log::info!("{report}");
        summary.record(&report);

        if once || shutdown.is_requested() {
            return Ok(());
        }

        log::info!(
            "Waiting {}s before the next pass",
            config.sleep_between_passes_secs
        );
        if !shutdown.sleep(config.sleep_between_passes()).await {
            return Ok(());
        }
    }
}

/// Statistics over the event list at `path`.
///
/// # Errors
///
/// Returns [`DbError`] if the file exists but cannot be read.
pub fn event_stats(path: &Path) -> Result<EventStats, DbError> {
    let store = EventStore::load(path, u32::MAX)?;
    Ok(EventStats::from_events(store.events()))
}

/// The cells one grid cycle over `bounds` would poll.
///
/// # Errors
///
/// Returns [`GridError`] if `grid_size` is invalid or the grid is too
/// large.
pub fn grid_cells(bounds: &BoundingBox, grid_size: f64) -> Result<Vec<BoundingBox>, GridError> {
    traffic_sweep_spatial::grid_cells(bounds, grid_size)
}
