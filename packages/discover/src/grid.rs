//! Polling discovery over a fixed grid of cells.
//!
//! Each cycle asks the telemetry endpoint for every cell of the grid once
//! and admits the returned alerts. Cells are independent: one failing
//! request only empties that cell for this cycle.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use traffic_sweep_database::{Admission, DedupLedger, EventStore};
use traffic_sweep_discover_models::{DiscoveryMode, GridSettings, PassOutcome, PassReport};
use traffic_sweep_geocoder::{ReverseGeocoder, fallback_address};
use traffic_sweep_geography_models::BoundingBox;
use traffic_sweep_incident_models::{EventRecord, NOT_AVAILABLE, RawAlert, UNKNOWN};
use traffic_sweep_source::AlertSource;
use traffic_sweep_source::progress::{ProgressCallback, null_progress};
use traffic_sweep_spatial::{GridError, grid_cells};

use crate::{DiscoverError, Discovery, is_cancelled};

/// Outcome of converting one alert.
enum Conversion {
    Record(EventRecord),
    /// Already at the cap; decided without geocoding.
    Capped,
    /// The alert carries no location.
    NoLocation,
}

/// Grid poller feeding the event store from an [`AlertSource`].
pub struct GridPoller {
    source: Arc<dyn AlertSource>,
    geocoder: Arc<dyn ReverseGeocoder>,
    settings: GridSettings,
    progress: Arc<dyn ProgressCallback>,
    cancelled: Arc<AtomicBool>,
}

impl GridPoller {
    /// Creates a poller that stops between cells once `cancelled` is set.
    #[must_use]
    pub fn new(
        source: Arc<dyn AlertSource>,
        geocoder: Arc<dyn ReverseGeocoder>,
        settings: GridSettings,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            geocoder,
            settings,
            progress: null_progress(),
            cancelled,
        }
    }

    /// Reports one unit per cell to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// The cells one cycle over `bounds` visits, in request order.
    ///
    /// # Errors
    ///
    /// Returns [`GridError`] if the grid size is invalid or the grid is
    /// too large.
    pub fn cells(&self, bounds: &BoundingBox) -> Result<Vec<BoundingBox>, GridError> {
        grid_cells(bounds, self.settings.grid_size)
    }

    /// Fetches the alerts of one cell. `None` means the request failed.
    pub async fn poll(&self, cell: &BoundingBox) -> Option<Vec<RawAlert>> {
        match self.source.fetch_alerts(cell).await {
            Ok(alerts) => {
                log::debug!("  [{}] {} alerts in {cell}", self.source.name(), alerts.len());
                Some(alerts)
            }
            Err(e) => {
                log::warn!("  [{}] Cell {cell} failed: {e}", self.source.name());
                None
            }
        }
    }

    async fn convert(&self, alert: &RawAlert, ledger: &DedupLedger) -> Conversion {
        let Some((lat, lon)) = alert.lat_lon() else {
            return Conversion::NoLocation;
        };
        let policy = self.settings.fingerprint_policy;

        if !policy.needs_address() {
            let fingerprint = policy.fingerprint(&alert.fingerprint_input(""));
            if !ledger.would_admit(&fingerprint) {
                return Conversion::Capped;
            }
        }

        let address = if self.settings.geocode {
            self.geocoder.address_for(lat, lon).await
        } else {
            fallback_address(lat, lon)
        };
        let event_id = policy.fingerprint(&alert.fingerprint_input(&address));

        Conversion::Record(EventRecord {
            event_id,
            event_type: alert.type_or_unknown().to_string(),
            address,
            report_time: alert
                .published_at()
                .map_or_else(|| NOT_AVAILABLE.to_string(), |t| t.to_rfc3339()),
            reporter: alert.report_by.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            latitude: Some(lat),
            longitude: Some(lon),
            confidence: alert.confidence,
        })
    }
}

#[async_trait]
impl Discovery for GridPoller {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::Grid
    }

    async fn run_pass(
        &mut self,
        bounds: &BoundingBox,
        store: &mut EventStore,
    ) -> Result<PassReport, DiscoverError> {
        let cells = self.cells(bounds)?;
        let mut report = PassReport::start(DiscoveryMode::Grid);
        let mut outcome = PassOutcome::Completed;

        log::info!(
            "Polling {} cells of {}° over {bounds} via {}",
            cells.len(),
            self.settings.grid_size,
            self.source.name()
        );
        self.progress.set_total(cells.len() as u64);
        self.progress.set_position(0);

        for (i, cell) in cells.iter().enumerate() {
            if is_cancelled(&self.cancelled) {
                log::warn!("Cycle cancelled after {i}/{} cells", cells.len());
                outcome = PassOutcome::Cancelled;
                break;
            }

            let Some(alerts) = self.poll(cell).await else {
                report.failed_cells += 1;
                self.progress.inc(1);
                continue;
            };

            for alert in &alerts {
                report.observed += 1;
                match self.convert(alert, store.ledger()).await {
                    Conversion::Record(record) => {
                        let summary = format!("{} | {}", record.event_type, record.address);
                        match store.admit(record) {
                            Admission::Admitted { .. } => {
                                report.admitted += 1;
                                log::info!("  -> NEW: {summary}");
                            }
                            Admission::RejectedDuplicate { .. } => report.rejected += 1,
                        }
                    }
                    Conversion::Capped => report.rejected += 1,
                    Conversion::NoLocation => {
                        report.skipped += 1;
                        log::debug!("  -> Alert without location skipped");
                    }
                }
            }

            self.progress.inc(1);
            self.progress
                .set_message(format!("{} new, {} events", report.admitted, store.len()));
        }

        store.save()?;
        let report = report.finish(outcome);
        self.progress.finish(format!("{} events saved", store.len()));
        log::info!("{report}");
        log::info!("Total events saved so far: {}", store.len());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use traffic_sweep_incident_models::AlertLocation;
    use traffic_sweep_source::SourceError;

    use super::*;

    /// Returns one alert at the centre of every cell, except cells whose
    /// southern edge is at or above `fail_from_lat`.
    struct CentreAlerts {
        fail_from_lat: f64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AlertSource for CentreAlerts {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch_alerts(&self, cell: &BoundingBox) -> Result<Vec<RawAlert>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if cell.lat_min >= self.fail_from_lat {
                return Err(SourceError::Status {
                    status: 503,
                    url: "stub".to_string(),
                });
            }
            let c = cell.center();
            Ok(vec![RawAlert {
                alert_type: Some("ACCIDENT".to_string()),
                subtype: None,
                location: Some(AlertLocation {
                    x: c.longitude,
                    y: c.latitude,
                }),
                pub_millis: Some(1_700_000_000_000),
                report_by: Some("juan".to_string()),
                confidence: Some(2),
                uuid: None,
            }])
        }
    }

    struct CountingGeocoder(AtomicUsize);

    #[async_trait]
    impl ReverseGeocoder for CountingGeocoder {
        async fn address_for(&self, lat: f64, lon: f64) -> String {
            self.0.fetch_add(1, Ordering::SeqCst);
            fallback_address(lat, lon)
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "traffic_sweep_grid_{name}_{}.json",
            std::process::id()
        ))
    }

    fn unit_square() -> BoundingBox {
        BoundingBox::new(-1.0, 1.0, -1.0, 1.0)
    }

    fn poller(
        fail_from_lat: f64,
        settings: GridSettings,
    ) -> (GridPoller, Arc<CentreAlerts>, Arc<CountingGeocoder>) {
        let source = Arc::new(CentreAlerts {
            fail_from_lat,
            calls: AtomicUsize::new(0),
        });
        let geocoder = Arc::new(CountingGeocoder(AtomicUsize::new(0)));
        let poller = GridPoller::new(
            source.clone(),
            geocoder.clone(),
            settings,
            Arc::new(AtomicBool::new(false)),
        );
        (poller, source, geocoder)
    }

    fn unit_grid() -> GridSettings {
        GridSettings {
            grid_size: 1.0,
            ..GridSettings::default()
        }
    }

    #[test]
    fn unit_square_splits_into_four_cells() {
        let (poller, _, _) = poller(f64::INFINITY, unit_grid());
        let cells = poller.cells(&unit_square()).unwrap();
        assert_eq!(
            cells,
            vec![
                BoundingBox::new(-1.0, 0.0, -1.0, 0.0),
                BoundingBox::new(-1.0, 0.0, 0.0, 1.0),
                BoundingBox::new(0.0, 1.0, -1.0, 0.0),
                BoundingBox::new(0.0, 1.0, 0.0, 1.0),
            ]
        );
    }

    #[tokio::test]
    async fn cycle_admits_each_alert_once_and_saves() {
        let path = temp_path("cycle");
        let _ = std::fs::remove_file(&path);
        let mut store = EventStore::empty(&path, 1);
        let (mut poller, source, _) = poller(f64::INFINITY, unit_grid());

        let first = poller.run_pass(&unit_square(), &mut store).await.unwrap();
        assert_eq!(first.admitted, 4);
        assert_eq!(first.failed_cells, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        let second = poller.run_pass(&unit_square(), &mut store).await.unwrap();
        assert_eq!(second.admitted, 0);
        assert_eq!(second.rejected, 4);

        let reloaded = EventStore::load(&path, 1).unwrap();
        assert_eq!(reloaded.len(), 4);
        assert_eq!(
            reloaded.events()[0].event_id,
            "ACCIDENT|-0.5000|-0.5000|1700000000000"
        );
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn failed_cells_yield_nothing_and_are_counted() {
        let path = temp_path("failed");
        let _ = std::fs::remove_file(&path);
        let mut store = EventStore::empty(&path, 1);
        let (mut poller, _, _) = poller(0.0, unit_grid());

        let report = poller.run_pass(&unit_square(), &mut store).await.unwrap();
        assert_eq!(report.failed_cells, 2);
        assert_eq!(report.admitted, 2);
        assert!(report.outcome.is_completed());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn capped_alerts_skip_geocoding() {
        let path = temp_path("capped");
        let _ = std::fs::remove_file(&path);
        let mut store = EventStore::empty(&path, 1);
        let (mut poller, _, geocoder) = poller(f64::INFINITY, unit_grid());

        poller.run_pass(&unit_square(), &mut store).await.unwrap();
        assert_eq!(geocoder.0.load(Ordering::SeqCst), 4);

        poller.run_pass(&unit_square(), &mut store).await.unwrap();
        assert_eq!(geocoder.0.load(Ordering::SeqCst), 4);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn geocoding_can_be_turned_off() {
        let path = temp_path("no_geocode");
        let _ = std::fs::remove_file(&path);
        let mut store = EventStore::empty(&path, 1);
        let settings = GridSettings {
            geocode: false,
            ..unit_grid()
        };
        let (mut poller, _, geocoder) = poller(f64::INFINITY, settings);

        poller.run_pass(&unit_square(), &mut store).await.unwrap();
        assert_eq!(geocoder.0.load(Ordering::SeqCst), 0);
        assert_eq!(store.events()[0].address, "Lat: -0.5000, Lon: -0.5000");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn invalid_grid_size_is_an_error() {
        let path = temp_path("invalid");
        let mut store = EventStore::empty(&path, 1);
        let settings = GridSettings {
            grid_size: 0.0,
            ..GridSettings::default()
        };
        let (mut poller, _, _) = poller(f64::INFINITY, settings);
        assert!(matches!(
            poller.run_pass(&unit_square(), &mut store).await,
            Err(DiscoverError::Grid(_))
        ));
    }
}
