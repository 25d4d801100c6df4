//! Serpentine sweep over a live map.
//!
//! The sweep starts at the centre of the rectangle, walks down to the
//! southern edge, steps east, walks up to the northern edge, and so on
//! until it passes the eastern edge. Every stop is scanned for markers.
//!
//! Two counters guard the walk. The stall counter grows while scans at the
//! same spot produce nothing new; at the threshold the map jumps to the
//! reflection of its position through the rectangle. The consecutive
//! failure counter grows on failed or non-moving pans and only resets
//! when the map actually moves; at the threshold the sweep aborts. A
//! transition budget bounds the sweep regardless of either counter.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use traffic_sweep_database::{Admission, EventStore};
use traffic_sweep_discover_models::{
    DiscoveryMode, PassOutcome, PassReport, SweepSettings, SweepState,
};
use traffic_sweep_geography_models::{BoundingBox, Coordinate, PanDirection};
use traffic_sweep_incident_models::EventRecord;
use traffic_sweep_scraper::MapSurface;
use traffic_sweep_scraper::extractor::{Extraction, ExtractorSettings, SkipReason, extract};
use traffic_sweep_scraper::panner::{PanError, PanSettings, Panner};
use traffic_sweep_source::progress::{ProgressCallback, null_progress};
use traffic_sweep_spatial::reflect_through_center;

use crate::{DiscoverError, Discovery, is_cancelled};

/// Drives one sweep over a rectangle.
///
/// Owns the traversal cursor and both counters for the duration of the
/// sweep; nothing here outlives [`SweepController::run`].
pub struct SweepController<'a> {
    surface: &'a mut dyn MapSurface,
    panner: &'a mut Panner,
    bounds: BoundingBox,
    settings: SweepSettings,
    extractor: ExtractorSettings,
    progress: &'a dyn ProgressCallback,
    cancelled: &'a AtomicBool,
    cursor: Coordinate,
    vertical: PanDirection,
    stall: u32,
    failures: u32,
    last_productive: Option<String>,
    abort_reason: Option<String>,
    report: PassReport,
}

impl<'a> SweepController<'a> {
    /// Creates a controller positioned nowhere yet.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        surface: &'a mut dyn MapSurface,
        panner: &'a mut Panner,
        bounds: BoundingBox,
        settings: SweepSettings,
        extractor: ExtractorSettings,
        progress: &'a dyn ProgressCallback,
        cancelled: &'a AtomicBool,
    ) -> Self {
        Self {
            surface,
            panner,
            cursor: bounds.center(),
            bounds,
            settings,
            extractor,
            progress,
            cancelled,
            vertical: PanDirection::Down,
            stall: 0,
            failures: 0,
            last_productive: None,
            abort_reason: None,
            report: PassReport::start(DiscoveryMode::Sweep),
        }
    }

    /// Runs the state machine from [`SweepState::Positioning`] until it
    /// ends, is cancelled, or runs out of transitions.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoverError`] for structural surface failures and for
    /// event list writes that fail.
    pub async fn run(mut self, store: &mut EventStore) -> Result<PassReport, DiscoverError> {
        log::warn!("========== Starting new sweep over {} ==========", self.bounds);
        let budget = self.settings.max_transitions;
        let mut state = SweepState::Positioning;

        let outcome = loop {
            if is_cancelled(self.cancelled) {
                log::warn!("Sweep cancelled in state {state}");
                break PassOutcome::Cancelled;
            }
            if self.report.transitions >= budget {
                log::error!("Transition budget of {budget} exhausted in state {state}, aborting sweep");
                break PassOutcome::Aborted(format!("transition budget of {budget} exhausted"));
            }

            state = self.step(state, store).await?;
            self.report.transitions += 1;

            match state {
                SweepState::SweepDone => break PassOutcome::Completed,
                SweepState::Aborted => {
                    break PassOutcome::Aborted(
                        self.abort_reason.take().unwrap_or_else(|| "aborted".to_string()),
                    );
                }
                _ => {}
            }
        };

        let report = self.report.finish(outcome);
        self.progress.finish(format!("{} events saved", store.len()));
        log::warn!("========== {report} ==========");
        log::warn!("Total events saved so far: {}", store.len());
        Ok(report)
    }

    /// Performs the work of `state` and returns the next state.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoverError`] for structural surface failures and for
    /// event list writes that fail.
    pub async fn step(
        &mut self,
        state: SweepState,
        store: &mut EventStore,
    ) -> Result<SweepState, DiscoverError> {
        let next = match state {
            SweepState::Positioning => self.position().await?,
            SweepState::Scanning => self.scan(store).await?,
            SweepState::Advancing => self.advance().await?,
            SweepState::Turning => self.turn().await?,
            SweepState::Stalled => self.recover().await?,
            SweepState::Aborted | SweepState::SweepDone => return Ok(state),
        };

        if !next.is_terminal() && self.failures >= self.settings.max_consecutive_failures {
            return Ok(self.abort(format!("{} consecutive failures", self.failures)));
        }
        Ok(next)
    }

    /// Current traversal cursor.
    #[must_use]
    pub const fn cursor(&self) -> Coordinate {
        self.cursor
    }

    /// Current stall count.
    #[must_use]
    pub const fn stall_count(&self) -> u32 {
        self.stall
    }

    /// Current consecutive failure count.
    #[must_use]
    pub const fn failure_count(&self) -> u32 {
        self.failures
    }

    async fn position(&mut self) -> Result<SweepState, DiscoverError> {
        let center = self.bounds.center();
        log::info!("--- Moving to the centre of the area: {center} ---");

        match self
            .panner
            .reposition(
                self.surface,
                center,
                self.settings.reposition_tolerance,
                self.settings.reposition_max_steps,
            )
            .await
        {
            Ok(reached) => {
                self.cursor = reached;
                self.last_productive = Some(reached.location_key());
                self.stall = 0;
                Ok(SweepState::Scanning)
            }
            Err(PanError::Surface(e)) => Err(e.into()),
            Err(PanError::Failed(reason)) => {
                self.failures += 1;
                log::error!(
                    "Could not reach the area centre ({reason}), failure {}/{}",
                    self.failures,
                    self.settings.max_consecutive_failures
                );
                Ok(SweepState::Positioning)
            }
        }
    }

    async fn scan(&mut self, store: &mut EventStore) -> Result<SweepState, DiscoverError> {
        let here = self.cursor;
        let key = here.location_key();
        log::info!("--- [Saved: {}] [Loc: {key}] Scanning ---", store.len());

        if let Err(e) = self.surface.dismiss_overlays().await
            && e.is_structural()
        {
            return Err(e.into());
        }

        let markers = match self.surface.markers().await {
            Ok(markers) => markers,
            Err(e) if e.is_structural() => return Err(e.into()),
            Err(e) => {
                self.failures += 1;
                log::warn!(
                    "  Could not list markers ({e}), moving on (failure {}/{})",
                    self.failures,
                    self.settings.max_consecutive_failures
                );
                return Ok(SweepState::Advancing);
            }
        };
        self.report.observed += markers.len();

        let mut records = 0;
        let mut admitted = 0;
        for marker in &markers {
            let extraction = extract(
                self.surface,
                marker,
                self.settings.fingerprint_policy,
                here,
                &self.extractor,
            )
            .await?;
            match extraction {
                Extraction::Record(record) => {
                    records += 1;
                    if self.admit(record, store)? {
                        admitted += 1;
                    }
                }
                Extraction::Skipped(SkipReason::Cluster) => {}
                Extraction::Skipped(reason) => {
                    self.report.skipped += 1;
                    log::debug!("  -> Marker skipped: {reason}");
                }
            }
        }

        if records == 0 && !markers.is_empty() {
            self.failures += 1;
            log::warn!(
                "  -> No usable marker in view (failure {}/{})",
                self.failures,
                self.settings.max_consecutive_failures
            );
        } else if admitted > 0 {
            self.stall = 0;
            self.last_productive = Some(key);
        } else if !markers.is_empty() {
            if self.last_productive.as_deref() == Some(key.as_str()) {
                self.stall += 1;
                log::warn!(
                    "  -> No new events at an unchanged location. Stall counter: {}/{}",
                    self.stall,
                    self.settings.stuck_threshold
                );
            } else {
                self.stall = 0;
                self.last_productive = Some(key);
            }
        }

        if self.stall >= self.settings.stuck_threshold {
            log::error!("!!! STALL DETECTED at {here} after {} unproductive passes !!!", self.stall);
            return Ok(SweepState::Stalled);
        }
        Ok(SweepState::Advancing)
    }

    fn admit(&mut self, record: EventRecord, store: &mut EventStore) -> Result<bool, DiscoverError> {
        let summary = format!("{} | {}", record.event_type, record.address);
        let fingerprint = record.event_id.clone();

        match store.admit(record) {
            Admission::Admitted { count } => {
                store.save()?;
                self.report.admitted += 1;
                let saved = store.len();
                log::info!(
                    "  -> NEW ({count}/{}): {summary}",
                    store.ledger().cap()
                );

                self.progress.set_position(saved as u64);
                self.progress.set_message(format!(
                    "{saved}/{} events",
                    self.settings.target_events
                ));
                let every = self.settings.progress_every;
                if every > 0 && saved % every == 0 {
                    log::info!(
                        "--- Progress: {saved}/{} events saved ---",
                        self.settings.target_events
                    );
                }
                Ok(true)
            }
            Admission::RejectedDuplicate { count } => {
                self.report.rejected += 1;
                log::debug!("  -> Duplicate ({count}x): {fingerprint}");
                Ok(false)
            }
        }
    }

    async fn advance(&mut self) -> Result<SweepState, DiscoverError> {
        let direction = self.vertical;
        match self
            .panner
            .pan(self.surface, direction, self.settings.steps_vertical)
            .await
        {
            Ok(position) => {
                self.moved_to(position, direction);
                let reached = if direction == PanDirection::Down {
                    position.latitude <= self.bounds.lat_min
                } else {
                    position.latitude >= self.bounds.lat_max
                };
                if reached {
                    log::info!(
                        "--- End of column. Moving right ({} steps) ---",
                        self.settings.steps_horizontal
                    );
                    Ok(SweepState::Turning)
                } else {
                    Ok(SweepState::Scanning)
                }
            }
            Err(PanError::Surface(e)) => Err(e.into()),
            Err(PanError::Failed(reason)) => {
                Ok(self.abort(format!("moving {direction} failed: {reason}")))
            }
        }
    }

    async fn turn(&mut self) -> Result<SweepState, DiscoverError> {
        match self
            .panner
            .pan(self.surface, PanDirection::Right, self.settings.steps_horizontal)
            .await
        {
            Ok(position) => {
                self.moved_to(position, PanDirection::Right);
                if position.longitude >= self.bounds.lon_max {
                    log::warn!("--- Eastern edge of the area reached, sweep finished ---");
                    return Ok(SweepState::SweepDone);
                }
                self.vertical = self.vertical.opposite();
                Ok(SweepState::Scanning)
            }
            Err(PanError::Surface(e)) => Err(e.into()),
            Err(PanError::Failed(reason)) => {
                Ok(self.abort(format!("moving right failed: {reason}")))
            }
        }
    }

    async fn recover(&mut self) -> Result<SweepState, DiscoverError> {
        let target = reflect_through_center(&self.bounds, &self.cursor);
        self.report.stalls += 1;
        log::warn!("Stall recovery: jumping from {} to {target}", self.cursor);

        match self
            .panner
            .reposition(
                self.surface,
                target,
                self.settings.reposition_tolerance,
                self.settings.reposition_max_steps,
            )
            .await
        {
            Ok(reached) => {
                if reached.location_key() != self.cursor.location_key() {
                    self.failures = 0;
                }
                self.cursor = reached;
                self.stall = 0;
                self.last_productive = Some(reached.location_key());
                log::warn!("Stall recovery landed at {reached}");
                Ok(SweepState::Scanning)
            }
            Err(PanError::Surface(e)) => Err(e.into()),
            Err(PanError::Failed(reason)) => {
                log::error!("Stall recovery jump failed: {reason}");
                Ok(self.abort(format!("stall recovery failed: {reason}")))
            }
        }
    }

    fn moved_to(&mut self, position: Coordinate, direction: PanDirection) {
        if position.location_key() == self.cursor.location_key() {
            self.failures += 1;
            log::warn!(
                "  -> Location did not change after moving {direction} (failure {}/{})",
                self.failures,
                self.settings.max_consecutive_failures
            );
        } else {
            self.failures = 0;
            log::debug!("  -> New location: {position}");
        }
        self.cursor = position;
    }

    fn abort(&mut self, reason: String) -> SweepState {
        log::error!("Aborting current sweep: {reason}");
        self.abort_reason = Some(reason);
        SweepState::Aborted
    }
}

/// Panning discovery over a [`MapSurface`].
pub struct SweepDiscovery {
    surface: Box<dyn MapSurface>,
    panner: Panner,
    settings: SweepSettings,
    extractor: ExtractorSettings,
    progress: Arc<dyn ProgressCallback>,
    cancelled: Arc<AtomicBool>,
}

impl SweepDiscovery {
    /// Creates a sweep engine that stops between steps once `cancelled`
    /// is set.
    #[must_use]
    pub fn new(
        surface: Box<dyn MapSurface>,
        settings: SweepSettings,
        pan: PanSettings,
        extractor: ExtractorSettings,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            surface,
            panner: Panner::new(pan),
            settings,
            extractor,
            progress: null_progress(),
            cancelled,
        }
    }

    /// Reports saved-event counts to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Sweep tuning in use.
    #[must_use]
    pub const fn settings(&self) -> &SweepSettings {
        &self.settings
    }
}

#[async_trait]
impl Discovery for SweepDiscovery {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::Sweep
    }

    async fn prepare(&mut self) -> Result<(), DiscoverError> {
        log::info!("Preparing {} map surface", self.surface.name());
        self.surface.prepare().await?;
        Ok(())
    }

    async fn run_pass(
        &mut self,
        bounds: &BoundingBox,
        store: &mut EventStore,
    ) -> Result<PassReport, DiscoverError> {
        SweepController::new(
            self.surface.as_mut(),
            &mut self.panner,
            *bounds,
            self.settings,
            self.extractor,
            self.progress.as_ref(),
            &self.cancelled,
        )
        .run(store)
        .await
    }

    async fn shutdown(&mut self) -> Result<(), DiscoverError> {
        self.surface.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use traffic_sweep_scraper::simulated::{SimulatedIncident, SimulatedSurface, lattice};

    use super::*;

    const INSTANT: ExtractorSettings = ExtractorSettings {
        detail_timeout_ms: 0,
        after_close_ms: 0,
    };

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "traffic_sweep_sweep_{name}_{}.json",
            std::process::id()
        ))
    }

    fn small_area() -> BoundingBox {
        BoundingBox::new(0.0, 0.1, 0.0, 0.1)
    }

    fn store(name: &str, cap: u32) -> (EventStore, PathBuf) {
        let path = temp_path(name);
        let _ = std::fs::remove_file(&path);
        (EventStore::empty(&path, cap), path)
    }

    async fn run_states(
        surface: &mut SimulatedSurface,
        bounds: BoundingBox,
        settings: SweepSettings,
        store: &mut EventStore,
    ) -> (Vec<SweepState>, u32) {
        let mut panner = Panner::new(PanSettings::instant());
        let progress = null_progress();
        let cancelled = AtomicBool::new(false);
        let mut controller = SweepController::new(
            surface,
            &mut panner,
            bounds,
            settings,
            INSTANT,
            progress.as_ref(),
            &cancelled,
        );

        let mut state = SweepState::Positioning;
        let mut seen = Vec::new();
        while !state.is_terminal() && seen.len() < 200 {
            state = controller.step(state, store).await.unwrap();
            seen.push(state);
        }
        let stalls = controller.report.stalls;
        (seen, stalls)
    }

    #[tokio::test]
    async fn serpentine_covers_rectangle_and_finishes() {
        let area = small_area();
        let mut surface = SimulatedSurface::new(area.center(), 0.002, 0.002)
            .with_incidents(lattice(&area, 0.02));
        let (mut store, path) = store("serpentine", 5);
        let mut panner = Panner::new(PanSettings::instant());
        let progress = null_progress();
        let cancelled = AtomicBool::new(false);

        let report = SweepController::new(
            &mut surface,
            &mut panner,
            area,
            SweepSettings::default(),
            INSTANT,
            progress.as_ref(),
            &cancelled,
        )
        .run(&mut store)
        .await
        .unwrap();

        assert_eq!(report.outcome, PassOutcome::Completed);
        assert!(report.admitted > 0);
        assert_eq!(report.admitted, store.len());
        assert!(report.transitions < 100, "{} transitions", report.transitions);
        assert!(surface.position().longitude >= area.lon_max);

        let reloaded = EventStore::load(&path, 5).unwrap();
        assert_eq!(reloaded.len(), store.len());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn five_unproductive_scans_at_one_spot_stall() {
        let area = small_area();
        let here = area.center();
        let mut surface = SimulatedSurface::new(here, 0.002, 0.002)
            .frozen()
            .with_incidents(vec![SimulatedIncident::new(
                here,
                "Accidente",
                "CalleX",
                "Juan",
            )]);
        let (mut store, path) = store("stall", 1);
        store.admit(EventRecord {
            event_id: "Juan-CalleX-Accidente".to_string(),
            event_type: "Accidente".to_string(),
            address: "CalleX".to_string(),
            report_time: "hace 1 minuto".to_string(),
            reporter: "Juan".to_string(),
            latitude: None,
            longitude: None,
            confidence: None,
        });

        let (seen, stalls) =
            run_states(&mut surface, area, SweepSettings::default(), &mut store).await;

        let before_stall: Vec<_> = seen
            .iter()
            .take_while(|s| **s != SweepState::Stalled)
            .collect();
        let scans = before_stall
            .iter()
            .filter(|s| ***s == SweepState::Scanning)
            .count();
        assert_eq!(scans, 5, "{seen:?}");
        assert!(seen.contains(&SweepState::Stalled));
        assert_eq!(stalls, 1);
        // The frozen map also never moves, so the failure counter ends it.
        assert_eq!(seen.last(), Some(&SweepState::Aborted));
        assert_eq!(store.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn stall_jumps_to_reflection_and_resumes_scanning() {
        let area = small_area();
        let seen_before = Coordinate::new(0.045, 0.045);
        let mut surface = SimulatedSurface::new(Coordinate::new(0.02, 0.02), 0.002, 0.002)
            .with_incidents(vec![SimulatedIncident::new(
                seen_before,
                "Accidente",
                "CalleX",
                "Juan",
            )]);
        let (mut store, path) = store("stall_jump", 1);
        store.admit(EventRecord {
            event_id: "Juan-CalleX-Accidente".to_string(),
            event_type: "Accidente".to_string(),
            address: "CalleX".to_string(),
            report_time: "hace 1 minuto".to_string(),
            reporter: "Juan".to_string(),
            latitude: None,
            longitude: None,
            confidence: None,
        });

        let mut panner = Panner::new(PanSettings::instant());
        let progress = null_progress();
        let cancelled = AtomicBool::new(false);
        let settings = SweepSettings::default();
        let mut controller = SweepController::new(
            &mut surface,
            &mut panner,
            area,
            settings,
            INSTANT,
            progress.as_ref(),
            &cancelled,
        );

        let state = controller
            .step(SweepState::Positioning, &mut store)
            .await
            .unwrap();
        assert_eq!(state, SweepState::Scanning);
        let stuck_at = controller.cursor();

        // Scanning in place: the only marker is already capped.
        let mut state = SweepState::Scanning;
        for _ in 0..settings.stuck_threshold {
            state = controller
                .step(SweepState::Scanning, &mut store)
                .await
                .unwrap();
        }
        assert_eq!(state, SweepState::Stalled);
        assert_eq!(controller.stall_count(), settings.stuck_threshold);

        let target = reflect_through_center(&area, &stuck_at);
        let state = controller.step(state, &mut store).await.unwrap();

        assert_eq!(state, SweepState::Scanning);
        assert_eq!(controller.stall_count(), 0);
        assert_eq!(controller.failure_count(), 0);
        assert!(
            controller.cursor().is_near(&target, settings.reposition_tolerance),
            "landed at {} for target {target}",
            controller.cursor()
        );
        assert_ne!(controller.cursor().location_key(), stuck_at.location_key());
        assert_eq!(
            controller.last_productive,
            Some(controller.cursor().location_key())
        );
        assert_eq!(controller.report.stalls, 1);
        assert_eq!(store.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn frozen_map_aborts_on_consecutive_failures() {
        let area = small_area();
        let mut surface = SimulatedSurface::new(area.center(), 0.002, 0.002).frozen();
        let (mut store, path) = store("frozen", 5);
        let mut panner = Panner::new(PanSettings::instant());
        let progress = null_progress();
        let cancelled = AtomicBool::new(false);

        let report = SweepController::new(
            &mut surface,
            &mut panner,
            area,
            SweepSettings::default(),
            INSTANT,
            progress.as_ref(),
            &cancelled,
        )
        .run(&mut store)
        .await
        .unwrap();

        assert!(
            matches!(&report.outcome, PassOutcome::Aborted(reason) if reason.contains("consecutive")),
            "{:?}",
            report.outcome
        );
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn transition_budget_bounds_the_sweep() {
        let area = small_area();
        let mut surface = SimulatedSurface::new(area.center(), 0.002, 0.002);
        let (mut store, _) = store("budget", 5);
        let mut panner = Panner::new(PanSettings::instant());
        let progress = null_progress();
        let cancelled = AtomicBool::new(false);
        let settings = SweepSettings {
            max_transitions: 3,
            ..SweepSettings::default()
        };

        let report = SweepController::new(
            &mut surface,
            &mut panner,
            area,
            settings,
            INSTANT,
            progress.as_ref(),
            &cancelled,
        )
        .run(&mut store)
        .await
        .unwrap();

        assert_eq!(report.transitions, 3);
        assert!(matches!(report.outcome, PassOutcome::Aborted(_)));
    }

    #[tokio::test]
    async fn cancelled_sweep_stops_before_moving() {
        let area = small_area();
        let mut surface = SimulatedSurface::new(Coordinate::new(0.0, 0.0), 0.002, 0.002);
        let (mut store, _) = store("cancelled", 5);
        let mut panner = Panner::new(PanSettings::instant());
        let progress = null_progress();
        let cancelled = AtomicBool::new(true);

        let report = SweepController::new(
            &mut surface,
            &mut panner,
            area,
            SweepSettings::default(),
            INSTANT,
            progress.as_ref(),
            &cancelled,
        )
        .run(&mut store)
        .await
        .unwrap();

        assert_eq!(report.outcome, PassOutcome::Cancelled);
        assert_eq!(surface.pan_count(), 0);
    }

    #[tokio::test]
    async fn missing_map_is_fatal() {
        let area = small_area();
        let mut surface = SimulatedSurface::new(area.center(), 0.002, 0.002).without_map();
        let (mut store, _) = store("missing_map", 5);
        let mut panner = Panner::new(PanSettings::instant());
        let progress = null_progress();
        let cancelled = AtomicBool::new(false);

        let result = SweepController::new(
            &mut surface,
            &mut panner,
            area,
            SweepSettings::default(),
            INSTANT,
            progress.as_ref(),
            &cancelled,
        )
        .run(&mut store)
        .await;

        assert!(matches!(result, Err(DiscoverError::Surface(_))));
    }

    #[tokio::test]
    async fn cluster_only_view_counts_as_failure_until_the_map_moves() {
        let area = small_area();
        let here = area.center();
        let mut surface = SimulatedSurface::new(here, 0.002, 0.002).with_clusters(vec![here]);
        let (mut store, _) = store("clusters", 5);
        let mut panner = Panner::new(PanSettings::instant());
        let progress = null_progress();
        let cancelled = AtomicBool::new(false);
        let mut controller = SweepController::new(
            &mut surface,
            &mut panner,
            area,
            SweepSettings::default(),
            INSTANT,
            progress.as_ref(),
            &cancelled,
        );

        let state = controller
            .step(SweepState::Positioning, &mut store)
            .await
            .unwrap();
        let state = controller.step(state, &mut store).await.unwrap();
        assert_eq!(state, SweepState::Advancing);
        assert_eq!(controller.failure_count(), 1);
        assert_eq!(controller.stall_count(), 0);

        let state = controller.step(state, &mut store).await.unwrap();
        assert_eq!(state, SweepState::Scanning);
        assert_eq!(controller.failure_count(), 0);
        assert!(controller.cursor().latitude < here.latitude);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn discovery_trait_prepares_and_runs() {
        let area = small_area();
        let surface = SimulatedSurface::new(area.center(), 0.002, 0.002)
            .with_incidents(lattice(&area, 0.05));
        let (mut store, path) = store("trait", 5);
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut discovery = SweepDiscovery::new(
            Box::new(surface),
            SweepSettings::default(),
            PanSettings::instant(),
            INSTANT,
            cancelled,
        );

        assert_eq!(discovery.mode(), DiscoveryMode::Sweep);
        discovery.prepare().await.unwrap();
        let report = discovery.run_pass(&area, &mut store).await.unwrap();
        assert!(report.outcome.is_completed());
        discovery.shutdown().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
