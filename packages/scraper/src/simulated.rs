//! In-memory map surface.
//!
//! The view is a rectangle centred on the current position; a marker is
//! visible when its incident lies inside it. Each move signal shifts the
//! position by a fixed number of degrees. Overlays, frozen maps and read
//! failures can be injected to exercise recovery paths.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use traffic_sweep_geography_models::{BoundingBox, Coordinate, PanDirection};

use crate::{DetailField, ElementRef, MapSurface, MarkerHandle, MarkerKind, SurfaceError};

const INCIDENT_PREFIX: &str = "incident-";
const CLUSTER_PREFIX: &str = "cluster-";

const LATTICE_TYPES: [&str; 4] = ["Accidente", "Tráfico denso", "Peligro en la vía", "Policía"];

/// An incident placed on the simulated map.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedIncident {
    /// Where the marker sits.
    pub position: Coordinate,
    /// Detail-view type heading, or `None` if the field is absent.
    pub event_type: Option<String>,
    /// Detail-view address.
    pub address: Option<String>,
    /// Detail-view relative time.
    pub report_time: Option<String>,
    /// Detail-view reporter.
    pub reporter: Option<String>,
}

impl SimulatedIncident {
    /// An incident with every detail field present.
    #[must_use]
    pub fn new(position: Coordinate, event_type: &str, address: &str, reporter: &str) -> Self {
        Self {
            position,
            event_type: Some(event_type.to_string()),
            address: Some(address.to_string()),
            report_time: Some("hace 1 minuto".to_string()),
            reporter: Some(reporter.to_string()),
        }
    }

    fn field(&self, field: DetailField) -> Option<&str> {
        match field {
            DetailField::Type => self.event_type.as_deref(),
            DetailField::Address => self.address.as_deref(),
            DetailField::ReportTime => self.report_time.as_deref(),
            DetailField::Reporter => self.reporter.as_deref(),
        }
    }
}

/// Incidents laid out on a regular lattice over `bounds`.
///
/// Spacing is in degrees on both axes. Each incident gets a distinct
/// reporter and address, so every one of them fingerprints uniquely.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn lattice(bounds: &BoundingBox, spacing: f64) -> Vec<SimulatedIncident> {
    if !(spacing.is_finite() && spacing > 0.0) {
        return Vec::new();
    }

    let mut incidents = Vec::new();
    let mut row = 0_usize;
    loop {
        let lat = (row as f64).mul_add(spacing, bounds.lat_min);
        if lat > bounds.lat_max {
            break;
        }
        let mut column = 0_usize;
        loop {
            let lon = (column as f64).mul_add(spacing, bounds.lon_min);
            if lon > bounds.lon_max {
                break;
            }
            let index = incidents.len();
            incidents.push(SimulatedIncident::new(
                Coordinate::new(lat, lon),
                LATTICE_TYPES[index % LATTICE_TYPES.len()],
                &format!("Calle {row} #{column}"),
                &format!("conductor{index}"),
            ));
            column += 1;
        }
        row += 1;
    }
    incidents
}

/// A scripted, fully in-memory [`MapSurface`].
#[derive(Debug, Clone)]
pub struct SimulatedSurface {
    position: Coordinate,
    step_lat: f64,
    step_lon: f64,
    view_half_height: f64,
    view_half_width: f64,
    incidents: Vec<SimulatedIncident>,
    clusters: Vec<Coordinate>,
    frozen: bool,
    overlays: u32,
    stubborn_overlay: bool,
    hidden_overlays: u32,
    read_failures: u32,
    scripted_texts: VecDeque<String>,
    map_missing: bool,
    open_detail: Option<usize>,
    prepared: bool,
    pans: u32,
    forced: u32,
}

impl SimulatedSurface {
    /// A map centred on `start` that moves `step_lat`/`step_lon` degrees
    /// per move signal. The view defaults to five steps in every
    /// direction.
    #[must_use]
    pub fn new(start: Coordinate, step_lat: f64, step_lon: f64) -> Self {
        Self {
            position: start,
            step_lat,
            step_lon,
            view_half_height: step_lat * 5.0,
            view_half_width: step_lon * 5.0,
            incidents: Vec::new(),
            clusters: Vec::new(),
            frozen: false,
            overlays: 0,
            stubborn_overlay: false,
            hidden_overlays: 0,
            read_failures: 0,
            scripted_texts: VecDeque::new(),
            map_missing: false,
            open_detail: None,
            prepared: false,
            pans: 0,
            forced: 0,
        }
    }

    /// Sets the half extents of the visible rectangle.
    #[must_use]
    pub const fn with_view(mut self, half_height: f64, half_width: f64) -> Self {
        self.view_half_height = half_height;
        self.view_half_width = half_width;
        self
    }

    /// Places incidents on the map.
    #[must_use]
    pub fn with_incidents(mut self, incidents: Vec<SimulatedIncident>) -> Self {
        self.incidents = incidents;
        self
    }

    /// Places cluster markers on the map.
    #[must_use]
    pub fn with_clusters(mut self, clusters: Vec<Coordinate>) -> Self {
        self.clusters = clusters;
        self
    }

    /// Move signals are accepted but the view never changes.
    #[must_use]
    pub const fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Shows an overlay that blocks input until dismissed, `count` times.
    #[must_use]
    pub const fn with_overlays(mut self, count: u32) -> Self {
        self.overlays = count;
        self
    }

    /// An overlay that cannot be dismissed; only forced interaction
    /// reaches markers behind it.
    #[must_use]
    pub const fn with_stubborn_overlay(mut self) -> Self {
        self.stubborn_overlay = true;
        self
    }

    /// An overlay that only appears when the map is focused: the next
    /// `count` moves are intercepted, each leaving a dismissable overlay
    /// behind.
    #[must_use]
    pub const fn with_click_intercepting_overlays(mut self, count: u32) -> Self {
        self.hidden_overlays = count;
        self
    }

    /// The next `count` coordinate reads fail with a timeout.
    #[must_use]
    pub const fn with_read_failures(mut self, count: u32) -> Self {
        self.read_failures = count;
        self
    }

    /// Coordinate reads return these texts first, in order.
    #[must_use]
    pub fn with_scripted_texts(mut self, texts: &[&str]) -> Self {
        self.scripted_texts = texts.iter().map(ToString::to_string).collect();
        self
    }

    /// The map container is absent; moves fail structurally.
    #[must_use]
    pub const fn without_map(mut self) -> Self {
        self.map_missing = true;
        self
    }

    /// Current true position of the view centre.
    #[must_use]
    pub const fn position(&self) -> Coordinate {
        self.position
    }

    /// Number of move commands received.
    #[must_use]
    pub const fn pan_count(&self) -> u32 {
        self.pans
    }

    /// Number of forced interactions performed.
    #[must_use]
    pub const fn forced_interactions(&self) -> u32 {
        self.forced
    }

    /// Whether a detail view is open.
    #[must_use]
    pub const fn detail_open(&self) -> bool {
        self.open_detail.is_some()
    }

    /// Whether [`MapSurface::prepare`] ran.
    #[must_use]
    pub const fn prepared(&self) -> bool {
        self.prepared
    }

    /// The placed incidents.
    #[must_use]
    pub fn incidents(&self) -> &[SimulatedIncident] {
        &self.incidents
    }

    fn blocked(&self) -> bool {
        self.overlays > 0 || self.stubborn_overlay
    }

    fn in_view(&self, point: &Coordinate) -> bool {
        (point.latitude - self.position.latitude).abs() <= self.view_half_height
            && (point.longitude - self.position.longitude).abs() <= self.view_half_width
    }

    fn incident_index(element: &ElementRef) -> Option<usize> {
        element.0.strip_prefix(INCIDENT_PREFIX)?.parse().ok()
    }

    fn open(&mut self, element: &ElementRef) -> Result<(), SurfaceError> {
        if element.0.starts_with(CLUSTER_PREFIX) {
            return Ok(());
        }
        let index = Self::incident_index(element).ok_or(SurfaceError::Stale)?;
        let incident = self.incidents.get(index).ok_or(SurfaceError::Stale)?;
        if !self.in_view(&incident.position) {
            return Err(SurfaceError::Stale);
        }
        self.open_detail = Some(index);
        Ok(())
    }
}

#[async_trait]
impl MapSurface for SimulatedSurface {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn prepare(&mut self) -> Result<(), SurfaceError> {
        self.prepared = true;
        Ok(())
    }

    async fn coordinate_text(&mut self) -> Result<String, SurfaceError> {
        if self.read_failures > 0 {
            self.read_failures -= 1;
            return Err(SurfaceError::Timeout("coordinate display".to_string()));
        }
        if let Some(text) = self.scripted_texts.pop_front() {
            return Ok(text);
        }
        Ok(format!(
            "{:.6} | {:.6}",
            self.position.latitude, self.position.longitude
        ))
    }

    async fn send_pan(
        &mut self,
        direction: PanDirection,
        steps: u32,
        _key_pause: Duration,
    ) -> Result<(), SurfaceError> {
        if self.map_missing {
            return Err(SurfaceError::MapMissing);
        }
        if self.blocked() {
            return Err(SurfaceError::NotInteractable("map covered by overlay".to_string()));
        }
        if self.hidden_overlays > 0 {
            self.hidden_overlays -= 1;
            self.overlays += 1;
            return Err(SurfaceError::Intercepted(
                "overlay received the click on the map".to_string(),
            ));
        }
        self.pans += 1;
        if self.frozen {
            return Ok(());
        }

        let steps = f64::from(steps);
        let (d_lat, d_lon) = match direction {
            PanDirection::Up => (self.step_lat * steps, 0.0),
            PanDirection::Down => (-self.step_lat * steps, 0.0),
            PanDirection::Left => (0.0, -self.step_lon * steps),
            PanDirection::Right => (0.0, self.step_lon * steps),
        };
        self.position = Coordinate::new(
            (self.position.latitude + d_lat).clamp(-85.0, 85.0),
            (self.position.longitude + d_lon).clamp(-180.0, 180.0),
        );
        Ok(())
    }

    async fn dismiss_overlays(&mut self) -> Result<bool, SurfaceError> {
        if self.overlays > 0 {
            self.overlays -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn markers(&mut self) -> Result<Vec<MarkerHandle>, SurfaceError> {
        let alerts = self
            .incidents
            .iter()
            .enumerate()
            .filter(|(_, incident)| self.in_view(&incident.position))
            .map(|(i, _)| MarkerHandle {
                element: ElementRef(format!("{INCIDENT_PREFIX}{i}")),
                kind: MarkerKind::Alert,
            });
        let clusters = self
            .clusters
            .iter()
            .enumerate()
            .filter(|(_, position)| self.in_view(position))
            .map(|(i, _)| MarkerHandle {
                element: ElementRef(format!("{CLUSTER_PREFIX}{i}")),
                kind: MarkerKind::Cluster,
            });
        Ok(alerts.chain(clusters).collect())
    }

    async fn click(&mut self, element: &ElementRef) -> Result<(), SurfaceError> {
        if self.blocked() {
            return Err(SurfaceError::Intercepted(format!(
                "overlay received the click on {}",
                element.0
            )));
        }
        self.open(element)
    }

    async fn force_interact(&mut self, element: &ElementRef) -> Result<(), SurfaceError> {
        self.forced += 1;
        self.open(element)
    }

    async fn await_detail(&mut self, timeout: Duration) -> Result<(), SurfaceError> {
        if self.open_detail.is_some() {
            Ok(())
        } else {
            Err(SurfaceError::Timeout(format!("detail view after {timeout:?}")))
        }
    }

    async fn read_detail_field(&mut self, field: DetailField) -> Result<String, SurfaceError> {
        let incident = self
            .open_detail
            .and_then(|i| self.incidents.get(i))
            .ok_or(SurfaceError::Stale)?;
        incident
            .field(field)
            .map(ToString::to_string)
            .ok_or_else(|| SurfaceError::NotFound(field.to_string()))
    }

    async fn close_detail(&mut self) -> Result<(), SurfaceError> {
        self.open_detail = None;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), SurfaceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_covers_bounds_with_unique_reporters() {
        let incidents = lattice(&BoundingBox::new(0.0, 0.11, 0.0, 0.21), 0.05);
        // 3 rows x 5 columns
        assert_eq!(incidents.len(), 15);
        let mut reporters: Vec<_> = incidents.iter().map(|i| i.reporter.clone()).collect();
        reporters.dedup();
        assert_eq!(reporters.len(), 15);
        assert!(lattice(&BoundingBox::new(0.0, 1.0, 0.0, 1.0), 0.0).is_empty());
    }

    #[tokio::test]
    async fn pans_move_by_step_and_frozen_maps_do_not() {
        let mut surface = SimulatedSurface::new(Coordinate::new(0.0, 0.0), 0.01, 0.02);
        surface
            .send_pan(PanDirection::Up, 3, Duration::ZERO)
            .await
            .unwrap();
        surface
            .send_pan(PanDirection::Right, 1, Duration::ZERO)
            .await
            .unwrap();
        assert!(surface.position().is_near(&Coordinate::new(0.03, 0.02), 1e-12));

        let mut frozen = SimulatedSurface::new(Coordinate::new(0.0, 0.0), 0.01, 0.01).frozen();
        frozen
            .send_pan(PanDirection::Down, 5, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(frozen.position(), Coordinate::new(0.0, 0.0));
        assert_eq!(frozen.pan_count(), 1);
    }

    #[tokio::test]
    async fn only_markers_in_view_are_listed() {
        let mut surface = SimulatedSurface::new(Coordinate::new(0.0, 0.0), 0.01, 0.01)
            .with_view(0.05, 0.05)
            .with_incidents(vec![
                SimulatedIncident::new(Coordinate::new(0.01, 0.01), "A", "x", "r"),
                SimulatedIncident::new(Coordinate::new(1.0, 1.0), "B", "y", "s"),
            ])
            .with_clusters(vec![Coordinate::new(0.0, 0.02)]);
        let markers = surface.markers().await.unwrap();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].kind, MarkerKind::Alert);
        assert_eq!(markers[1].kind, MarkerKind::Cluster);
    }

    #[tokio::test]
    async fn overlay_blocks_until_dismissed() {
        let mut surface =
            SimulatedSurface::new(Coordinate::new(0.0, 0.0), 0.01, 0.01).with_overlays(1);
        assert!(matches!(
            surface.send_pan(PanDirection::Up, 1, Duration::ZERO).await,
            Err(SurfaceError::NotInteractable(_))
        ));
        assert!(surface.dismiss_overlays().await.unwrap());
        assert!(!surface.dismiss_overlays().await.unwrap());
        assert!(
            surface
                .send_pan(PanDirection::Up, 1, Duration::ZERO)
                .await
                .is_ok()
        );
    }
}
