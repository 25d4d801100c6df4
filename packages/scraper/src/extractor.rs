//! Turns a visible marker into an [`EventRecord`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use traffic_sweep_geography_models::Coordinate;
use traffic_sweep_incident_models::{EventRecord, FingerprintInput, FingerprintPolicy};

use crate::{DetailField, MapSurface, MarkerHandle, MarkerKind, SurfaceError, interact};

/// Detail-view timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorSettings {
    /// How long to wait for the detail view after clicking.
    pub detail_timeout_ms: u64,
    /// Pause after closing the detail view.
    pub after_close_ms: u64,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            detail_timeout_ms: 8000,
            after_close_ms: 200,
        }
    }
}

/// Why a marker produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// Cluster markers aggregate several incidents.
    Cluster,
    /// The marker could not be clicked.
    ClickFailed,
    /// The detail view never appeared.
    NoDetail,
}

/// Result of extracting one marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A record was read from the detail view.
    Record(EventRecord),
    /// Nothing was read.
    Skipped(SkipReason),
}

/// Opens a marker's detail view and reads it into a record.
///
/// Missing fields get their placeholder; a field read error never stops
/// the other fields. `observed_at` is the view centre where the marker
/// was seen and becomes the record's coordinate.
///
/// # Errors
///
/// Returns a [`SurfaceError`] only for structural failures. The detail
/// view is closed before returning whenever it was opened.
pub async fn extract(
    surface: &mut dyn MapSurface,
    marker: &MarkerHandle,
    policy: FingerprintPolicy,
    observed_at: Coordinate,
    settings: &ExtractorSettings,
) -> Result<Extraction, SurfaceError> {
    if marker.kind == MarkerKind::Cluster {
        return Ok(Extraction::Skipped(SkipReason::Cluster));
    }

    if let Err(e) = interact(surface, &marker.element).await {
        if e.is_structural() {
            return Err(e);
        }
        log::warn!("  -> Click on marker failed ({e}), skipping");
        return Ok(Extraction::Skipped(SkipReason::ClickFailed));
    }

    let timeout = Duration::from_millis(settings.detail_timeout_ms);
    if let Err(e) = surface.await_detail(timeout).await {
        if e.is_structural() {
            return Err(e);
        }
        log::warn!("  -> Detail view did not appear: {e}");
        close(surface, settings).await?;
        return Ok(Extraction::Skipped(SkipReason::NoDetail));
    }

    let mut values: [String; 4] = Default::default();
    let mut fatal = None;
    for (slot, field) in values.iter_mut().zip(DetailField::ALL) {
        *slot = match surface.read_detail_field(field).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => field.placeholder().to_string(),
            Err(e) => {
                log::debug!("  -> Field {field} unreadable: {e}");
                if e.is_structural() && fatal.is_none() {
                    fatal = Some(e);
                }
                field.placeholder().to_string()
            }
        };
    }

    close(surface, settings).await?;
    if let Some(e) = fatal {
        return Err(e);
    }

    let [event_type, address, report_time, reporter] = values;
    let event_id = policy.fingerprint(&FingerprintInput {
        event_type: &event_type,
        address: &address,
        reporter: &reporter,
        latitude: Some(observed_at.latitude),
        longitude: Some(observed_at.longitude),
        pub_millis: None,
    });

    log::debug!("     T:{event_type} | D:{address} | F:{report_time} | R:{reporter} | ID: {event_id}");

    Ok(Extraction::Record(EventRecord {
        event_id,
        event_type,
        address,
        report_time,
        reporter,
        latitude: Some(observed_at.latitude),
        longitude: Some(observed_at.longitude),
        confidence: None,
    }))
}

async fn close(surface: &mut dyn MapSurface, settings: &ExtractorSettings) -> Result<(), SurfaceError> {
    match surface.close_detail().await {
        Ok(()) => {}
        Err(e) if e.is_structural() => return Err(e),
        Err(e) => log::warn!("  -> Could not close detail view: {e}"),
    }
    if settings.after_close_ms > 0 {
        tokio::time::sleep(Duration::from_millis(settings.after_close_ms)).await;
    }
    match surface.dismiss_overlays().await {
        Err(e) if e.is_structural() => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ElementRef;
    use crate::simulated::{SimulatedIncident, SimulatedSurface};

    const INSTANT: ExtractorSettings = ExtractorSettings {
        detail_timeout_ms: 0,
        after_close_ms: 0,
    };

    fn here() -> Coordinate {
        Coordinate::new(-33.45, -70.65)
    }

    async fn first_marker(surface: &mut SimulatedSurface) -> MarkerHandle {
        surface.markers().await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn reads_all_fields_and_fingerprints() {
        let mut surface = SimulatedSurface::new(here(), 0.01, 0.01).with_incidents(vec![
            SimulatedIncident::new(here(), "Accidente", "CalleX", "Juan"),
        ]);
        let marker = first_marker(&mut surface).await;

        let Extraction::Record(record) = extract(
            &mut surface,
            &marker,
            FingerprintPolicy::ReporterAddressType,
            here(),
            &INSTANT,
        )
        .await
        .unwrap() else {
            panic!("expected a record");
        };

        assert_eq!(record.event_id, "Juan-CalleX-Accidente");
        assert_eq!(record.report_time, "hace 1 minuto");
        assert_eq!(record.latitude, Some(-33.45));
        assert!(!surface.detail_open());
    }

    #[tokio::test]
    async fn missing_fields_get_placeholders() {
        let incident = SimulatedIncident {
            position: here(),
            event_type: Some("Peligro".to_string()),
            address: None,
            report_time: None,
            reporter: Some("   ".to_string()),
        };
        let mut surface = SimulatedSurface::new(here(), 0.01, 0.01).with_incidents(vec![incident]);
        let marker = first_marker(&mut surface).await;

        let extraction = extract(
            &mut surface,
            &marker,
            FingerprintPolicy::ReporterAddressType,
            here(),
            &INSTANT,
        )
        .await
        .unwrap();
        let Extraction::Record(record) = extraction else {
            panic!("expected a record");
        };
        assert_eq!(record.address, "No disponible");
        assert_eq!(record.report_time, "No disponible");
        assert_eq!(record.reporter, "Desconocido");
        assert_eq!(record.event_id, "Desconocido-No disponible-Peligro");
    }

    #[tokio::test]
    async fn clusters_are_skipped() {
        let mut surface =
            SimulatedSurface::new(here(), 0.01, 0.01).with_clusters(vec![here()]);
        let marker = first_marker(&mut surface).await;
        assert_eq!(
            extract(&mut surface, &marker, FingerprintPolicy::ReporterAddressType, here(), &INSTANT)
                .await
                .unwrap(),
            Extraction::Skipped(SkipReason::Cluster)
        );
    }

    #[tokio::test]
    async fn obstructed_click_escalates_to_forced_interaction() {
        let mut surface = SimulatedSurface::new(here(), 0.01, 0.01)
            .with_stubborn_overlay()
            .with_incidents(vec![SimulatedIncident::new(here(), "A", "B", "C")]);
        let marker = first_marker(&mut surface).await;

        let extraction = extract(
            &mut surface,
            &marker,
            FingerprintPolicy::ReporterAddressType,
            here(),
            &INSTANT,
        )
        .await
        .unwrap();
        assert!(matches!(extraction, Extraction::Record(_)));
        assert_eq!(surface.forced_interactions(), 1);
    }

    #[tokio::test]
    async fn stale_marker_is_skipped() {
        let mut surface = SimulatedSurface::new(here(), 0.01, 0.01);
        let marker = MarkerHandle {
            element: ElementRef("incident-7".to_string()),
            kind: MarkerKind::Alert,
        };
        assert_eq!(
            extract(&mut surface, &marker, FingerprintPolicy::ReporterAddressType, here(), &INSTANT)
                .await
                .unwrap(),
            Extraction::Skipped(SkipReason::ClickFailed)
        );
    }
}
