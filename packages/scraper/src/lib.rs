#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Automation of an interactive traffic map.
//!
//! Everything the discovery engine needs from a live map UI goes through
//! the [`MapSurface`] trait: read the coordinate display, send directional
//! moves, enumerate markers, open a marker's detail view and read its
//! fields. Two surfaces implement it:
//!
//! * [`webdriver::WebDriverSurface`] drives a real browser over the W3C
//!   WebDriver protocol.
//! * [`simulated::SimulatedSurface`] is an in-memory map used by the
//!   `--simulate` mode and by tests.
//!
//! On top of the trait sit the [`locator`], the [`panner`] and the
//! [`extractor`]. None of them knows which surface it is driving.

pub mod extractor;
pub mod locator;
pub mod panner;
pub mod simulated;
pub mod webdriver;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use traffic_sweep_geography_models::PanDirection;
use traffic_sweep_incident_models::{NOT_AVAILABLE, UNKNOWN};

/// Errors reported by a [`MapSurface`].
///
/// The first group is transient: the operation may succeed if repeated.
/// The second group is structural and means the surface is unusable.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    /// The element reference no longer points into the page.
    #[error("stale element reference")]
    Stale,

    /// Another element received the click.
    #[error("click intercepted: {0}")]
    Intercepted(String),

    /// The element exists but cannot receive input.
    #[error("element not interactable: {0}")]
    NotInteractable(String),

    /// Waiting for an element or condition timed out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// No element matched.
    #[error("element not found: {0}")]
    NotFound(String),

    /// The backend rejected a command for another reason.
    #[error("command failed: {0}")]
    Command(String),

    /// The map container itself is missing.
    #[error("map element is missing")]
    MapMissing,

    /// The automation session is gone or refused a command.
    #[error("automation session failure: {0}")]
    Session(String),

    /// Transport failure talking to the automation backend.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SurfaceError {
    /// Whether this error leaves the surface unusable.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::MapMissing | Self::Session(_) | Self::Http(_))
    }

    /// Whether an overlay is the likely cause.
    #[must_use]
    pub const fn is_obstruction(&self) -> bool {
        matches!(self, Self::Intercepted(_) | Self::NotInteractable(_))
    }
}

/// Opaque handle to an element on the surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

/// What a visible marker represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum MarkerKind {
    /// A single reported incident.
    Alert,
    /// An aggregate of several incidents; never extracted.
    Cluster,
}

/// A marker visible in the current view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHandle {
    /// The marker element.
    pub element: ElementRef,
    /// Alert or cluster.
    pub kind: MarkerKind,
}

/// A field of an incident's detail view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DetailField {
    /// Incident type heading.
    Type,
    /// Street address.
    Address,
    /// Relative report time (e.g. "hace 5 minutos").
    ReportTime,
    /// Reporter display name.
    Reporter,
}

impl DetailField {
    /// Every field, in reading order.
    pub const ALL: [Self; 4] = [Self::Type, Self::Address, Self::ReportTime, Self::Reporter];

    /// Value recorded when the field is missing or unreadable.
    #[must_use]
    pub const fn placeholder(self) -> &'static str {
        match self {
            Self::Type | Self::Reporter => UNKNOWN,
            Self::Address | Self::ReportTime => NOT_AVAILABLE,
        }
    }
}

/// An interactive map that can be moved and inspected.
///
/// All operations are awaited one at a time by a single owner.
#[async_trait]
pub trait MapSurface: Send {
    /// Short name for log lines.
    fn name(&self) -> &str;

    /// One-time page preparation: dismiss banners, tooltips and filters.
    /// Best effort; individual steps that fail are only logged.
    async fn prepare(&mut self) -> Result<(), SurfaceError>;

    /// Raw text of the coordinate display.
    async fn coordinate_text(&mut self) -> Result<String, SurfaceError>;

    /// Focuses the map and sends `steps` move signals in `direction`,
    /// pausing `key_pause` between signals.
    async fn send_pan(
        &mut self,
        direction: PanDirection,
        steps: u32,
        key_pause: Duration,
    ) -> Result<(), SurfaceError>;

    /// Closes recurring overlays. Returns whether anything was dismissed.
    async fn dismiss_overlays(&mut self) -> Result<bool, SurfaceError>;

    /// Markers currently visible in the view.
    async fn markers(&mut self) -> Result<Vec<MarkerHandle>, SurfaceError>;

    /// Ordinary click on `element`.
    async fn click(&mut self, element: &ElementRef) -> Result<(), SurfaceError>;

    /// Last-resort activation that bypasses overlays and hit testing.
    async fn force_interact(&mut self, element: &ElementRef) -> Result<(), SurfaceError>;

    /// Waits until the detail view is visible.
    async fn await_detail(&mut self, timeout: Duration) -> Result<(), SurfaceError>;

    /// Reads one field of the open detail view.
    async fn read_detail_field(&mut self, field: DetailField) -> Result<String, SurfaceError>;

    /// Closes the detail view if it is open.
    async fn close_detail(&mut self) -> Result<(), SurfaceError>;

    /// Ends the automation session.
    async fn shutdown(&mut self) -> Result<(), SurfaceError>;
}

/// Clicks `element`, escalating when something is in the way.
///
/// An obstructed click dismisses overlays and retries once; if that does
/// not work either, [`MapSurface::force_interact`] is used.
///
/// # Errors
///
/// Returns the error of the last attempt.
pub async fn interact(
    surface: &mut dyn MapSurface,
    element: &ElementRef,
) -> Result<(), SurfaceError> {
    match surface.click(element).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_obstruction() => {
            log::warn!("  -> Click obstructed ({e})");
            if surface.dismiss_overlays().await.unwrap_or(false) {
                tokio::time::sleep(Duration::from_millis(300)).await;
                match surface.click(element).await {
                    Ok(()) => return Ok(()),
                    Err(retry_err) => log::warn!("  -> Retried click failed: {retry_err}"),
                }
            }
            log::info!("  -> Forcing interaction as a last resort");
            surface.force_interact(element).await
        }
        Err(e) => Err(e),
    }
}
