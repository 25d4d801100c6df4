//! Reads the map's current centre from its coordinate display.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use traffic_sweep_geography_models::Coordinate;
use traffic_sweep_source::retry::RetryPolicy;

use crate::{MapSurface, SurfaceError};

static COORDINATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d.])(-?\d{1,2}\.\d+)\s*[,|]?\s*(-?\d{1,3}\.\d+)").unwrap_or_else(|_| unreachable!())
});

/// Extracts a latitude/longitude pair from display text.
///
/// Accepts a comma, a pipe, or plain whitespace between the numbers and
/// ignores surrounding text. The latitude may not be the tail of a longer
/// number. Values outside ±90 / ±180 are rejected.
#[must_use]
pub fn parse_coordinates(text: &str) -> Option<Coordinate> {
    let caps = COORDINATE_RE.captures(text)?;
    let latitude: f64 = caps[1].parse().ok()?;
    let longitude: f64 = caps[2].parse().ok()?;
    ((-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude))
        .then_some(Coordinate::new(latitude, longitude))
}

/// Re-read behaviour of the [`Locator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSettings {
    /// Re-reads after the first read.
    pub retries: u32,
    /// Pause between reads in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay_ms: 600,
        }
    }
}

/// Why a position could not be determined.
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    /// The display was unreadable or its text unparsable.
    #[error("position not found: {0}")]
    NotFound(String),

    /// The surface failed structurally.
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Reads and parses the coordinate display, remembering the last text
/// it accepted so that a post-move read can wait for the display to
/// update.
#[derive(Debug, Clone, Default)]
pub struct Locator {
    settings: LocatorSettings,
    last_text: Option<String>,
}

impl Locator {
    /// Creates a locator with no previous reading.
    #[must_use]
    pub const fn new(settings: LocatorSettings) -> Self {
        Self {
            settings,
            last_text: None,
        }
    }

    /// Reads the current position.
    ///
    /// With `expect_change`, a text identical to the previous accepted
    /// reading is re-read up to the retry limit; if it never changes it is
    /// accepted anyway. Read failures are retried the same way.
    /// Unparsable text fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError::NotFound`] for unparsable text or when every
    /// read failed, and [`LocateError::Surface`] for structural failures.
    pub async fn locate(
        &mut self,
        surface: &mut dyn MapSurface,
        expect_change: bool,
    ) -> Result<Coordinate, LocateError> {
        let policy = RetryPolicy::fixed(self.settings.retries, self.settings.retry_delay_ms);
        let previous = if expect_change {
            self.last_text.clone()
        } else {
            None
        };
        let mut unchanged: Option<String> = None;
        let mut last_error: Option<SurfaceError> = None;

        for attempt in policy.attempts() {
            attempt.wait().await;
            match surface.coordinate_text().await {
                Ok(text) => {
                    if !attempt.is_last && previous.as_deref() == Some(text.as_str()) {
                        log::debug!(
                            "  [Location] Text unchanged ('{text}'), re-reading ({}/{})",
                            attempt.number + 1,
                            policy.max_retries
                        );
                        unchanged = Some(text);
                        continue;
                    }
                    return self.accept(&text);
                }
                Err(e) if e.is_structural() => return Err(e.into()),
                Err(e) => {
                    log::warn!(
                        "  [Location] Read failed (attempt {}/{}): {e}",
                        attempt.number + 1,
                        policy.max_retries + 1
                    );
                    last_error = Some(e);
                }
            }
        }

        if let Some(text) = unchanged {
            return self.accept(&text);
        }
        Err(LocateError::NotFound(last_error.map_or_else(
            || "coordinate display unavailable".to_string(),
            |e| e.to_string(),
        )))
    }

    /// Forgets the previous reading.
    pub fn reset(&mut self) {
        self.last_text = None;
    }

    fn accept(&mut self, text: &str) -> Result<Coordinate, LocateError> {
        let Some(coordinate) = parse_coordinates(text) else {
            log::warn!("Could not extract lat/lon from text: '{text}'");
            return Err(LocateError::NotFound(format!("unparsable text '{text}'")));
        };
        log::debug!("  [Location] {coordinate}");
        self.last_text = Some(text.to_string());
        Ok(coordinate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedSurface;

    fn fast() -> Locator {
        Locator::new(LocatorSettings {
            retries: 2,
            retry_delay_ms: 0,
        })
    }

    #[test]
    fn parses_separator_variants() {
        for text in [
            "-33.4567, -70.6543",
            "-33.4567 | -70.6543",
            "-33.4567 -70.6543",
            "-33.4567,-70.6543",
            "Lat/Lon: -33.4567 , -70.6543 (WGS84)",
        ] {
            let c = parse_coordinates(text).unwrap_or_else(|| panic!("failed on '{text}'"));
            assert!(c.is_near(&Coordinate::new(-33.4567, -70.6543), 1e-9), "{text}");
        }
    }

    #[test]
    fn parses_positive_and_short_values() {
        let c = parse_coordinates("5.5, 120.25").unwrap();
        assert!(c.is_near(&Coordinate::new(5.5, 120.25), 1e-12));
    }

    #[test]
    fn rejects_malformed_text() {
        for text in ["", "loading...", "-33, -70", "abc.def, ghi", "-33.45"] {
            assert!(parse_coordinates(text).is_none(), "accepted '{text}'");
        }
    }

    #[test]
    fn rejects_latitude_cut_from_longer_number() {
        assert!(parse_coordinates("123.456, 45.6").is_none());
        let c = parse_coordinates("(12.5, 45.6)").unwrap();
        assert!(c.is_near(&Coordinate::new(12.5, 45.6), 1e-12));
    }

    #[test]
    fn rejects_out_of_range_longitude() {
        assert!(parse_coordinates("10.0, 181.5").is_none());
        assert!(parse_coordinates("10.0, -180.0").is_some());
    }

    #[tokio::test]
    async fn unchanged_text_is_reread_then_accepted() {
        let mut surface = SimulatedSurface::new(Coordinate::new(-33.45, -70.65), 0.01, 0.01)
            .with_scripted_texts(&["-33.45, -70.65", "-33.45, -70.65", "-33.45, -70.65"]);
        let mut locator = fast();
        locator.locate(&mut surface, false).await.unwrap();

        let c = locator.locate(&mut surface, true).await.unwrap();
        assert!(c.is_near(&Coordinate::new(-33.45, -70.65), 1e-9));
    }

    #[tokio::test]
    async fn changed_text_on_reread_wins() {
        let mut surface = SimulatedSurface::new(Coordinate::new(0.0, 0.0), 0.01, 0.01)
            .with_scripted_texts(&["1.0, 2.0", "1.0, 2.0", "1.5, 2.0"]);
        let mut locator = fast();
        locator.locate(&mut surface, false).await.unwrap();

        let c = locator.locate(&mut surface, true).await.unwrap();
        assert!(c.is_near(&Coordinate::new(1.5, 2.0), 1e-12));
    }

    #[tokio::test]
    async fn read_failures_are_retried() {
        let mut surface =
            SimulatedSurface::new(Coordinate::new(1.0, 1.0), 0.01, 0.01).with_read_failures(2);
        assert!(fast().locate(&mut surface, false).await.is_ok());
    }

    #[tokio::test]
    async fn exhausted_read_failures_are_not_found() {
        let mut surface =
            SimulatedSurface::new(Coordinate::new(1.0, 1.0), 0.01, 0.01).with_read_failures(3);
        assert!(matches!(
            fast().locate(&mut surface, false).await,
            Err(LocateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unparsable_text_fails_without_retry() {
        let mut surface = SimulatedSurface::new(Coordinate::new(1.0, 1.0), 0.01, 0.01)
            .with_scripted_texts(&["cargando mapa", "2.0, 2.0"]);
        let mut locator = fast();
        assert!(matches!(
            locator.locate(&mut surface, false).await,
            Err(LocateError::NotFound(_))
        ));
        let c = locator.locate(&mut surface, false).await.unwrap();
        assert!(c.is_near(&Coordinate::new(2.0, 2.0), 1e-12));
    }
}
