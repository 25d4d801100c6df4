//! Moves the map and reports where it ended up.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use traffic_sweep_geography_models::{Coordinate, PanDirection};

use crate::locator::{LocateError, Locator, LocatorSettings};
use crate::{MapSurface, SurfaceError};

/// Timing of move signals and the reads that follow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanSettings {
    /// Pause between consecutive move signals in milliseconds.
    pub key_pause_ms: u64,
    /// Wait after the last signal before reading the position.
    pub settle_ms: u64,
    /// Wait after dismissing an overlay before retrying.
    pub overlay_pause_ms: u64,
    /// Coordinate display re-read behaviour.
    pub locator: LocatorSettings,
}

impl Default for PanSettings {
    fn default() -> Self {
        Self {
            key_pause_ms: 200,
            settle_ms: 2000,
            overlay_pause_ms: 300,
            locator: LocatorSettings::default(),
        }
    }
}

impl PanSettings {
    /// No waiting at all. Meant for in-memory surfaces.
    #[must_use]
    pub const fn instant() -> Self {
        Self {
            key_pause_ms: 0,
            settle_ms: 0,
            overlay_pause_ms: 0,
            locator: LocatorSettings {
                retries: 2,
                retry_delay_ms: 0,
            },
        }
    }
}

/// Why a move did not produce a position.
#[derive(Debug, thiserror::Error)]
pub enum PanError {
    /// The move or the subsequent read failed.
    #[error("pan failed: {0}")]
    Failed(String),

    /// The surface failed structurally.
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

impl From<LocateError> for PanError {
    fn from(e: LocateError) -> Self {
        match e {
            LocateError::NotFound(reason) => Self::Failed(reason),
            LocateError::Surface(e) => Self::Surface(e),
        }
    }
}

/// Sends directional moves and confirms the resulting position.
#[derive(Debug, Clone)]
pub struct Panner {
    settings: PanSettings,
    locator: Locator,
}

impl Panner {
    /// Creates a panner with a fresh [`Locator`].
    #[must_use]
    pub const fn new(settings: PanSettings) -> Self {
        Self {
            settings,
            locator: Locator::new(settings.locator),
        }
    }

    /// Reads the current position without moving.
    ///
    /// # Errors
    ///
    /// Returns [`PanError::Failed`] if the position cannot be read.
    pub async fn locate(&mut self, surface: &mut dyn MapSurface) -> Result<Coordinate, PanError> {
        Ok(self.locator.locate(surface, false).await?)
    }

    /// Moves `steps` signals in `direction` and returns the new position.
    ///
    /// A move blocked by an overlay (not interactable, or the focusing
    /// click intercepted) gets one retry after overlays are dismissed.
    ///
    /// # Errors
    ///
    /// Returns [`PanError::Failed`] when the move cannot be delivered or
    /// the position cannot be read afterwards, and [`PanError::Surface`]
    /// for structural failures.
    pub async fn pan(
        &mut self,
        surface: &mut dyn MapSurface,
        direction: PanDirection,
        steps: u32,
    ) -> Result<Coordinate, PanError> {
        dismiss_quietly(surface).await?;

        let key_pause = Duration::from_millis(self.settings.key_pause_ms);
        log::debug!("  [Pan] {direction} x {steps}");

        match surface.send_pan(direction, steps, key_pause).await {
            Ok(()) => {}
            Err(e) if e.is_obstruction() => {
                log::warn!("  [Pan] Map obstructed ({e}), dismissing overlays and retrying once");
                if !surface.dismiss_overlays().await.unwrap_or(false) {
                    return Err(PanError::Failed(format!(
                        "map obstructed and nothing to dismiss: {e}"
                    )));
                }
                sleep_ms(self.settings.overlay_pause_ms).await;
                surface
                    .send_pan(direction, steps, key_pause)
                    .await
                    .map_err(|e| {
                        if e.is_structural() {
                            PanError::Surface(e)
                        } else {
                            PanError::Failed(format!("retried pan failed: {e}"))
                        }
                    })?;
            }
            Err(e) if e.is_structural() => return Err(e.into()),
            Err(e) => return Err(PanError::Failed(e.to_string())),
        }

        sleep_ms(self.settings.settle_ms).await;

        let position = self.locator.locate(surface, true).await.map_err(|e| {
            log::warn!("  [Pan] Could not read position after moving: {e}");
            e
        })?;
        log::debug!("  [Pan] Now at {position}");
        Ok(position)
    }

    /// Steps toward `target` until both axes are within `tolerance`.
    ///
    /// Each step moves one signal vertically if the latitude gap is at
    /// least `tolerance`, then one signal horizontally if the longitude
    /// gap is. A failed move ends the walk early and, like running out of
    /// `max_steps`, returns the position reached so far.
    ///
    /// # Errors
    ///
    /// Returns [`PanError::Failed`] if the start position cannot be read
    /// and [`PanError::Surface`] for structural failures at any point.
    pub async fn reposition(
        &mut self,
        surface: &mut dyn MapSurface,
        target: Coordinate,
        tolerance: f64,
        max_steps: u32,
    ) -> Result<Coordinate, PanError> {
        log::info!("Moving map to {target}");
        let mut current = self.locate(surface).await?;

        for step in 0..max_steps {
            let lat_gap = target.latitude - current.latitude;
            let lon_gap = target.longitude - current.longitude;

            if lat_gap.abs() < tolerance && lon_gap.abs() < tolerance {
                log::info!("Reached {current} after {step} steps");
                return Ok(current);
            }

            if lat_gap.abs() >= tolerance {
                let direction = if lat_gap > 0.0 {
                    PanDirection::Up
                } else {
                    PanDirection::Down
                };
                let Some(position) = self.step_toward(surface, direction).await? else {
                    return Ok(current);
                };
                current = position;
            }

            if lon_gap.abs() >= tolerance {
                let direction = if lon_gap > 0.0 {
                    PanDirection::Right
                } else {
                    PanDirection::Left
                };
                let Some(position) = self.step_toward(surface, direction).await? else {
                    return Ok(current);
                };
                current = position;
            }
        }

        log::info!("Step budget exhausted; stopped at {current}");
        Ok(current)
    }

    /// One repositioning move. `None` when the move failed transiently.
    async fn step_toward(
        &mut self,
        surface: &mut dyn MapSurface,
        direction: PanDirection,
    ) -> Result<Option<Coordinate>, PanError> {
        match self.pan(surface, direction, 1).await {
            Ok(position) => Ok(Some(position)),
            Err(PanError::Failed(reason)) => {
                log::warn!("Repositioning step {direction} failed ({reason}); stopping here");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

async fn dismiss_quietly(surface: &mut dyn MapSurface) -> Result<(), SurfaceError> {
    match surface.dismiss_overlays().await {
        Ok(_) => Ok(()),
        Err(e) if e.is_structural() => Err(e),
        Err(e) => {
            log::debug!("  [Overlay] Dismissal failed: {e}");
            Ok(())
        }
    }
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
