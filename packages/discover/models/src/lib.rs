#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the discovery engines.
//!
//! Settings for the panning sweep and the polling grid, the states of the
//! sweep state machine, and the report each discovery pass produces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use traffic_sweep_incident_models::FingerprintPolicy;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which discovery engine a deployment runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Serpentine panning over a live map UI.
    #[default]
    Sweep,
    /// One telemetry request per grid cell.
    Grid,
}

impl DiscoveryMode {
    /// Returns the `snake_case` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sweep => "sweep",
            Self::Grid => "grid",
        }
    }

    /// Repetition cap used when the configuration does not set one.
    #[must_use]
    pub const fn default_cap(self) -> u32 {
        match self {
            Self::Sweep => 5,
            Self::Grid => 1,
        }
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for DiscoveryMode {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "sweep" => Ok(Self::Sweep),
            "grid" => Ok(Self::Grid),
            _ => Err(format!("unknown DiscoveryMode: {value}")),
        }
    }
}

impl std::str::FromStr for DiscoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

// ---------------------------------------------------------------------------

/// States of the sweep state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepState {
    /// Moving to the rectangle centre.
    Positioning,
    /// Extracting the markers in the current view.
    Scanning,
    /// Moving one column step up or down.
    Advancing,
    /// Moving right into the next column.
    Turning,
    /// Too many unproductive passes at one location.
    Stalled,
    /// Ended early.
    Aborted,
    /// Covered the whole rectangle.
    SweepDone,
}

impl SweepState {
    /// Returns the `snake_case` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positioning => "positioning",
            Self::Scanning => "scanning",
            Self::Advancing => "advancing",
            Self::Turning => "turning",
            Self::Stalled => "stalled",
            Self::Aborted => "aborted",
            Self::SweepDone => "sweep_done",
        }
    }

    /// Whether the sweep ends in this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::SweepDone)
    }
}

impl fmt::Display for SweepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------

/// How a discovery pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum PassOutcome {
    /// The whole rectangle (or every grid cell) was visited.
    Completed,
    /// The pass stopped early.
    Aborted(String),
    /// A shutdown request stopped the pass.
    Cancelled,
}

impl PassOutcome {
    /// Whether the pass covered everything it set out to.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Aborted(reason) => write!(f, "aborted ({reason})"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tuning of the panning sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    /// Move signals per vertical advance.
    pub steps_vertical: u32,
    /// Move signals per column turn.
    pub steps_horizontal: u32,
    /// Unproductive passes at one location before a stall jump.
    pub stuck_threshold: u32,
    /// Consecutive pan or locate failures before the sweep aborts.
    pub max_consecutive_failures: u32,
    /// Degrees within which a reposition counts as arrived.
    pub reposition_tolerance: f64,
    /// Single-signal moves a reposition may spend.
    pub reposition_max_steps: u32,
    /// State transitions a single sweep may take.
    pub max_transitions: u32,
    /// How often a fingerprint may be stored.
    pub repetition_cap: u32,
    /// Fingerprint used to deduplicate extracted records.
    pub fingerprint_policy: FingerprintPolicy,
    /// Informative goal shown in progress logs. Never stops the sweep.
    pub target_events: usize,
    /// Log a progress line every this many saved events.
    pub progress_every: usize,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            steps_vertical: 10,
            steps_horizontal: 10,
            stuck_threshold: 5,
            max_consecutive_failures: 5,
            reposition_tolerance: 0.008,
            reposition_max_steps: 150,
            max_transitions: 5_000,
            repetition_cap: DiscoveryMode::Sweep.default_cap(),
            fingerprint_policy: FingerprintPolicy::ReporterAddressType,
            target_events: 10_000,
            progress_every: 100,
        }
    }
}

/// Tuning of the polling grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// Cell edge length in degrees.
    pub grid_size: f64,
    /// How often a fingerprint may be stored.
    pub repetition_cap: u32,
    /// Fingerprint used to deduplicate alerts.
    pub fingerprint_policy: FingerprintPolicy,
    /// Resolve addresses through the reverse geocoder. When off, every
    /// record gets the coordinate fallback string.
    pub geocode: bool,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            grid_size: 0.05,
            repetition_cap: DiscoveryMode::Grid.default_cap(),
            fingerprint_policy: FingerprintPolicy::TypeLocationTime,
            geocode: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Summary of one sweep or polling cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Engine that ran the pass.
    pub mode: DiscoveryMode,
    /// How the pass ended.
    pub outcome: PassOutcome,
    /// Records appended to the event list.
    pub admitted: usize,
    /// Records rejected by the repetition cap.
    pub rejected: usize,
    /// Markers or alerts that produced no record.
    pub skipped: usize,
    /// Markers (sweep) or alerts (grid) looked at.
    pub observed: usize,
    /// Stall jumps taken (sweep only).
    pub stalls: u32,
    /// State transitions taken (sweep only).
    pub transitions: u32,
    /// Cells whose request failed (grid only).
    pub failed_cells: usize,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass ended.
    pub finished_at: DateTime<Utc>,
}

impl PassReport {
    /// An empty report for a pass starting now.
    #[must_use]
    pub fn start(mode: DiscoveryMode) -> Self {
        let now = Utc::now();
        Self {
            mode,
            outcome: PassOutcome::Completed,
            admitted: 0,
            rejected: 0,
            skipped: 0,
            observed: 0,
            stalls: 0,
            transitions: 0,
            failed_cells: 0,
            started_at: now,
            finished_at: now,
        }
    }

    /// Stamps the end time and outcome.
    #[must_use]
    pub fn finish(mut self, outcome: PassOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Utc::now();
        self
    }

    /// Wall-clock length of the pass in seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pass {} in {:.1}s: {} new, {} duplicates, {} skipped, {} observed",
            self.mode,
            self.outcome,
            self.duration_secs(),
            self.admitted,
            self.rejected,
            self.skipped,
            self.observed,
        )?;
        match self.mode {
            DiscoveryMode::Sweep => write!(
                f,
                ", {} stall jumps, {} transitions",
                self.stalls, self.transitions
            ),
            DiscoveryMode::Grid => write!(f, ", {} failed cells", self.failed_cells),
        }
    }
}
