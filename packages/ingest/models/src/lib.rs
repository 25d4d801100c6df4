#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Session summaries and event list statistics for the ingestion driver.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use traffic_sweep_discover_models::{DiscoveryMode, PassOutcome, PassReport};
use traffic_sweep_incident_models::EventRecord;

// ---------------------------------------------------------------------------
// Session summary
// ---------------------------------------------------------------------------

/// Running totals over every pass of one driver session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Engine the session ran.
    pub mode: DiscoveryMode,
    /// Passes that ran to completion.
    pub completed: u32,
    /// Passes that stopped early.
    pub aborted: u32,
    /// Passes stopped by a shutdown request.
    pub cancelled: u32,
    /// Records appended across all passes.
    pub admitted: usize,
    /// Records rejected by the repetition cap across all passes.
    pub rejected: usize,
    /// Events in the durable list when the session ended.
    pub events: usize,
    /// Distinct fingerprints in the durable list when the session ended.
    pub unique_fingerprints: usize,
    /// Where the durable list lives.
    pub output_path: PathBuf,
    /// When the session started.
    pub started_at: DateTime<Utc>,
}

impl SessionSummary {
    /// An empty summary for a session starting now.
    #[must_use]
    pub fn new(mode: DiscoveryMode, output_path: PathBuf) -> Self {
        Self {
            mode,
            completed: 0,
            aborted: 0,
            cancelled: 0,
            admitted: 0,
            rejected: 0,
            events: 0,
            unique_fingerprints: 0,
            output_path,
            started_at: Utc::now(),
        }
    }

    /// Folds one pass into the totals.
    pub fn record(&mut self, report: &PassReport) {
        match report.outcome {
            PassOutcome::Completed => self.completed += 1,
            PassOutcome::Aborted(_) => self.aborted += 1,
            PassOutcome::Cancelled => self.cancelled += 1,
        }
        self.admitted += report.admitted;
        self.rejected += report.rejected;
    }

    /// Total passes recorded.
    #[must_use]
    pub const fn passes(&self) -> u32 {
        self.completed + self.aborted + self.cancelled
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} session: {} passes ({} completed, {} aborted, {} cancelled), \
             {} new events this session; {} events ({} unique) in {}",
            self.mode,
            self.passes(),
            self.completed,
            self.aborted,
            self.cancelled,
            self.admitted,
            self.events,
            self.unique_fingerprints,
            self.output_path.display(),
        )
    }
}

// ---------------------------------------------------------------------------
// Event list statistics
// ---------------------------------------------------------------------------

/// Aggregate view of a durable event list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    /// Number of records.
    pub events: usize,
    /// Number of distinct fingerprints.
    pub unique_fingerprints: usize,
    /// Records per event type.
    pub by_type: BTreeMap<String, usize>,
    /// Records carrying a coordinate.
    pub with_location: usize,
    /// The most repeated fingerprint and its count.
    pub most_repeated: Option<(String, usize)>,
}

impl EventStats {
    /// Computes statistics over `events`.
    #[must_use]
    pub fn from_events(events: &[EventRecord]) -> Self {
        let mut by_type = BTreeMap::new();
        let mut by_fingerprint: BTreeMap<&str, usize> = BTreeMap::new();
        let mut with_location = 0;

        for event in events {
            *by_type.entry(event.event_type.clone()).or_insert(0) += 1;
            *by_fingerprint.entry(event.event_id.as_str()).or_insert(0) += 1;
            if event.latitude.is_some() && event.longitude.is_some() {
                with_location += 1;
            }
        }

        // Ties go to the lexicographically first fingerprint.
        let most_repeated = by_fingerprint
            .iter()
            .fold(None::<(&str, usize)>, |best, (&id, &count)| match best {
                Some((_, top)) if top >= count => best,
                _ => Some((id, count)),
            })
            .map(|(id, count)| (id.to_string(), count));

        Self {
            events: events.len(),
            unique_fingerprints: by_fingerprint.len(),
            by_type,
            with_location,
            most_repeated,
        }
    }
}

impl fmt::Display for EventStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Events:              {}", self.events)?;
        writeln!(f, "Unique fingerprints: {}", self.unique_fingerprints)?;
        writeln!(f, "With coordinates:    {}", self.with_location)?;
        if let Some((id, count)) = &self.most_repeated {
            writeln!(f, "Most repeated:       {id} ({count}x)")?;
        }
        if !self.by_type.is_empty() {
            writeln!(f, "By type:")?;
            for (event_type, count) in &self.by_type {
                writeln!(f, "  {event_type:<24} {count}")?;
            }
        }
        Ok(())
    }
}
