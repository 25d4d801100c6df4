//! Owned event list with load/admit/save operations.
//!
//! The list is written as a pretty-printed UTF-8 JSON array. Every save
//! rewrites the whole file through a staging sibling followed by a rename,
//! so a reader never observes a half-written list.

use std::path::{Path, PathBuf};

use traffic_sweep_incident_models::EventRecord;

use crate::DbError;
use crate::ledger::{Admission, DedupLedger};
use crate::paths::{ensure_dir, staging_path};

/// The durable event list plus the repetition ledger derived from it.
#[derive(Debug)]
pub struct EventStore {
    path: PathBuf,
    events: Vec<EventRecord>,
    ledger: DedupLedger,
}

impl EventStore {
    /// Creates an empty, unsaved store backed by `path`.
    #[must_use]
    pub fn empty(path: &Path, cap: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            events: Vec::new(),
            ledger: DedupLedger::new(cap),
        }
    }

    /// Loads the event list at `path` and rebuilds the ledger from it.
    ///
    /// A missing file yields an empty store. A file that is not a valid
    /// JSON array of events is logged and treated as empty; the next save
    /// overwrites it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Io`] if the file exists but cannot be read.
    pub fn load(path: &Path, cap: u32) -> Result<Self, DbError> {
        if !path.exists() {
            log::warn!(
                "Event list {} not found, starting from scratch",
                path.display()
            );
            return Ok(Self::empty(path, cap));
        }

        let text = std::fs::read_to_string(path)?;
        let events: Vec<EventRecord> = match serde_json::from_str(&text) {
            Ok(events) => events,
            Err(e) => {
                log::error!(
                    "Event list {} is corrupt or empty ({e}), starting from scratch",
                    path.display()
                );
                Vec::new()
            }
        };

        let ledger = DedupLedger::from_records(&events, cap);
        log::info!(
            "Loaded {} previous events ({} unique fingerprints) from {}",
            events.len(),
            ledger.unique_fingerprints(),
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            events,
            ledger,
        })
    }

    /// Re-reads the backing file, replacing in-memory state.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file cannot be read.
    pub fn reload(&mut self) -> Result<(), DbError> {
        *self = Self::load(&self.path, self.ledger.cap())?;
        Ok(())
    }

    /// Offers `record` to the ledger and appends it when admitted.
    ///
    /// The caller decides when to [`save`](Self::save).
    pub fn admit(&mut self, record: EventRecord) -> Admission {
        let admission = self.ledger.admit(&record.event_id);
        if admission.is_admitted() {
            self.events.push(record);
        }
        admission
    }

    /// Writes the full event list, replacing the previous file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization, the staging write, or the
    /// rename fails.
    pub fn save(&self) -> Result<(), DbError> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }

        let staging = staging_path(&self.path);
        let json = serde_json::to_string_pretty(&self.events)?;
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, &self.path)?;

        log::trace!(
            "Saved {} events to {}",
            self.events.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Admitted events in admission order.
    #[must_use]
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Number of admitted events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events have been admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The repetition ledger.
    #[must_use]
    pub const fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
