#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Durable event list and deduplication ledger.
//!
//! The [`EventStore`](event_store::EventStore) is the only state that
//! outlives a sweep or polling cycle. It owns the ordered list of admitted
//! [`EventRecord`](traffic_sweep_incident_models::EventRecord)s, persisted
//! as a JSON array, and a [`DedupLedger`](ledger::DedupLedger) whose
//! repetition counters are always rebuilt from that list. Crash recovery
//! therefore needs nothing beyond the event file itself.

pub mod event_store;
pub mod ledger;
pub mod paths;

pub use event_store::EventStore;
pub use ledger::{Admission, DedupLedger};

/// Errors that can occur while reading or writing the event list.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// I/O error (file read/write/rename).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
