//! Progress reporting for sweeps and polling cycles.
//!
//! Discovery passes report through [`ProgressCallback`] so they never
//! depend on a rendering backend. The CLI plugs in `indicatif` bars; tests
//! and the library default use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a discovery pass.
///
/// Grid cycles report one unit per cell against a known total. Sweeps
/// have no meaningful total and report the saved-event count as the
/// position with a status message.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work (enables percentage/ETA).
    fn set_total(&self, total: u64);

    /// Set the current position (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark the pass as complete with a final message.
    fn finish(&self, msg: String);
}

/// Silently ignores all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
