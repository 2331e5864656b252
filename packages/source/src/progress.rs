//! Progress reporting for overlay runs.
//!
//! The pipeline reports through [`ProgressCallback`] so the same run can
//! drive an `indicatif` bar in the CLI, plain log lines in batch jobs, or
//! nothing at all in tests. Implementations must never fail; a progress
//! sink that cannot render simply drops the update.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for run progress: one unit per evaluated dataset plus free-text
/// status messages.
pub trait ProgressCallback: Send + Sync {
    /// Set the total number of datasets in the run.
    fn set_total(&self, total: u64);

    /// Set the number of datasets finished so far.
    fn set_position(&self, pos: u64);

    /// Advance by `delta` finished datasets.
    fn inc(&self, delta: u64);

    /// Show a status message (current dataset, counts, warnings).
    fn set_message(&self, msg: String);

    /// Mark the run as complete with a final message.
    fn finish(&self, msg: String);

    /// Mark the run as complete and remove the progress indicator.
    fn finish_and_clear(&self);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// Writes progress as `log` lines, for runs without a terminal.
#[derive(Default)]
pub struct LogProgress {
    total: AtomicU64,
    position: AtomicU64,
}

impl ProgressCallback for LogProgress {
    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.position.store(0, Ordering::Relaxed);
    }

    fn set_position(&self, pos: u64) {
        self.position.store(pos, Ordering::Relaxed);
    }

    fn inc(&self, delta: u64) {
        let position = self.position.fetch_add(delta, Ordering::Relaxed) + delta;
        log::debug!(
            "Progress: {position}/{}",
            self.total.load(Ordering::Relaxed)
        );
    }

    fn set_message(&self, msg: String) {
        log::info!("{msg}");
    }

    fn finish(&self, msg: String) {
        log::info!("{msg}");
    }

    fn finish_and_clear(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_progress_tracks_position() {
        let progress = LogProgress::default();
        progress.set_total(4);
        progress.inc(1);
        progress.inc(2);
        assert_eq!(progress.position.load(Ordering::Relaxed), 3);

        progress.set_total(10);
        assert_eq!(progress.position.load(Ordering::Relaxed), 0);
    }
}
