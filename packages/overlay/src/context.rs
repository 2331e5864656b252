//! Per-run context handed through the pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use overlay_report_catalog_models::ProtectedTables;
use overlay_report_geometry::Crs;
use overlay_report_source::progress::{ProgressCallback, null_progress};

/// Polled between datasets and between AOI features.
pub trait CancellationSignal: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A shared flag; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CancellationSignal for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress sink, cancellation, protected tables and CRS for one run.
#[derive(Clone)]
pub struct RunContext {
    pub progress: Arc<dyn ProgressCallback>,
    pub cancellation: Arc<dyn CancellationSignal>,
    pub protected: ProtectedTables,
    pub working_crs: Crs,
    /// Number of datasets evaluated at once. Values below 1 mean 1.
    pub concurrency: usize,
}

impl RunContext {
    /// A silent, never-cancelled, sequential context.
    #[must_use]
    pub fn new(working_crs: Crs) -> Self {
        Self {
            progress: null_progress(),
            cancellation: Arc::new(CancelFlag::new()),
            protected: ProtectedTables::default(),
            working_crs,
            concurrency: 1,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Arc<dyn CancellationSignal>) -> Self {
        self.cancellation = cancellation;
        self
    }

    #[must_use]
    pub fn with_protected(mut self, protected: ProtectedTables) -> Self {
        self.protected = protected;
        self
    }

    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_flags_share_state() {
        let flag = CancelFlag::new();
        let context =
            RunContext::new(Crs::BC_ALBERS).with_cancellation(Arc::new(flag.clone()));

        assert!(!context.is_cancelled());
        flag.cancel();
        assert!(context.is_cancelled());
    }
}
