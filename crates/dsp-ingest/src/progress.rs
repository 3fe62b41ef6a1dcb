//! Worker-side progress reporting

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives counts as the pipeline makes progress
pub trait ProgressSink: Send + Sync {
    /// Subjects written to the store
    fn processed(&self, count: u64);

    /// Records dropped without being written
    fn skipped(&self, count: u64);
}

/// Accumulates counts in memory
#[derive(Debug, Default)]
pub struct CountingSink {
    processed: AtomicU64,
    skipped: AtomicU64,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed_total(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl ProgressSink for CountingSink {
    fn processed(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::Relaxed);
    }

    fn skipped(&self, count: u64) {
        self.skipped.fetch_add(count, Ordering::Relaxed);
    }
}
