//! Progress display for the worker pool

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Mutex;
use tracing::{debug, info};

use super::partition::WorkChunk;
use super::{ChunkReport, ChunkStatus, PoolSummary, PoolTotals};

/// Notified from the coordinator's event loop
pub trait ProgressObserver: Send + Sync {
    fn pool_started(&self, _chunks: &[WorkChunk], _total: u64) {}

    fn chunk_changed(&self, _report: &ChunkReport) {}

    fn progress(&self, _report: &ChunkReport, _totals: &PoolTotals) {}

    fn pool_finished(&self, _summary: &PoolSummary) {}
}

/// Reports through `tracing` only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn chunk_changed(&self, report: &ChunkReport) {
        info!(
            chunk = report.chunk.index,
            status = report.status.as_str(),
            processed = report.processed,
            "Worker status"
        );
    }

    fn progress(&self, report: &ChunkReport, totals: &PoolTotals) {
        debug!(
            chunk = report.chunk.index,
            processed = totals.processed,
            skipped = totals.skipped,
            total = totals.total,
            active = totals.active_workers,
            "Pool progress"
        );
    }
}

/// Live terminal view: one line per worker plus an overall bar with rate and ETA
pub struct DashboardObserver {
    multi: MultiProgress,
    overall: ProgressBar,
    workers: Mutex<Vec<ProgressBar>>,
}

impl DashboardObserver {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(0));
        overall.set_style(overall_style());
        Self {
            multi,
            overall,
            workers: Mutex::new(Vec::new()),
        }
    }

    fn worker_bar(&self, index: usize) -> Option<ProgressBar> {
        self.workers.lock().ok()?.get(index).cloned()
    }
}

impl Default for DashboardObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for DashboardObserver {
    fn pool_started(&self, chunks: &[WorkChunk], total: u64) {
        self.overall.set_length(total);
        let bars = chunks
            .iter()
            .map(|chunk| {
                let bar = self.multi.add(ProgressBar::new(chunk.length));
                bar.set_style(worker_style());
                bar.set_prefix(format!("#{:<3} {:>9}..{:<9}", chunk.index, chunk.start, chunk.end()));
                bar.set_message(ChunkStatus::Pending.as_str());
                bar
            })
            .collect();
        if let Ok(mut workers) = self.workers.lock() {
            *workers = bars;
        }
    }

    fn chunk_changed(&self, report: &ChunkReport) {
        let Some(bar) = self.worker_bar(report.chunk.index) else {
            return;
        };
        match report.status {
            ChunkStatus::Done => bar.finish_with_message(ChunkStatus::Done.as_str()),
            ChunkStatus::Incomplete => bar.abandon_with_message(ChunkStatus::Incomplete.as_str()),
            status => bar.set_message(status.as_str()),
        }
    }

    fn progress(&self, report: &ChunkReport, totals: &PoolTotals) {
        if let Some(bar) = self.worker_bar(report.chunk.index) {
            bar.set_position(report.processed + report.skipped);
        }
        self.overall.set_position(totals.processed + totals.skipped);
        self.overall.set_message(format!(
            "{} processed, {} skipped, {} active",
            totals.processed, totals.skipped, totals.active_workers
        ));
    }

    fn pool_finished(&self, summary: &PoolSummary) {
        let incomplete = summary.incomplete_chunks().len();
        let message = if incomplete == 0 {
            format!("{} processed, {} skipped", summary.processed, summary.skipped)
        } else {
            format!(
                "{} processed, {} skipped, {} chunks incomplete",
                summary.processed, summary.skipped, incomplete
            )
        };
        self.overall.finish_with_message(message);
    }
}

fn overall_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}, ETA {eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-")
}

fn worker_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}
