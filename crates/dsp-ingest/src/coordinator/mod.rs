//! Worker pool coordinator
//!
//! Partitions an offset range into static chunks and runs one worker per
//! chunk, ramping up one launch per `seek_delay` while fewer than
//! `max_concurrent_workers` are active. Progress arrives as protocol messages
//! and is folded into the totals by a single event loop. A chunk whose worker
//! exits without success is reported incomplete; it is never reassigned.

mod launcher;
mod observer;
mod partition;
mod protocol;

pub use launcher::{ProcessLauncher, WorkerExit, WorkerHandle, WorkerLauncher};
pub use observer::{DashboardObserver, LogObserver, ProgressObserver};
pub use partition::{partition, WorkChunk};
pub use protocol::{decode_line, encode_line, Assignment, ProtocolError, WorkerMessage};

use chrono::{DateTime, Utc};
use dsp_common::DspError;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ============================================================================
// Pool Configuration Constants
// ============================================================================

/// Default number of chunks the range is split into.
pub const DEFAULT_BOT_COUNT: usize = 15;

/// Default delay between worker launches.
pub const DEFAULT_SEEK_DELAY_SECS: u64 = 10;

/// Default ceiling on simultaneously running workers.
pub const DEFAULT_MAX_CONCURRENT_WORKERS: usize = 6;

/// Default re-check interval while at the worker ceiling.
pub const DEFAULT_SATURATION_POLL_SECS: u64 = 3;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub bot_count: usize,
    pub seek_delay: Duration,
    pub max_concurrent_workers: usize,
    pub saturation_poll: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            bot_count: DEFAULT_BOT_COUNT,
            seek_delay: Duration::from_secs(DEFAULT_SEEK_DELAY_SECS),
            max_concurrent_workers: DEFAULT_MAX_CONCURRENT_WORKERS,
            saturation_poll: Duration::from_secs(DEFAULT_SATURATION_POLL_SECS),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> dsp_common::Result<()> {
        if self.bot_count == 0 {
            return Err(DspError::config("Worker count must be greater than 0"));
        }
        if self.max_concurrent_workers == 0 {
            return Err(DspError::config("Max concurrent workers must be greater than 0"));
        }
        if self.saturation_poll.is_zero() {
            return Err(DspError::config("Saturation poll interval must be greater than 0"));
        }
        Ok(())
    }
}

/// Lifecycle of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    /// Worker launched, waiting for it to report ready
    Seeking,
    /// Assignment delivered
    Building,
    Done,
    Incomplete,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Seeking => "seeking",
            ChunkStatus::Building => "building",
            ChunkStatus::Done => "done",
            ChunkStatus::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    pub chunk: WorkChunk,
    pub status: ChunkStatus,
    pub processed: u64,
    pub skipped: u64,
    pub exit: Option<WorkerExit>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolTotals {
    pub processed: u64,
    pub skipped: u64,
    pub active_workers: usize,
    /// Offsets in the whole range
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct PoolSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub processed: u64,
    pub skipped: u64,
    pub chunks: Vec<ChunkReport>,
}

impl PoolSummary {
    pub fn incomplete_chunks(&self) -> Vec<&ChunkReport> {
        self.chunks
            .iter()
            .filter(|c| c.status != ChunkStatus::Done)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.incomplete_chunks().is_empty()
    }
}

#[derive(Debug)]
enum PoolEvent {
    Message { chunk: usize, message: WorkerMessage },
    Fault { chunk: usize, error: ProtocolError },
    Exited { chunk: usize, exit: WorkerExit },
}

/// State owned by the event loop
struct PoolState {
    reports: Vec<ChunkReport>,
    next: usize,
    totals: PoolTotals,
}

impl PoolState {
    fn has_pending(&self) -> bool {
        self.next < self.reports.len()
    }
}

pub struct Coordinator {
    config: PoolConfig,
    launcher: Arc<dyn WorkerLauncher>,
    observer: Arc<dyn ProgressObserver>,
}

impl Coordinator {
    pub fn new(config: PoolConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            config,
            launcher,
            observer: Arc::new(LogObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Process `[start, end)` across the pool and wait for every worker to exit
    pub async fn run(&self, start: u64, end: u64) -> anyhow::Result<PoolSummary> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        let chunks = partition(start, end, self.config.bot_count);
        info!(
            %run_id,
            start,
            end,
            chunks = chunks.len(),
            max_concurrent = self.config.max_concurrent_workers,
            "Starting worker pool"
        );

        let mut pool = PoolState {
            reports: chunks
                .iter()
                .map(|chunk| ChunkReport {
                    chunk: *chunk,
                    status: ChunkStatus::Pending,
                    processed: 0,
                    skipped: 0,
                    exit: None,
                })
                .collect(),
            next: 0,
            totals: PoolTotals {
                total: end.saturating_sub(start),
                ..Default::default()
            },
        };
        self.observer.pool_started(&chunks, pool.totals.total);

        let (events_tx, mut events) = mpsc::channel(EVENT_BUFFER);
        if pool.has_pending() {
            self.launch_next(&mut pool, &events_tx).await;
        }

        let spawn_timer = sleep(self.config.seek_delay);
        tokio::pin!(spawn_timer);

        while pool.has_pending() || pool.totals.active_workers > 0 {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(&mut pool, event),
                () = &mut spawn_timer, if pool.has_pending() => {
                    let delay = if pool.totals.active_workers < self.config.max_concurrent_workers {
                        self.launch_next(&mut pool, &events_tx).await;
                        self.config.seek_delay
                    } else {
                        debug!(active = pool.totals.active_workers, "Worker ceiling reached");
                        self.config.saturation_poll
                    };
                    spawn_timer.as_mut().reset(Instant::now() + delay);
                },
                else => break,
            }
        }

        let summary = PoolSummary {
            run_id,
            started_at,
            elapsed: clock.elapsed(),
            processed: pool.totals.processed,
            skipped: pool.totals.skipped,
            chunks: pool.reports,
        };
        info!(
            %run_id,
            processed = summary.processed,
            skipped = summary.skipped,
            incomplete = summary.incomplete_chunks().len(),
            elapsed_secs = summary.elapsed.as_secs(),
            "Worker pool finished"
        );
        self.observer.pool_finished(&summary);
        Ok(summary)
    }

    async fn launch_next(&self, pool: &mut PoolState, events: &mpsc::Sender<PoolEvent>) {
        let index = pool.next;
        pool.next += 1;
        let chunk = pool.reports[index].chunk;

        match self.launcher.launch(&chunk).await {
            Ok(handle) => {
                pool.totals.active_workers += 1;
                info!(
                    chunk = index,
                    start = chunk.start,
                    length = chunk.length,
                    active = pool.totals.active_workers,
                    "Launched worker"
                );
                pool.reports[index].status = ChunkStatus::Seeking;
                tokio::spawn(drive_worker(chunk, handle, events.clone()));
            },
            Err(e) => {
                error!(chunk = index, error = %e, "Failed to launch worker");
                pool.reports[index].status = ChunkStatus::Incomplete;
            },
        }
        self.observer.chunk_changed(&pool.reports[index]);
    }

    fn handle_event(&self, pool: &mut PoolState, event: PoolEvent) {
        match event {
            PoolEvent::Message { chunk, message } => {
                let Some(report) = pool.reports.get_mut(chunk) else {
                    return;
                };
                match message {
                    WorkerMessage::Ready { .. } => {
                        if report.status == ChunkStatus::Seeking {
                            report.status = ChunkStatus::Building;
                            self.observer.chunk_changed(report);
                        }
                    },
                    WorkerMessage::Processed { processed_count } => {
                        report.processed += processed_count;
                        pool.totals.processed += processed_count;
                        self.observer.progress(report, &pool.totals);
                    },
                    WorkerMessage::Skipped { skipped_count } => {
                        report.skipped += skipped_count;
                        pool.totals.skipped += skipped_count;
                        self.observer.progress(report, &pool.totals);
                    },
                }
            },
            PoolEvent::Fault { chunk, error } => {
                warn!(chunk, error = %error, "Worker protocol fault");
            },
            PoolEvent::Exited { chunk, exit } => {
                pool.totals.active_workers = pool.totals.active_workers.saturating_sub(1);
                let Some(report) = pool.reports.get_mut(chunk) else {
                    return;
                };
                report.status = if exit.is_success() && report.status == ChunkStatus::Building {
                    ChunkStatus::Done
                } else {
                    ChunkStatus::Incomplete
                };
                if report.status == ChunkStatus::Incomplete {
                    warn!(
                        chunk,
                        start = report.chunk.start,
                        length = report.chunk.length,
                        processed = report.processed,
                        exit = ?exit,
                        "Worker exited, chunk left incomplete"
                    );
                } else {
                    info!(chunk, processed = report.processed, "Worker finished");
                }
                report.exit = Some(exit);
                self.observer.chunk_changed(report);
            },
        }
    }
}

/// Forward one worker's messages to the event loop, answering its ready
/// message with the chunk assignment
async fn drive_worker(chunk: WorkChunk, handle: WorkerHandle, events: mpsc::Sender<PoolEvent>) {
    let WorkerHandle {
        outbound,
        mut inbound,
        exit,
    } = handle;
    let mut outbound = Some(outbound);

    while let Some(item) = inbound.next().await {
        let event = match item {
            Ok(message) => {
                if matches!(message, WorkerMessage::Ready { .. }) {
                    if let Some(assignments) = outbound.take() {
                        if assignments.send(Assignment::from(&chunk)).await.is_err() {
                            let fault = PoolEvent::Fault {
                                chunk: chunk.index,
                                error: ProtocolError::Closed,
                            };
                            if events.send(fault).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                PoolEvent::Message {
                    chunk: chunk.index,
                    message,
                }
            },
            Err(error) => PoolEvent::Fault {
                chunk: chunk.index,
                error,
            },
        };
        if events.send(event).await.is_err() {
            return;
        }
    }

    drop(outbound);
    let exit = exit.await;
    // Receiver only goes away once the pool has stopped waiting
    let _ = events
        .send(PoolEvent::Exited {
            chunk: chunk.index,
            exit,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults_and_validation() {
        let config = PoolConfig::default();
        assert_eq!(config.bot_count, 15);
        assert_eq!(config.seek_delay, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_workers, 6);
        assert!(config.validate().is_ok());

        let config = PoolConfig {
            max_concurrent_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_counts_incomplete_chunks() {
        let report = |index, status| ChunkReport {
            chunk: WorkChunk {
                index,
                start: 0,
                length: 1,
            },
            status,
            processed: 0,
            skipped: 0,
            exit: None,
        };
        let summary = PoolSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            processed: 0,
            skipped: 0,
            chunks: vec![report(0, ChunkStatus::Done), report(1, ChunkStatus::Incomplete)],
        };
        assert!(!summary.is_complete());
        assert_eq!(summary.incomplete_chunks()[0].chunk.index, 1);
    }
}
