//! Drives one offset range from source to store

use anyhow::Context;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{IngestConfig, StoreKind};
use crate::mapping::MappingContext;
use crate::persist::{
    BatchWriter, MemoryStatementStore, NdjsonIndexQueue, PgStatementStore, StatementStore,
};
use crate::pipeline::{
    bounded, BibIdRemediator, ElectronicItemExtractor, Pipeline, PipelineError, PipelineState,
};
use crate::progress::{CountingSink, ProgressSink};
use crate::serializer::SerializerRegistry;
use crate::source::{NdjsonSource, RecordSource};

#[derive(Debug)]
pub struct RunSummary {
    pub processed: u64,
    pub skipped: u64,
    pub batches: u64,
    pub dead_letters: usize,
    pub state: PipelineState,
    /// Set when the run aborted
    pub error: Option<PipelineError>,
}

impl RunSummary {
    pub fn is_aborted(&self) -> bool {
        self.state == PipelineState::Aborted
    }
}

pub struct IngestRunner {
    source: Arc<dyn RecordSource>,
    pipeline: Pipeline,
    writer: BatchWriter,
}

impl IngestRunner {
    pub fn new(source: Arc<dyn RecordSource>, pipeline: Pipeline, writer: BatchWriter) -> Self {
        Self {
            source,
            pipeline,
            writer,
        }
    }

    /// Wire source, mapping tables, store and pipeline from configuration
    pub async fn from_config(config: &IngestConfig, seek: Option<String>) -> anyhow::Result<Self> {
        let source_path = config
            .source_path
            .as_deref()
            .context("No source path configured")?;
        let source: Arc<dyn RecordSource> = Arc::new(NdjsonSource::new(source_path));

        let mapping = Arc::new(
            MappingContext::load(config.mapping_path.as_deref(), config.lookup_dir.as_deref())
                .context("Failed to load mapping tables")?,
        );

        let store: Arc<dyn StatementStore> = match config.store {
            StoreKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL is not set")?;
                let store = PgStatementStore::connect_lazy(url, config.database_max_connections)?;
                store
                    .ensure_schema(&config.scope)
                    .await
                    .context("Failed to prepare statement table")?;
                Arc::new(store)
            },
            StoreKind::Memory => {
                warn!("Writing to an in-memory store; nothing will be kept");
                Arc::new(MemoryStatementStore::new())
            },
        };

        let serializers = Arc::new(SerializerRegistry::with_defaults(Arc::clone(&mapping)));
        let pipeline = Pipeline::new(config.record_kind, config.pipeline_config(seek), serializers)?
            .with_enricher(Arc::new(ElectronicItemExtractor::new(mapping)))
            .with_enricher(Arc::new(BibIdRemediator::new(
                Arc::clone(&store),
                config.scope.clone(),
            )));
        let mut writer = BatchWriter::new(store, config.persist_config());
        if let Some(path) = &config.index_queue_path {
            info!(path = %path.display(), "Queueing written subjects for indexing");
            writer = writer.with_index_queue(Arc::new(NdjsonIndexQueue::new(path)));
        }

        Ok(Self::new(source, pipeline, writer))
    }

    pub fn source(&self) -> &Arc<dyn RecordSource> {
        &self.source
    }

    /// Process messages at `[offset, offset + limit)`, or to the end of the
    /// source without a limit. Batches are persisted one at a time; the first
    /// pipeline or store error aborts the run.
    pub async fn run(
        &self,
        offset: u64,
        limit: Option<u64>,
        sink: Arc<dyn ProgressSink>,
    ) -> RunSummary {
        info!(
            source = %self.source.name(),
            kind = %self.pipeline.kind(),
            offset,
            limit = ?limit,
            "Starting ingest"
        );

        let tally = Arc::new(Tally {
            inner: sink,
            counts: CountingSink::new(),
        });
        let messages = bounded(self.source.consume(offset), offset, limit);
        let mut batches = self.pipeline.batches(messages, tally.clone());

        let mut batch_count = 0;
        let mut dead_letters = 0;
        let mut failure = None;

        while let Some(item) = batches.next().await {
            let batch = match item {
                Ok(batch) => batch,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            match self.writer.persist(&batch).await {
                Ok(report) => {
                    batch_count += 1;
                    tally.processed(report.processed);
                    if report.skipped > 0 {
                        warn!(
                            subjects = report.skipped,
                            statements = report.dead_letters.len(),
                            "Batch left dead letters"
                        );
                        tally.skipped(report.skipped);
                    }
                    dead_letters += report.dead_letters.len();
                }
                Err(e) => {
                    failure = Some(PipelineError::Store(e));
                    break;
                }
            }
        }

        let state = if let Some(ref e) = failure {
            error!(error = %e, "Ingest aborted");
            PipelineState::Aborted
        } else {
            PipelineState::Done
        };

        let summary = RunSummary {
            processed: tally.counts.processed_total(),
            skipped: tally.counts.skipped_total(),
            batches: batch_count,
            dead_letters,
            state,
            error: failure,
        };
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            batches = summary.batches,
            state = ?summary.state,
            "Ingest finished"
        );
        summary
    }
}

/// Forwards counts while keeping totals for the summary
struct Tally {
    inner: Arc<dyn ProgressSink>,
    counts: CountingSink,
}

impl ProgressSink for Tally {
    fn processed(&self, count: u64) {
        self.counts.processed(count);
        self.inner.processed(count);
    }

    fn skipped(&self, count: u64) {
        self.counts.skipped(count);
        self.inner.skipped(count);
    }
}
