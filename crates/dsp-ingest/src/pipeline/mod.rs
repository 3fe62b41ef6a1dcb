//! Streaming transform from raw messages to persistable statement batches
//!
//! Stages run in order: decode, compact, enrich, gate, serialize, batch.
//! Enrichers and serializers run with bounded concurrency, so record order is
//! not preserved within a window. Under [`ErrorPolicy::FailFast`] the first
//! record error is delivered downstream and the stream ends right after it.

mod batch;
mod enrich;
mod validity;

pub use batch::{batch_window, BatchWindow, DEFAULT_BATCH_MAX_COUNT, DEFAULT_BATCH_MAX_TIME_MS};
pub use enrich::{BibIdRemediator, ElectronicItemExtractor, EnrichError, Enricher};
pub use validity::{SkipReason, ValidityFilter, DO_NOT_INDEX_PATTERN};

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::persist::StoreError;
use crate::progress::ProgressSink;
use crate::record::{CatalogRecord, RecordKind};
use crate::serializer::{SerializeError, SerializerRegistry};
use crate::source::{MessageStream, SourceError};
use crate::statement::Statement;

pub const DEFAULT_STAGE_CONCURRENCY: usize = 10;

/// What a per-record failure does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the whole stream
    #[default]
    FailFast,
    /// Log, count the record as skipped and keep going
    IsolateRecord,
}

impl FromStr for ErrorPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fail_fast" | "failfast" => Ok(ErrorPolicy::FailFast),
            "isolate" | "isolate_record" => Ok(ErrorPolicy::IsolateRecord),
            other => anyhow::bail!("Unknown error policy: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Done,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stage_concurrency: usize,
    pub batch: BatchWindow,
    pub error_policy: ErrorPolicy,
    /// Only this record id (plain or prefixed) passes the gate
    pub seek: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_concurrency: DEFAULT_STAGE_CONCURRENCY,
            batch: BatchWindow::default(),
            error_policy: ErrorPolicy::default(),
            seek: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Failed to serialize record {record_id} at offset {offset}: {source}")]
    Serialize {
        record_id: String,
        offset: u64,
        #[source]
        source: SerializeError,
    },

    #[error("Enricher {enricher} failed on record at offset {offset}: {source}")]
    Enrich {
        enricher: &'static str,
        offset: u64,
        #[source]
        source: EnrichError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid record filter: {0}")]
    Filter(#[from] regex::Error),
}

impl PipelineError {
    /// Failures confined to a single record
    pub fn is_record_error(&self) -> bool {
        matches!(self, PipelineError::Serialize { .. } | PipelineError::Enrich { .. })
    }
}

/// Every statement serialized from one record, companions included
#[derive(Debug, Clone)]
pub struct RecordStatements {
    pub record_id: String,
    pub offset: u64,
    pub statements: Vec<Statement>,
}

pub type BatchStream = BoxStream<'static, Result<Vec<RecordStatements>, PipelineError>>;

type RecordStream = BoxStream<'static, Result<CatalogRecord, PipelineError>>;

#[derive(Clone)]
pub struct Pipeline {
    kind: RecordKind,
    config: PipelineConfig,
    enrichers: Vec<Arc<dyn Enricher>>,
    serializers: Arc<SerializerRegistry>,
    validity: Arc<ValidityFilter>,
}

impl Pipeline {
    pub fn new(
        kind: RecordKind,
        config: PipelineConfig,
        serializers: Arc<SerializerRegistry>,
    ) -> Result<Self, PipelineError> {
        let validity = Arc::new(ValidityFilter::new(config.seek.clone())?);
        Ok(Self {
            kind,
            config,
            enrichers: Vec::new(),
            serializers,
            validity,
        })
    }

    /// Append an enrichment stage; stages run in the order added
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Turn raw messages into statement batches.
    ///
    /// Records dropped on the way (undecodable, empty, gated, or isolated
    /// failures) are reported to `sink` as skipped.
    pub fn batches(&self, messages: MessageStream, sink: Arc<dyn ProgressSink>) -> BatchStream {
        let kind = self.kind;
        let concurrency = self.config.stage_concurrency.max(1);
        let policy = self.config.error_policy;

        let decode_sink = Arc::clone(&sink);
        let mut records: RecordStream = messages
            .filter_map(move |message| {
                let out = match message {
                    Err(e) => Some(Err(PipelineError::Source(e))),
                    Ok(raw) => match CatalogRecord::from_slice(kind, raw.offset, &raw.value) {
                        Ok(record) if record.is_empty() => {
                            debug!(offset = raw.offset, "Dropping empty record");
                            decode_sink.skipped(1);
                            None
                        }
                        Ok(record) => Some(Ok(record)),
                        Err(e) => {
                            error!(offset = raw.offset, error = %e, "Error decoding value");
                            decode_sink.skipped(1);
                            None
                        }
                    },
                };
                future::ready(out)
            })
            .boxed();

        for enricher in &self.enrichers {
            let enricher = Arc::clone(enricher);
            records = records
                .map(move |item| {
                    let enricher = Arc::clone(&enricher);
                    async move {
                        let record = item?;
                        let offset = record.offset;
                        enricher
                            .enrich(record)
                            .await
                            .map_err(|source| PipelineError::Enrich {
                                enricher: enricher.name(),
                                offset,
                                source,
                            })
                    }
                })
                .buffer_unordered(concurrency)
                .filter_map(isolate(policy, Arc::clone(&sink)))
                .boxed();
        }

        let validity = Arc::clone(&self.validity);
        let gate_sink = Arc::clone(&sink);
        let gated = records.filter_map(move |item| {
            let out = match item {
                Ok(record) => match validity.check(&record) {
                    Ok(()) => Some(Ok(record)),
                    Err(reason @ SkipReason::NotSeekTarget) => {
                        debug!(record_id = ?record.id(), %reason, "Skipping record");
                        gate_sink.skipped(1);
                        None
                    }
                    Err(reason) => {
                        warn!(record_id = ?record.id(), offset = record.offset, %reason, "Skipping record");
                        gate_sink.skipped(1);
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            };
            future::ready(out)
        });

        let serializers = Arc::clone(&self.serializers);
        let serialized = gated
            .map(move |item| {
                let serializers = Arc::clone(&serializers);
                async move {
                    let record = item?;
                    let record_id = record.id().unwrap_or_default().to_string();
                    match serializers.serialize(&record).await {
                        Ok(statements) => Ok(RecordStatements {
                            record_id,
                            offset: record.offset,
                            statements,
                        }),
                        Err(source) => Err(PipelineError::Serialize {
                            record_id,
                            offset: record.offset,
                            source,
                        }),
                    }
                }
            })
            .buffer_unordered(concurrency)
            .filter_map(isolate(policy, Arc::clone(&sink)));

        // Let the first error through, then stop pulling from upstream
        let mut tripped = false;
        let guarded = serialized.take_while(move |item| {
            let pass = !tripped;
            tripped |= item.is_err();
            future::ready(pass)
        });

        batch_window(guarded, self.config.batch)
            .flat_map(|chunk| stream::iter(split_chunk(chunk)))
            .boxed()
    }
}

/// Stage filter that turns record errors into skips under `IsolateRecord`
fn isolate<T>(
    policy: ErrorPolicy,
    sink: Arc<dyn ProgressSink>,
) -> impl FnMut(Result<T, PipelineError>) -> future::Ready<Option<Result<T, PipelineError>>> {
    move |item| {
        let out = match item {
            Err(e) if policy == ErrorPolicy::IsolateRecord && e.is_record_error() => {
                error!(error = %e, "Skipping record after failure");
                sink.skipped(1);
                None
            }
            other => Some(other),
        };
        future::ready(out)
    }
}

/// Split a window into the records before an error and the error itself
fn split_chunk(
    chunk: Vec<Result<RecordStatements, PipelineError>>,
) -> Vec<Result<Vec<RecordStatements>, PipelineError>> {
    let mut out = Vec::new();
    let mut batch = Vec::new();
    for item in chunk {
        match item {
            Ok(record) => batch.push(record),
            Err(e) => {
                if !batch.is_empty() {
                    out.push(Ok(std::mem::take(&mut batch)));
                }
                out.push(Err(e));
            }
        }
    }
    if !batch.is_empty() {
        out.push(Ok(batch));
    }
    out
}

/// Restrict a message stream to offsets in `[offset, offset + limit)`
pub fn bounded(messages: MessageStream, offset: u64, limit: Option<u64>) -> MessageStream {
    let Some(limit) = limit else {
        return messages;
    };
    let end = offset.saturating_add(limit);
    messages
        .take_while(move |message| {
            let within = match message {
                Ok(raw) => raw.offset < end,
                Err(_) => true,
            };
            future::ready(within)
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingContext;
    use crate::progress::CountingSink;
    use crate::source::{MemorySource, RecordSource};
    use async_trait::async_trait;
    use serde_json::json;

    fn registry() -> Arc<SerializerRegistry> {
        Arc::new(SerializerRegistry::with_defaults(Arc::new(
            MappingContext::builtin().unwrap(),
        )))
    }

    fn pipeline(policy: ErrorPolicy) -> Pipeline {
        let config = PipelineConfig {
            error_policy: policy,
            ..Default::default()
        };
        Pipeline::new(RecordKind::Item, config, registry()).unwrap()
    }

    async fn collect(
        pipeline: &Pipeline,
        records: &[serde_json::Value],
        sink: Arc<CountingSink>,
    ) -> Vec<Result<Vec<RecordStatements>, PipelineError>> {
        let source = MemorySource::from_json(records);
        pipeline.batches(source.consume(0), sink).collect().await
    }

    /// Fails on one record id
    struct Tripwire(&'static str);

    #[async_trait]
    impl Enricher for Tripwire {
        fn name(&self) -> &'static str {
            "tripwire"
        }

        async fn enrich(&self, record: CatalogRecord) -> Result<CatalogRecord, EnrichError> {
            if record.id() == Some(self.0) {
                return Err(EnrichError::Store(StoreError::Unavailable("tripped".into())));
            }
            Ok(record)
        }
    }

    #[tokio::test]
    async fn test_batches_serialize_valid_records() {
        let sink = Arc::new(CountingSink::new());
        let out = collect(
            &pipeline(ErrorPolicy::FailFast),
            &[json!({ "id": "1", "bibIds": ["9"] }), json!({ "id": "2", "bibIds": ["9"] })],
            sink.clone(),
        )
        .await;

        let records: Vec<RecordStatements> =
            out.into_iter().map(|b| b.unwrap()).flatten().collect();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.statements.is_empty()));
        assert_eq!(sink.skipped_total(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_and_invalid_records_are_skipped() {
        let sink = Arc::new(CountingSink::new());
        let source = MemorySource::new(vec![
            b"{ not json".to_vec(),
            json!({ "title": "no id" }).to_string().into_bytes(),
            json!({}).to_string().into_bytes(),
            json!({ "id": "3" }).to_string().into_bytes(),
        ]);
        let out: Vec<_> = pipeline(ErrorPolicy::FailFast)
            .batches(source.consume(0), sink.clone())
            .collect()
            .await;

        let records: Vec<RecordStatements> =
            out.into_iter().map(|b| b.unwrap()).flatten().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, "3");
        assert_eq!(sink.skipped_total(), 3);
    }

    #[tokio::test]
    async fn test_fail_fast_ends_stream_after_error() {
        let sink = Arc::new(CountingSink::new());
        let pipeline = pipeline(ErrorPolicy::FailFast).with_enricher(Arc::new(Tripwire("1")));
        let out = collect(&pipeline, &[json!({ "id": "1" }), json!({ "id": "2" })], sink).await;

        let last = out.last().unwrap();
        assert!(matches!(last, Err(PipelineError::Enrich { offset: 0, .. })));
        assert_eq!(out.iter().filter(|b| b.is_err()).count(), 1);
    }

    #[tokio::test]
    async fn test_isolate_policy_skips_failed_record() {
        let sink = Arc::new(CountingSink::new());
        let pipeline =
            pipeline(ErrorPolicy::IsolateRecord).with_enricher(Arc::new(Tripwire("1")));
        let out = collect(&pipeline, &[json!({ "id": "1" }), json!({ "id": "2" })], sink.clone())
            .await;

        let records: Vec<RecordStatements> =
            out.into_iter().map(|b| b.unwrap()).flatten().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, "2");
        assert_eq!(sink.skipped_total(), 1);
    }

    #[tokio::test]
    async fn test_seek_passes_single_record() {
        let config = PipelineConfig {
            seek: Some("2".into()),
            ..Default::default()
        };
        let pipeline = Pipeline::new(RecordKind::Item, config, registry()).unwrap();
        let sink = Arc::new(CountingSink::new());
        let out = collect(&pipeline, &[json!({ "id": "1" }), json!({ "id": "2" })], sink.clone())
            .await;

        let records: Vec<RecordStatements> =
            out.into_iter().map(|b| b.unwrap()).flatten().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(sink.skipped_total(), 1);
    }

    #[tokio::test]
    async fn test_bounded_stops_at_limit() {
        let source = MemorySource::from_json(&[json!({"id": "0"}), json!({"id": "1"}), json!({"id": "2"})]);
        let offsets: Vec<u64> = bounded(source.consume(1), 1, Some(1))
            .map(|m| m.unwrap().offset)
            .collect()
            .await;
        assert_eq!(offsets, vec![1]);
    }

    #[test]
    fn test_split_chunk_keeps_records_before_error() {
        let record = |id: &str| RecordStatements {
            record_id: id.into(),
            offset: 0,
            statements: Vec::new(),
        };
        let err = PipelineError::Store(StoreError::Unavailable("down".into()));
        let split = split_chunk(vec![Ok(record("a")), Ok(record("b")), Err(err)]);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].as_ref().unwrap().len(), 2);
        assert!(split[1].is_err());
    }

    #[test]
    fn test_error_policy_from_str() {
        assert_eq!("fail-fast".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::FailFast);
        assert_eq!("isolate".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::IsolateRecord);
        assert!("sometimes".parse::<ErrorPolicy>().is_err());
    }
}
