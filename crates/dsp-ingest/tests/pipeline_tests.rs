//! End-to-end pipeline tests
//!
//! Records flow from a source through enrichment, serialization and the
//! batch writer into an in-memory store.

use dsp_ingest::mapping::MappingContext;
use dsp_ingest::persist::{BatchWriter, MemoryStatementStore, PersistConfig, StatementStore, RESOURCE_SCOPE};
use dsp_ingest::pipeline::{
    ElectronicItemExtractor, ErrorPolicy, Pipeline, PipelineConfig, PipelineError, PipelineState,
};
use dsp_ingest::progress::CountingSink;
use dsp_ingest::record::RecordKind;
use dsp_ingest::runner::IngestRunner;
use dsp_ingest::serializer::{SerializeError, SerializerRegistry};
use dsp_ingest::source::{MemorySource, NdjsonSource, RecordSource};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dsp_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Log output captured for one test
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn mapping() -> Arc<MappingContext> {
    Arc::new(MappingContext::builtin().unwrap())
}

fn runner(
    kind: RecordKind,
    config: PipelineConfig,
    source: Arc<dyn RecordSource>,
    store: Arc<MemoryStatementStore>,
) -> IngestRunner {
    let mapping = mapping();
    let serializers = Arc::new(SerializerRegistry::with_defaults(Arc::clone(&mapping)));
    let pipeline = Pipeline::new(kind, config, serializers)
        .unwrap()
        .with_enricher(Arc::new(ElectronicItemExtractor::new(mapping)));
    let store: Arc<dyn StatementStore> = store;
    IngestRunner::new(source, pipeline, BatchWriter::new(store, PersistConfig::default()))
}

fn memory(records: &[Value]) -> Arc<dyn RecordSource> {
    Arc::new(MemorySource::from_json(records))
}

#[tokio::test]
async fn test_record_without_id_is_skipped_with_warning() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = Arc::new(MemoryStatementStore::new());
    let source = memory(&[json!({ "title": "Untitled", "varFields": [] })]);
    let summary = runner(RecordKind::Bib, PipelineConfig::default(), source, store.clone())
        .run(0, None, Arc::new(CountingSink::new()))
        .await;

    assert_eq!(summary.state, PipelineState::Done);
    assert!(summary.error.is_none());
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 1);
    assert!(store.is_empty(RESOURCE_SCOPE).await);

    let output = logs.contents();
    assert!(output.contains("WARN"), "no warning logged: {output}");
    assert!(output.contains("Skipping record"));
}

#[tokio::test]
async fn test_serializer_failure_aborts_stream() {
    init_tracing();
    let store = Arc::new(MemoryStatementStore::new());
    let records = [
        json!({ "id": "1" }),
        json!({ "id": "2" }),
        json!({ "id": "3", "nyplSource": "not-a-catalog" }),
        json!({ "id": "4" }),
        json!({ "id": "5" }),
    ];
    let config = PipelineConfig {
        stage_concurrency: 1,
        ..Default::default()
    };

    let summary = runner(RecordKind::Bib, config, memory(&records), store.clone())
        .run(0, None, Arc::new(CountingSink::new()))
        .await;

    assert_eq!(summary.state, PipelineState::Aborted);
    match summary.error {
        Some(PipelineError::Serialize {
            ref record_id,
            offset,
            source: SerializeError::UnknownDatasource(_),
        }) => {
            assert_eq!(record_id, "3");
            assert_eq!(offset, 2);
        },
        ref other => panic!("unexpected error: {other:?}"),
    }

    // Records ahead of the failure are written, nothing after it
    assert_eq!(summary.processed, 2);
    let subjects: Vec<String> = store
        .statements(RESOURCE_SCOPE)
        .await
        .iter()
        .map(|s| s.subject_id().to_string())
        .collect();
    assert!(subjects.iter().any(|s| s == "b1"));
    assert!(!subjects.iter().any(|s| s == "b4" || s == "b5"));
}

#[tokio::test]
async fn test_isolate_policy_keeps_going_after_serializer_failure() {
    init_tracing();
    let store = Arc::new(MemoryStatementStore::new());
    let records = [
        json!({ "id": "1", "nyplSource": "not-a-catalog" }),
        json!({ "id": "2" }),
    ];
    let config = PipelineConfig {
        error_policy: ErrorPolicy::IsolateRecord,
        ..Default::default()
    };

    let summary = runner(RecordKind::Bib, config, memory(&records), store)
        .run(0, None, Arc::new(CountingSink::new()))
        .await;

    assert_eq!(summary.state, PipelineState::Done);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn test_ndjson_bib_with_full_text_link_writes_electronic_item() {
    init_tracing();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let bib = json!({
        "id": "10001",
        "nyplSource": "sierra-nypl",
        "varFields": [
            { "marcTag": "245", "subfields": [{ "tag": "a", "content": "Moby Dick" }] },
            { "marcTag": "856", "subfields": [
                { "tag": "u", "content": "http://example.org/moby" },
                { "tag": "z", "content": "Full text" }
            ]}
        ]
    });
    writeln!(file, "{}", bib).unwrap();
    writeln!(file).unwrap();
    writeln!(file, "{}", json!({ "id": "10002" })).unwrap();
    file.flush().unwrap();

    let store = Arc::new(MemoryStatementStore::new());
    let source = Arc::new(NdjsonSource::new(file.path()));
    let summary = runner(RecordKind::Bib, PipelineConfig::default(), source, store.clone())
        .run(0, None, Arc::new(CountingSink::new()))
        .await;

    assert_eq!(summary.state, PipelineState::Done);
    assert_eq!(summary.processed, 3, "two bibs and one electronic item");

    let statements = store.statements(RESOURCE_SCOPE).await;
    let locator = statements
        .iter()
        .find(|s| s.subject_id() == "i10001-e" && s.predicate() == "bf:electronicLocator")
        .expect("electronic locator statement");
    assert_eq!(locator.object_label(), Some("Full text"));
    assert!(statements
        .iter()
        .any(|s| s.subject_id() == "b10001" && s.predicate() == "dcterms:title"));
}

#[tokio::test]
async fn test_rerun_replaces_stale_statements() {
    init_tracing();
    let store = Arc::new(MemoryStatementStore::new());
    let with_note = [json!({
        "id": "5",
        "varFields": [{ "marcTag": "500", "subfields": [{ "tag": "a", "content": "Old note" }] }]
    })];
    let without_note = [json!({ "id": "5" })];

    for records in [&with_note[..], &without_note[..]] {
        let summary = runner(RecordKind::Bib, PipelineConfig::default(), memory(records), store.clone())
            .run(0, None, Arc::new(CountingSink::new()))
            .await;
        assert_eq!(summary.state, PipelineState::Done);
    }

    let statements = store.statements(RESOURCE_SCOPE).await;
    assert!(!statements.iter().any(|s| s.predicate() == "skos:note"));
    assert!(statements.iter().any(|s| s.predicate() == "rdfs:type"));
}

#[tokio::test]
async fn test_non_utf8_line_is_skipped_and_run_continues() {
    init_tracing();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{\"id\":\"1\"}\n{\"id\":\"2\xff\xfe\"}\n{\"id\":\"3\"}\n")
        .unwrap();
    file.flush().unwrap();

    let store = Arc::new(MemoryStatementStore::new());
    let source = Arc::new(NdjsonSource::new(file.path()));
    let summary = runner(RecordKind::Bib, PipelineConfig::default(), source, store.clone())
        .run(0, None, Arc::new(CountingSink::new()))
        .await;

    assert_eq!(summary.state, PipelineState::Done);
    assert!(summary.error.is_none());
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 1);

    let statements = store.statements(RESOURCE_SCOPE).await;
    assert!(statements.iter().any(|s| s.subject_id() == "b3"));
}
