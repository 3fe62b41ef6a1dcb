//! Worker side of the pool protocol
//!
//! Stdout carries protocol lines only; logging goes to stderr.

use anyhow::Context;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info};

use crate::coordinator::{decode_line, encode_line, Assignment, WorkerMessage};
use crate::progress::ProgressSink;
use crate::runner::{IngestRunner, RunSummary};

/// Sends counts to the coordinator as they happen
pub struct ProtocolSink {
    messages: mpsc::UnboundedSender<WorkerMessage>,
}

impl ProtocolSink {
    pub fn new(messages: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { messages }
    }

    fn emit(&self, message: WorkerMessage) {
        if self.messages.send(message).is_err() {
            debug!(?message, "Protocol writer closed, dropping message");
        }
    }
}

impl ProgressSink for ProtocolSink {
    fn processed(&self, count: u64) {
        if count > 0 {
            self.emit(WorkerMessage::processed(count));
        }
    }

    fn skipped(&self, count: u64) {
        if count > 0 {
            self.emit(WorkerMessage::skipped(count));
        }
    }
}

/// Serve one assignment over the process's stdin and stdout
pub async fn run_worker(runner: IngestRunner) -> anyhow::Result<RunSummary> {
    let input = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    let output = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());
    serve(runner, input, output).await
}

/// Announce readiness, wait for the assignment, run it while streaming counts
pub async fn serve<I, O>(runner: IngestRunner, mut input: I, output: O) -> anyhow::Result<RunSummary>
where
    I: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    O: Sink<String, Error = LinesCodecError> + Unpin + Send + 'static,
{
    let (messages, outbox) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_messages(outbox, output));

    messages
        .send(WorkerMessage::ready())
        .context("Protocol writer stopped before ready")?;

    let line = input
        .next()
        .await
        .context("Coordinator closed input before sending an assignment")?
        .context("Failed to read assignment")?;
    let assignment: Assignment = decode_line(&line).context("Invalid assignment")?;
    info!(
        start = assignment.start,
        length = assignment.length,
        "Received assignment"
    );

    let sink = Arc::new(ProtocolSink::new(messages));
    let summary = runner
        .run(assignment.start, Some(assignment.length), sink)
        .await;

    writer
        .await
        .context("Protocol writer panicked")?
        .context("Failed to write protocol messages")?;
    Ok(summary)
}

/// Drains until every sender is gone
async fn write_messages<O>(
    mut outbox: mpsc::UnboundedReceiver<WorkerMessage>,
    mut output: O,
) -> anyhow::Result<()>
where
    O: Sink<String, Error = LinesCodecError> + Unpin,
{
    while let Some(message) = outbox.recv().await {
        output.send(encode_line(&message)?).await?;
    }
    output.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingContext;
    use crate::persist::{BatchWriter, MemoryStatementStore, PersistConfig};
    use crate::pipeline::{Pipeline, PipelineConfig};
    use crate::record::RecordKind;
    use crate::serializer::SerializerRegistry;
    use crate::source::MemorySource;
    use futures::channel::mpsc as fmpsc;
    use futures::stream;
    use serde_json::json;

    fn runner() -> IngestRunner {
        let records = [json!({ "id": "1" }), json!({ "id": "2" }), json!({ "nope": true })];
        let serializers = Arc::new(SerializerRegistry::with_defaults(Arc::new(
            MappingContext::builtin().unwrap(),
        )));
        IngestRunner::new(
            Arc::new(MemorySource::from_json(&records)),
            Pipeline::new(RecordKind::Item, PipelineConfig::default(), serializers).unwrap(),
            BatchWriter::new(Arc::new(MemoryStatementStore::new()), PersistConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_serve_speaks_protocol() {
        let input = stream::iter(vec![Ok(r#"{"start":0,"length":3}"#.to_string())]);
        let (tx, rx) = fmpsc::unbounded::<String>();
        let output = tx.sink_map_err(|_| LinesCodecError::MaxLineLengthExceeded);

        let summary = serve(runner(), input, output).await.unwrap();
        assert_eq!(summary.processed, 2);

        let lines: Vec<WorkerMessage> = rx
            .map(|line| decode_line::<WorkerMessage>(&line).unwrap())
            .collect()
            .await;
        assert_eq!(lines[0], WorkerMessage::ready());
        let processed: u64 = lines
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Processed { processed_count } => Some(*processed_count),
                _ => None,
            })
            .sum();
        let skipped: u64 = lines
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Skipped { skipped_count } => Some(*skipped_count),
                _ => None,
            })
            .sum();
        assert_eq!(processed, 2);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_serve_without_assignment_fails() {
        let (tx, _rx) = fmpsc::unbounded::<String>();
        let output = tx.sink_map_err(|_| LinesCodecError::MaxLineLengthExceeded);
        let input = stream::iter(Vec::<Result<String, LinesCodecError>>::new());
        assert!(serve(runner(), input, output).await.is_err());
    }
}
