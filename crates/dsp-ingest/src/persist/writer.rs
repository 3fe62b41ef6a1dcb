use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{is_blank_node, owning_subject, IndexQueue, StatementStore, StoreError, RESOURCE_SCOPE};
use crate::pipeline::RecordStatements;
use crate::statement::Statement;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub scope: String,
    /// Total upsert attempts per statement, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub initial_backoff: Duration,
    /// Passed through to the stale-statement sweep
    pub relation: Option<String>,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            scope: RESOURCE_SCOPE.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            relation: None,
        }
    }
}

/// Outcome of persisting one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistReport {
    /// Distinct subjects whose statements were all written
    pub processed: u64,
    /// Distinct subjects with dead-lettered statements
    pub skipped: u64,
    pub statements: usize,
    pub attempts: u32,
    /// Statements still rejected after the last attempt
    pub dead_letters: Vec<Statement>,
}

/// Writes batches of statements with bounded partial-failure retry
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn StatementStore>,
    config: PersistConfig,
    index_queue: Option<Arc<dyn IndexQueue>>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn StatementStore>, config: PersistConfig) -> Self {
        Self {
            store,
            config,
            index_queue: None,
        }
    }

    /// Publish the subjects of every persisted batch to `queue`
    pub fn with_index_queue(mut self, queue: Arc<dyn IndexQueue>) -> Self {
        self.index_queue = Some(queue);
        self
    }

    pub fn store(&self) -> &Arc<dyn StatementStore> {
        &self.store
    }

    /// Upsert every statement of the batch, sweep stale statements of its
    /// subjects, queue the written ones for indexing and count them
    pub async fn persist(&self, batch: &[RecordStatements]) -> Result<PersistReport, StoreError> {
        let statements: Vec<Statement> = batch
            .iter()
            .flat_map(|r| r.statements.iter().cloned())
            .collect();
        if statements.is_empty() {
            return Ok(PersistReport::default());
        }

        let (dead_letters, attempts) = self.write_with_retry(statements.clone()).await?;

        let swept = self
            .store
            .delete_stale_statements(&self.config.scope, &statements, self.config.relation.as_deref())
            .await?;
        debug!(swept, "Deleted stale statements");

        let subjects: BTreeSet<&str> = statements
            .iter()
            .map(|s| s.subject_id())
            .filter(|s| !is_blank_node(s))
            .collect();
        let failed: BTreeSet<&str> = dead_letters
            .iter()
            .map(|s| owning_subject(s.subject_id()))
            .collect();

        let written: Vec<String> = subjects
            .difference(&failed)
            .map(|s| s.to_string())
            .collect();
        if let Some(queue) = &self.index_queue {
            if !written.is_empty() {
                queue.publish(&self.config.scope, &written).await?;
                debug!(ids = written.len(), "Queued subjects for indexing");
            }
        }

        let report = PersistReport {
            processed: written.len() as u64,
            skipped: failed.len() as u64,
            statements: statements.len(),
            attempts,
            dead_letters,
        };

        info!(
            subjects = report.processed,
            statements = report.statements,
            attempts = report.attempts,
            "Saved batch"
        );
        Ok(report)
    }

    /// Submit `statements`, then resubmit only the rejected subset until none
    /// fail or attempts run out. Returns the dead letters and attempts made.
    pub async fn write_with_retry(
        &self,
        statements: Vec<Statement>,
    ) -> Result<(Vec<Statement>, u32), StoreError> {
        let mut pending = statements;
        let mut attempt = 1;

        loop {
            let report = self
                .store
                .upsert_statements(&self.config.scope, &pending)
                .await?;
            if report.failed_count == 0 {
                return Ok((Vec::new(), attempt));
            }

            let failed: Vec<Statement> = if report.failed_indices.is_empty() {
                pending
            } else {
                report
                    .failed_indices
                    .iter()
                    .filter_map(|&i| pending.get(i).cloned())
                    .collect()
            };

            if attempt >= self.config.max_attempts {
                for s in &failed {
                    error!(
                        subject_id = %s.subject_id(),
                        predicate = %s.predicate(),
                        attempts = attempt,
                        "Giving up on statement"
                    );
                }
                return Ok((failed, attempt));
            }

            let backoff = self.config.initial_backoff * 2u32.saturating_pow(attempt - 1);
            warn!(
                failed = failed.len(),
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Store rejected statements, retrying failed subset"
            );
            tokio::time::sleep(backoff).await;

            pending = failed;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{MemoryIndexQueue, MemoryStatementStore};
    use crate::statement::{Provenance, StatementObject};

    fn statement(subject: &str) -> Statement {
        Statement::new(
            subject,
            "dcterms:title",
            StatementObject::literal(format!("title of {}", subject)),
            1,
            Provenance::new("10004", subject.trim_start_matches('b')),
            0,
        )
        .unwrap()
    }

    fn record(subject: &str) -> RecordStatements {
        RecordStatements {
            record_id: subject.to_string(),
            offset: 0,
            statements: vec![statement(subject)],
        }
    }

    fn writer(store: Arc<MemoryStatementStore>, max_attempts: u32) -> BatchWriter {
        BatchWriter::new(
            store,
            PersistConfig {
                max_attempts,
                initial_backoff: Duration::from_millis(10),
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_resubmits_only_failed_statement() {
        let store = Arc::new(MemoryStatementStore::new());
        store.fail_times("b3", 1).await;

        let batch: Vec<Statement> = ["b1", "b2", "b3", "b4", "b5"].map(statement).to_vec();
        let (dead, attempts) = writer(store.clone(), 5)
            .write_with_retry(batch.clone())
            .await
            .unwrap();

        assert!(dead.is_empty());
        assert_eq!(attempts, 2);

        let calls = store.upsert_calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), 5);
        assert_eq!(calls[1], vec![batch[2].clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_statement_is_dead_lettered() {
        let store = Arc::new(MemoryStatementStore::new());
        store.fail_always("b2").await;

        let report = writer(store.clone(), 3)
            .persist(&[record("b1"), record("b2")])
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.dead_letters.len(), 1);
        assert_eq!(store.upsert_calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_processed_counts_distinct_subjects() {
        let store = Arc::new(MemoryStatementStore::new());
        let mut first = record("b1");
        first.statements.push(
            Statement::new(
                "b1",
                "skos:note",
                StatementObject::literal("note"),
                1,
                Provenance::new("10004", "1"),
                0,
            )
            .unwrap(),
        );

        let report = writer(store.clone(), 5)
            .persist(&[first, record("b2")])
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.statements, 3);
        assert_eq!(store.len("resource").await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_queue_gets_written_subjects_only() {
        let store = Arc::new(MemoryStatementStore::new());
        store.fail_always("b2").await;
        let queue = Arc::new(MemoryIndexQueue::new());

        let mut holding = record("h1");
        holding.statements.push(
            Statement::new(
                "h1#1.0000",
                "rdf:type",
                StatementObject::id("nypl:CheckInBox"),
                1,
                Provenance::new("10004", "1"),
                0,
            )
            .unwrap(),
        );

        writer(store, 2)
            .with_index_queue(queue.clone())
            .persist(&[record("b1"), record("b2"), holding, record("b1")])
            .await
            .unwrap();

        assert_eq!(
            queue.published().await,
            vec![vec!["b1".to_string(), "h1".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_empty_batch_publishes_nothing() {
        let queue = Arc::new(MemoryIndexQueue::new());
        writer(Arc::new(MemoryStatementStore::new()), 5)
            .with_index_queue(queue.clone())
            .persist(&[])
            .await
            .unwrap();

        assert!(queue.published().await.is_empty());
    }
}
