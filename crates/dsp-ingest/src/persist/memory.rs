use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

use super::{is_blank_node, owning_subject, StatementStore, StoreError, UpsertReport};
use crate::statement::Statement;

type Key = (String, String, usize);

#[derive(Debug, Default)]
struct Inner {
    scopes: HashMap<String, BTreeMap<Key, Statement>>,
    upsert_calls: Vec<Vec<Statement>>,
    fail_always: HashSet<String>,
    fail_remaining: HashMap<String, usize>,
}

/// Statement store held in memory, with per-subject failure injection
#[derive(Debug, Default)]
pub struct MemoryStatementStore {
    inner: Mutex<Inner>,
}

impl MemoryStatementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every statement about `subject`
    pub async fn fail_always(&self, subject: &str) {
        self.inner.lock().await.fail_always.insert(subject.to_string());
    }

    /// Reject statements about `subject` for the next `times` upserts
    pub async fn fail_times(&self, subject: &str, times: usize) {
        self.inner
            .lock()
            .await
            .fail_remaining
            .insert(subject.to_string(), times);
    }

    /// Every slice passed to `upsert_statements`, in call order
    pub async fn upsert_calls(&self) -> Vec<Vec<Statement>> {
        self.inner.lock().await.upsert_calls.clone()
    }

    pub async fn statements(&self, scope: &str) -> Vec<Statement> {
        self.inner
            .lock()
            .await
            .scopes
            .get(scope)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, scope: &str) -> usize {
        self.inner
            .lock()
            .await
            .scopes
            .get(scope)
            .map_or(0, BTreeMap::len)
    }

    pub async fn is_empty(&self, scope: &str) -> bool {
        self.len(scope).await == 0
    }

    /// Seed a statement directly
    pub async fn insert(&self, scope: &str, statement: Statement) {
        let mut inner = self.inner.lock().await;
        inner
            .scopes
            .entry(scope.to_string())
            .or_default()
            .insert(key_of(&statement), statement);
    }
}

fn key_of(s: &Statement) -> Key {
    (s.subject_id().to_string(), s.predicate().to_string(), s.index())
}

#[async_trait]
impl StatementStore for MemoryStatementStore {
    async fn upsert_statements(
        &self,
        scope: &str,
        statements: &[Statement],
    ) -> Result<UpsertReport, StoreError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.upsert_calls.push(statements.to_vec());

        // Failure budgets are spent once per call, not once per statement
        let mut spent = HashSet::new();
        let mut failed = Vec::new();
        for (i, statement) in statements.iter().enumerate() {
            let subject = owning_subject(statement.subject_id()).to_string();
            let fails = inner.fail_always.contains(&subject)
                || match inner.fail_remaining.get_mut(&subject) {
                    Some(remaining) if *remaining > 0 => {
                        if spent.insert(subject.clone()) {
                            *remaining -= 1;
                        }
                        true
                    },
                    _ => spent.contains(&subject),
                };
            if fails {
                failed.push(i);
                continue;
            }
            inner
                .scopes
                .entry(scope.to_string())
                .or_default()
                .insert(key_of(statement), statement.clone());
        }

        Ok(UpsertReport::failed(failed))
    }

    async fn delete_stale_statements(
        &self,
        scope: &str,
        current: &[Statement],
        relation: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.scopes.get_mut(scope) else {
            return Ok(0);
        };

        let keep: HashSet<Key> = current.iter().map(key_of).collect();
        let subjects: HashSet<&str> = current.iter().map(|s| s.subject_id()).collect();
        let owners: HashSet<&str> = subjects
            .iter()
            .filter(|s| !is_blank_node(s))
            .copied()
            .collect();

        let before = stored.len();
        stored.retain(|key, _| {
            let (subject, _, _) = key;
            let covered = subjects.contains(subject.as_str())
                || (relation.is_some()
                    && is_blank_node(subject)
                    && owners.contains(owning_subject(subject)));
            !covered || keep.contains(key)
        });
        Ok((before - stored.len()) as u64)
    }

    async fn get_statement(
        &self,
        scope: &str,
        subject_id: &str,
        predicate: &str,
    ) -> Result<Option<Statement>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.scopes.get(scope).and_then(|m| {
            m.values()
                .find(|s| s.subject_id() == subject_id && s.predicate() == predicate)
                .cloned()
        }))
    }
}
