//! Statement persistence
//!
//! [`StatementStore`] is the idempotent-upsert boundary; [`BatchWriter`]
//! drives it with partial-failure retry and the stale-statement sweep, then
//! hands written subjects to an optional [`IndexQueue`].

mod index_queue;
mod memory;
mod postgres;
mod writer;

pub use index_queue::{IndexQueue, MemoryIndexQueue, NdjsonIndexQueue};
pub use memory::MemoryStatementStore;
pub use postgres::PgStatementStore;
pub use writer::{
    BatchWriter, PersistConfig, PersistReport, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::statement::Statement;

/// Scope holding catalog resources
pub const RESOURCE_SCOPE: &str = "resource";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid scope name: {0}")]
    InvalidScope(String),

    #[error("Stored row for {subject_id} is not a valid statement: {reason}")]
    InvalidRow { subject_id: String, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Index queue error: {0}")]
    IndexQueue(String),
}

/// Which statements of an upsert were rejected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub failed_count: usize,
    /// Positions in the submitted slice
    pub failed_indices: Vec<usize>,
}

impl UpsertReport {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failed(indices: Vec<usize>) -> Self {
        Self {
            failed_count: indices.len(),
            failed_indices: indices,
        }
    }
}

#[async_trait]
pub trait StatementStore: Send + Sync {
    /// Insert or replace each statement by `(subject_id, predicate, index)`.
    /// Individual rejections are reported, not raised.
    async fn upsert_statements(
        &self,
        scope: &str,
        statements: &[Statement],
    ) -> Result<UpsertReport, StoreError>;

    /// Delete stored statements of every subject in `current` that are not in
    /// `current`. With a `relation`, blank nodes hanging off those subjects
    /// that are no longer referenced are deleted too.
    async fn delete_stale_statements(
        &self,
        scope: &str,
        current: &[Statement],
        relation: Option<&str>,
    ) -> Result<u64, StoreError>;

    /// First statement for `(subject_id, predicate)`, by index
    async fn get_statement(
        &self,
        scope: &str,
        subject_id: &str,
        predicate: &str,
    ) -> Result<Option<Statement>, StoreError>;
}

/// Whether `subject` is a blank node minted from another subject
pub fn is_blank_node(subject: &str) -> bool {
    subject.contains('#')
}

/// Subject a blank node hangs off, or the subject itself
pub fn owning_subject(subject: &str) -> &str {
    subject.split('#').next().unwrap_or(subject)
}
