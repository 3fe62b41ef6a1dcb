use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{is_blank_node, StatementStore, StoreError, UpsertReport};
use crate::statement::{Literal, Provenance, Statement, StatementObject, XSD_BOOLEAN};

/// PostgreSQL triple store, one `<scope>_statement` table per scope
#[derive(Debug, Clone)]
pub struct PgStatementStore {
    pool: PgPool,
}

impl PgStatementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pool that opens connections on first use
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self, scope: &str) -> Result<(), StoreError> {
        let table = table_name(scope)?;
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                subject_id VARCHAR(100) NOT NULL,
                predicate VARCHAR(50) NOT NULL,
                "index" INTEGER NOT NULL,
                object_id VARCHAR(512),
                object_literal TEXT,
                object_literal_kind VARCHAR(8),
                object_type VARCHAR(50),
                object_label TEXT,
                source_id VARCHAR(50) NOT NULL,
                source_record_id VARCHAR(50) NOT NULL,
                source_record_path VARCHAR(50),
                creator_id INTEGER NOT NULL,
                created TIMESTAMP NOT NULL DEFAULT NOW(),
                PRIMARY KEY (subject_id, predicate, "index")
            )
            "#
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        sqlx::query(&format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS object_literal_kind VARCHAR(8)"
        ))
        .execute(&self.pool)
        .await?;
        info!(table = %table, "Statement table ready");
        Ok(())
    }
}

/// Scopes are interpolated into SQL, so only `[a-z_]` is accepted
fn table_name(scope: &str) -> Result<String, StoreError> {
    if scope.is_empty() || !scope.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        return Err(StoreError::InvalidScope(scope.to_string()));
    }
    Ok(format!("{}_statement", scope))
}

fn literal_text(literal: Option<&Literal>) -> Option<String> {
    literal.map(ToString::to_string)
}

/// Stored beside the literal text so numbers read back as numbers
fn literal_kind(literal: Option<&Literal>) -> Option<&'static str> {
    literal.map(|lit| match lit {
        Literal::Boolean(_) => "boolean",
        Literal::Integer(_) => "integer",
        Literal::Float(_) => "float",
        Literal::Text(_) => "text",
    })
}

/// Rows written without a kind fall back to the object type
fn parse_literal(text: String, kind: Option<&str>, object_type: Option<&str>) -> Literal {
    let kind = kind.or(match object_type {
        Some(XSD_BOOLEAN) => Some("boolean"),
        _ => None,
    });
    match kind {
        Some("boolean") => match text.parse::<bool>() {
            Ok(b) => Literal::Boolean(b),
            Err(_) => Literal::Text(text),
        },
        Some("integer") => match text.parse::<i64>() {
            Ok(i) => Literal::Integer(i),
            Err(_) => Literal::Text(text),
        },
        Some("float") => match text.parse::<f64>() {
            Ok(x) => Literal::Float(x),
            Err(_) => Literal::Text(text),
        },
        _ => Literal::Text(text),
    }
}

fn row_to_statement(row: &PgRow) -> Result<Statement, StoreError> {
    let subject_id: String = row.try_get("subject_id")?;
    let object_type: Option<String> = row.try_get("object_type")?;
    let literal: Option<String> = row.try_get("object_literal")?;
    let kind: Option<String> = row.try_get("object_literal_kind")?;
    let literal =
        literal.map(|text| parse_literal(text, kind.as_deref(), object_type.as_deref()));

    let object = StatementObject {
        id: row.try_get("object_id")?,
        literal,
        label: row.try_get("object_label")?,
        object_type,
    };
    let provenance = Provenance {
        source_id: row.try_get("source_id")?,
        source_record_id: row.try_get("source_record_id")?,
        source_record_path: row.try_get("source_record_path")?,
    };
    let creator_id: i32 = row.try_get("creator_id")?;
    let index: i32 = row.try_get("index")?;

    Statement::new(
        subject_id.clone(),
        row.try_get::<String, _>("predicate")?,
        object,
        creator_id.max(0) as u32,
        provenance,
        index.max(0) as usize,
    )
    .map_err(|e| StoreError::InvalidRow {
        subject_id,
        reason: e.to_string(),
    })
}

#[async_trait]
impl StatementStore for PgStatementStore {
    async fn upsert_statements(
        &self,
        scope: &str,
        statements: &[Statement],
    ) -> Result<UpsertReport, StoreError> {
        let table = table_name(scope)?;
        let sql = format!(
            r#"
            INSERT INTO {table} (
                subject_id, predicate, "index", object_id, object_literal, object_literal_kind,
                object_type, object_label, source_id, source_record_id, source_record_path,
                creator_id, created
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            ON CONFLICT (subject_id, predicate, "index") DO UPDATE SET
                object_id = EXCLUDED.object_id,
                object_literal = EXCLUDED.object_literal,
                object_literal_kind = EXCLUDED.object_literal_kind,
                object_type = EXCLUDED.object_type,
                object_label = EXCLUDED.object_label,
                source_id = EXCLUDED.source_id,
                source_record_id = EXCLUDED.source_record_id,
                source_record_path = EXCLUDED.source_record_path,
                creator_id = EXCLUDED.creator_id,
                created = NOW()
            "#
        );

        let mut failed = Vec::new();
        for (i, s) in statements.iter().enumerate() {
            let result = sqlx::query(&sql)
                .bind(s.subject_id())
                .bind(s.predicate())
                .bind(s.index() as i32)
                .bind(s.object_id())
                .bind(literal_text(s.object_literal()))
                .bind(literal_kind(s.object_literal()))
                .bind(s.object_type())
                .bind(s.object_label())
                .bind(s.source_id())
                .bind(s.source_record_id())
                .bind(s.source_record_path())
                .bind(s.creator_id() as i32)
                .execute(&self.pool)
                .await;

            match result {
                Ok(_) => {},
                // Connection-level failures abort the batch; row-level ones are retried
                Err(e @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_))) => {
                    return Err(e.into());
                },
                Err(e) => {
                    warn!(
                        subject_id = %s.subject_id(),
                        predicate = %s.predicate(),
                        error = %e,
                        "Statement rejected by store"
                    );
                    failed.push(i);
                },
            }
        }

        Ok(UpsertReport::failed(failed))
    }

    async fn delete_stale_statements(
        &self,
        scope: &str,
        current: &[Statement],
        relation: Option<&str>,
    ) -> Result<u64, StoreError> {
        let table = table_name(scope)?;

        let mut keys_by_subject: BTreeMap<&str, (Vec<String>, Vec<i32>)> = BTreeMap::new();
        for s in current {
            let entry = keys_by_subject.entry(s.subject_id()).or_default();
            entry.0.push(s.predicate().to_string());
            entry.1.push(s.index() as i32);
        }

        let stale_sql = format!(
            r#"
            DELETE FROM {table}
            WHERE subject_id = $1
              AND (predicate, "index") NOT IN (
                  SELECT * FROM UNNEST($2::text[], $3::int[])
              )
            "#
        );

        let mut deleted = 0;
        for (subject, (predicates, indices)) in &keys_by_subject {
            deleted += sqlx::query(&stale_sql)
                .bind(*subject)
                .bind(predicates.as_slice())
                .bind(indices.as_slice())
                .execute(&self.pool)
                .await?
                .rows_affected();
        }

        if relation.is_some() {
            let orphan_sql = format!(
                r#"
                DELETE FROM {table}
                WHERE left(subject_id, length($1) + 1) = $1 || '#'
                  AND NOT (subject_id = ANY($2))
                "#
            );
            let blank_nodes: Vec<String> = keys_by_subject
                .keys()
                .filter(|s| is_blank_node(s))
                .map(|s| s.to_string())
                .collect();
            for owner in keys_by_subject.keys().filter(|s| !is_blank_node(s)) {
                deleted += sqlx::query(&orphan_sql)
                    .bind(*owner)
                    .bind(blank_nodes.as_slice())
                    .execute(&self.pool)
                    .await?
                    .rows_affected();
            }
        }

        Ok(deleted)
    }

    async fn get_statement(
        &self,
        scope: &str,
        subject_id: &str,
        predicate: &str,
    ) -> Result<Option<Statement>, StoreError> {
        let table = table_name(scope)?;
        let sql = format!(
            r#"
            SELECT subject_id, predicate, "index", object_id, object_literal, object_literal_kind,
                   object_type, object_label, source_id, source_record_id, source_record_path, creator_id
            FROM {table}
            WHERE subject_id = $1 AND predicate = $2
            ORDER BY "index"
            LIMIT 1
            "#
        );

        let row = sqlx::query(&sql)
            .bind(subject_id)
            .bind(predicate)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_statement).transpose()
    }
}
