//! Configuration management

use dsp_common::{DspError, Result};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::persist::{PersistConfig, RESOURCE_SCOPE};
use crate::pipeline::{BatchWindow, ErrorPolicy, PipelineConfig};
use crate::record::RecordKind;

// ============================================================================
// Ingest Configuration Constants
// ============================================================================

/// Default in-flight operations per bounded stage.
pub const DEFAULT_STAGE_CONCURRENCY: usize = crate::pipeline::DEFAULT_STAGE_CONCURRENCY;

/// Default records per persisted batch.
pub const DEFAULT_BATCH_MAX_COUNT: usize = crate::pipeline::DEFAULT_BATCH_MAX_COUNT;

/// Default batching window in milliseconds.
pub const DEFAULT_BATCH_MAX_TIME_MS: u64 = crate::pipeline::DEFAULT_BATCH_MAX_TIME_MS;

/// Default upsert attempts per statement.
pub const DEFAULT_PERSIST_MAX_ATTEMPTS: u32 = crate::persist::DEFAULT_MAX_ATTEMPTS;

/// Default delay before the first upsert retry, in milliseconds.
pub const DEFAULT_PERSIST_BACKOFF_MS: u64 = crate::persist::DEFAULT_INITIAL_BACKOFF_MS;

/// Default connections per worker process.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Relation whose orphaned blank nodes are swept with their owner.
pub const HOLDING_BLANK_NODE_RELATION: &str = "dcterms:hasPart";

/// Where statements are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Postgres,
    /// Discard on exit; dry runs
    Memory,
}

impl FromStr for StoreKind {
    type Err = DspError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "memory" => Ok(StoreKind::Memory),
            other => Err(DspError::config(format!("Unknown store: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub store: StoreKind,
    pub scope: String,
    pub source_path: Option<PathBuf>,
    pub record_kind: RecordKind,
    pub mapping_path: Option<PathBuf>,
    pub lookup_dir: Option<PathBuf>,
    pub stage_concurrency: usize,
    pub batch_max_count: usize,
    pub batch_max_time_ms: u64,
    pub error_policy: ErrorPolicy,
    pub persist_max_attempts: u32,
    pub persist_backoff_ms: u64,
    /// NDJSON file receiving ids of written subjects
    pub index_queue_path: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            store: StoreKind::default(),
            scope: RESOURCE_SCOPE.to_string(),
            source_path: None,
            record_kind: RecordKind::Bib,
            mapping_path: None,
            lookup_dir: None,
            stage_concurrency: DEFAULT_STAGE_CONCURRENCY,
            batch_max_count: DEFAULT_BATCH_MAX_COUNT,
            batch_max_time_ms: DEFAULT_BATCH_MAX_TIME_MS,
            error_policy: ErrorPolicy::default(),
            persist_max_attempts: DEFAULT_PERSIST_MAX_ATTEMPTS,
            persist_backoff_ms: DEFAULT_PERSIST_BACKOFF_MS,
            index_queue_path: None,
        }
    }
}

impl IngestConfig {
    /// Load `.env`, then read configuration from the environment
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(_) => {},
            Err(e) if e.not_found() => {},
            Err(e) => return Err(DspError::config(format!("Failed to read .env: {}", e))),
        }
        let config = Self::from_vars(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build from a variable lookup; unparsable numbers fall back to defaults
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str| var(key).and_then(|s| s.trim().parse::<u64>().ok());

        Ok(Self {
            database_url: var("DATABASE_URL").filter(|s| !s.is_empty()),
            database_max_connections: number("DATABASE_MAX_CONNECTIONS")
                .map(|n| n as u32)
                .unwrap_or(defaults.database_max_connections),
            store: parse_var::<StoreKind>(&var, "DSP_STORE")?.unwrap_or(defaults.store),
            scope: var("DSP_SCOPE").unwrap_or(defaults.scope),
            source_path: var("DSP_SOURCE_PATH").map(PathBuf::from),
            record_kind: parse_var::<RecordKind>(&var, "DSP_RECORD_KIND")?
                .unwrap_or(defaults.record_kind),
            mapping_path: var("DSP_MAPPING_PATH").map(PathBuf::from),
            lookup_dir: var("DSP_LOOKUP_DIR").map(PathBuf::from),
            stage_concurrency: number("DSP_STAGE_CONCURRENCY")
                .map(|n| n as usize)
                .unwrap_or(defaults.stage_concurrency),
            batch_max_count: number("DSP_BATCH_MAX_COUNT")
                .map(|n| n as usize)
                .unwrap_or(defaults.batch_max_count),
            batch_max_time_ms: number("DSP_BATCH_MAX_TIME_MS").unwrap_or(defaults.batch_max_time_ms),
            error_policy: parse_var::<ErrorPolicy>(&var, "DSP_ERROR_POLICY")?
                .unwrap_or(defaults.error_policy),
            persist_max_attempts: number("DSP_PERSIST_MAX_ATTEMPTS")
                .map(|n| n as u32)
                .unwrap_or(defaults.persist_max_attempts),
            persist_backoff_ms: number("DSP_PERSIST_BACKOFF_MS").unwrap_or(defaults.persist_backoff_ms),
            index_queue_path: var("DSP_INDEX_QUEUE_PATH")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.source_path.is_none() {
            return Err(DspError::config("DSP_SOURCE_PATH must be set"));
        }

        if self.store == StoreKind::Postgres && self.database_url.is_none() {
            return Err(DspError::config("DATABASE_URL must be set when writing to postgres"));
        }

        if self.database_max_connections == 0 {
            return Err(DspError::config("Database max_connections must be greater than 0"));
        }

        if self.stage_concurrency == 0 {
            return Err(DspError::config("Stage concurrency must be greater than 0"));
        }

        if self.batch_max_count == 0 || self.batch_max_time_ms == 0 {
            return Err(DspError::config(format!(
                "Batch bounds must be greater than 0 (count {}, time {}ms)",
                self.batch_max_count, self.batch_max_time_ms
            )));
        }

        if self.persist_max_attempts == 0 {
            return Err(DspError::config("Persist max_attempts must be greater than 0"));
        }

        Ok(())
    }

    pub fn pipeline_config(&self, seek: Option<String>) -> PipelineConfig {
        PipelineConfig {
            stage_concurrency: self.stage_concurrency,
            batch: BatchWindow {
                max_count: self.batch_max_count,
                max_time: Duration::from_millis(self.batch_max_time_ms),
            },
            error_policy: self.error_policy,
            seek,
        }
    }

    pub fn persist_config(&self) -> PersistConfig {
        let relation = match self.record_kind {
            RecordKind::Holding => Some(HOLDING_BLANK_NODE_RELATION.to_string()),
            _ => None,
        };
        PersistConfig {
            scope: self.scope.clone(),
            max_attempts: self.persist_max_attempts,
            initial_backoff: Duration::from_millis(self.persist_backoff_ms),
            relation,
        }
    }
}

/// Parse an optional variable, naming it in the error
fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| DspError::config(format!("Invalid {}: {}", key, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> Result<IngestConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[]).unwrap();
        assert_eq!(config.stage_concurrency, 10);
        assert_eq!(config.batch_max_count, 100);
        assert_eq!(config.batch_max_time_ms, 100);
        assert_eq!(config.persist_max_attempts, 5);
        assert_eq!(config.error_policy, ErrorPolicy::FailFast);
        assert_eq!(config.store, StoreKind::Postgres);
        assert_eq!(config.index_queue_path, None);
    }

    #[test]
    fn test_reads_variables() {
        let config = from_map(&[
            ("DSP_SOURCE_PATH", "/tmp/items.ndjson"),
            ("DSP_RECORD_KIND", "holding"),
            ("DSP_STORE", "memory"),
            ("DSP_ERROR_POLICY", "isolate"),
            ("DSP_BATCH_MAX_COUNT", "25"),
            ("DSP_STAGE_CONCURRENCY", "not a number"),
            ("DSP_INDEX_QUEUE_PATH", "/tmp/index.ndjson"),
        ])
        .unwrap();

        assert_eq!(config.record_kind, RecordKind::Holding);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.error_policy, ErrorPolicy::IsolateRecord);
        assert_eq!(config.batch_max_count, 25);
        assert_eq!(config.stage_concurrency, DEFAULT_STAGE_CONCURRENCY);
        assert_eq!(config.index_queue_path, Some(PathBuf::from("/tmp/index.ndjson")));
        assert!(config.validate().is_ok());
        assert_eq!(
            config.persist_config().relation.as_deref(),
            Some(HOLDING_BLANK_NODE_RELATION)
        );
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let err = from_map(&[("DSP_RECORD_KIND", "serial")]).unwrap_err();
        assert!(matches!(err, DspError::Config(_)));
        assert!(err.to_string().contains("DSP_RECORD_KIND"));
    }

    #[test]
    fn test_validate() {
        let mut config = IngestConfig {
            source_path: Some(PathBuf::from("records.ndjson")),
            ..Default::default()
        };
        assert!(config.validate().is_err(), "postgres without a url");

        config.store = StoreKind::Memory;
        assert!(config.validate().is_ok());

        config.batch_max_count = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DspError::Config(ref msg) if msg.contains("Batch bounds")));
    }
}
