//! Offset-addressable record sources
//!
//! The pipeline only needs two things from an input stream: a lazy stream of
//! raw payloads starting at an offset, and the range of offsets available.

mod memory;
mod ndjson;

pub use memory::MemorySource;
pub use ndjson::NdjsonSource;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read from source: {0}")]
    Read(#[from] std::io::Error),
}

/// One undecoded record and its position in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub value: Vec<u8>,
    pub offset: u64,
}

/// Offsets available in a source. `max` is the high-water mark: one past the
/// last readable offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRange {
    pub min: u64,
    pub max: u64,
}

impl OffsetRange {
    pub fn len(&self) -> u64 {
        self.max.saturating_sub(self.min)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type MessageStream = BoxStream<'static, Result<RawMessage, SourceError>>;

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Stream messages from `offset` onwards. Nothing is read until polled.
    fn consume(&self, offset: u64) -> MessageStream;

    /// Offsets currently available
    async fn offsets(&self) -> Result<OffsetRange, SourceError>;

    /// Name used in logs
    fn name(&self) -> String;
}
