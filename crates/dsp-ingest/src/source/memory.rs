use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use super::{MessageStream, OffsetRange, RawMessage, RecordSource, SourceError};

/// In-memory source, offsets are vector positions
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    payloads: Arc<Vec<Vec<u8>>>,
}

impl MemorySource {
    pub fn new(payloads: Vec<Vec<u8>>) -> Self {
        Self {
            payloads: Arc::new(payloads),
        }
    }

    /// Serialize each value as one message
    pub fn from_json(values: &[serde_json::Value]) -> Self {
        Self::new(values.iter().map(|v| v.to_string().into_bytes()).collect())
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    fn consume(&self, offset: u64) -> MessageStream {
        let payloads = Arc::clone(&self.payloads);
        let start = offset as usize;
        let end = payloads.len();

        stream::iter(start..end)
            .map(move |i| {
                Ok(RawMessage {
                    value: payloads[i].clone(),
                    offset: i as u64,
                })
            })
            .boxed()
    }

    async fn offsets(&self) -> Result<OffsetRange, SourceError> {
        Ok(OffsetRange {
            min: 0,
            max: self.payloads.len() as u64,
        })
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}
