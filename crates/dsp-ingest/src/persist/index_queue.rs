//! Hand-off of written subject ids to a downstream search index

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::StoreError;

#[async_trait]
pub trait IndexQueue: Send + Sync {
    /// Queue `ids` of `scope` for reindexing
    async fn publish(&self, scope: &str, ids: &[String]) -> Result<(), StoreError>;
}

/// Keeps every published id list, in order
#[derive(Debug, Default)]
pub struct MemoryIndexQueue {
    published: Mutex<Vec<Vec<String>>>,
}

impl MemoryIndexQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<Vec<String>> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl IndexQueue for MemoryIndexQueue {
    async fn publish(&self, _scope: &str, ids: &[String]) -> Result<(), StoreError> {
        self.published.lock().await.push(ids.to_vec());
        Ok(())
    }
}

#[derive(Serialize)]
struct IndexEntry<'a> {
    #[serde(rename = "type")]
    scope: &'a str,
    id: &'a str,
}

/// Appends one `{"type":scope,"id":id}` line per id to a file
#[derive(Debug)]
pub struct NdjsonIndexQueue {
    path: PathBuf,
    // Serializes appends from concurrent batches
    lock: Mutex<()>,
}

impl NdjsonIndexQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IndexQueue for NdjsonIndexQueue {
    async fn publish(&self, scope: &str, ids: &[String]) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        for id in ids {
            serde_json::to_writer(&mut buf, &IndexEntry { scope, id })
                .map_err(|e| StoreError::IndexQueue(e.to_string()))?;
            buf.push(b'\n');
        }

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::IndexQueue(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(&buf)
            .await
            .map_err(|e| StoreError::IndexQueue(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| StoreError::IndexQueue(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ndjson_queue_appends_one_line_per_id() {
        let dir = tempfile::tempdir().unwrap();
        let queue = NdjsonIndexQueue::new(dir.path().join("index.ndjson"));

        queue
            .publish("resource", &["b1".to_string(), "i2".to_string()])
            .await
            .unwrap();
        queue.publish("resource", &["b3".to_string()]).await.unwrap();

        let written = tokio::fs::read_to_string(queue.path()).await.unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"type":"resource","id":"b1"}"#,
                r#"{"type":"resource","id":"i2"}"#,
                r#"{"type":"resource","id":"b3"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_ndjson_queue_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let queue = NdjsonIndexQueue::new(dir.path().join("missing").join("index.ndjson"));

        let err = queue.publish("resource", &["b1".to_string()]).await.unwrap_err();
        assert!(matches!(err, StoreError::IndexQueue(_)));
    }
}
