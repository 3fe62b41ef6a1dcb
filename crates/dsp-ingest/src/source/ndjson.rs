use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::SplitStream;

use super::{MessageStream, OffsetRange, RawMessage, RecordSource, SourceError};

/// Newline-delimited JSON file; the offset of a record is its line number.
/// Lines are handed on as raw bytes, decoding is the pipeline's job.
#[derive(Debug, Clone)]
pub struct NdjsonSource {
    path: PathBuf,
}

impl NdjsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(path: &Path) -> Result<BufReader<File>, SourceError> {
        let file = File::open(path).await.map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(BufReader::new(file))
    }
}

#[async_trait]
impl RecordSource for NdjsonSource {
    fn consume(&self, offset: u64) -> MessageStream {
        let path = self.path.clone();

        stream::once(async move { Self::open(&path).await })
            .flat_map(move |opened| match opened {
                Ok(reader) => SplitStream::new(reader.split(b'\n'))
                    .enumerate()
                    .skip(offset as usize)
                    .filter_map(|(line_no, line)| async move {
                        match line {
                            Ok(l) if is_blank(&l) => None,
                            Ok(l) => Some(Ok(RawMessage {
                                value: l,
                                offset: line_no as u64,
                            })),
                            Err(e) => Some(Err(SourceError::Read(e))),
                        }
                    })
                    .boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }

    async fn offsets(&self) -> Result<OffsetRange, SourceError> {
        let mut lines = Self::open(&self.path).await?.split(b'\n');
        let mut count = 0u64;
        while lines.next_segment().await?.is_some() {
            count += 1;
        }
        Ok(OffsetRange { min: 0, max: count })
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}
