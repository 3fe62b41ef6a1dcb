use futures::Stream;
use std::time::Duration;

pub const DEFAULT_BATCH_MAX_COUNT: usize = 100;
pub const DEFAULT_BATCH_MAX_TIME_MS: u64 = 100;

/// Count and time bounds of a batch; whichever is reached first closes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    pub max_count: usize,
    /// Measured from the first item buffered into the batch
    pub max_time: Duration,
}

impl Default for BatchWindow {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_BATCH_MAX_COUNT,
            max_time: Duration::from_millis(DEFAULT_BATCH_MAX_TIME_MS),
        }
    }
}

/// Group `stream` into batches bounded by `window`
pub fn batch_window<S>(stream: S, window: BatchWindow) -> impl Stream<Item = Vec<S::Item>>
where
    S: Stream,
{
    tokio_stream::StreamExt::chunks_timeout(stream, window.max_count.max(1), window.max_time)
}
