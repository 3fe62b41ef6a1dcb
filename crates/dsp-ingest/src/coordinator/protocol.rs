//! Line-delimited JSON spoken between the coordinator and its workers
//!
//! Workers write `{"ready":true}`, `{"processedCount":n}` and
//! `{"skippedCount":n}` on stdout; the coordinator answers the ready message
//! with one `{"start":s,"length":l}` line on the worker's stdin.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use super::partition::WorkChunk;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed protocol message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol stream error: {0}")]
    Lines(#[from] LinesCodecError),

    #[error("Protocol IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Peer closed the channel")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Ready {
        #[serde(deserialize_with = "only_true")]
        ready: bool,
    },
    Processed {
        #[serde(rename = "processedCount")]
        processed_count: u64,
    },
    Skipped {
        #[serde(rename = "skippedCount")]
        skipped_count: u64,
    },
}

impl WorkerMessage {
    pub fn ready() -> Self {
        WorkerMessage::Ready { ready: true }
    }

    pub fn processed(count: u64) -> Self {
        WorkerMessage::Processed {
            processed_count: count,
        }
    }

    pub fn skipped(count: u64) -> Self {
        WorkerMessage::Skipped {
            skipped_count: count,
        }
    }
}

/// `{"ready":false}` is not a ready message
fn only_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    if bool::deserialize(deserializer)? {
        Ok(true)
    } else {
        Err(D::Error::custom("ready must be true"))
    }
}

/// Offsets a worker is told to process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub start: u64,
    pub length: u64,
}

impl From<&WorkChunk> for Assignment {
    fn from(chunk: &WorkChunk) -> Self {
        Self {
            start: chunk.start,
            length: chunk.length,
        }
    }
}

/// One message as a line, without the terminator
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_message_wire_shape() {
        assert_eq!(encode_line(&WorkerMessage::ready()).unwrap(), r#"{"ready":true}"#);
        assert_eq!(
            encode_line(&WorkerMessage::processed(12)).unwrap(),
            r#"{"processedCount":12}"#
        );
        assert_eq!(
            decode_line::<WorkerMessage>(r#"{"skippedCount":3}"#).unwrap(),
            WorkerMessage::skipped(3)
        );
    }

    #[test]
    fn test_assignment_from_chunk() {
        let chunk = WorkChunk {
            index: 1,
            start: 34,
            length: 34,
        };
        let line = encode_line(&Assignment::from(&chunk)).unwrap();
        assert_eq!(line, r#"{"start":34,"length":34}"#);
        assert_eq!(
            decode_line::<Assignment>(&line).unwrap(),
            Assignment {
                start: 34,
                length: 34
            }
        );
    }

    #[test]
    fn test_rejects_unknown_message() {
        assert!(decode_line::<WorkerMessage>(r#"{"hello":1}"#).is_err());
        assert!(decode_line::<WorkerMessage>("not json").is_err());
    }

    #[test]
    fn test_ready_false_is_not_a_ready_message() {
        assert!(decode_line::<WorkerMessage>(r#"{"ready":false}"#).is_err());
        assert_eq!(
            decode_line::<WorkerMessage>(r#"{"ready":true}"#).unwrap(),
            WorkerMessage::ready()
        );
    }
}
