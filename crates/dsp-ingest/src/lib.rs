//! DSP Ingest Library
//!
//! Turns catalog records (bibs, items, holdings) read from an
//! offset-addressable stream into validated subject-predicate-object
//! statements and persists them in batches.
//!
//! # Layout
//!
//! - **statement**: the statement model and per-record builder
//! - **record** / **source**: decoded catalog records and the streams they come from
//! - **mapping** / **serializer**: field-mapping tables and per-kind serializers
//! - **pipeline**: bounded-concurrency transform from messages to statement batches
//! - **persist**: statement stores and the retrying batch writer
//! - **coordinator** / **worker**: the multi-process worker pool
//!
//! # Example
//!
//! ```no_run
//! use dsp_ingest::config::IngestConfig;
//! use dsp_ingest::progress::CountingSink;
//! use dsp_ingest::runner::IngestRunner;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let runner = IngestRunner::from_config(&config, None).await?;
//!     let summary = runner.run(0, Some(1000), Arc::new(CountingSink::new())).await;
//!     println!("{} resources updated", summary.processed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod mapping;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod runner;
pub mod serializer;
pub mod source;
pub mod statement;
pub mod worker;
