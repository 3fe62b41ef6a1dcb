//! Error types shared across DSP crates

use thiserror::Error;

/// Result type alias for DSP operations
pub type Result<T> = std::result::Result<T, DspError>;

/// Main error type for DSP
#[derive(Error, Debug)]
pub enum DspError {
    /// Missing, malformed or inconsistent settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DspError {
    pub fn config(msg: impl Into<String>) -> Self {
        DspError::Config(msg.into())
    }
}
