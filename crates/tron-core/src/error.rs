//! Core domain errors.

use thiserror::Error;

/// Core domain errors for Tron cluster tasks.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Writing task output failed.
    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
