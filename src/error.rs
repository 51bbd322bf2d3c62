//! Error types for clebsch.

use thiserror::Error;

/// The main error type for tensor-product construction and evaluation.
#[derive(Debug, Error)]
pub enum TpError {
    /// Candle tensor operation failed
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Invalid descriptor, instruction, mode tag or option
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Coupling requested for a triple outside the triangle inequality
    #[error("domain error: no coupling for ({l1}, {l2}, {l3}), triangle inequality violated")]
    Domain { l1: u32, l2: u32, l3: u32 },

    /// Shape mismatch on inputs or weights
    #[error("shape error: expected {expected}, got {got}")]
    Shape { expected: String, got: String },

    /// JSON (de)serialization of configs or plans
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TpError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        TpError::Configuration(message.into())
    }

    pub(crate) fn shape(expected: impl ToString, got: impl ToString) -> Self {
        TpError::Shape {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

/// Result type for clebsch operations.
pub type Result<T> = std::result::Result<T, TpError>;
