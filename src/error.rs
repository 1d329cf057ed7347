//! Error types for the optimizer.

use thiserror::Error;

/// Result type alias for optimizer operations.
pub type Result<T> = std::result::Result<T, OptimError>;

/// Errors that can occur during optimizer construction or updates.
#[derive(Debug, Error)]
pub enum OptimError {
    /// Invalid configuration parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A tensor with an unsupported shape reached the projection operators.
    #[error("projection requires a 2-D tensor, got shape {shape:?}")]
    UnsupportedShape {
        /// The offending shape.
        shape: Vec<usize>,
    },

    /// Candle tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}
