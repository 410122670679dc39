//! Error types shared by model construction and the streaming trainer.

use thiserror::Error;

/// Errors surfaced by the widedeep crate.
///
/// Shape mismatches inside tensor operations are not translated here; they
/// surface as panics of the tensor runtime. [`WideDeepError::Shape`] is only
/// produced where this crate assembles tensors itself.
#[derive(Debug, Error)]
pub enum WideDeepError {
    /// Declared options are mutually inconsistent. Raised before any
    /// parameter is allocated.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A raw row could not be turned into model input.
    #[error("Decode error at row {row}: {message}")]
    Decode {
        /// Absolute row index in the data source
        row: usize,
        /// What went wrong with the row
        message: String,
    },

    /// Tensor assembly found a width or length it did not expect.
    #[error("Shape error in {context}: expected {expected}, actual {actual}")]
    Shape {
        /// Where the mismatch was detected
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Training produced a NaN or infinite loss.
    #[error("Numerical instability: loss is {value} at iteration {iteration}")]
    NumericalInstability { iteration: usize, value: f64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

impl WideDeepError {
    /// Create a Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a Decode error for the given absolute row.
    pub fn decode(row: usize, message: impl Into<String>) -> Self {
        Self::Decode {
            row,
            message: message.into(),
        }
    }

    /// Create a Shape error.
    pub fn shape(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::Shape {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// True for errors raised by configuration validation.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T, E = WideDeepError> = std::result::Result<T, E>;
