//! Error kinds for the parser, per the error handling design: structural
//! errors are fatal, data-level errors (oracle divergence, unreachable
//! graphs) are counted but never stop training and so are not represented
//! here as `Err` values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("I/O failure: {0}")]
    IOFailure(#[from] std::io::Error),

    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("gradient check failed: analytic {analytic}, numeric {numeric}, diff {diff}")]
    GradientCheckFailed {
        analytic: f64,
        numeric: f64,
        diff: f64,
    },
}

pub type Result<T> = std::result::Result<T, ParserError>;
