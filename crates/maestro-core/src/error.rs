//! Error types for maestro

use thiserror::Error;

/// Validation failures raised by the control surface and the theory engine.
///
/// None of these are fatal: callers report them and carry on with the state
/// they had before the rejected mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaestroError {
    #[error("Unknown style: {0}")]
    UnknownStyle(String),
    #[error("Unknown section: {0}")]
    UnknownSection(String),
    #[error("Unknown layer: {0}")]
    UnknownLayer(String),
    #[error("Unknown parameter: {0}")]
    UnknownParam(String),
    #[error("Unknown note name: {0}")]
    UnknownNote(String),
    #[error("Scale cannot carry diatonic harmony: {0}")]
    InvalidScale(String),
    #[error("Invalid value for {param}: {value}")]
    InvalidValue { param: String, value: String },
}

impl MaestroError {
    pub(crate) fn invalid_value(param: &str, value: &str) -> Self {
        Self::InvalidValue {
            param: param.to_string(),
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MaestroError>;
