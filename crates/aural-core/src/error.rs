//! Error types for the Aural handle API

use thiserror::Error;

/// Errors surfaced through the handle API. The mixer itself never raises
/// errors; unrecoverable backend conditions become a disconnect event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuralError {
    #[error("invalid handle id {0}")]
    InvalidName(u32),

    #[error("invalid property for target: {0}")]
    InvalidEnum(&'static str),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),
}

/// Result type alias for handle-API operations.
pub type AuralResult<T> = Result<T, AuralError>;

/// Shorthand for the common value-validation failure.
pub fn invalid_value(msg: impl Into<String>) -> AuralError {
    AuralError::InvalidValue(msg.into())
}

/// Shorthand for the common state-validation failure.
pub fn invalid_op(msg: impl Into<String>) -> AuralError {
    AuralError::InvalidOperation(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = AuralError::InvalidName(42);
        assert_eq!(e.to_string(), "invalid handle id 42");
        let e = invalid_value("gain must be non-negative");
        assert!(e.to_string().contains("gain"));
    }
}
