//! Error types for fastready.
//!
//! Construction and registration are the only fallible operations; everything
//! else (unknown shortcuts, unknown subscription ids, selectors that match
//! nothing) is a silent no-op.

use thiserror::Error;

/// Top-level error type for fastready.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadyError {
    #[error("Invalid element or query string: {reason}")]
    InvalidTarget {
        reason: String,
    },

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector {
        selector: String,
        reason: String,
    },

    #[error("Dispatcher has been stopped")]
    Stopped,

    #[error("Unknown node: {node}")]
    UnknownNode {
        node: String,
    },

    #[error("Invalid configuration: {message}")]
    Config {
        message: String,
    },
}

impl ReadyError {
    /// Creates an invalid target error.
    #[must_use]
    pub fn invalid_target(reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            reason: reason.into(),
        }
    }

    /// Creates an invalid selector error.
    #[must_use]
    pub fn invalid_selector(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error came from selector parsing.
    #[must_use]
    pub const fn is_selector(&self) -> bool {
        matches!(self, Self::InvalidSelector { .. })
    }

    /// Returns true if the dispatcher was already stopped.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl From<serde_json::Error> for ReadyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

/// Result type alias for fastready operations.
pub type ReadyResult<T> = Result<T, ReadyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_target_message() {
        let err = ReadyError::invalid_target("text nodes cannot be watched");
        let msg = format!("{err}");
        assert!(msg.contains("Invalid element or query string"));
        assert!(msg.contains("text nodes"));
        assert!(!err.is_selector());
    }

    #[test]
    fn test_invalid_selector_message() {
        let err = ReadyError::invalid_selector("div[", "unexpected end of input");
        let msg = format!("{err}");
        assert!(msg.contains("div["));
        assert!(msg.contains("unexpected end"));
        assert!(err.is_selector());
    }

    #[test]
    fn test_stopped() {
        let err = ReadyError::Stopped;
        assert!(err.is_stopped());
        assert_eq!(format!("{err}"), "Dispatcher has been stopped");
    }

    #[test]
    fn test_config_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ReadyError = json_err.into();
        assert!(matches!(err, ReadyError::Config { .. }));
    }
}
