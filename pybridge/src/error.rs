//! Error types for the interpreter bridge.

use std::io;
use std::time::Duration;

/// Failure reported by a single configuration step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Other(String),
}

impl StepError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration step `step` (1-indexed) failed; later steps did not run.
    #[error("option {step} failed: {source}")]
    Config {
        step: usize,
        #[source]
        source: StepError,
    },

    #[error("failed to start interpreter `{program}`: {source}")]
    Start {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("interpreter cannot start: {0}")]
    InvalidStart(String),

    #[error("failed to encode value: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("failed to decode value of `{var}`: {source}")]
    Decoding {
        var: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("variable name must not be empty")]
    EmptyName,

    #[error("interpreter i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to wait for interpreter: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to kill interpreter: {0}")]
    Kill(String),

    #[error("interpreter is not running")]
    NotRunning,

    /// The interpreter rejected a command; its loop is still alive.
    #[error("interpreter raised {kind}: {message}")]
    Interpreter { kind: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no response from interpreter within {0:?}")]
    Timeout(Duration),
}

impl BridgeError {
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning)
    }

    /// Name of the exception class for child-side failures.
    pub fn interpreter_kind(&self) -> Option<&str> {
        match self {
            Self::Interpreter { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_step() {
        let err = BridgeError::Config {
            step: 4,
            source: StepError::invalid("empty path"),
        };
        assert_eq!(err.to_string(), "option 4 failed: invalid argument: empty path");
    }

    #[test]
    fn interpreter_kind_only_for_child_errors() {
        let err = BridgeError::Interpreter {
            kind: "KeyError".to_string(),
            message: "'missing'".to_string(),
        };
        assert_eq!(err.interpreter_kind(), Some("KeyError"));
        assert_eq!(BridgeError::NotRunning.interpreter_kind(), None);
        assert!(BridgeError::NotRunning.is_not_running());
    }
}
