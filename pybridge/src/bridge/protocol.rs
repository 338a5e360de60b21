//! Wire protocol types for host-interpreter communication.
//!
//! One channel (child stdin/stdout), strictly half-duplex: every [`Command`]
//! is answered by exactly one [`Response`] and the interpreter never speaks
//! unprompted.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Requests from host to interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Get {
        var: String,
    },

    /// `value` is JSON text decoded a second time by the interpreter, so the
    /// transport never inspects the value's shape.
    Set {
        var: String,
        value: String,
    },

    /// Execute script text with the name table as its global namespace.
    Run {
        script: String,
    },

    Shutdown,
}

impl Command {
    pub fn get(var: impl Into<String>) -> Result<Self> {
        let var = non_empty(var.into())?;
        Ok(Self::Get { var })
    }

    pub fn set<T: Serialize + ?Sized>(var: impl Into<String>, value: &T) -> Result<Self> {
        let var = non_empty(var.into())?;
        let value = serde_json::to_string(value).map_err(BridgeError::Encoding)?;
        Ok(Self::Set { var, value })
    }

    pub fn run(script: impl Into<String>) -> Self {
        Self::Run {
            script: script.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Run { .. } => "run",
            Self::Shutdown => "shutdown",
        }
    }
}

fn non_empty(var: String) -> Result<String> {
    if var.is_empty() {
        return Err(BridgeError::EmptyName);
    }
    Ok(var)
}

/// Replies from interpreter to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Get {
        var: String,
        value: serde_json::Value,
    },

    /// Acknowledges a `set`.
    Set,

    Run {
        output: String,
    },

    /// Dispatch failed inside the interpreter; its command loop keeps running.
    Error {
        kind: String,
        message: String,
    },

    ShuttingDown,
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Set => "set",
            Self::Run { .. } => "run",
            Self::Error { .. } => "error",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// Turns an `error` reply into [`BridgeError::Interpreter`].
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Error { kind, message } => Err(BridgeError::Interpreter { kind, message }),
            other => Ok(other),
        }
    }
}
