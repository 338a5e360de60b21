//! Bridge configuration.
//!
//! Defaults come from the environment:
//! - `PYBRIDGE_PYTHON`: interpreter executable (default `python3`)
//! - `PYBRIDGE_REQUEST_TIMEOUT`: per-request deadline in seconds (default: none)

use std::ffi::OsString;
use std::time::Duration;

use crate::bridge::codec::DEFAULT_MAX_FRAME_LENGTH;

pub const DEFAULT_PROGRAM: &str = "python3";

/// Size of the single read the original stdout-scraping `run` performed.
///
/// Pass it to [`InterpConfig::with_max_run_output`] to reproduce that cut-off.
pub const LEGACY_READ_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct InterpConfig {
    pub program: OsString,
    pub request_timeout: Option<Duration>,
    pub max_run_output: Option<usize>,
    pub max_frame_length: usize,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            program: std::env::var_os("PYBRIDGE_PYTHON")
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_PROGRAM.into()),
            request_timeout: parse_timeout(std::env::var("PYBRIDGE_REQUEST_TIMEOUT").ok()),
            max_run_output: None,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl InterpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_max_run_output(mut self, bytes: usize) -> Self {
        self.max_run_output = Some(bytes);
        self
    }

    pub fn with_max_frame_length(mut self, bytes: usize) -> Self {
        self.max_frame_length = bytes;
        self
    }
}

fn parse_timeout(raw: Option<String>) -> Option<Duration> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
}
