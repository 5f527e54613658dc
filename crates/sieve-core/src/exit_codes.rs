//! Exit codes for the `sieve` CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing and
//! are a stable contract for automation.

use sieve_common::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Command completed.
    Success = 0,

    /// Invalid arguments or configuration.
    InvalidArgs = 2,

    /// Named queue, alert, or file does not exist.
    NotFound = 3,

    /// Operation failed but may succeed on retry (I/O, timeout, sink).
    TransientFailure = 4,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    /// Name used in JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Success => "OK",
            ExitCode::InvalidArgs => "ERR_ARGS",
            ExitCode::NotFound => "ERR_NOT_FOUND",
            ExitCode::TransientFailure => "ERR_TRANSIENT",
        }
    }

    /// Map an engine error onto the CLI contract.
    pub fn for_error(err: &Error) -> ExitCode {
        match err {
            Error::Configuration(_) | Error::InvalidPattern { .. } => ExitCode::InvalidArgs,
            Error::NotFound { .. } => ExitCode::NotFound,
            _ => ExitCode::TransientFailure,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        ExitCode::for_error(err)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
