//! Script execution errors.
//!
//! Syntax failures live in [`SyntaxError`](crate::SyntaxError); this is
//! everything that can go wrong *running* a parsed script. Both convert
//! into Error-call payloads at the service boundary.

use thiserror::Error;

use trellis_types::ErrorCode;

/// Script execution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// No command bound under this name.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    /// No variable bound under this name.
    #[error("unknown variable: ${0}")]
    UnknownVariable(String),
    /// The first word looked like an address but did not resolve to a
    /// control.
    #[error("not a control address: {0:?}")]
    InvalidAddress(String),
    /// A command rejected its arguments.
    #[error("bad arguments: {0}")]
    BadArguments(String),
    /// The interpreter stopped making progress.
    #[error("script evaluation stalled")]
    Stalled,
    /// The service already has an active evaluation.
    #[error("an evaluation is already active")]
    Busy,
    /// The active evaluation was abandoned.
    #[error("evaluation aborted")]
    Aborted,
}

impl ErrorCode for ScriptError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownCommand(_) => "SCRIPT_UNKNOWN_COMMAND",
            Self::UnknownVariable(_) => "SCRIPT_UNKNOWN_VARIABLE",
            Self::InvalidAddress(_) => "SCRIPT_INVALID_ADDRESS",
            Self::BadArguments(_) => "SCRIPT_BAD_ARGUMENTS",
            Self::Stalled => "SCRIPT_STALLED",
            Self::Busy => "SCRIPT_BUSY",
            Self::Aborted => "SCRIPT_ABORTED",
        }
    }

    fn is_recoverable(&self) -> bool {
        // A busy service frees up once the active evaluation settles.
        matches!(self, Self::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_types::check_error_codes;

    #[test]
    fn error_codes() {
        check_error_codes(
            &[
                ScriptError::UnknownCommand("x".into()),
                ScriptError::UnknownVariable("x".into()),
                ScriptError::InvalidAddress("x".into()),
                ScriptError::BadArguments("x".into()),
                ScriptError::Stalled,
                ScriptError::Busy,
                ScriptError::Aborted,
            ],
            "SCRIPT_",
        );
    }
}
