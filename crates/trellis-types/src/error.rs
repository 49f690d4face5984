//! Unified error interface for trellis crates.
//!
//! Every error enum in the workspace implements [`ErrorCode`] so that
//! failures can be handled programmatically, classified for retry, and
//! converted into the error payload of an Error call without losing the
//! machine-readable code.
//!
//! # Code Format
//!
//! - UPPER_SNAKE_CASE, prefixed per layer (`ADDRESS_`, `PORT_`, `HUB_`,
//!   `SCRIPT_`, ...)
//! - Stable once defined; changing a code is a breaking change
//!
//! # Example
//!
//! ```
//! use trellis_types::ErrorCode;
//!
//! #[derive(Debug, thiserror::Error)]
//! enum FetchError {
//!     #[error("resource missing")]
//!     Missing,
//!     #[error("backend busy")]
//!     Busy,
//! }
//!
//! impl ErrorCode for FetchError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::Missing => "FETCH_MISSING",
//!             Self::Busy => "FETCH_BUSY",
//!         }
//!     }
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Busy)
//!     }
//! }
//!
//! assert_eq!(FetchError::Missing.code(), "FETCH_MISSING");
//! assert!(FetchError::Busy.is_recoverable());
//! ```

use crate::value::ErrorValue;

/// Machine-readable error classification.
///
/// `code()` identifies the failure class; `is_recoverable()` tells callers
/// whether retrying (or user action) can help. [`to_error_value`]
/// bridges any classified error into the payload carried by an Error call,
/// which is how failures cross root boundaries.
///
/// [`to_error_value`]: ErrorCode::to_error_value
pub trait ErrorCode: std::fmt::Display {
    /// Stable UPPER_SNAKE_CASE code with a layer prefix.
    fn code(&self) -> &'static str;

    /// `true` when a retry or corrective action may succeed.
    fn is_recoverable(&self) -> bool;

    /// Converts this error into an Error-call payload.
    fn to_error_value(&self) -> ErrorValue {
        ErrorValue::new(self.code(), self.to_string())
    }
}

/// Test helper: asserts that every error in `errors` carries a well-formed
/// code under `prefix`.
///
/// Checks the prefix, UPPER_SNAKE_CASE shape, and that no two variants in
/// the slice share a code.
///
/// # Panics
///
/// Panics with a descriptive message on the first violation.
pub fn check_error_codes<E: ErrorCode>(errors: &[E], prefix: &str) {
    let mut seen = Vec::new();
    for err in errors {
        let code = err.code();
        assert!(
            code.starts_with(prefix),
            "code '{code}' missing prefix '{prefix}'"
        );
        assert!(
            well_formed(code),
            "code '{code}' is not UPPER_SNAKE_CASE"
        );
        assert!(!seen.contains(&code), "duplicate code '{code}'");
        seen.push(code);
    }
}

fn well_formed(code: &str) -> bool {
    !code.is_empty()
        && !code.starts_with('_')
        && !code.ends_with('_')
        && !code.contains("__")
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum Probe {
        #[error("gone")]
        Gone,
        #[error("busy")]
        Busy,
    }

    impl ErrorCode for Probe {
        fn code(&self) -> &'static str {
            match self {
                Self::Gone => "PROBE_GONE",
                Self::Busy => "PROBE_BUSY",
            }
        }
        fn is_recoverable(&self) -> bool {
            matches!(self, Self::Busy)
        }
    }

    #[test]
    fn codes_accepted() {
        check_error_codes(&[Probe::Gone, Probe::Busy], "PROBE_");
    }

    #[test]
    #[should_panic(expected = "missing prefix")]
    fn wrong_prefix_rejected() {
        check_error_codes(&[Probe::Gone], "OTHER_");
    }

    #[test]
    fn error_value_bridge() {
        let ev = Probe::Gone.to_error_value();
        assert_eq!(ev.code(), "PROBE_GONE");
        assert_eq!(ev.message(), "gone");
    }

    #[test]
    fn shape_check() {
        assert!(well_formed("A_B_2"));
        assert!(!well_formed(""));
        assert!(!well_formed("a_b"));
        assert!(!well_formed("_AB"));
        assert!(!well_formed("AB_"));
        assert!(!well_formed("A__B"));
    }
}
