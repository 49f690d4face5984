//! Call - the addressed, correlated message unit.
//!
//! All communication between roots is a [`Call`]: a request from one
//! control address to another, answered by exactly one response or error
//! travelling the other way with the same `match_id`. `Quiet` requests
//! expect no reply and must never be answered.
//!
//! # Kinds
//!
//! | Kind | Direction | Answered |
//! |------|-----------|----------|
//! | `Request` | caller → callee | exactly once (Response or Error) |
//! | `Quiet` | caller → callee | never |
//! | `Response` | callee → caller | - |
//! | `Error` | callee → caller | - |
//!
//! # Correlation
//!
//! `match_id` is drawn from a process-wide counter at Request/Quiet
//! construction, so no two outstanding requests from any origin share one.
//! [`Call::reply`] and [`Call::error_reply`] derive the answer: addresses
//! swapped, `match_id` preserved.
//!
//! # Time
//!
//! Calls are stamped with the *originating root's* monotonic time base.
//! No global clock exists, so cross-root ordering by timestamp is advisory
//! only.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::ControlAddress;
use crate::error::ErrorCode;
use crate::value::{ErrorValue, Value};

/// Nanoseconds on a root's monotonic time base.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The time base origin.
    pub const ZERO: Self = Self(0);

    /// Wraps a nanosecond count.
    #[must_use]
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// The nanosecond count.
    #[must_use]
    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// This time shifted forward by `nanos` (saturating).
    #[must_use]
    pub fn offset(&self, nanos: i64) -> Self {
        Self(self.0.saturating_add(nanos))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Protocol misuse caught at call construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// A reply was derived from a `Quiet` request.
    #[error("quiet requests must never be answered")]
    ReplyToQuiet,
    /// A reply was derived from something that is not a request.
    #[error("only requests can be answered, not {0:?}")]
    ReplyToReply(CallKind),
}

impl ErrorCode for CallError {
    fn code(&self) -> &'static str {
        match self {
            Self::ReplyToQuiet => "CALL_REPLY_TO_QUIET",
            Self::ReplyToReply(_) => "CALL_REPLY_TO_REPLY",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// The four call kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// Expects exactly one Response or Error.
    Request,
    /// Successful answer to a Request.
    Response,
    /// Failure answer to a Request.
    Error,
    /// Request that expects no answer.
    Quiet,
}

static NEXT_MATCH_ID: AtomicI64 = AtomicI64::new(1);

fn next_match_id() -> i64 {
    NEXT_MATCH_ID.fetch_add(1, Ordering::Relaxed)
}

/// The message envelope routed between roots.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    from: ControlAddress,
    to: ControlAddress,
    match_id: i64,
    time: Timestamp,
    kind: CallKind,
    args: Vec<Value>,
}

impl Call {
    /// Creates a request expecting exactly one answer.
    #[must_use]
    pub fn request(
        from: ControlAddress,
        to: ControlAddress,
        time: Timestamp,
        args: Vec<Value>,
    ) -> Self {
        Self {
            from,
            to,
            match_id: next_match_id(),
            time,
            kind: CallKind::Request,
            args,
        }
    }

    /// Creates a request that expects no answer.
    #[must_use]
    pub fn quiet(
        from: ControlAddress,
        to: ControlAddress,
        time: Timestamp,
        args: Vec<Value>,
    ) -> Self {
        Self {
            from,
            to,
            match_id: next_match_id(),
            time,
            kind: CallKind::Quiet,
            args,
        }
    }

    /// Derives the successful answer: addresses swapped, `match_id`
    /// preserved.
    ///
    /// # Errors
    ///
    /// [`CallError::ReplyToQuiet`] for quiet requests,
    /// [`CallError::ReplyToReply`] when `self` is already an answer.
    pub fn reply(&self, time: Timestamp, args: Vec<Value>) -> Result<Self, CallError> {
        self.answer(time, CallKind::Response, args)
    }

    /// Derives the failure answer carrying `error` as its only argument.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Call::reply`].
    pub fn error_reply(&self, time: Timestamp, error: ErrorValue) -> Result<Self, CallError> {
        self.answer(time, CallKind::Error, vec![Value::Failure(error)])
    }

    fn answer(&self, time: Timestamp, kind: CallKind, args: Vec<Value>) -> Result<Self, CallError> {
        match self.kind {
            CallKind::Request => Ok(Self {
                from: self.to.clone(),
                to: self.from.clone(),
                match_id: self.match_id,
                time,
                kind,
                args,
            }),
            CallKind::Quiet => Err(CallError::ReplyToQuiet),
            other => Err(CallError::ReplyToReply(other)),
        }
    }

    /// The originating control address.
    #[must_use]
    pub fn from(&self) -> &ControlAddress {
        &self.from
    }

    /// The destination control address; routing looks only at this.
    #[must_use]
    pub fn to(&self) -> &ControlAddress {
        &self.to
    }

    /// The correlation id.
    #[must_use]
    pub fn match_id(&self) -> i64 {
        self.match_id
    }

    /// The origin-root timestamp.
    #[must_use]
    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// The call kind.
    #[must_use]
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// The payload.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Consumes the call, returning the payload.
    #[must_use]
    pub fn into_args(self) -> Vec<Value> {
        self.args
    }

    /// `true` for `Request` and `Quiet`.
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self.kind, CallKind::Request | CallKind::Quiet)
    }

    /// `true` for `Response` and `Error`.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, CallKind::Response | CallKind::Error)
    }

    /// `true` when the protocol owes this call exactly one answer.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.kind == CallKind::Request
    }

    /// The error payload of an Error call, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorValue> {
        if self.kind != CallKind::Error {
            return None;
        }
        self.args.first().and_then(Value::as_failure)
    }
}

impl std::fmt::Display for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}#{} {} -> {} @ {}",
            self.kind, self.match_id, self.from, self.to, self.time
        )
    }
}
