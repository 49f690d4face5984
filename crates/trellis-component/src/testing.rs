//! Test support: recording router and scriptable port backend.
//!
//! Shared by this crate's unit tests and by downstream crates' tests that
//! need a component tree without a running root.

use trellis_types::{Call, ControlAddress, Timestamp, Value};

use crate::control::CallRouter;
use crate::port::{PortBackend, PortError, PortType};

/// A [`CallRouter`] that records everything routed through it.
pub struct RecordingRouter {
    /// Time reported to controls.
    pub time: Timestamp,
    /// Calls routed, in order.
    pub sent: Vec<Call>,
}

impl RecordingRouter {
    /// A recorder at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            time: Timestamp::ZERO,
            sent: Vec::new(),
        }
    }
}

impl Default for RecordingRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRouter for RecordingRouter {
    fn time(&self) -> Timestamp {
        self.time
    }

    fn route(&mut self, call: Call) {
        self.sent.push(call);
    }
}

/// Builds a request between two parsed control addresses.
///
/// # Panics
///
/// Panics on unparseable addresses; test input is expected to be valid.
#[must_use]
pub fn request(from: &str, to: &str, args: Vec<Value>) -> Call {
    Call::request(
        ControlAddress::parse(from).expect("valid from address"),
        ControlAddress::parse(to).expect("valid to address"),
        Timestamp::ZERO,
        args,
    )
}

/// Scriptable [`PortBackend`] with failure injection, for topology tests.
pub struct ScriptedBackend {
    multiway: bool,
    /// Fail the next `link` call.
    pub fail_next_link: bool,
    /// Fail the next `set_multi` call.
    pub fail_next_adapter: bool,
    /// What `recover` reports after a failure.
    pub recover_succeeds: bool,
    /// Number of links currently wired.
    pub linked: usize,
    /// Whether the multi-way adapter is currently in place.
    pub multi: bool,
    /// Count of `reset` calls observed.
    pub resets: usize,
}

impl ScriptedBackend {
    /// A backend without multi-way support.
    #[must_use]
    pub fn single() -> Self {
        Self::with_multiway(false)
    }

    /// A backend with multi-way adapter support.
    #[must_use]
    pub fn multi() -> Self {
        Self::with_multiway(true)
    }

    fn with_multiway(multiway: bool) -> Self {
        Self {
            multiway,
            fail_next_link: false,
            fail_next_adapter: false,
            recover_succeeds: true,
            linked: 0,
            multi: false,
            resets: 0,
        }
    }
}

impl PortBackend for ScriptedBackend {
    fn compatible(&self, _peer: &PortType) -> bool {
        true
    }

    fn multiway(&self) -> bool {
        self.multiway
    }

    fn link(&mut self, _peer: &trellis_types::PortAddress) -> Result<(), PortError> {
        if self.fail_next_link {
            self.fail_next_link = false;
            return Err(PortError::Link("injected link failure".into()));
        }
        self.linked += 1;
        Ok(())
    }

    fn unlink(&mut self, _peer: &trellis_types::PortAddress) {
        self.linked = self.linked.saturating_sub(1);
    }

    fn set_multi(&mut self, enabled: bool) -> Result<(), PortError> {
        if self.fail_next_adapter {
            self.fail_next_adapter = false;
            return Err(PortError::Adapter("injected adapter failure".into()));
        }
        self.multi = enabled;
        Ok(())
    }

    fn recover(&mut self) -> bool {
        self.recover_succeeds
    }

    fn reset(&mut self) {
        self.linked = 0;
        self.multi = false;
        self.resets += 1;
    }
}
