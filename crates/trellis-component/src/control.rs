//! Controls - the callable endpoints of a component.
//!
//! A [`Control`] handles calls addressed to one control id on one
//! component. Controls never block waiting for anything: they receive a
//! call, optionally route further calls (replies included) through the
//! [`CallRouter`], and return.
//!
//! # Reply discipline
//!
//! The runtime enforces the protocol contract around `invoke`:
//!
//! - returning `Err` from a `Request` produces the Error reply
//! - returning `Ok` without routing a reply leaves the request *pending*;
//!   the control must route the reply itself later (deferred replies are
//!   how long-running operations work)
//! - `Quiet` calls are never answered, whatever the handler does
//!
//! Most controls don't defer; [`FunctionControl`] and [`PropertyControl`]
//! cover the common immediate cases.

use serde::{Deserialize, Serialize};

use trellis_types::{Call, ErrorValue, Timestamp, Value};

/// Outlet for calls produced while handling a call.
///
/// Implemented by the owning root's execution context; `route` enqueues
/// without blocking.
pub trait CallRouter {
    /// The owning root's current time.
    fn time(&self) -> Timestamp;

    /// Sends `call` on its way (to the hub, or back into this root).
    fn route(&mut self, call: Call);
}

/// Broad classification of a control, for info purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlRole {
    /// Fire-and-observe operation.
    #[default]
    Action,
    /// Readable/writable value.
    Property,
    /// Computes a result from arguments.
    Function,
}

/// Descriptor for one control, embedded in `ComponentInfo`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlInfo {
    /// Broad classification.
    pub role: ControlRole,
    /// Free-form metadata attached by the component author.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub attributes: serde_json::Value,
}

impl ControlInfo {
    /// Descriptor with the given role and no attributes.
    #[must_use]
    pub fn of(role: ControlRole) -> Self {
        Self {
            role,
            attributes: serde_json::Value::Null,
        }
    }
}

/// A callable endpoint on a component.
pub trait Control: Send {
    /// Handles one call addressed to this control.
    ///
    /// Returning `Err` makes the runtime answer a `Request` with an Error
    /// call; for `Quiet` calls the error is logged and dropped.
    fn invoke(&mut self, call: Call, router: &mut dyn CallRouter) -> Result<(), ErrorValue>;

    /// Descriptor for info queries.
    fn info(&self) -> ControlInfo {
        ControlInfo::default()
    }
}

/// Immediate function control: computes a result from the arguments and
/// replies in the same step.
pub struct FunctionControl<F> {
    f: F,
    info: ControlInfo,
}

impl<F> FunctionControl<F>
where
    F: FnMut(&[Value]) -> Result<Vec<Value>, ErrorValue> + Send,
{
    /// Wraps a function as a control.
    pub fn new(f: F) -> Self {
        Self {
            f,
            info: ControlInfo::of(ControlRole::Function),
        }
    }
}

impl<F> Control for FunctionControl<F>
where
    F: FnMut(&[Value]) -> Result<Vec<Value>, ErrorValue> + Send,
{
    fn invoke(&mut self, call: Call, router: &mut dyn CallRouter) -> Result<(), ErrorValue> {
        let out = (self.f)(call.args())?;
        if call.expects_reply() {
            let reply = call
                .reply(router.time(), out)
                .expect("expects_reply checked");
            router.route(reply);
        }
        Ok(())
    }

    fn info(&self) -> ControlInfo {
        self.info.clone()
    }
}

/// Value-holding property control.
///
/// Called with no arguments it replies with the current value; called with
/// one argument it stores and echoes the new value. More than one argument
/// is an invalid payload.
pub struct PropertyControl {
    value: Value,
}

impl PropertyControl {
    /// A property starting at `initial`.
    pub fn new(initial: impl Into<Value>) -> Self {
        Self {
            value: initial.into(),
        }
    }

    /// The current value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Control for PropertyControl {
    fn invoke(&mut self, call: Call, router: &mut dyn CallRouter) -> Result<(), ErrorValue> {
        match call.args() {
            [] => {}
            [v] => self.value = v.clone(),
            more => {
                return Err(ErrorValue::new(
                    "CONTROL_INVALID_PAYLOAD",
                    format!("property takes at most one argument, got {}", more.len()),
                ))
            }
        }
        if call.expects_reply() {
            let reply = call
                .reply(router.time(), vec![self.value.clone()])
                .expect("expects_reply checked");
            router.route(reply);
        }
        Ok(())
    }

    fn info(&self) -> ControlInfo {
        ControlInfo::of(ControlRole::Property)
    }
}
