//! Commands - named script operations producing stack frames.
//!
//! A command id resolves through the [`Namespace`] to a [`Command`],
//! whose factory builds the [`StackFrame`] that performs the work. The
//! built-ins here complete immediately; commands that talk to the rest of
//! the system return frames that issue calls and suspend.
//!
//! [`CommandInstaller`]s are aggregated at startup from all registered
//! providers; each installs its commands into the service's root scope.

use std::sync::Arc;

use trellis_types::{ErrorCode, Value};

use crate::ast::{ImmediateFrame, StackFrame};
use crate::error::ScriptError;
use crate::namespace::Namespace;

/// A named script operation.
pub trait Command: Send + Sync {
    /// Builds the frame executing this command with already-evaluated
    /// arguments.
    fn create_frame(
        &self,
        namespace: &Namespace,
        args: Vec<Value>,
    ) -> Result<Box<dyn StackFrame>, ScriptError>;
}

/// Contributes commands to a script service's root scope.
pub trait CommandInstaller: Send + Sync {
    /// Installs this contributor's commands.
    fn install(&self, namespace: &Namespace);
}

/// Installs the built-in commands: `set`, `const`, `echo`.
pub struct CoreCommands;

impl CommandInstaller for CoreCommands {
    fn install(&self, namespace: &Namespace) {
        namespace.install_command("set", Arc::new(SetCommand { define_once: false }));
        namespace.install_command("const", Arc::new(SetCommand { define_once: true }));
        namespace.install_command("echo", Arc::new(EchoCommand));
    }
}

/// `set name value` binds a variable; `const name value` binds once.
///
/// Both reply with the bound value.
struct SetCommand {
    define_once: bool,
}

impl Command for SetCommand {
    fn create_frame(
        &self,
        namespace: &Namespace,
        args: Vec<Value>,
    ) -> Result<Box<dyn StackFrame>, ScriptError> {
        let [name, value] = <[Value; 2]>::try_from(args)
            .map_err(|_| ScriptError::BadArguments("expected: name value".into()))?;
        let name = name.format();
        if self.define_once && namespace.defines_var(&name) {
            return Err(ScriptError::BadArguments(format!(
                "constant {name:?} is already bound"
            )));
        }
        namespace.set_var(&name, value.clone());
        Ok(Box::new(ImmediateFrame::ok(vec![value])))
    }
}

/// `echo args...` replies with its arguments.
struct EchoCommand;

impl Command for EchoCommand {
    fn create_frame(
        &self,
        _namespace: &Namespace,
        args: Vec<Value>,
    ) -> Result<Box<dyn StackFrame>, ScriptError> {
        Ok(Box::new(ImmediateFrame::ok(args)))
    }
}

/// Convenience: a command from a plain function.
pub struct FunctionCommand<F> {
    f: F,
}

impl<F> FunctionCommand<F>
where
    F: Fn(&Namespace, Vec<Value>) -> Result<Vec<Value>, ScriptError> + Send + Sync,
{
    /// Wraps `f` as an immediately-completing command.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Command for FunctionCommand<F>
where
    F: Fn(&Namespace, Vec<Value>) -> Result<Vec<Value>, ScriptError> + Send + Sync,
{
    fn create_frame(
        &self,
        namespace: &Namespace,
        args: Vec<Value>,
    ) -> Result<Box<dyn StackFrame>, ScriptError> {
        match (self.f)(namespace, args) {
            Ok(values) => Ok(Box::new(ImmediateFrame::ok(values))),
            Err(e) => Ok(Box::new(ImmediateFrame::err(e.to_error_value()))),
        }
    }
}
