//! Namespace - lexical scope for script variables and commands.
//!
//! A child scope consults its parent read-only: lookups walk the chain
//! upward, writes always land in the scope they were made in. Bindings
//! survive evaluation errors, so a failed script leaves everything it
//! managed to bind available to subsequent evaluations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use trellis_types::Value;

use crate::command::Command;

struct NamespaceInner {
    vars: HashMap<String, Value>,
    commands: HashMap<String, Arc<dyn Command>>,
    parent: Option<Namespace>,
}

/// A scope mapping variable ids to values and command ids to commands.
///
/// Cheap to clone (shared handle). The handle is shared by design: every
/// line of a script binds into the same scope object.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<Mutex<NamespaceInner>>,
}

impl Namespace {
    /// A fresh scope with no parent.
    #[must_use]
    pub fn root() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NamespaceInner {
                vars: HashMap::new(),
                commands: HashMap::new(),
                parent: None,
            })),
        }
    }

    /// A child scope inheriting lookups from `self`, but not vice versa.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NamespaceInner {
                vars: HashMap::new(),
                commands: HashMap::new(),
                parent: Some(self.clone()),
            })),
        }
    }

    /// Resolves a variable, consulting parent scopes read-only.
    #[must_use]
    pub fn var(&self, name: &str) -> Option<Value> {
        let inner = self.inner.lock();
        if let Some(value) = inner.vars.get(name) {
            return Some(value.clone());
        }
        inner.parent.as_ref().and_then(|p| p.var(name))
    }

    /// Binds a variable in this scope, shadowing any parent binding.
    pub fn set_var(&self, name: impl Into<String>, value: Value) {
        self.inner.lock().vars.insert(name.into(), value);
    }

    /// `true` when the variable is bound in this scope itself.
    #[must_use]
    pub fn defines_var(&self, name: &str) -> bool {
        self.inner.lock().vars.contains_key(name)
    }

    /// Resolves a command, consulting parent scopes read-only.
    #[must_use]
    pub fn command(&self, name: &str) -> Option<Arc<dyn Command>> {
        let inner = self.inner.lock();
        if let Some(command) = inner.commands.get(name) {
            return Some(Arc::clone(command));
        }
        inner.parent.as_ref().and_then(|p| p.command(name))
    }

    /// Installs a command in this scope.
    pub fn install_command(&self, name: impl Into<String>, command: Arc<dyn Command>) {
        self.inner.lock().commands.insert(name.into(), command);
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Namespace")
            .field("vars", &inner.vars.len())
            .field("commands", &inner.commands.len())
            .field("nested", &inner.parent.is_some())
            .finish()
    }
}
