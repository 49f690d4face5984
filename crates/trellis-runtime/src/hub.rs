//! RootHub - registry and router for roots.
//!
//! The hub owns the `name → RootHandle` registry and moves calls across
//! scheduling boundaries. [`route`](RootHub::route) is safe to invoke
//! concurrently from any number of root threads: the registry sits behind
//! a read/write lock (concurrent readers on every route, rare writers on
//! register/deregister).
//!
//! # Routing contract
//!
//! Routing looks only at the destination's root segment, never at the
//! payload. A call to an unregistered or terminated root is answered with
//! a `SERVICE_UNAVAILABLE` error toward the sender - never silently
//! dropped, never thrown across a root boundary. Deregistering a root
//! terminates it, which resolves its queued in-flight calls the same way.
//!
//! # Lifecycle
//!
//! `Init → Active → Terminated`. Providers register while `Init`;
//! [`activate`](RootHub::activate) performs the bootstrap scan: factory
//! types are indexed, one root is installed per declared service, and the
//! immutable [`Services`] index is published.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use trellis_component::{attach_root, ComponentProvider, ComponentRef, ComponentType};
use trellis_types::{is_valid_identifier, Call, ErrorCode, ErrorValue, Lookup};

use crate::root::{RootHandle, RootRunner, UNAVAILABLE};
use crate::services::{Factories, Services};

/// Lifecycle states of the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    /// Accepting provider registrations.
    Init,
    /// Routing and serving discovery.
    Active,
    /// Shut down; every root terminated.
    Terminated,
}

/// Hub operation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// Root names must be valid address identifiers.
    #[error("invalid root name: {0:?}")]
    InvalidRootName(String),
    /// Root names are unique within a hub.
    #[error("root name already registered: {0:?}")]
    DuplicateRoot(String),
    /// No root registered under this name.
    #[error("no root named {0:?}")]
    UnknownRoot(String),
    /// The operation requires the `Init` state.
    #[error("hub is already active")]
    AlreadyActive,
    /// The hub has been terminated.
    #[error("hub is terminated")]
    Terminated,
    /// Building or attaching the root's tree failed.
    #[error("root installation failed: {0}")]
    InstallFailed(String),
}

impl ErrorCode for HubError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidRootName(_) => "HUB_INVALID_ROOT_NAME",
            Self::DuplicateRoot(_) => "HUB_DUPLICATE_ROOT",
            Self::UnknownRoot(_) => "HUB_UNKNOWN_ROOT",
            Self::AlreadyActive => "HUB_ALREADY_ACTIVE",
            Self::Terminated => "HUB_TERMINATED",
            Self::InstallFailed(_) => "HUB_INSTALL_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownRoot(_) | Self::InstallFailed(_))
    }
}

struct HubInner {
    state: Mutex<HubState>,
    roots: RwLock<HashMap<String, RootHandle>>,
    providers: Mutex<Vec<Arc<dyn ComponentProvider>>>,
    services: RwLock<Services>,
    factories: RwLock<Arc<Factories>>,
    lookup: RwLock<Lookup>,
}

/// Registry and router for roots; cheap to clone, explicit to thread.
///
/// A hub is never a process-wide singleton: construct one per application
/// (or per test) and pass it where it is needed.
#[derive(Clone)]
pub struct RootHub {
    inner: Arc<HubInner>,
}

impl RootHub {
    /// A hub in the `Init` state with no roots and no providers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::Init),
                roots: RwLock::new(HashMap::new()),
                providers: Mutex::new(Vec::new()),
                services: RwLock::new(Services::default()),
                factories: RwLock::new(Arc::new(Factories::default())),
                lookup: RwLock::new(Lookup::empty()),
            }),
        }
    }

    /// The hub's lifecycle state.
    #[must_use]
    pub fn state(&self) -> HubState {
        *self.inner.state.lock()
    }

    /// Registers a factory provider. Only allowed while `Init`.
    pub fn register_provider(
        &self,
        provider: Arc<dyn ComponentProvider>,
    ) -> Result<(), HubError> {
        match self.state() {
            HubState::Init => {
                self.inner.providers.lock().push(provider);
                Ok(())
            }
            HubState::Active => Err(HubError::AlreadyActive),
            HubState::Terminated => Err(HubError::Terminated),
        }
    }

    /// Merges additional facts into the process-wide lookup; existing
    /// entries keep precedence.
    pub fn extend_lookup(&self, extra: Lookup) {
        let mut lookup = self.inner.lookup.write();
        let merged = Lookup::merge(lookup.clone(), extra);
        *lookup = merged;
    }

    /// A snapshot of the process-wide lookup.
    #[must_use]
    pub fn lookup(&self) -> Lookup {
        self.inner.lookup.read().clone()
    }

    /// The service index published at activation.
    #[must_use]
    pub fn services(&self) -> Services {
        self.inner.services.read().clone()
    }

    /// The factory index published at activation.
    #[must_use]
    pub fn factories(&self) -> Arc<Factories> {
        Arc::clone(&self.inner.factories.read())
    }

    /// Performs the bootstrap scan and moves the hub to `Active`.
    ///
    /// Factory types are indexed; one root is installed per declared
    /// service descriptor and its contract registered under that root's
    /// address. Providers whose service roots fail to instantiate are
    /// logged and skipped; the failure surfaces later as
    /// `SERVICE_UNAVAILABLE` at `locate` time.
    ///
    /// Must run inside a tokio runtime (service roots are spawned).
    pub fn activate(&self) -> Result<(), HubError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                HubState::Init => *state = HubState::Active,
                HubState::Active => return Err(HubError::AlreadyActive),
                HubState::Terminated => return Err(HubError::Terminated),
            }
        }
        let providers: Vec<Arc<dyn ComponentProvider>> =
            self.inner.providers.lock().clone();
        *self.inner.factories.write() = Arc::new(Factories::index(&providers));

        let mut builder = Services::builder();
        for provider in &providers {
            for descriptor in provider.services() {
                let tree = match provider.create_root(&descriptor.root_type) {
                    Ok(tree) => tree,
                    Err(e) => {
                        warn!(
                            service = %descriptor.service,
                            root_type = %descriptor.root_type,
                            error = %e,
                            "service root instantiation failed, contract skipped"
                        );
                        continue;
                    }
                };
                let name = self.free_root_name(descriptor.root_type.as_str());
                match self.install(&name, tree) {
                    Ok(handle) => {
                        let address = trellis_types::ComponentAddress::root_of(handle.name())
                            .expect("installed root names are valid");
                        builder.register(descriptor.service.clone(), address);
                    }
                    Err(e) => warn!(
                        service = %descriptor.service,
                        error = %e,
                        "service root installation failed, contract skipped"
                    ),
                }
            }
        }
        *self.inner.services.write() = builder.build();
        info!("hub active");
        Ok(())
    }

    /// Installs a detached component tree as the root named `name`,
    /// spawning its execution task.
    pub fn install(&self, name: &str, tree: ComponentRef) -> Result<RootHandle, HubError> {
        if self.state() == HubState::Terminated {
            return Err(HubError::Terminated);
        }
        if !is_valid_identifier(name) {
            return Err(HubError::InvalidRootName(name.to_string()));
        }
        let mut roots = self.inner.roots.write();
        if roots.contains_key(name) {
            return Err(HubError::DuplicateRoot(name.to_string()));
        }
        attach_root(&tree, name).map_err(|e| HubError::InstallFailed(e.to_string()))?;
        let (runner, handle) = RootRunner::new(name, tree, self.clone());
        roots.insert(name.to_string(), handle.clone());
        tokio::spawn(runner.run());
        debug!(root = name, "root installed");
        Ok(handle)
    }

    /// Instantiates a root of `kind` through the factory index and
    /// installs it as `name`.
    pub fn install_root_type(
        &self,
        name: &str,
        kind: &ComponentType,
    ) -> Result<RootHandle, HubError> {
        let tree = self
            .factories()
            .create_root(kind)
            .map_err(|e| HubError::InstallFailed(e.to_string()))?;
        self.install(name, tree)
    }

    /// The handle for a registered root.
    #[must_use]
    pub fn root(&self, name: &str) -> Option<RootHandle> {
        self.inner.roots.read().get(name).cloned()
    }

    /// Registered root names, sorted.
    #[must_use]
    pub fn root_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.roots.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes a root from the registry and terminates it. Calls still
    /// queued at the root resolve to `SERVICE_UNAVAILABLE` errors as it
    /// drains.
    pub fn deregister(&self, name: &str) -> Result<(), HubError> {
        let handle = self
            .inner
            .roots
            .write()
            .remove(name)
            .ok_or_else(|| HubError::UnknownRoot(name.to_string()))?;
        handle.terminate();
        info!(root = name, "root deregistered");
        Ok(())
    }

    /// Hands a call to its destination root's queue, or answers with an
    /// unavailability error toward the sender.
    ///
    /// Never inspects the payload, never blocks, never panics across the
    /// boundary.
    pub fn route(&self, call: Call) {
        let terminated = self.state() == HubState::Terminated;
        let roots = self.inner.roots.read();
        if !terminated {
            if let Some(handle) = roots.get(call.to().root()) {
                match handle.queue_call(call) {
                    Ok(()) => return,
                    // Inbox closed: the root died; fall through to bounce.
                    Err(call) => return Self::bounce(&roots, call),
                }
            }
        }
        Self::bounce(&roots, call);
    }

    /// Synthesizes the `SERVICE_UNAVAILABLE` error for an undeliverable
    /// request; undeliverable quiet calls and replies are logged.
    fn bounce(roots: &HashMap<String, RootHandle>, call: Call) {
        if !call.expects_reply() {
            debug!(call = %call, "undeliverable call dropped");
            return;
        }
        let error = ErrorValue::new(
            UNAVAILABLE,
            format!("root {:?} is not available", call.to().root()),
        );
        let reply = call
            .error_reply(call.time(), error)
            .expect("expects_reply checked");
        match roots.get(reply.to().root()) {
            Some(handle) => {
                if handle.queue_call(reply).is_err() {
                    warn!(root = call.to().root(), "unavailability reply undeliverable");
                }
            }
            None => warn!(
                from = call.to().root(),
                "unavailability reply undeliverable, sender root gone"
            ),
        }
    }

    /// Terminates every root and the hub itself.
    pub fn terminate(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == HubState::Terminated {
                return;
            }
            *state = HubState::Terminated;
        }
        let handles: Vec<RootHandle> = {
            let mut roots = self.inner.roots.write();
            roots.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            handle.terminate();
        }
        info!("hub terminated");
    }

    /// Derives an unused, valid root name from a type identifier.
    fn free_root_name(&self, base: &str) -> String {
        let mut sanitized: String = base
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        if !sanitized
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            sanitized = format!("svc-{sanitized}");
        }
        let roots = self.inner.roots.read();
        if !roots.contains_key(&sanitized) {
            return sanitized;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{sanitized}-{n}");
            if !roots.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

impl Default for RootHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RootHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootHub")
            .field("state", &self.state())
            .field("roots", &self.inner.roots.read().len())
            .finish()
    }
}
