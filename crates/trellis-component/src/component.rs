//! Component tree - addressable nodes exposing controls and ports.
//!
//! A [`Component`] is a tree node: an owning map of children, a map of
//! control handlers, a map of ports, and a weak handle to its parent (a
//! component never owns its parent). A component's address is the
//! concatenation of its ancestors' ids, fixed when the node is attached;
//! renaming and reparenting are not supported - removal and re-addition is
//! the only mutation path.
//!
//! # Single-writer discipline
//!
//! All tree mutation happens on the owning root's execution thread. The
//! `Arc<Mutex<_>>` node handles exist for shared *ownership* (parent map,
//! runtime, tests), not for cross-thread mutation; no lock is ever held
//! across a suspension point.
//!
//! # Example
//!
//! ```
//! use trellis_component::{attach_root, add_child, resolve, Component, ComponentType};
//! use trellis_types::ComponentAddress;
//!
//! let root = Component::build(ComponentType::new("core:container")).into_ref();
//! attach_root(&root, "main").unwrap();
//!
//! let child = Component::build(ComponentType::new("core:container")).into_ref();
//! add_child(&root, "mix", child).unwrap();
//!
//! let addr = ComponentAddress::parse("/main/mix").unwrap();
//! let found = resolve(&root, &addr).unwrap();
//! assert_eq!(found.lock().address(), Some(&addr));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use trellis_types::{
    is_valid_identifier, AddressError, Call, ComponentAddress, ErrorCode, ErrorValue, Lookup,
    PortAddress,
};

use crate::control::{CallRouter, Control};
use crate::factory::ComponentType;
use crate::info::{ComponentInfo, PortInfo};
use crate::port::{self, Port, PortError};

/// Shared handle to a tree node.
pub type ComponentRef = Arc<Mutex<Component>>;

/// Structural mutation failure.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A guard refused the mutation.
    #[error("structural change vetoed: {0}")]
    Veto(String),
    /// The child id is already taken.
    #[error("duplicate child id: {0:?}")]
    DuplicateChild(String),
    /// The node is already part of a tree.
    #[error("component is already attached")]
    AlreadyAttached,
    /// No child with this id.
    #[error("no child {0:?}")]
    NoSuchChild(String),
    /// No component at this address.
    #[error("no component at {0}")]
    NoSuchComponent(ComponentAddress),
    /// No port at this address.
    #[error("no port at {0}")]
    NoSuchPort(PortAddress),
    /// An id in the subtree violates the address charset.
    #[error(transparent)]
    Address(#[from] AddressError),
    /// A port topology operation failed.
    #[error(transparent)]
    Port(#[from] PortError),
}

impl ErrorCode for TreeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Veto(_) => "TREE_VETO",
            Self::DuplicateChild(_) => "TREE_DUPLICATE_CHILD",
            Self::AlreadyAttached => "TREE_ALREADY_ATTACHED",
            Self::NoSuchChild(_) => "TREE_NO_SUCH_CHILD",
            Self::NoSuchComponent(_) => "TREE_NO_SUCH_COMPONENT",
            Self::NoSuchPort(_) => "TREE_NO_SUCH_PORT",
            Self::Address(e) => e.code(),
            Self::Port(e) => e.code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Address(e) => e.is_recoverable(),
            Self::Port(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// Policy hook consulted before structural mutations.
///
/// Both checks default to allow; an `Err` becomes [`TreeError::Veto`].
pub trait TreeGuard: Send {
    /// Consulted before a child is added under this component.
    fn check_add(&self, id: &str) -> Result<(), String> {
        let _ = id;
        Ok(())
    }

    /// Consulted before a child is removed from this component.
    fn check_remove(&self, id: &str) -> Result<(), String> {
        let _ = id;
        Ok(())
    }
}

/// A node in a root's component tree.
pub struct Component {
    component_type: ComponentType,
    address: Option<ComponentAddress>,
    parent: Weak<Mutex<Component>>,
    children: HashMap<String, ComponentRef>,
    controls: HashMap<String, Box<dyn Control>>,
    ports: HashMap<String, Port>,
    guard: Option<Box<dyn TreeGuard>>,
    lookup: Lookup,
    attributes: serde_json::Value,
    info: Option<Arc<ComponentInfo>>,
}

impl Component {
    /// Starts building a detached component.
    #[must_use]
    pub fn build(component_type: ComponentType) -> ComponentBuilder {
        ComponentBuilder {
            inner: Component {
                component_type,
                address: None,
                parent: Weak::new(),
                children: HashMap::new(),
                controls: HashMap::new(),
                ports: HashMap::new(),
                guard: None,
                lookup: Lookup::empty(),
                attributes: serde_json::Value::Null,
                info: None,
            },
        }
    }

    /// The component's type identifier.
    #[must_use]
    pub fn component_type(&self) -> &ComponentType {
        &self.component_type
    }

    /// The address, once attached to a tree.
    #[must_use]
    pub fn address(&self) -> Option<&ComponentAddress> {
        self.address.as_ref()
    }

    /// The parent node, while attached below one.
    #[must_use]
    pub fn parent(&self) -> Option<ComponentRef> {
        self.parent.upgrade()
    }

    /// The component's context lookup.
    #[must_use]
    pub fn lookup(&self) -> &Lookup {
        &self.lookup
    }

    /// Child ids, unordered.
    pub fn child_ids(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// The child with this id, if any.
    #[must_use]
    pub fn child(&self, id: &str) -> Option<ComponentRef> {
        self.children.get(id).cloned()
    }

    /// `true` when a control with this id exists.
    #[must_use]
    pub fn has_control(&self, id: &str) -> bool {
        self.controls.contains_key(id)
    }

    /// The port with this id, if any.
    #[must_use]
    pub fn port(&self, id: &str) -> Option<&Port> {
        self.ports.get(id)
    }

    /// Mutable access to the port with this id.
    #[must_use]
    pub fn port_mut(&mut self, id: &str) -> Option<&mut Port> {
        self.ports.get_mut(id)
    }

    /// Dispatches `call` to the control named by `id`.
    ///
    /// The returned error becomes the Error reply for a request; missing
    /// controls report `TREE_NO_SUCH_CONTROL`.
    pub fn invoke_control(
        &mut self,
        id: &str,
        call: Call,
        router: &mut dyn CallRouter,
    ) -> Result<(), ErrorValue> {
        match self.controls.get_mut(id) {
            Some(control) => control.invoke(call, router),
            None => Err(ErrorValue::new(
                "TREE_NO_SUCH_CONTROL",
                format!("no control {id:?} on {}", self.describe()),
            )),
        }
    }

    /// The derived descriptor, cached until the next structural mutation.
    #[must_use]
    pub fn info(&mut self) -> Arc<ComponentInfo> {
        if let Some(info) = &self.info {
            return Arc::clone(info);
        }
        let mut children: Vec<String> = self.children.keys().cloned().collect();
        children.sort();
        let info = Arc::new(ComponentInfo {
            component_type: self.component_type.clone(),
            controls: self
                .controls
                .iter()
                .map(|(id, c)| (id.clone(), c.info()))
                .collect(),
            ports: self
                .ports
                .iter()
                .map(|(id, p)| {
                    (
                        id.clone(),
                        PortInfo {
                            direction: p.direction(),
                            port_type: p.port_type().clone(),
                            attributes: serde_json::Value::Null,
                        },
                    )
                })
                .collect(),
            children,
            attributes: self.attributes.clone(),
        });
        self.info = Some(Arc::clone(&info));
        info
    }

    fn invalidate_info(&mut self) {
        self.info = None;
    }

    fn describe(&self) -> String {
        match &self.address {
            Some(a) => a.to_string(),
            None => format!("<detached {}>", self.component_type),
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("type", &self.component_type)
            .field("address", &self.address)
            .field("children", &self.children.len())
            .field("controls", &self.controls.len())
            .field("ports", &self.ports.len())
            .finish_non_exhaustive()
    }
}

/// Builder for a detached [`Component`].
pub struct ComponentBuilder {
    inner: Component,
}

impl ComponentBuilder {
    /// Adds a control handler under `id`.
    #[must_use]
    pub fn control(mut self, id: impl Into<String>, control: impl Control + 'static) -> Self {
        self.inner.controls.insert(id.into(), Box::new(control));
        self
    }

    /// Adds a port, keyed by its own id.
    #[must_use]
    pub fn port(mut self, port: Port) -> Self {
        self.inner.ports.insert(port.id().to_string(), port);
        self
    }

    /// Sets the structural mutation guard.
    #[must_use]
    pub fn guard(mut self, guard: impl TreeGuard + 'static) -> Self {
        self.inner.guard = Some(Box::new(guard));
        self
    }

    /// Sets the component's context lookup.
    #[must_use]
    pub fn lookup(mut self, lookup: Lookup) -> Self {
        self.inner.lookup = lookup;
        self
    }

    /// Attaches free-form metadata surfaced through `ComponentInfo`.
    #[must_use]
    pub fn attributes(mut self, attributes: serde_json::Value) -> Self {
        self.inner.attributes = attributes;
        self
    }

    /// Finishes the node as a shared handle.
    #[must_use]
    pub fn into_ref(self) -> ComponentRef {
        Arc::new(Mutex::new(self.inner))
    }
}

/// Gives a detached component the root address `/name`, addressing its
/// whole subtree.
pub fn attach_root(node: &ComponentRef, name: &str) -> Result<(), TreeError> {
    {
        let n = node.lock();
        if n.address.is_some() || n.parent.upgrade().is_some() {
            return Err(TreeError::AlreadyAttached);
        }
    }
    validate_subtree_ids(node)?;
    assign_addresses(node, ComponentAddress::root_of(name)?);
    Ok(())
}

/// Adds `child` under `parent` as `id`, addressing the child's subtree if
/// the parent is attached.
pub fn add_child(parent: &ComponentRef, id: &str, child: ComponentRef) -> Result<(), TreeError> {
    if !is_valid_identifier(id) {
        return Err(TreeError::Address(AddressError::InvalidIdentifier(
            id.to_string(),
        )));
    }
    validate_subtree_ids(&child)?;

    let parent_address = {
        let p = parent.lock();
        if let Some(guard) = &p.guard {
            guard.check_add(id).map_err(TreeError::Veto)?;
        }
        if p.children.contains_key(id) {
            return Err(TreeError::DuplicateChild(id.to_string()));
        }
        p.address.clone()
    };
    {
        let c = child.lock();
        if c.address.is_some() || c.parent.upgrade().is_some() {
            return Err(TreeError::AlreadyAttached);
        }
    }

    {
        let mut c = child.lock();
        c.parent = Arc::downgrade(parent);
    }
    {
        let mut p = parent.lock();
        p.children.insert(id.to_string(), Arc::clone(&child));
        p.invalidate_info();
    }
    if let Some(parent_address) = parent_address {
        assign_addresses(&child, parent_address.child(id)?);
    }
    Ok(())
}

/// Removes the child named `id`, disconnecting every port in its subtree
/// first, and returns the detached node.
pub fn remove_child(parent: &ComponentRef, id: &str) -> Result<ComponentRef, TreeError> {
    let (child, attached) = {
        let p = parent.lock();
        if let Some(guard) = &p.guard {
            guard.check_remove(id).map_err(TreeError::Veto)?;
        }
        let child = p
            .children
            .get(id)
            .cloned()
            .ok_or_else(|| TreeError::NoSuchChild(id.to_string()))?;
        (child, p.address.is_some())
    };

    if attached {
        let root = tree_root(parent);
        for (port_address, peers) in collect_connections(&child) {
            for peer in peers {
                if let Err(e) = disconnect_ports(&root, &port_address, &peer) {
                    debug!(port = %port_address, peer = %peer, error = %e,
                        "stale connection dropped during removal");
                }
            }
        }
    }

    {
        let mut p = parent.lock();
        p.children.remove(id);
        p.invalidate_info();
    }
    {
        let mut c = child.lock();
        c.parent = Weak::new();
    }
    clear_addresses(&child);
    Ok(child)
}

/// Resolves an address to a node, starting at a root component.
#[must_use]
pub fn resolve(root: &ComponentRef, address: &ComponentAddress) -> Option<ComponentRef> {
    {
        let r = root.lock();
        let own = r.address.as_ref()?;
        if own.segments() != &address.segments()[..1] {
            return None;
        }
    }
    let mut node = Arc::clone(root);
    for segment in &address.segments()[1..] {
        let next = node.lock().children.get(segment).cloned()?;
        node = next;
    }
    Some(node)
}

/// Connects two ports, resolved through the tree, symmetrically and
/// transactionally.
pub fn connect_ports(
    root: &ComponentRef,
    a: &PortAddress,
    b: &PortAddress,
) -> Result<(), TreeError> {
    if a == b {
        return Err(TreeError::Port(PortError::Link(
            "cannot connect a port to itself".into(),
        )));
    }
    let comp_a = resolve(root, a.component())
        .ok_or_else(|| TreeError::NoSuchComponent(a.component().clone()))?;
    let comp_b = resolve(root, b.component())
        .ok_or_else(|| TreeError::NoSuchComponent(b.component().clone()))?;

    if Arc::ptr_eq(&comp_a, &comp_b) {
        let mut c = comp_a.lock();
        let mut port_a = c
            .ports
            .remove(a.port())
            .ok_or_else(|| TreeError::NoSuchPort(a.clone()))?;
        let result = match c.ports.get_mut(b.port()) {
            Some(port_b) => port::connect(&mut port_a, port_b).map_err(TreeError::from),
            None => Err(TreeError::NoSuchPort(b.clone())),
        };
        c.ports.insert(port_a.id().to_string(), port_a);
        result
    } else {
        let mut ga = comp_a.lock();
        let mut gb = comp_b.lock();
        let port_a = ga
            .ports
            .get_mut(a.port())
            .ok_or_else(|| TreeError::NoSuchPort(a.clone()))?;
        let port_b = gb
            .ports
            .get_mut(b.port())
            .ok_or_else(|| TreeError::NoSuchPort(b.clone()))?;
        port::connect(port_a, port_b).map_err(TreeError::from)
    }
}

/// Disconnects two ports, resolved through the tree. Idempotent.
pub fn disconnect_ports(
    root: &ComponentRef,
    a: &PortAddress,
    b: &PortAddress,
) -> Result<(), TreeError> {
    let comp_a = resolve(root, a.component())
        .ok_or_else(|| TreeError::NoSuchComponent(a.component().clone()))?;
    let comp_b = resolve(root, b.component())
        .ok_or_else(|| TreeError::NoSuchComponent(b.component().clone()))?;

    if Arc::ptr_eq(&comp_a, &comp_b) {
        let mut c = comp_a.lock();
        let mut port_a = c
            .ports
            .remove(a.port())
            .ok_or_else(|| TreeError::NoSuchPort(a.clone()))?;
        if let Some(port_b) = c.ports.get_mut(b.port()) {
            port::disconnect(&mut port_a, port_b);
        }
        c.ports.insert(port_a.id().to_string(), port_a);
        Ok(())
    } else {
        let mut ga = comp_a.lock();
        let mut gb = comp_b.lock();
        let port_a = ga
            .ports
            .get_mut(a.port())
            .ok_or_else(|| TreeError::NoSuchPort(a.clone()))?;
        let port_b = gb
            .ports
            .get_mut(b.port())
            .ok_or_else(|| TreeError::NoSuchPort(b.clone()))?;
        port::disconnect(port_a, port_b);
        Ok(())
    }
}

/// Disconnects every current connection of the port at `a`, as repeated
/// single disconnects.
pub fn disconnect_all(root: &ComponentRef, a: &PortAddress) -> Result<(), TreeError> {
    let peers: Vec<PortAddress> = {
        let comp = resolve(root, a.component())
            .ok_or_else(|| TreeError::NoSuchComponent(a.component().clone()))?;
        let c = comp.lock();
        let port = c
            .port(a.port())
            .ok_or_else(|| TreeError::NoSuchPort(a.clone()))?;
        port.connections().to_vec()
    };
    for peer in peers {
        disconnect_ports(root, a, &peer)?;
    }
    Ok(())
}

/// Walks parent handles up to the tree's root component.
fn tree_root(node: &ComponentRef) -> ComponentRef {
    let mut current = Arc::clone(node);
    loop {
        let parent = current.lock().parent.upgrade();
        match parent {
            Some(p) => current = p,
            None => return current,
        }
    }
}

/// Checks every control, port, and child id in a subtree against the
/// address charset before any address is assigned.
fn validate_subtree_ids(node: &ComponentRef) -> Result<(), TreeError> {
    let children: Vec<ComponentRef> = {
        let n = node.lock();
        for id in n.controls.keys().chain(n.ports.keys()).chain(n.children.keys()) {
            if !is_valid_identifier(id) {
                return Err(TreeError::Address(AddressError::InvalidIdentifier(
                    id.clone(),
                )));
            }
        }
        n.children.values().cloned().collect()
    };
    for child in children {
        validate_subtree_ids(&child)?;
    }
    Ok(())
}

/// Assigns `address` to `node` and derived addresses to its whole subtree.
/// Ids were validated beforehand.
fn assign_addresses(node: &ComponentRef, address: ComponentAddress) {
    let children: Vec<(String, ComponentRef)> = {
        let mut n = node.lock();
        for (id, port) in n.ports.iter_mut() {
            let port_address = address.port(id).expect("ids validated before assignment");
            port.set_address(Some(port_address));
        }
        n.address = Some(address.clone());
        n.children
            .iter()
            .map(|(id, c)| (id.clone(), Arc::clone(c)))
            .collect()
    };
    for (id, child) in children {
        let child_address = address.child(&id).expect("ids validated before assignment");
        assign_addresses(&child, child_address);
    }
}

/// Clears addresses across a detached subtree.
fn clear_addresses(node: &ComponentRef) {
    let children: Vec<ComponentRef> = {
        let mut n = node.lock();
        n.address = None;
        for port in n.ports.values_mut() {
            port.set_address(None);
        }
        n.children.values().cloned().collect()
    };
    for child in children {
        clear_addresses(&child);
    }
}

/// Snapshots `(port address, peers)` for every connected port in a
/// subtree.
fn collect_connections(node: &ComponentRef) -> Vec<(PortAddress, Vec<PortAddress>)> {
    let mut out = Vec::new();
    let children: Vec<ComponentRef> = {
        let n = node.lock();
        for port in n.ports.values() {
            if let Some(address) = port.address() {
                if !port.connections().is_empty() {
                    out.push((address.clone(), port.connections().to_vec()));
                }
            }
        }
        n.children.values().cloned().collect()
    };
    for child in children {
        out.extend(collect_connections(&child));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::PropertyControl;
    use crate::port::{PortDirection, PortType};
    use crate::testing::{request, RecordingRouter, ScriptedBackend};
    use trellis_types::{check_error_codes, Value};

    fn node(kind: &str) -> ComponentRef {
        Component::build(ComponentType::new(kind)).into_ref()
    }

    fn signal_port(id: &str, direction: PortDirection) -> Port {
        Port::new(
            id,
            direction,
            PortType::new("signal"),
            Box::new(ScriptedBackend::single()),
        )
    }

    #[test]
    fn error_codes() {
        check_error_codes(
            &[
                TreeError::Veto("x".into()),
                TreeError::DuplicateChild("x".into()),
                TreeError::AlreadyAttached,
                TreeError::NoSuchChild("x".into()),
                TreeError::NoSuchComponent(ComponentAddress::parse("/a").unwrap()),
                TreeError::NoSuchPort(PortAddress::parse("/a!p").unwrap()),
            ],
            "TREE_",
        );
    }

    #[test]
    fn attach_assigns_addresses_recursively() {
        let root = node("core:container");
        let child = node("core:container");
        let leaf = Component::build(ComponentType::new("test:gain"))
            .port(signal_port("in", PortDirection::In))
            .into_ref();

        add_child(&child, "gain", leaf.clone()).unwrap();
        add_child(&root, "mix", child.clone()).unwrap();
        attach_root(&root, "main").unwrap();

        assert_eq!(root.lock().address().unwrap().to_string(), "/main");
        assert_eq!(child.lock().address().unwrap().to_string(), "/main/mix");
        let l = leaf.lock();
        assert_eq!(l.address().unwrap().to_string(), "/main/mix/gain");
        assert_eq!(
            l.port("in").unwrap().address().unwrap().to_string(),
            "/main/mix/gain!in"
        );
    }

    #[test]
    fn add_child_to_attached_parent_addresses_immediately() {
        let root = node("core:container");
        attach_root(&root, "main").unwrap();
        let child = node("test:gain");
        add_child(&root, "g", child.clone()).unwrap();
        assert_eq!(child.lock().address().unwrap().to_string(), "/main/g");
    }

    #[test]
    fn duplicate_and_invalid_child_ids_rejected() {
        let root = node("core:container");
        add_child(&root, "a", node("x")).unwrap();
        assert!(matches!(
            add_child(&root, "a", node("x")),
            Err(TreeError::DuplicateChild(_))
        ));
        assert!(matches!(
            add_child(&root, "9bad", node("x")),
            Err(TreeError::Address(_))
        ));
    }

    #[test]
    fn reattach_rejected() {
        let root = node("core:container");
        let child = node("x");
        add_child(&root, "a", child.clone()).unwrap();
        let other = node("core:container");
        assert!(matches!(
            add_child(&other, "b", child),
            Err(TreeError::AlreadyAttached)
        ));
    }

    struct NoRemovals;

    impl TreeGuard for NoRemovals {
        fn check_remove(&self, id: &str) -> Result<(), String> {
            Err(format!("{id:?} is pinned"))
        }
    }

    #[test]
    fn guard_vetoes_removal() {
        let root = Component::build(ComponentType::new("core:container"))
            .guard(NoRemovals)
            .into_ref();
        add_child(&root, "a", node("x")).unwrap();
        assert!(matches!(
            remove_child(&root, "a"),
            Err(TreeError::Veto(_))
        ));
        assert!(root.lock().child("a").is_some());
    }

    #[test]
    fn remove_child_detaches_and_clears_addresses() {
        let root = node("core:container");
        attach_root(&root, "main").unwrap();
        let child = Component::build(ComponentType::new("test:gain"))
            .port(signal_port("in", PortDirection::In))
            .into_ref();
        add_child(&root, "g", child.clone()).unwrap();

        let removed = remove_child(&root, "g").unwrap();
        assert!(Arc::ptr_eq(&removed, &child));
        let c = removed.lock();
        assert!(c.address().is_none());
        assert!(c.parent().is_none());
        assert!(c.port("in").unwrap().address().is_none());
        assert!(root.lock().child("g").is_none());
    }

    #[test]
    fn removal_disconnects_subtree_ports() {
        let root = node("core:container");
        let src = Component::build(ComponentType::new("test:osc"))
            .port(signal_port("out", PortDirection::Out))
            .into_ref();
        let dst = Component::build(ComponentType::new("test:gain"))
            .port(signal_port("in", PortDirection::In))
            .into_ref();
        add_child(&root, "osc", src).unwrap();
        add_child(&root, "gain", dst.clone()).unwrap();
        attach_root(&root, "main").unwrap();

        let out = PortAddress::parse("/main/osc!out").unwrap();
        let inp = PortAddress::parse("/main/gain!in").unwrap();
        connect_ports(&root, &out, &inp).unwrap();
        assert_eq!(dst.lock().port("in").unwrap().connections().len(), 1);

        remove_child(&root, "osc").unwrap();
        assert!(dst.lock().port("in").unwrap().connections().is_empty());
    }

    #[test]
    fn resolve_walks_the_tree() {
        let root = node("core:container");
        let child = node("x");
        add_child(&root, "a", child.clone()).unwrap();
        attach_root(&root, "main").unwrap();

        let found = resolve(&root, &ComponentAddress::parse("/main/a").unwrap()).unwrap();
        assert!(Arc::ptr_eq(&found, &child));
        assert!(resolve(&root, &ComponentAddress::parse("/main/b").unwrap()).is_none());
        assert!(resolve(&root, &ComponentAddress::parse("/other/a").unwrap()).is_none());
    }

    #[test]
    fn connect_ports_through_tree_is_symmetric() {
        let root = node("core:container");
        let a = Component::build(ComponentType::new("test:osc"))
            .port(signal_port("out", PortDirection::Out))
            .into_ref();
        let b = Component::build(ComponentType::new("test:gain"))
            .port(signal_port("in", PortDirection::In))
            .into_ref();
        add_child(&root, "osc", a.clone()).unwrap();
        add_child(&root, "gain", b.clone()).unwrap();
        attach_root(&root, "main").unwrap();

        let out = PortAddress::parse("/main/osc!out").unwrap();
        let inp = PortAddress::parse("/main/gain!in").unwrap();
        connect_ports(&root, &out, &inp).unwrap();

        assert!(a.lock().port("out").unwrap().is_connected_to(&inp));
        assert!(b.lock().port("in").unwrap().is_connected_to(&out));

        disconnect_ports(&root, &out, &inp).unwrap();
        assert!(a.lock().port("out").unwrap().connections().is_empty());
        assert!(b.lock().port("in").unwrap().connections().is_empty());
    }

    #[test]
    fn connect_ports_same_component() {
        let root = Component::build(ComponentType::new("test:loop"))
            .port(signal_port("out", PortDirection::Out))
            .port(signal_port("in", PortDirection::In))
            .into_ref();
        attach_root(&root, "main").unwrap();

        let out = PortAddress::parse("/main!out").unwrap();
        let inp = PortAddress::parse("/main!in").unwrap();
        connect_ports(&root, &out, &inp).unwrap();
        let r = root.lock();
        assert!(r.port("out").unwrap().is_connected_to(&inp));
        assert!(r.port("in").unwrap().is_connected_to(&out));
    }

    #[test]
    fn disconnect_all_clears_fan_out() {
        let root = node("core:container");
        let src = Component::build(ComponentType::new("test:osc"))
            .port(Port::new(
                "out",
                PortDirection::Out,
                PortType::new("signal"),
                Box::new(ScriptedBackend::multi()),
            ))
            .into_ref();
        for id in ["g1", "g2"] {
            let sink = Component::build(ComponentType::new("test:gain"))
                .port(signal_port("in", PortDirection::In))
                .into_ref();
            add_child(&root, id, sink).unwrap();
        }
        add_child(&root, "osc", src.clone()).unwrap();
        attach_root(&root, "main").unwrap();

        let out = PortAddress::parse("/main/osc!out").unwrap();
        for id in ["g1", "g2"] {
            let inp = PortAddress::parse(&format!("/main/{id}!in")).unwrap();
            connect_ports(&root, &out, &inp).unwrap();
        }
        assert_eq!(src.lock().port("out").unwrap().connections().len(), 2);

        disconnect_all(&root, &out).unwrap();
        assert!(src.lock().port("out").unwrap().connections().is_empty());
    }

    #[test]
    fn invoke_control_dispatches_and_reports_missing() {
        let root = Component::build(ComponentType::new("test:gain"))
            .control("level", PropertyControl::new(0.5))
            .into_ref();
        attach_root(&root, "main").unwrap();

        let mut router = RecordingRouter::new();
        let call = request("/caller.c", "/main.level", vec![]);
        root.lock()
            .invoke_control("level", call, &mut router)
            .unwrap();
        assert_eq!(router.sent[0].args(), &[Value::Num(0.5)]);

        let call = request("/caller.c", "/main.missing", vec![]);
        let err = root
            .lock()
            .invoke_control("missing", call, &mut router)
            .unwrap_err();
        assert_eq!(err.code(), "TREE_NO_SUCH_CONTROL");
    }

    #[test]
    fn info_is_cached_and_invalidated_by_mutation() {
        let root = Component::build(ComponentType::new("core:container"))
            .control("start", PropertyControl::new(false))
            .port(signal_port("out", PortDirection::Out))
            .into_ref();
        attach_root(&root, "main").unwrap();

        let first = root.lock().info();
        let second = root.lock().info();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.component_type.as_str(), "core:container");
        assert!(first.controls.contains_key("start"));
        assert!(first.ports.contains_key("out"));
        assert!(first.children.is_empty());

        add_child(&root, "kid", node("x")).unwrap();
        let third = root.lock().info();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.children, ["kid"]);
    }
}
