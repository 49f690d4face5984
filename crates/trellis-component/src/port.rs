//! Ports - typed connection endpoints with transactional topology changes.
//!
//! A [`Port`] belongs to exactly one component and owns its half of each
//! connection. Connections are symmetric: the two-sided operations
//! ([`connect`], [`disconnect`]) keep both ports' connection sets in step,
//! or touch neither.
//!
//! # Topology contract
//!
//! | Operation | Guarantee |
//! |-----------|-----------|
//! | `connect(a, b)` | fails if already connected or the transport cannot wire; partial application rolls back |
//! | `disconnect(a, b)` | idempotent; absent connection is a no-op |
//! | adapter crossing | multi-way merge/split inserted/removed at the 1↔2 boundary, invisible to the connection set |
//! | failure ladder | restore the pre-call topology; if restoration fails, clear to empty, never inconsistent |
//! | listeners | notified exactly once per churned port, after the topology is stable |
//!
//! The actual signal wiring lives behind the [`PortBackend`] SPI; concrete
//! port types (audio, video, data, ...) implement it outside the core.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use trellis_types::{ErrorCode, PortAddress};

/// Topology change failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    /// The two ports are already connected.
    #[error("already connected to {0}")]
    AlreadyConnected(PortAddress),
    /// Port types do not admit a connection.
    #[error("incompatible port types: {local} vs {peer}")]
    IncompatibleTypes {
        /// This port's type tag.
        local: PortType,
        /// The peer's type tag.
        peer: PortType,
    },
    /// Directions do not admit a connection (e.g. output to output).
    #[error("port directions do not admit a connection")]
    DirectionMismatch,
    /// A port is not attached to a component tree.
    #[error("port has no address (component not attached)")]
    Unaddressed,
    /// The underlying transport refused to wire.
    #[error("transport link failed: {0}")]
    Link(String),
    /// Inserting or removing the multi-way adapter failed.
    #[error("multi-way adapter failed: {0}")]
    Adapter(String),
}

impl ErrorCode for PortError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyConnected(_) => "PORT_ALREADY_CONNECTED",
            Self::IncompatibleTypes { .. } => "PORT_INCOMPATIBLE_TYPES",
            Self::DirectionMismatch => "PORT_DIRECTION_MISMATCH",
            Self::Unaddressed => "PORT_UNADDRESSED",
            Self::Link(_) => "PORT_LINK_FAILED",
            Self::Adapter(_) => "PORT_ADAPTER_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Link(_) | Self::Adapter(_))
    }
}

/// Direction of signal flow through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Consumes a signal.
    In,
    /// Produces a signal.
    Out,
    /// Both ways.
    Bidi,
}

impl PortDirection {
    /// Whether two directions admit a connection: one producer, one
    /// consumer, with `Bidi` matching either side.
    #[must_use]
    pub fn admits(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::Out, Self::In)
                | (Self::In, Self::Out)
                | (Self::Bidi, _)
                | (_, Self::Bidi)
        )
    }
}

/// Opaque capability tag naming a concrete port type.
///
/// The core compares tags for compatibility and carries them in info; it
/// never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortType(String);

impl PortType {
    /// Wraps a tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// SPI for the signal wiring behind a port.
///
/// # Failure contract
///
/// `link` and `set_multi` may fail. After a `set_multi` failure the port
/// asks [`recover`](Self::recover): `true` means the prior wiring is intact
/// and the connection set can be kept; `false` means the wiring is
/// compromised and the port fails safe to empty via [`reset`](Self::reset).
pub trait PortBackend: Send {
    /// Whether a peer of `peer` type can be wired to this port.
    fn compatible(&self, peer: &PortType) -> bool;

    /// Whether this port carries more than one simultaneous signal through
    /// a multi-way adapter.
    fn multiway(&self) -> bool {
        false
    }

    /// Wires the transport to `peer`.
    fn link(&mut self, peer: &PortAddress) -> Result<(), PortError>;

    /// Removes the wiring to `peer`. Infallible; absent wiring is a no-op.
    fn unlink(&mut self, peer: &PortAddress);

    /// Inserts (`true`) or removes (`false`) the internal merge/split
    /// adapter, re-wiring existing links through it.
    fn set_multi(&mut self, enabled: bool) -> Result<(), PortError>;

    /// After a failed `set_multi`: `true` if the prior wiring was
    /// restored, `false` if the port must fail safe to empty.
    fn recover(&mut self) -> bool {
        true
    }

    /// Tears all wiring down to the unconnected state. Infallible.
    fn reset(&mut self);
}

/// Snapshot handed to listeners after a topology change is stable.
#[derive(Debug, Clone)]
pub struct PortEvent {
    /// The port whose topology changed.
    pub port: PortAddress,
    /// The connection set after the change.
    pub connections: Vec<PortAddress>,
}

type Listener = Box<dyn Fn(&PortEvent) + Send>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Handle returned by [`Port::subscribe`]; unsubscribes on drop or via
/// [`unsubscribe`](Self::unsubscribe).
pub struct PortSubscription {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl PortSubscription {
    /// Removes the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for PortSubscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

/// A connection endpoint on a component.
pub struct Port {
    id: String,
    address: Option<PortAddress>,
    direction: PortDirection,
    port_type: PortType,
    backend: Box<dyn PortBackend>,
    connections: Vec<PortAddress>,
    multi_engaged: bool,
    churned: bool,
    listeners: Arc<Mutex<ListenerTable>>,
}

impl Port {
    /// Creates a detached port. It gains an address when its component is
    /// attached to a tree.
    pub fn new(
        id: impl Into<String>,
        direction: PortDirection,
        port_type: PortType,
        backend: Box<dyn PortBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            address: None,
            direction,
            port_type,
            backend,
            connections: Vec::new(),
            multi_engaged: false,
            churned: false,
            listeners: Arc::new(Mutex::new(ListenerTable::default())),
        }
    }

    /// The port id within its component.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The port's address, once attached.
    #[must_use]
    pub fn address(&self) -> Option<&PortAddress> {
        self.address.as_ref()
    }

    /// Signal direction.
    #[must_use]
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Capability tag.
    #[must_use]
    pub fn port_type(&self) -> &PortType {
        &self.port_type
    }

    /// Current peers, in connection order.
    #[must_use]
    pub fn connections(&self) -> &[PortAddress] {
        &self.connections
    }

    /// Whether `peer` is in the connection set.
    #[must_use]
    pub fn is_connected_to(&self, peer: &PortAddress) -> bool {
        self.connections.contains(peer)
    }

    /// Registers a topology listener; the handle unsubscribes on drop.
    #[must_use]
    pub fn subscribe(&self, listener: impl Fn(&PortEvent) + Send + 'static) -> PortSubscription {
        let mut table = self.listeners.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, Box::new(listener)));
        PortSubscription {
            id,
            table: Arc::downgrade(&self.listeners),
        }
    }

    pub(crate) fn set_address(&mut self, address: Option<PortAddress>) {
        self.address = address;
    }

    /// Adds this port's half of a connection. Does not notify; callers
    /// flush once the whole operation is stable.
    fn add_half(&mut self, peer: PortAddress, peer_type: &PortType) -> Result<(), PortError> {
        if self.connections.contains(&peer) {
            return Err(PortError::AlreadyConnected(peer));
        }
        if !self.backend.compatible(peer_type) {
            return Err(PortError::IncompatibleTypes {
                local: self.port_type.clone(),
                peer: peer_type.clone(),
            });
        }

        let engaging = self.backend.multiway() && self.connections.len() == 1 && !self.multi_engaged;
        if engaging {
            self.churned = true;
            if let Err(e) = self.backend.set_multi(true) {
                self.recover_or_clear();
                return Err(e);
            }
            self.multi_engaged = true;
        }

        if let Err(e) = self.backend.link(&peer) {
            if engaging {
                // Take the adapter back out so the prior single connection
                // keeps working.
                if self.backend.set_multi(false).is_ok() {
                    self.multi_engaged = false;
                } else {
                    self.recover_or_clear();
                }
            }
            self.churned = true;
            return Err(e);
        }

        self.churned = true;
        self.connections.push(peer);
        Ok(())
    }

    /// Removes this port's half of a connection. No-op when absent.
    fn remove_half(&mut self, peer: &PortAddress) {
        let Some(idx) = self.connections.iter().position(|c| c == peer) else {
            return;
        };
        self.backend.unlink(peer);
        self.connections.remove(idx);
        self.churned = true;

        if self.multi_engaged && self.connections.len() <= 1 {
            if self.backend.set_multi(false).is_ok() {
                self.multi_engaged = false;
            } else {
                self.recover_or_clear();
            }
        }
    }

    /// Failure ladder tail: keep the wiring if the backend restored it,
    /// otherwise fail safe to the empty topology.
    fn recover_or_clear(&mut self) {
        if self.backend.recover() {
            return;
        }
        warn!(
            port = %self.address.as_ref().map(ToString::to_string).unwrap_or_else(|| self.id.clone()),
            "port wiring unrecoverable, clearing all connections"
        );
        self.backend.reset();
        self.connections.clear();
        self.multi_engaged = false;
        self.churned = true;
    }

    /// Emits at most one event if this port's topology was churned since
    /// the last flush.
    fn flush_notify(&mut self) {
        if !self.churned {
            return;
        }
        self.churned = false;
        let Some(address) = self.address.clone() else {
            return;
        };
        let event = PortEvent {
            port: address,
            connections: self.connections.clone(),
        };
        for (_, listener) in self.listeners.lock().entries.iter() {
            listener(&event);
        }
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("direction", &self.direction)
            .field("type", &self.port_type)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

/// Connects two ports symmetrically.
///
/// On success both connection sets gained each other and each port's
/// listeners were notified exactly once. On failure neither set changed;
/// any port whose wiring was churned during rollback is notified once with
/// the restored state.
pub fn connect(a: &mut Port, b: &mut Port) -> Result<(), PortError> {
    let (Some(addr_a), Some(addr_b)) = (a.address.clone(), b.address.clone()) else {
        return Err(PortError::Unaddressed);
    };
    if !a.direction.admits(b.direction) {
        return Err(PortError::DirectionMismatch);
    }

    let result = (|| {
        a.add_half(addr_b.clone(), &b.port_type)?;
        if let Err(e) = b.add_half(addr_a, &a.port_type) {
            a.remove_half(&addr_b);
            return Err(e);
        }
        Ok(())
    })();

    a.flush_notify();
    b.flush_notify();
    result
}

/// Disconnects two ports symmetrically. Idempotent: absent connections
/// are a no-op and produce no notification.
pub fn disconnect(a: &mut Port, b: &mut Port) {
    let addr_a = a.address.clone();
    let addr_b = b.address.clone();
    if let Some(addr_b) = addr_b {
        a.remove_half(&addr_b);
    }
    if let Some(addr_a) = addr_a {
        b.remove_half(&addr_a);
    }
    a.flush_notify();
    b.flush_notify();
}
