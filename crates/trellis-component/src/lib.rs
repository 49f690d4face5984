//! Component layer for the trellis runtime.
//!
//! Components are addressable tree nodes exposing controls (callable
//! endpoints) and ports (connection endpoints). This crate owns the tree
//! semantics, the transactional port topology contract, and the factory
//! SPI through which external providers contribute concrete behaviors.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  trellis-types     : Value, addresses, Call, Lookup        │
//! │  trellis-component : components, controls, ports    ◄ HERE │
//! │  trellis-runtime   : roots, hub routing, services          │
//! │  trellis-script    : tokenizer, AST, interpreter           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Contents
//!
//! - [`Component`] / [`ComponentRef`] - the tree node and the free
//!   functions ([`add_child`], [`remove_child`], [`attach_root`],
//!   [`resolve`]) that mutate and navigate trees
//! - [`Control`] - the callable endpoint trait, with
//!   [`FunctionControl`] / [`PropertyControl`] for the immediate cases
//! - [`Port`] - transactional connect/disconnect over the
//!   [`PortBackend`] SPI, with [`connect_ports`] / [`disconnect_ports`] /
//!   [`disconnect_all`] operating through the tree
//! - [`ComponentProvider`] - the factory SPI, plus the
//!   port/protocol type-provider tags
//! - [`ComponentInfo`] - the derived, cacheable descriptor

pub mod testing;

mod component;
mod control;
mod factory;
mod info;
pub mod port;

pub use component::{
    add_child, attach_root, connect_ports, disconnect_all, disconnect_ports, remove_child,
    resolve, Component, ComponentBuilder, ComponentRef, TreeError, TreeGuard,
};
pub use control::{CallRouter, Control, ControlInfo, ControlRole, FunctionControl, PropertyControl};
pub use factory::{
    ComponentProvider, ComponentType, FactoryRedirect, InstantiationError, PortTypeProvider,
    ProtocolType, ProtocolTypeProvider, ServiceDescriptor, ServiceType,
};
pub use info::{ComponentInfo, PortInfo};
pub use port::{
    connect, disconnect, Port, PortBackend, PortDirection, PortError, PortEvent, PortSubscription,
    PortType,
};
