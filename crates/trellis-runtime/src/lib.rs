//! Runtime layer for trellis: root execution, hub routing, service
//! discovery.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  trellis-types     : Value, addresses, Call, Lookup        │
//! │  trellis-component : components, controls, ports           │
//! │  trellis-runtime   : roots, hub routing, services   ◄ HERE │
//! │  trellis-script    : tokenizer, AST, interpreter           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency model
//!
//! One tokio task per root; roots share no mutable state. All cross-root
//! communication is [`RootHub::route`], which any thread may call. Inside
//! a root, every mutation runs on the root's own task (single-writer), so
//! component trees need no further synchronization; immutable
//! [`Lookup`](trellis_types::Lookup) and [`Services`] snapshots are shared
//! freely.
//!
//! # Example
//!
//! ```no_run
//! use trellis_component::{Component, ComponentType, PropertyControl};
//! use trellis_runtime::RootHub;
//!
//! # async fn demo() {
//! let hub = RootHub::new();
//! hub.activate().unwrap();
//!
//! let tree = Component::build(ComponentType::new("core:container"))
//!     .control("gain", PropertyControl::new(1.0))
//!     .into_ref();
//! let handle = hub.install("audio", tree).unwrap();
//! assert_eq!(handle.name(), "audio");
//! # }
//! ```

mod hub;
mod root;
mod services;

pub use hub::{HubError, HubState, RootHub};
pub use root::{RootClock, RootContext, RootHandle, RootRunner, RootState};
pub use services::{CreateOutcome, Factories, ServiceError, Services, ServicesBuilder};
