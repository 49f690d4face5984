//! Core types for the trellis runtime.
//!
//! This crate is the leaf of the workspace: the value/address vocabulary,
//! the call protocol envelope, and the immutable [`Lookup`] registry that
//! everything above builds on.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  trellis-types     : Value, addresses, Call, Lookup ◄ HERE │
//! │  trellis-component : components, controls, ports           │
//! │  trellis-runtime   : roots, hub routing, services          │
//! │  trellis-script    : tokenizer, AST, interpreter           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Contents
//!
//! - [`Value`] - the immutable data atom carried by calls, with a
//!   canonical text form
//! - [`ComponentAddress`] / [`ControlAddress`] / [`PortAddress`] - the
//!   hierarchical addressing scheme (`/root/child.control`)
//! - [`Call`] - the addressed, correlated request/response message unit
//! - [`Lookup`] - immutable composable service registry
//! - [`ErrorCode`] - machine-readable error classification used by every
//!   error enum in the workspace
//!
//! # Example
//!
//! ```
//! use trellis_types::{Call, ControlAddress, Timestamp, Value};
//!
//! let from = ControlAddress::parse("/script/runner.eval").unwrap();
//! let to = ControlAddress::parse("/audio/osc.frequency").unwrap();
//! let req = Call::request(from, to, Timestamp::ZERO, vec![Value::Num(440.0)]);
//! let resp = req.reply(Timestamp::from_nanos(5), vec![]).unwrap();
//! assert_eq!(resp.match_id(), req.match_id());
//! ```

mod address;
mod call;
mod error;
mod lookup;
mod value;

pub use address::{
    is_valid_identifier, Address, AddressError, ComponentAddress, ControlAddress, PortAddress,
};
pub use call::{Call, CallError, CallKind, Timestamp};
pub use error::{check_error_codes, ErrorCode};
pub use lookup::Lookup;
pub use value::{ErrorValue, OpaqueRef, ResourceId, Value, ValueError, ValueMap};
