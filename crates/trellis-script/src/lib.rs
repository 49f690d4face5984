//! Script layer for the trellis runtime: tokenizer, AST, and the
//! resumable interpreter.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  trellis-types     : Value, addresses, Call, Lookup        │
//! │  trellis-component : components, controls, ports           │
//! │  trellis-runtime   : roots, hub routing, services          │
//! │  trellis-script    : tokenizer, AST, interpreter    ◄ HERE │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Contents
//!
//! - [`Tokenizer`] - lazy, restartable token stream over script text
//! - [`parse_script`] / [`ProgramNode`] / [`StackFrame`] - the resumable
//!   command tree, advanced one call at a time
//! - [`Namespace`] - lexical scope for variables and commands
//! - [`Command`] / [`CommandInstaller`] - the command surface, with the
//!   [`CoreCommands`] built-ins (`set`, `const`, `echo`)
//! - [`ScriptService`] / [`ScriptProvider`] - the root-resident driver
//!   and its factory provider
//!
//! # Execution model
//!
//! Script text tokenizes into lines; lines parse into a program frame.
//! The frame is driven purely through the call protocol: the owning root
//! asks it for the next call, routes it, and posts the eventual reply
//! back. At most one call is outstanding per evaluation and no thread
//! ever blocks on a reply - a suspended script is just a frame that is
//! not yet done.
//!
//! # Example
//!
//! ```
//! use trellis_script::{parse_script, CommandInstaller, CoreCommands, Namespace, StackFrame};
//! use trellis_types::{ComponentAddress, ControlAddress, Timestamp};
//!
//! let ns = Namespace::root();
//! CoreCommands.install(&ns);
//! let mut program = parse_script("set gain 0.5; echo $gain", &ns).unwrap();
//!
//! let env = trellis_script::ScriptEnv {
//!     from: ControlAddress::parse("/script.eval").unwrap(),
//!     base: ComponentAddress::parse("/script").unwrap(),
//!     time: Timestamp::ZERO,
//! };
//! while !program.is_done() {
//!     assert!(program.write_next_command(&env).is_none()); // nothing routed
//! }
//! assert!(program.result().unwrap().is_ok());
//! ```

mod ast;
mod command;
mod error;
mod namespace;
mod service;
mod token;

pub use ast::{parse_script, FrameResult, ImmediateFrame, ProgramNode, ScriptEnv, StackFrame};
pub use command::{Command, CommandInstaller, CoreCommands, FunctionCommand};
pub use error::ScriptError;
pub use namespace::Namespace;
pub use service::{ScriptProvider, ScriptService};
pub use token::{SyntaxError, Token, TokenKind, Tokenizer, Tokens};
