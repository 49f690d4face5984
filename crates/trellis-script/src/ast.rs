//! Script AST - resumable stack frames driven call by call.
//!
//! Parsing turns tokens into line nodes composed under a program node;
//! subcommands (`[...]`) parse recursively into nodes whose result feeds
//! the enclosing line as an argument.
//!
//! # Execution contract
//!
//! The tree realizes single-threaded, non-blocking, command-by-command
//! execution: exactly one call may be outstanding per evaluation, and the
//! tree only advances when asked
//!
//! 1. whether it [`is_done`](StackFrame::is_done),
//! 2. to [`write_next_command`](StackFrame::write_next_command), or
//! 3. to absorb that command's reply via
//!    [`post_response`](StackFrame::post_response).
//!
//! Suspension is simply a node that is not yet done; no thread ever
//! blocks on a reply.
//!
//! # Composite cursor
//!
//! Every composite owns its children plus an active-index cursor.
//! `is_done` advances the cursor through already-finished children and
//! returns `false` at the first unfinished one; once the cursor reaches
//! the sentinel (child count), a node-specific completion step runs.
//! `write_next_command`/`post_response` delegate to the active child when
//! one exists, and fall back to node-specific logic otherwise.
//!
//! # Errors
//!
//! A failed child aborts the remaining sibling chain at the nearest
//! enclosing composite; the error value becomes that composite's result
//! and bubbles from there. Namespace bindings made before the failure
//! stay.

use tracing::debug;

use trellis_types::{
    Address, Call, CallKind, ComponentAddress, ControlAddress, ErrorCode, ErrorValue, Timestamp,
    Value,
};

use crate::error::ScriptError;
use crate::namespace::Namespace;
use crate::token::{SyntaxError, Token, TokenKind, Tokenizer};

/// What a finished frame produced.
pub type FrameResult = Result<Vec<Value>, ErrorValue>;

/// Context for producing the next call of an evaluation.
#[derive(Debug, Clone)]
pub struct ScriptEnv {
    /// Origin address stamped on produced calls; replies come back here.
    pub from: ControlAddress,
    /// Base for resolving relative addresses in scripts.
    pub base: ComponentAddress,
    /// The owning root's current time.
    pub time: Timestamp,
}

/// One in-flight script construct.
pub trait StackFrame: Send {
    /// Advances bookkeeping and reports whether this frame has finished.
    fn is_done(&mut self) -> bool;

    /// Produces the next call to route, if the frame needs one now.
    ///
    /// Returning `None` while not done means the frame advanced internal
    /// state instead (or is waiting for a reply); the driver re-polls.
    fn write_next_command(&mut self, env: &ScriptEnv) -> Option<Call>;

    /// Delivers the reply to the call this frame is suspended on.
    fn post_response(&mut self, reply: Call);

    /// The result, once done.
    fn result(&self) -> Option<&FrameResult>;
}

/// A frame that completed at construction time.
pub struct ImmediateFrame {
    result: FrameResult,
}

impl ImmediateFrame {
    /// A successful immediate result.
    #[must_use]
    pub fn ok(values: Vec<Value>) -> Self {
        Self { result: Ok(values) }
    }

    /// A failed immediate result.
    #[must_use]
    pub fn err(error: ErrorValue) -> Self {
        Self {
            result: Err(error),
        }
    }
}

impl StackFrame for ImmediateFrame {
    fn is_done(&mut self) -> bool {
        true
    }

    fn write_next_command(&mut self, _env: &ScriptEnv) -> Option<Call> {
        None
    }

    fn post_response(&mut self, reply: Call) {
        debug!(reply = %reply, "immediate frame ignored a reply");
    }

    fn result(&self) -> Option<&FrameResult> {
        Some(&self.result)
    }
}

/// One argument position of a line.
enum Term {
    /// A literal word.
    Literal(Value),
    /// `$name`, resolved at dispatch time.
    Variable(String),
    /// `[...]`, index into the line's child nodes.
    Subcommand(usize),
}

enum LineState {
    /// Evaluating subcommand children.
    Resolving,
    /// Children done; dispatch pending.
    Ready,
    /// A routed call is outstanding.
    Awaiting,
    /// A command frame is running.
    Delegate(Box<dyn StackFrame>),
    /// Finished with a result.
    Finished(FrameResult),
}

/// One command line: argument terms plus a single dispatch.
///
/// The first assembled word decides the dispatch: a control address
/// issues a routed call; anything else resolves through the namespace
/// command table.
pub struct LineNode {
    ns: Namespace,
    terms: Vec<Term>,
    children: Vec<SubcommandNode>,
    cursor: usize,
    state: LineState,
}

impl LineNode {
    fn dispatch(&mut self, env: &ScriptEnv) -> Option<Call> {
        let mut values = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            match term {
                Term::Literal(v) => values.push(v.clone()),
                Term::Variable(name) => match self.ns.var(name) {
                    Some(v) => values.push(v),
                    None => {
                        self.state = LineState::Finished(Err(
                            ScriptError::UnknownVariable(name.clone()).to_error_value(),
                        ));
                        return None;
                    }
                },
                Term::Subcommand(i) => {
                    match self.children[*i].result().cloned().unwrap_or(Ok(Vec::new())) {
                        Ok(vals) => values.push(collapse(vals)),
                        Err(e) => {
                            self.state = LineState::Finished(Err(e));
                            return None;
                        }
                    }
                }
            }
        }

        let Some(first) = values.first().cloned() else {
            self.state = LineState::Finished(Ok(Vec::new()));
            return None;
        };
        let name = first.format();
        let args: Vec<Value> = values.into_iter().skip(1).collect();

        if name.starts_with('/') || name.starts_with('.') || name.starts_with('!') {
            return match Address::resolve(&name, &env.base) {
                Ok(Address::Control(target)) => {
                    let call = Call::request(env.from.clone(), target, env.time, args);
                    self.state = LineState::Awaiting;
                    Some(call)
                }
                _ => {
                    self.state = LineState::Finished(Err(
                        ScriptError::InvalidAddress(name).to_error_value(),
                    ));
                    None
                }
            };
        }

        match self.ns.command(&name) {
            Some(command) => match command.create_frame(&self.ns, args) {
                Ok(frame) => {
                    self.state = LineState::Delegate(frame);
                    None
                }
                Err(e) => {
                    self.state = LineState::Finished(Err(e.to_error_value()));
                    None
                }
            },
            None => {
                self.state =
                    LineState::Finished(Err(ScriptError::UnknownCommand(name).to_error_value()));
                None
            }
        }
    }
}

impl StackFrame for LineNode {
    fn is_done(&mut self) -> bool {
        match &self.state {
            LineState::Finished(_) => return true,
            LineState::Ready | LineState::Awaiting => return false,
            LineState::Resolving => {
                while self.cursor < self.children.len() {
                    if !self.children[self.cursor].is_done() {
                        return false;
                    }
                    if let Some(Err(e)) = self.children[self.cursor].result() {
                        let e = e.clone();
                        self.state = LineState::Finished(Err(e));
                        return true;
                    }
                    self.cursor += 1;
                }
                self.state = LineState::Ready;
                return false;
            }
            LineState::Delegate(_) => {}
        }
        // Delegate: finish when the command frame does.
        let LineState::Delegate(frame) = &mut self.state else {
            unreachable!("checked above");
        };
        if !frame.is_done() {
            return false;
        }
        let result = frame.result().cloned().unwrap_or(Ok(Vec::new()));
        self.state = LineState::Finished(result);
        true
    }

    fn write_next_command(&mut self, env: &ScriptEnv) -> Option<Call> {
        if matches!(self.state, LineState::Ready) {
            return self.dispatch(env);
        }
        match &mut self.state {
            LineState::Resolving => {
                if self.cursor < self.children.len() {
                    self.children[self.cursor].write_next_command(env)
                } else {
                    None
                }
            }
            LineState::Delegate(frame) => frame.write_next_command(env),
            _ => None,
        }
    }

    fn post_response(&mut self, reply: Call) {
        match &mut self.state {
            LineState::Resolving => {
                if self.cursor < self.children.len() {
                    self.children[self.cursor].post_response(reply);
                }
            }
            LineState::Awaiting => {
                let result = match reply.kind() {
                    CallKind::Response => Ok(reply.into_args()),
                    CallKind::Error => Err(reply.error().cloned().unwrap_or_else(|| {
                        ErrorValue::new("SCRIPT_CALL_FAILED", "call failed without detail")
                    })),
                    other => Err(ErrorValue::new(
                        "SCRIPT_CALL_FAILED",
                        format!("unexpected {other:?} delivered as a reply"),
                    )),
                };
                self.state = LineState::Finished(result);
            }
            LineState::Delegate(frame) => frame.post_response(reply),
            _ => debug!(reply = %reply, "line ignored a reply in a settled state"),
        }
    }

    fn result(&self) -> Option<&FrameResult> {
        match &self.state {
            LineState::Finished(result) => Some(result),
            _ => None,
        }
    }
}

/// A bracketed nested program; it has no command of its own - only the
/// inner program's result.
struct SubcommandNode {
    program: ProgramNode,
}

impl StackFrame for SubcommandNode {
    fn is_done(&mut self) -> bool {
        self.program.is_done()
    }

    fn write_next_command(&mut self, env: &ScriptEnv) -> Option<Call> {
        self.program.write_next_command(env)
    }

    fn post_response(&mut self, reply: Call) {
        self.program.post_response(reply);
    }

    fn result(&self) -> Option<&FrameResult> {
        self.program.result()
    }
}

/// The top-level composite: lines run in order, one at a time.
///
/// The program's result is the last line's result; a failed line aborts
/// the rest.
pub struct ProgramNode {
    lines: Vec<LineNode>,
    cursor: usize,
    result: Option<FrameResult>,
}

impl ProgramNode {
    fn new(lines: Vec<LineNode>) -> Self {
        Self {
            lines,
            cursor: 0,
            result: None,
        }
    }
}

impl StackFrame for ProgramNode {
    fn is_done(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        while self.cursor < self.lines.len() {
            if !self.lines[self.cursor].is_done() {
                return false;
            }
            if let Some(Err(e)) = self.lines[self.cursor].result() {
                let e = e.clone();
                self.result = Some(Err(e));
                self.cursor = self.lines.len();
                return true;
            }
            self.cursor += 1;
        }
        let result = self
            .lines
            .last()
            .and_then(|line| line.result().cloned())
            .unwrap_or(Ok(Vec::new()));
        self.result = Some(result);
        true
    }

    fn write_next_command(&mut self, env: &ScriptEnv) -> Option<Call> {
        if self.is_done() {
            return None;
        }
        self.lines[self.cursor].write_next_command(env)
    }

    fn post_response(&mut self, reply: Call) {
        if self.result.is_some() {
            debug!(reply = %reply, "finished program ignored a reply");
            return;
        }
        if self.cursor < self.lines.len() {
            self.lines[self.cursor].post_response(reply);
        }
    }

    fn result(&self) -> Option<&FrameResult> {
        self.result.as_ref()
    }
}

/// Parses script text into a resumable program frame.
///
/// Lines bind into `ns`; bindings made before a later failure stay.
pub fn parse_script(source: &str, ns: &Namespace) -> Result<ProgramNode, SyntaxError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    build_program(&tokens, ns)
}

fn build_program(tokens: &[Token], ns: &Namespace) -> Result<ProgramNode, SyntaxError> {
    let mut lines = Vec::new();
    let mut current: Vec<&Token> = Vec::new();
    for token in tokens {
        match token.kind {
            TokenKind::Eol => {
                if !current.is_empty() {
                    lines.push(build_line(&current, ns)?);
                    current.clear();
                }
            }
            TokenKind::Comment => {}
            _ => current.push(token),
        }
    }
    debug_assert!(current.is_empty(), "tokenizer always emits a final EOL");
    Ok(ProgramNode::new(lines))
}

fn build_line(tokens: &[&Token], ns: &Namespace) -> Result<LineNode, SyntaxError> {
    let mut terms = Vec::with_capacity(tokens.len());
    let mut children = Vec::new();
    for token in tokens {
        match token.kind {
            TokenKind::Plain => {
                if let Some(name) = token.text.strip_prefix('$') {
                    if !name.is_empty() {
                        terms.push(Term::Variable(name.to_string()));
                        continue;
                    }
                }
                terms.push(Term::Literal(Value::parse(&token.text)));
            }
            TokenKind::Quoted | TokenKind::Braced => {
                terms.push(Term::Literal(Value::Str(token.text.clone())));
            }
            TokenKind::Subcommand => {
                let sub_tokens = Tokenizer::new(&token.text).tokenize()?;
                let program = build_program(&sub_tokens, ns)?;
                terms.push(Term::Subcommand(children.len()));
                children.push(SubcommandNode { program });
            }
            TokenKind::Comment | TokenKind::Eol => {}
        }
    }
    Ok(LineNode {
        ns: ns.clone(),
        terms,
        children,
        cursor: 0,
        state: LineState::Resolving,
    })
}

/// A subcommand's result feeds the enclosing line as one argument.
fn collapse(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Str(String::new()),
        1 => values.pop().expect("length checked"),
        _ => Value::Array(values),
    }
}
