//! Root - a top-level component with its own execution context.
//!
//! Each root runs in its own tokio task, enabling parallel execution of
//! roots while keeping everything *inside* a root single-writer: at most
//! one call or deferred task is active per root at any instant, so
//! component, port, and control mutation need no locking discipline beyond
//! "you are on the root's thread".
//!
//! # Architecture
//!
//! ```text
//!                        ┌──────────────────────────┐
//!                        │       RootRunner         │
//! hub ──route()────────► │  inbox ◄── mpsc          │
//!                        │      │                   │
//! handle.invoke_later ─► │      ▼                   │
//!                        │  handle one message      │
//!                        │      │                   │
//!                        │      ▼                   │
//!                        │  outbox ──► hub.route()  │
//!                        └──────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! `Constructed → Initializing → Running ⇄ Paused → Terminating →
//! Terminated`. While paused, inbound work is buffered and replayed in
//! order on resume. From `Terminating` on, queued requests are answered
//! with a `SERVICE_UNAVAILABLE` error rather than dropped.
//!
//! # Time
//!
//! Each root owns a monotonic [`RootClock`]; outgoing calls are stamped
//! with it. No global clock exists.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use trellis_component::{resolve, CallRouter, ComponentRef};
use trellis_types::{Call, ComponentAddress, ControlAddress, ErrorValue, Timestamp};

use crate::hub::RootHub;

/// Error code carried by unavailability replies.
pub(crate) const UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";

/// Lifecycle states of a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootState {
    /// Built, runner not yet started.
    Constructed,
    /// Runner starting up.
    Initializing,
    /// Processing messages.
    Running,
    /// Buffering messages until resumed.
    Paused,
    /// Draining the queue with unavailability answers.
    Terminating,
    /// Done; the inbox is closed.
    Terminated,
}

impl RootState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Constructed,
            1 => Self::Initializing,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Terminating,
            _ => Self::Terminated,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Constructed => 0,
            Self::Initializing => 1,
            Self::Running => 2,
            Self::Paused => 3,
            Self::Terminating => 4,
            Self::Terminated => 5,
        }
    }
}

#[derive(Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn set(&self, state: RootState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }

    fn get(&self) -> RootState {
        RootState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Monotonic per-root time base.
pub struct RootClock {
    origin: Instant,
}

impl RootClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds since this root started.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        let nanos = self.origin.elapsed().as_nanos();
        Timestamp::from_nanos(i64::try_from(nanos).unwrap_or(i64::MAX))
    }
}

/// A deferred action scheduled onto a root's execution thread.
type Task = Box<dyn FnOnce(&mut RootContext<'_>) + Send>;

enum RootMsg {
    Call(Call),
    Task(Task),
    Pause,
    Resume,
    Terminate,
}

/// Execution context handed to controls and deferred tasks.
///
/// Everything a step does on its root happens through this: reading the
/// clock, routing calls (collected and flushed after the step), and
/// reaching the component tree.
pub struct RootContext<'a> {
    name: &'a str,
    time: Timestamp,
    tree: &'a ComponentRef,
    outbox: &'a mut Vec<Call>,
}

impl RootContext<'_> {
    /// The owning root's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// The root component of this root's tree.
    #[must_use]
    pub fn tree(&self) -> &ComponentRef {
        self.tree
    }

    /// The root's component address.
    #[must_use]
    pub fn address(&self) -> ComponentAddress {
        ComponentAddress::root_of(self.name).expect("root names are validated at install")
    }
}

impl CallRouter for RootContext<'_> {
    fn time(&self) -> Timestamp {
        self.time
    }

    fn route(&mut self, call: Call) {
        self.outbox.push(call);
    }
}

/// Thread-safe handle to a running root.
#[derive(Clone)]
pub struct RootHandle {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<RootMsg>,
    state: Arc<StateCell>,
}

impl RootHandle {
    /// The root's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The root's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RootState {
        self.state.get()
    }

    /// Enqueues a call; never blocks the caller.
    ///
    /// # Errors
    ///
    /// Returns the call back when the root's inbox is closed
    /// (terminated root); the caller decides how to answer it.
    pub fn queue_call(&self, call: Call) -> Result<(), Call> {
        self.tx.send(RootMsg::Call(call)).map_err(|e| match e.0 {
            RootMsg::Call(call) => call,
            _ => unreachable!("sent a call"),
        })
    }

    /// Schedules a deferred action on the root's execution thread.
    /// Submission order is preserved per root.
    ///
    /// Returns `false` when the root is gone.
    pub fn invoke_later(&self, task: impl FnOnce(&mut RootContext<'_>) + Send + 'static) -> bool {
        self.tx.send(RootMsg::Task(Box::new(task))).is_ok()
    }

    /// Pauses message processing; inbound work is buffered.
    pub fn pause(&self) {
        let _ = self.tx.send(RootMsg::Pause);
    }

    /// Resumes a paused root; buffered work replays in order.
    pub fn resume(&self) {
        let _ = self.tx.send(RootMsg::Resume);
    }

    /// Asks the root to terminate; queued requests are answered with
    /// `SERVICE_UNAVAILABLE` errors.
    pub fn terminate(&self) {
        let _ = self.tx.send(RootMsg::Terminate);
    }
}

impl std::fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootHandle")
            .field("name", &self.name)
            .field("state", &self.state.get())
            .finish()
    }
}

/// The per-root execution task.
///
/// Built by [`RootHub::install`](crate::RootHub::install), which spawns
/// [`run`](Self::run) onto the tokio runtime.
pub struct RootRunner {
    name: String,
    tree: ComponentRef,
    hub: RootHub,
    rx: mpsc::UnboundedReceiver<RootMsg>,
    state: Arc<StateCell>,
    clock: RootClock,
    /// Outstanding requests issued from this root: match id → issuing
    /// control. Replies that match nothing here are protocol violations
    /// and are logged, never delivered.
    pending: HashMap<i64, ControlAddress>,
    paused_queue: VecDeque<RootMsg>,
}

impl RootRunner {
    pub(crate) fn new(name: &str, tree: ComponentRef, hub: RootHub) -> (Self, RootHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(StateCell::default());
        state.set(RootState::Constructed);
        let handle = RootHandle {
            name: Arc::from(name),
            tx,
            state: Arc::clone(&state),
        };
        let runner = Self {
            name: name.to_string(),
            tree,
            hub,
            rx,
            state,
            clock: RootClock::new(),
            pending: HashMap::new(),
            paused_queue: VecDeque::new(),
        };
        (runner, handle)
    }

    /// Drives the root until termination.
    pub async fn run(mut self) {
        self.state.set(RootState::Initializing);
        debug!(root = %self.name, "root initializing");
        self.state.set(RootState::Running);

        while let Some(msg) = self.rx.recv().await {
            match msg {
                RootMsg::Pause => {
                    if self.state.get() == RootState::Running {
                        self.state.set(RootState::Paused);
                        debug!(root = %self.name, "root paused");
                    }
                }
                RootMsg::Resume => {
                    if self.state.get() == RootState::Paused {
                        self.state.set(RootState::Running);
                        debug!(
                            root = %self.name,
                            buffered = self.paused_queue.len(),
                            "root resumed"
                        );
                        while let Some(buffered) = self.paused_queue.pop_front() {
                            self.dispatch(buffered);
                        }
                    }
                }
                RootMsg::Terminate => break,
                msg if self.state.get() == RootState::Paused => {
                    self.paused_queue.push_back(msg);
                }
                msg => self.dispatch(msg),
            }
        }

        self.state.set(RootState::Terminating);
        info!(root = %self.name, "root terminating");
        self.rx.close();
        let mut leftovers: Vec<RootMsg> = self.paused_queue.drain(..).collect();
        while let Ok(msg) = self.rx.try_recv() {
            leftovers.push(msg);
        }
        for msg in leftovers {
            if let RootMsg::Call(call) = msg {
                self.refuse(call);
            }
        }
        self.state.set(RootState::Terminated);
        info!(root = %self.name, "root terminated");
    }

    fn dispatch(&mut self, msg: RootMsg) {
        match msg {
            RootMsg::Call(call) => self.handle_call(call),
            RootMsg::Task(task) => self.handle_task(task),
            // Directives are handled in the run loop.
            RootMsg::Pause | RootMsg::Resume | RootMsg::Terminate => {}
        }
    }

    fn handle_task(&mut self, task: Task) {
        let mut outbox = Vec::new();
        {
            let mut ctx = RootContext {
                name: &self.name,
                time: self.clock.now(),
                tree: &self.tree,
                outbox: &mut outbox,
            };
            task(&mut ctx);
        }
        self.flush(outbox);
    }

    fn handle_call(&mut self, call: Call) {
        let mut outbox = Vec::new();
        let time = self.clock.now();
        if call.is_reply() {
            self.deliver_reply(call, time, &mut outbox);
        } else {
            self.deliver_request(call, time, &mut outbox);
        }
        self.flush(outbox);
    }

    /// Delivers an inbound request to the addressed control; failures
    /// become the Error reply (or a log line for quiet calls).
    fn deliver_request(&mut self, call: Call, time: Timestamp, outbox: &mut Vec<Call>) {
        if call.to().root() != self.name {
            warn!(root = %self.name, call = %call, "misrouted call refused");
            self.refuse(call);
            return;
        }
        let expects_reply = call.expects_reply();
        let failed = {
            let target = call.to().clone();
            match resolve(&self.tree, target.component()) {
                None => Some((
                    call,
                    ErrorValue::new(
                        "TREE_NO_SUCH_COMPONENT",
                        format!("no component at {}", target.component()),
                    ),
                )),
                Some(component) => {
                    let mut ctx = RootContext {
                        name: &self.name,
                        time,
                        tree: &self.tree,
                        outbox,
                    };
                    let control_id = target.control().to_string();
                    let result =
                        component
                            .lock()
                            .invoke_control(&control_id, call.clone(), &mut ctx);
                    result.err().map(|e| (call, e))
                }
            }
        };
        if let Some((call, error)) = failed {
            if expects_reply {
                let reply = call
                    .error_reply(time, error)
                    .expect("expects_reply checked");
                outbox.push(reply);
            } else {
                debug!(root = %self.name, error = %error, "quiet call failed");
            }
        }
    }

    /// Delivers an inbound reply to the control that issued the request,
    /// enforcing the one-answer-per-request contract.
    fn deliver_reply(&mut self, call: Call, time: Timestamp, outbox: &mut Vec<Call>) {
        let Some(origin) = self.pending.remove(&call.match_id()) else {
            warn!(
                root = %self.name,
                call = %call,
                "unmatched or duplicate reply dropped"
            );
            return;
        };
        match resolve(&self.tree, origin.component()) {
            None => warn!(root = %self.name, origin = %origin, "reply target vanished"),
            Some(component) => {
                let mut ctx = RootContext {
                    name: &self.name,
                    time,
                    tree: &self.tree,
                    outbox,
                };
                if let Err(e) =
                    component
                        .lock()
                        .invoke_control(origin.control(), call, &mut ctx)
                {
                    warn!(root = %self.name, origin = %origin, error = %e, "reply handler failed");
                }
            }
        }
    }

    /// Routes a step's collected output, registering outstanding request
    /// correlation on the way out.
    fn flush(&mut self, outbox: Vec<Call>) {
        for call in outbox {
            if call.expects_reply() && call.from().root() == self.name {
                self.pending.insert(call.match_id(), call.from().clone());
            }
            self.hub.route(call);
        }
    }

    /// Answers a request with the unavailability error; quiet calls and
    /// replies are logged and dropped.
    fn refuse(&self, call: Call) {
        if !call.expects_reply() {
            debug!(root = %self.name, call = %call, "undeliverable call dropped");
            return;
        }
        let error = ErrorValue::new(UNAVAILABLE, format!("root {:?} is not available", self.name));
        let reply = call
            .error_reply(self.clock.now(), error)
            .expect("expects_reply checked");
        self.hub.route(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trip() {
        for state in [
            RootState::Constructed,
            RootState::Initializing,
            RootState::Running,
            RootState::Paused,
            RootState::Terminating,
            RootState::Terminated,
        ] {
            assert_eq!(RootState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = RootClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
