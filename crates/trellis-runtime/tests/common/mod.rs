//! Shared fixtures for runtime integration tests.

use tokio::sync::mpsc;

use trellis_component::{CallRouter, Component, ComponentRef, ComponentType, Control};
use trellis_types::{Call, ErrorValue};

/// Control that forwards every call it receives (requests and replies) to
/// a channel, without answering anything.
pub struct Collector {
    tx: mpsc::UnboundedSender<Call>,
}

impl Collector {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Call>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Control for Collector {
    fn invoke(&mut self, call: Call, _router: &mut dyn CallRouter) -> Result<(), ErrorValue> {
        let _ = self.tx.send(call);
        Ok(())
    }
}

/// A single-control tree for a probe root: `collect` records calls.
pub fn probe_tree() -> (ComponentRef, mpsc::UnboundedReceiver<Call>) {
    let (collector, rx) = Collector::channel();
    let tree = Component::build(ComponentType::new("test:probe"))
        .control("collect", collector)
        .into_ref();
    (tree, rx)
}

/// Awaits the next call with a generous timeout.
pub async fn next_call(rx: &mut mpsc::UnboundedReceiver<Call>) -> Call {
    tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a call")
        .expect("channel closed")
}

/// Asserts that nothing arrives within `ms` milliseconds.
pub async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Call>, ms: u64) {
    let outcome = tokio::time::timeout(std::time::Duration::from_millis(ms), rx.recv()).await;
    assert!(outcome.is_err(), "expected silence, got {:?}", outcome);
}
