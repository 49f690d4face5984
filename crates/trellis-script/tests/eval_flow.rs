//! End-to-end script evaluation through a live hub.
//!
//! These tests stand up a real [`RootHub`], let activation install the
//! script runner from its provider, and drive evaluations the only way
//! the protocol allows: routed calls in, routed replies out.

use tokio::sync::mpsc;

use trellis_component::{
    CallRouter, Component, ComponentRef, ComponentType, Control, FunctionControl,
    PropertyControl, ServiceType,
};
use trellis_runtime::RootHub;
use trellis_script::ScriptProvider;
use trellis_types::{Call, CallKind, ControlAddress, ErrorValue, Timestamp, Value};

/// Control that forwards every call it receives to a channel without
/// answering; the test plays the role of a front-end this way.
struct Shell {
    tx: mpsc::UnboundedSender<Call>,
}

impl Control for Shell {
    fn invoke(&mut self, call: Call, _router: &mut dyn CallRouter) -> Result<(), ErrorValue> {
        let _ = self.tx.send(call);
        Ok(())
    }
}

struct Fixture {
    hub: RootHub,
    eval: ControlAddress,
    shell: ControlAddress,
    rx: mpsc::UnboundedReceiver<Call>,
}

impl Fixture {
    /// Hub with an activated script runner and a `shell` probe root.
    fn start() -> Self {
        let hub = RootHub::new();
        hub.register_provider(std::sync::Arc::new(ScriptProvider::new()))
            .unwrap();
        hub.activate().unwrap();

        let runner = hub
            .services()
            .locate(&ServiceType::new("script:eval"))
            .expect("activation installs the script runner");
        let eval = runner.control("eval").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let probe = Component::build(ComponentType::new("test:shell"))
            .control("collect", Shell { tx })
            .into_ref();
        hub.install("shell", probe).unwrap();
        let shell = ControlAddress::parse("/shell.collect").unwrap();

        Self {
            hub,
            eval,
            shell,
            rx,
        }
    }

    fn install(&self, name: &str, tree: ComponentRef) {
        self.hub.install(name, tree).unwrap();
    }

    /// Sends a script for evaluation from the shell control.
    fn eval(&self, script: &str) -> i64 {
        let call = Call::request(
            self.shell.clone(),
            self.eval.clone(),
            Timestamp::ZERO,
            vec![Value::Str(script.into())],
        );
        let match_id = call.match_id();
        let handle = self.hub.root("shell").unwrap();
        assert!(handle.invoke_later(move |ctx| ctx.route(call)));
        match_id
    }

    async fn next_reply(&mut self) -> Call {
        tokio::time::timeout(std::time::Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for a reply")
            .expect("shell channel closed")
    }
}

fn device_tree(gain: f64) -> ComponentRef {
    Component::build(ComponentType::new("test:device"))
        .control("gain", PropertyControl::new(gain))
        .control(
            "meter",
            FunctionControl::new(|_: &[Value]| Ok(vec![Value::Num(0.7)])),
        )
        .into_ref()
}

#[tokio::test]
async fn script_drives_a_remote_property() {
    let mut fx = Fixture::start();
    fx.install("dev", device_tree(1.0));

    let id = fx.eval("/dev.gain 0.25");
    let reply = fx.next_reply().await;
    assert_eq!(reply.kind(), CallKind::Response);
    assert_eq!(reply.match_id(), id);
    assert_eq!(reply.args(), &[Value::Num(0.25)]);

    // The write stuck: reading it back goes through the same protocol.
    fx.eval("/dev.gain");
    assert_eq!(fx.next_reply().await.args(), &[Value::Num(0.25)]);

    fx.hub.terminate();
}

#[tokio::test]
async fn subcommand_feeds_a_cross_root_result() {
    let mut fx = Fixture::start();
    fx.install("dev", device_tree(1.0));

    fx.eval("/dev.gain [/dev.meter]");
    let reply = fx.next_reply().await;
    assert_eq!(reply.kind(), CallKind::Response);
    assert_eq!(reply.args(), &[Value::Num(0.7)]);

    fx.hub.terminate();
}

#[tokio::test]
async fn bindings_persist_across_evaluations_and_failures() {
    let mut fx = Fixture::start();

    fx.eval("set x 3");
    assert_eq!(fx.next_reply().await.args(), &[Value::Num(3.0)]);

    // The second line dies on an unregistered root; `x` survives.
    let id = fx.eval("set y 4\n/ghost.op 1");
    let reply = fx.next_reply().await;
    assert_eq!(reply.kind(), CallKind::Error);
    assert_eq!(reply.match_id(), id);
    assert_eq!(reply.error().unwrap().code(), "SERVICE_UNAVAILABLE");

    fx.eval("echo $x $y");
    assert_eq!(
        fx.next_reply().await.args(),
        &[Value::Num(3.0), Value::Num(4.0)]
    );

    fx.hub.terminate();
}

#[tokio::test]
async fn syntax_errors_come_back_as_error_replies() {
    let mut fx = Fixture::start();

    let id = fx.eval("{never closed");
    let reply = fx.next_reply().await;
    assert_eq!(reply.kind(), CallKind::Error);
    assert_eq!(reply.match_id(), id);
    assert_eq!(reply.error().unwrap().code(), "SCRIPT_UNTERMINATED_BRACE");

    fx.hub.terminate();
}

#[tokio::test]
async fn quiet_evaluation_answers_nothing_but_takes_effect() {
    let mut fx = Fixture::start();

    let quiet = Call::quiet(
        fx.shell.clone(),
        fx.eval.clone(),
        Timestamp::ZERO,
        vec![Value::Str("set q 9".into())],
    );
    let handle = fx.hub.root("shell").unwrap();
    assert!(handle.invoke_later(move |ctx| ctx.route(quiet)));

    // The only reply the shell ever sees is for the explicit read-back.
    fx.eval("echo $q");
    let reply = fx.next_reply().await;
    assert_eq!(reply.kind(), CallKind::Response);
    assert_eq!(reply.args(), &[Value::Num(9.0)]);

    fx.hub.terminate();
}
