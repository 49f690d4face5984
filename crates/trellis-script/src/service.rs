//! Script service - the root-resident driver for script evaluation.
//!
//! The service lives inside a root's component tree and exposes two
//! controls: `eval` accepts script text and drives the parsed program,
//! `abort` abandons whatever is running. Everything the interpreter does
//! flows through the owning root's [`CallRouter`]; the service never
//! blocks a thread waiting for a reply.
//!
//! # Evaluation discipline
//!
//! One evaluation is active at a time, and that evaluation keeps at most
//! one call outstanding. An `eval` request arriving while another runs is
//! answered `SCRIPT_BUSY`. Suspension is a program frame that is not yet
//! done; the next reply delivered to the `eval` control resumes it.
//!
//! Aborting discards the active frame. Calls it already issued are not
//! retracted; their replies arrive later, match nothing, and are logged
//! and ignored. The abandoned evaluation's requester still gets exactly
//! one answer - the `SCRIPT_ABORTED` error.
//!
//! Namespace bindings outlive evaluations: a failed script leaves
//! everything it managed to bind available to the next one.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use trellis_component::{
    CallRouter, Component, ComponentProvider, ComponentRef, ComponentType, Control, ControlInfo,
    ControlRole, InstantiationError, ServiceDescriptor, ServiceType,
};
use trellis_types::{Call, ErrorCode, ErrorValue, Value};

use crate::ast::{parse_script, ProgramNode, ScriptEnv, StackFrame};
use crate::command::{CommandInstaller, CoreCommands};
use crate::error::ScriptError;
use crate::namespace::Namespace;

/// Re-poll bound per driver step; a frame that produces neither progress
/// nor a call within this many polls is declared stalled.
const PUMP_LIMIT: usize = 10_000;

struct Evaluation {
    program: ProgramNode,
    /// The eval request to answer on completion; `None` for quiet evals.
    request: Option<Call>,
    /// Match id of the interpreter call awaiting its reply.
    outstanding: Option<i64>,
    env: ScriptEnv,
}

struct ServiceInner {
    ns: Namespace,
    active: Option<Evaluation>,
}

impl ServiceInner {
    fn start(&mut self, call: Call, router: &mut dyn CallRouter) -> Result<(), ErrorValue> {
        if self.active.is_some() {
            return Err(ScriptError::Busy.to_error_value());
        }
        let source = match call.args() {
            [Value::Str(text)] => text.clone(),
            [other] => other.format(),
            _ => {
                return Err(ScriptError::BadArguments(
                    "expected: one script text argument".into(),
                )
                .to_error_value())
            }
        };
        let program = parse_script(&source, &self.ns).map_err(|e| e.to_error_value())?;
        let env = ScriptEnv {
            from: call.to().clone(),
            base: call.to().component().clone(),
            time: router.time(),
        };
        self.active = Some(Evaluation {
            program,
            request: call.expects_reply().then_some(call),
            outstanding: None,
            env,
        });
        self.pump(router);
        Ok(())
    }

    fn resume(&mut self, reply: Call, router: &mut dyn CallRouter) {
        let expected = self.active.as_ref().and_then(|e| e.outstanding);
        if expected != Some(reply.match_id()) {
            debug!(reply = %reply, "reply for an abandoned evaluation ignored");
            return;
        }
        let eval = self.active.as_mut().expect("outstanding implies active");
        eval.outstanding = None;
        eval.program.post_response(reply);
        self.pump(router);
    }

    fn abort(&mut self, router: &mut dyn CallRouter) -> bool {
        let Some(eval) = self.active.take() else {
            return false;
        };
        Self::finish(
            eval.request,
            Err(ScriptError::Aborted.to_error_value()),
            router,
        );
        true
    }

    /// Advances the active program to its next suspension point, routing
    /// at most one call, or to completion.
    fn pump(&mut self, router: &mut dyn CallRouter) {
        for _ in 0..PUMP_LIMIT {
            let Some(eval) = self.active.as_mut() else {
                return;
            };
            if eval.program.is_done() {
                let eval = self.active.take().expect("checked above");
                let result = eval.program.result().cloned().unwrap_or(Ok(Vec::new()));
                Self::finish(eval.request, result, router);
                return;
            }
            if eval.outstanding.is_some() {
                // Suspended on a reply that has not arrived yet.
                return;
            }
            eval.env.time = router.time();
            if let Some(call) = eval.program.write_next_command(&eval.env) {
                eval.outstanding = Some(call.match_id());
                router.route(call);
                return;
            }
        }
        let eval = self.active.take().expect("loop only runs while active");
        Self::finish(
            eval.request,
            Err(ScriptError::Stalled.to_error_value()),
            router,
        );
    }

    /// Answers the evaluation's requester, once, with the final result.
    fn finish(
        request: Option<Call>,
        result: Result<Vec<Value>, ErrorValue>,
        router: &mut dyn CallRouter,
    ) {
        let Some(request) = request else {
            if let Err(error) = result {
                debug!(error = %error, "quiet evaluation failed");
            }
            return;
        };
        let reply = match result {
            Ok(values) => request.reply(router.time(), values),
            Err(error) => request.error_reply(router.time(), error),
        };
        match reply {
            Ok(reply) => router.route(reply),
            Err(e) => debug!(error = %e, "evaluation result undeliverable"),
        }
    }
}

struct EvalControl {
    inner: Arc<Mutex<ServiceInner>>,
}

impl Control for EvalControl {
    fn invoke(&mut self, call: Call, router: &mut dyn CallRouter) -> Result<(), ErrorValue> {
        let mut inner = self.inner.lock();
        if call.is_reply() {
            inner.resume(call, router);
            Ok(())
        } else {
            inner.start(call, router)
        }
    }

    fn info(&self) -> ControlInfo {
        ControlInfo::of(ControlRole::Action)
    }
}

struct AbortControl {
    inner: Arc<Mutex<ServiceInner>>,
}

impl Control for AbortControl {
    fn invoke(&mut self, call: Call, router: &mut dyn CallRouter) -> Result<(), ErrorValue> {
        let aborted = self.inner.lock().abort(router);
        if call.expects_reply() {
            let reply = call
                .reply(router.time(), vec![Value::Bool(aborted)])
                .expect("expects_reply checked");
            router.route(reply);
        }
        Ok(())
    }
}

/// Builds the script-runner component and names its public surface.
pub struct ScriptService;

impl ScriptService {
    /// Service contract the runner provides.
    pub const SERVICE: &'static str = "script:eval";
    /// Root type identifier of the runner tree.
    pub const ROOT_TYPE: &'static str = "script:runner";
    /// Control accepting script text (and the interpreter's replies).
    pub const EVAL: &'static str = "eval";
    /// Control abandoning the active evaluation.
    pub const ABORT: &'static str = "abort";

    /// A detached runner tree with [`CoreCommands`] plus `installers`
    /// applied to its root scope.
    #[must_use]
    pub fn tree(installers: &[Arc<dyn CommandInstaller>]) -> ComponentRef {
        let ns = Namespace::root();
        CoreCommands.install(&ns);
        for installer in installers {
            installer.install(&ns);
        }
        let inner = Arc::new(Mutex::new(ServiceInner { ns, active: None }));
        Component::build(ComponentType::new(Self::ROOT_TYPE))
            .control(
                Self::EVAL,
                EvalControl {
                    inner: Arc::clone(&inner),
                },
            )
            .control(Self::ABORT, AbortControl { inner })
            .into_ref()
    }
}

/// Factory provider for the script runner.
///
/// Register it on a hub and activation installs one runner root and
/// indexes the `script:eval` contract under its address.
#[derive(Default)]
pub struct ScriptProvider {
    installers: Vec<Arc<dyn CommandInstaller>>,
}

impl ScriptProvider {
    /// A provider installing only the built-in commands.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a command contributor applied to every runner this provider
    /// creates.
    #[must_use]
    pub fn with_installer(mut self, installer: Arc<dyn CommandInstaller>) -> Self {
        self.installers.push(installer);
        self
    }
}

impl ComponentProvider for ScriptProvider {
    fn component_types(&self) -> Vec<ComponentType> {
        Vec::new()
    }

    fn root_types(&self) -> Vec<ComponentType> {
        vec![ComponentType::new(ScriptService::ROOT_TYPE)]
    }

    fn create_root(&self, kind: &ComponentType) -> Result<ComponentRef, InstantiationError> {
        if kind.as_str() != ScriptService::ROOT_TYPE {
            return Err(InstantiationError::Unsupported(kind.clone()));
        }
        Ok(ScriptService::tree(&self.installers))
    }

    fn services(&self) -> Vec<ServiceDescriptor> {
        vec![ServiceDescriptor {
            service: ServiceType::new(ScriptService::SERVICE),
            root_type: ComponentType::new(ScriptService::ROOT_TYPE),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_component::testing::{request, RecordingRouter};
    use trellis_types::{CallKind, ControlAddress, Timestamp};

    fn eval_request(script: &str) -> Call {
        request(
            "/user.shell",
            "/script.eval",
            vec![Value::Str(script.into())],
        )
    }

    fn invoke(tree: &ComponentRef, control: &str, call: Call, router: &mut RecordingRouter) {
        tree.lock().invoke_control(control, call, router).unwrap();
    }

    #[test]
    fn routed_call_then_reply_completes_the_evaluation() {
        let tree = ScriptService::tree(&[]);
        let mut router = RecordingRouter::new();

        let req = eval_request("/dev.gain 0.5");
        invoke(&tree, "eval", req.clone(), &mut router);

        assert_eq!(router.sent.len(), 1);
        let out = router.sent[0].clone();
        assert_eq!(out.to(), &ControlAddress::parse("/dev.gain").unwrap());
        assert_eq!(out.from(), &ControlAddress::parse("/script.eval").unwrap());
        assert_eq!(out.args(), &[Value::Num(0.5)]);

        let reply = out.reply(Timestamp::ZERO, vec![Value::Num(0.5)]).unwrap();
        invoke(&tree, "eval", reply, &mut router);

        assert_eq!(router.sent.len(), 2);
        let answer = &router.sent[1];
        assert_eq!(answer.kind(), CallKind::Response);
        assert_eq!(answer.match_id(), req.match_id());
        assert_eq!(answer.to(), req.from());
        assert_eq!(answer.args(), &[Value::Num(0.5)]);
    }

    #[test]
    fn immediate_scripts_answer_without_routing() {
        let tree = ScriptService::tree(&[]);
        let mut router = RecordingRouter::new();

        let req = eval_request("set x 41; echo $x");
        invoke(&tree, "eval", req.clone(), &mut router);

        assert_eq!(router.sent.len(), 1);
        assert_eq!(router.sent[0].match_id(), req.match_id());
        assert_eq!(router.sent[0].args(), &[Value::Num(41.0)]);
    }

    #[test]
    fn bindings_survive_across_evaluations() {
        let tree = ScriptService::tree(&[]);
        let mut router = RecordingRouter::new();

        invoke(&tree, "eval", eval_request("set x 2"), &mut router);
        invoke(&tree, "eval", eval_request("echo $x"), &mut router);

        assert_eq!(router.sent[1].args(), &[Value::Num(2.0)]);
    }

    #[test]
    fn second_evaluation_while_suspended_is_busy() {
        let tree = ScriptService::tree(&[]);
        let mut router = RecordingRouter::new();
        invoke(&tree, "eval", eval_request("/slow.op"), &mut router);

        let err = tree
            .lock()
            .invoke_control("eval", eval_request("echo 1"), &mut router)
            .unwrap_err();
        assert_eq!(err.code(), "SCRIPT_BUSY");
    }

    #[test]
    fn syntax_and_argument_failures_surface_as_errors() {
        let tree = ScriptService::tree(&[]);
        let mut router = RecordingRouter::new();

        let err = tree
            .lock()
            .invoke_control("eval", eval_request("{open"), &mut router)
            .unwrap_err();
        assert_eq!(err.code(), "SCRIPT_UNTERMINATED_BRACE");

        let err = tree
            .lock()
            .invoke_control(
                "eval",
                request("/user.shell", "/script.eval", vec![]),
                &mut router,
            )
            .unwrap_err();
        assert_eq!(err.code(), "SCRIPT_BAD_ARGUMENTS");
        assert!(router.sent.is_empty());
    }

    #[test]
    fn abort_answers_requester_and_frees_the_service() {
        let tree = ScriptService::tree(&[]);
        let mut router = RecordingRouter::new();

        let req = eval_request("/slow.op");
        invoke(&tree, "eval", req.clone(), &mut router);
        let suspended = router.sent[0].clone();

        let abort = request("/user.shell", "/script.abort", vec![]);
        invoke(&tree, "abort", abort.clone(), &mut router);

        // Aborted-evaluation error first, then the abort's own reply.
        assert_eq!(router.sent.len(), 3);
        assert_eq!(router.sent[1].match_id(), req.match_id());
        assert_eq!(router.sent[1].error().unwrap().code(), "SCRIPT_ABORTED");
        assert_eq!(router.sent[2].match_id(), abort.match_id());
        assert_eq!(router.sent[2].args(), &[Value::Bool(true)]);

        // The late reply matches nothing and is ignored.
        let late = suspended.reply(Timestamp::ZERO, vec![Value::Num(1.0)]).unwrap();
        invoke(&tree, "eval", late, &mut router);
        assert_eq!(router.sent.len(), 3);

        // And the service is free again.
        invoke(&tree, "eval", eval_request("echo 7"), &mut router);
        assert_eq!(router.sent[3].args(), &[Value::Num(7.0)]);
    }

    #[test]
    fn abort_with_nothing_active_reports_false() {
        let tree = ScriptService::tree(&[]);
        let mut router = RecordingRouter::new();

        let abort = request("/user.shell", "/script.abort", vec![]);
        invoke(&tree, "abort", abort, &mut router);
        assert_eq!(router.sent[0].args(), &[Value::Bool(false)]);
    }

    #[test]
    fn quiet_evaluation_binds_but_never_answers() {
        let tree = ScriptService::tree(&[]);
        let mut router = RecordingRouter::new();

        let quiet = Call::quiet(
            ControlAddress::parse("/user.shell").unwrap(),
            ControlAddress::parse("/script.eval").unwrap(),
            Timestamp::ZERO,
            vec![Value::Str("set q 9".into())],
        );
        invoke(&tree, "eval", quiet, &mut router);
        assert!(router.sent.is_empty());

        invoke(&tree, "eval", eval_request("echo $q"), &mut router);
        assert_eq!(router.sent[0].args(), &[Value::Num(9.0)]);
    }

    #[test]
    fn provider_creates_runner_and_declares_the_contract() {
        let provider = ScriptProvider::new();
        assert_eq!(
            provider.root_types(),
            vec![ComponentType::new("script:runner")]
        );
        let services = provider.services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].service, ServiceType::new("script:eval"));

        let tree = provider
            .create_root(&ComponentType::new("script:runner"))
            .unwrap();
        assert!(tree.lock().has_control("eval"));
        assert!(tree.lock().has_control("abort"));

        assert!(provider
            .create_root(&ComponentType::new("other:thing"))
            .is_err());
    }
}
