#[path = "../common/mod.rs"]
mod common;

use common::{Harness, MockProcess};
use std::io;
use std::sync::Arc;
use svcrunner::core::args::RawArgs;
use svcrunner::core::context::Context;
use svcrunner::core::error::RunnerError;
use svcrunner::core::executor::Executor;
use svcrunner::core::history::HISTORY_LEN;
use svcrunner::core::process::ProcessControl;
use svcrunner::core::protocol::{self, Request, Response, ResponseCode, Transport};
use svcrunner::core::registry::{Command, CommandSpec, Invocation, Registry};
use svcrunner::core::state::RunState;

/// Records whether the quit flag was already set when the response went out.
struct OrderingTransport {
    process: Arc<MockProcess>,
    frame: Vec<u8>,
    quit_seen_at_send: Option<bool>,
    quit_seen_at_close: Option<bool>,
}

impl Transport for OrderingTransport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.quit_seen_at_send = Some(self.process.quit_requested());
        self.frame.extend_from_slice(frame);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.quit_seen_at_close = Some(self.process.quit_requested());
        Ok(())
    }
}

#[test]
fn response_is_sent_and_closed_before_post_action() {
    let h = Harness::new();
    let mut transport = OrderingTransport {
        process: h.process.clone(),
        frame: Vec::new(),
        quit_seen_at_send: None,
        quit_seen_at_close: None,
    };
    let code = h
        .executor
        .handle(&Request::new(Some("bob"), "quit", RawArgs::Absent), &mut transport);

    assert_eq!(code, ResponseCode::Ack);
    assert_eq!(transport.quit_seen_at_send, Some(false));
    assert_eq!(transport.quit_seen_at_close, Some(false));
    assert!(h.process.quit_requested());

    let resp = protocol::read_response(&mut transport.frame.as_slice()).expect("frame");
    assert_eq!(resp.payload, "<quit>True</quit>\n");
}

#[test]
fn unknown_command_is_refused_and_not_recorded() {
    let h = Harness::new();
    let resp = h.cmd("bob", "frobnicate", "");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "unknown command 'frobnicate'");
    assert!(h.ctx().history().is_empty());
}

#[test]
fn command_lookup_ignores_case() {
    let h = Harness::new();
    let resp = h.cmd("bob", "STATUS", "");
    assert_eq!(resp.code, ResponseCode::Ack);
}

#[test]
fn decode_failures_never_execute() {
    let h = Harness::new();
    let resp = h.cmd("bob", "lock", "now");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "lock too many arguments: expected 0 got 1");
    assert!(!h.ctx().agent.read(|a| a.lock.is_locked()));

    let mut map = serde_json::Map::new();
    map.insert("build".into(), serde_json::json!("7"));
    let resp = h.send(Some("bob"), "load", RawArgs::Keyed(map));
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "load missing argument suite");

    let resp = h.send(
        Some("bob"),
        "load",
        RawArgs::Other(serde_json::json!(["smoke"])),
    );
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "args data type array not supported");
    assert_eq!(h.state(), RunState::Idle);
    assert!(h.ctx().history().is_empty());
}

#[test]
fn server_side_error_command_yields_ser_and_is_recorded() {
    let h = Harness::new();
    let resp = h.cmd("bob", "error", "");
    assert_eq!(resp.code, ResponseCode::ServerError);
    assert_eq!(resp.payload, "Server side error");
    let history = h.ctx().history().render();
    assert!(history.contains("<command>bob error {}</command>"), "{history}");
}

#[test]
fn refused_requests_are_recorded_without_side_effects() {
    let h = Harness::new();
    assert_eq!(h.cmd("bob", "lock", "").code, ResponseCode::Ack);
    let resp = h.cmd("alice", "load", "widget/smoke");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "Permission denied! The service is locked by 'bob'");
    assert_eq!(h.state(), RunState::Idle);

    let history = h.ctx().history().render();
    assert!(history.contains("alice load {suite: widget/smoke}"), "{history}");
}

#[test]
fn history_keeps_last_twenty_and_skips_polling() {
    let h = Harness::new();
    for i in 0..(HISTORY_LEN + 5) {
        let resp = h.cmd("bob", "help", &format!("cmd{i}"));
        assert_eq!(resp.code, ResponseCode::Ack);
        assert_eq!(h.cmd("bob", "status", "").code, ResponseCode::Ack);
        assert_eq!(h.cmd("bob", "hostinfo", "").code, ResponseCode::Ack);
    }
    assert_eq!(h.ctx().history().len(), HISTORY_LEN);

    let resp = h.cmd("bob", "history", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert!(resp.payload.starts_with("<history>\n"));
    assert!(!resp.payload.contains("status"));
    assert!(!resp.payload.contains("{cmd: cmd4}"));
    assert!(resp.payload.contains("{cmd: cmd5}"));
    assert!(resp.payload.contains("{cmd: cmd24}"));
}

#[test]
fn legacy_none_token_decodes_to_null() {
    let h = Harness::new();
    let resp = h.cmd("bob", "help", "None");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert!(resp.payload.contains("runsubset <case1,case2,...>"));
}

#[test]
fn anonymous_requests_use_anonymous_identity() {
    let h = Harness::new();
    let resp = h.send(None, "lock", RawArgs::Absent);
    assert_eq!(resp.code, ResponseCode::Ack);
    assert_eq!(resp.payload, "<locked>anonymous</locked>\n");
}

const POST_RAN: &str = "post-response ran";

/// Fails in `execute` (panicking when asked) and marks the agent afterwards.
struct Explode(Invocation);

impl Command for Explode {
    fn execute(&mut self, _ctx: &Context, _response: &mut Response) -> Result<(), RunnerError> {
        if self.0.args.text("mode").as_deref() == Some("panic") {
            panic!("exploded while executing");
        }
        Err(RunnerError::server("execute failed"))
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        ctx.agent.update(|a| a.state_msg = POST_RAN.to_string());
        Ok(())
    }
}

/// Captures the agent's status message at send and close time.
struct MessageTransport {
    ctx: Context,
    frame: Vec<u8>,
    msg_at_send: Option<String>,
    msg_at_close: Option<String>,
}

impl Transport for MessageTransport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.msg_at_send = Some(self.ctx.agent.read(|a| a.state_msg.clone()));
        self.frame.extend_from_slice(frame);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.msg_at_close = Some(self.ctx.agent.read(|a| a.state_msg.clone()));
        Ok(())
    }
}

fn explode_executor(h: &Harness) -> Executor {
    let mut ctx = h.ctx().clone();
    ctx.registry = Arc::new(Registry::new(vec![CommandSpec {
        name: "explode",
        params: &["mode"],
        usage: "<mode>",
        summary: "Fail inside execute.",
        details: "",
        allowed_states: None,
        denied_action: "explode",
        acl: false,
        factory: |inv| Box::new(Explode(inv)),
    }]));
    Executor::new(ctx)
}

fn run_explode(executor: &Executor, mode: &str) -> (protocol::WireResponse, MessageTransport) {
    executor
        .context()
        .agent
        .update(|a| a.state_msg = "idle".to_string());
    let mut transport = MessageTransport {
        ctx: executor.context().clone(),
        frame: Vec::new(),
        msg_at_send: None,
        msg_at_close: None,
    };
    let request = Request::new(Some("bob"), "explode", RawArgs::Legacy(mode.to_string()));
    let code = executor.handle(&request, &mut transport);
    let resp = protocol::read_response(&mut transport.frame.as_slice()).expect("frame");
    assert_eq!(code, resp.code);
    (resp, transport)
}

#[test]
fn failing_execute_still_runs_post_response_after_close() {
    let h = Harness::new();
    let executor = explode_executor(&h);

    let (resp, transport) = run_explode(&executor, "fail");
    assert_eq!(resp.code, ResponseCode::ServerError);
    assert_eq!(resp.payload, "execute failed");
    assert_eq!(transport.msg_at_send.as_deref(), Some("idle"));
    assert_eq!(transport.msg_at_close.as_deref(), Some("idle"));
    assert_eq!(h.ctx().agent.read(|a| a.state_msg.clone()), POST_RAN);

    let history = h.ctx().history().render();
    assert!(history.contains("<command>bob explode {mode: fail}</command>"), "{history}");
}

#[test]
fn panicking_execute_is_a_server_error_and_still_runs_post_response() {
    let h = Harness::new();
    let executor = explode_executor(&h);

    let (resp, transport) = run_explode(&executor, "panic");
    assert_eq!(resp.code, ResponseCode::ServerError);
    assert_eq!(resp.payload, "exploded while executing");
    assert_eq!(transport.msg_at_close.as_deref(), Some("idle"));
    assert_eq!(h.ctx().agent.read(|a| a.state_msg.clone()), POST_RAN);
    assert_eq!(h.state(), RunState::Idle);

    assert_eq!(h.ctx().history().len(), 1);
    let history = h.ctx().history().render();
    assert!(history.contains("<command>bob explode {mode: panic}</command>"), "{history}");
}
