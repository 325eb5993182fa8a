#[path = "../common/mod.rs"]
mod common;

use common::Harness;
use serde_json::{Map, Value};
use svcrunner::core::args::RawArgs;
use svcrunner::core::protocol::ResponseCode;
use svcrunner::core::state::{RunState, SETTLED_STATES};

fn full_args(params: &[&str]) -> RawArgs {
    let mut map = Map::new();
    for p in params {
        map.insert((*p).to_string(), Value::String("x".into()));
    }
    RawArgs::Keyed(map)
}

#[test]
fn illegal_states_are_refused_and_leave_state_unchanged() {
    let h = Harness::new();
    let specs: Vec<_> = h
        .ctx()
        .registry
        .list()
        .filter_map(|s| s.allowed_states.map(|allowed| (s.name, s.params, s.denied_action, allowed)))
        .collect();
    assert!(!specs.is_empty());

    for (name, params, action, allowed) in specs {
        for state in RunState::ALL {
            if allowed.contains(&state) {
                continue;
            }
            h.ctx().agent.update(|a| a.set_state(state));
            let resp = h.send(Some("bob"), name, full_args(params));
            assert_eq!(resp.code, ResponseCode::ClientError, "{name} in {state}");
            assert_eq!(
                resp.payload,
                format!("Can NOT {action} from state {state}"),
                "{name} in {state}"
            );
            assert_eq!(h.state(), state, "{name} changed state {state}");
        }
    }
}

#[test]
fn unrestricted_commands_answer_in_every_state() {
    let h = Harness::new();
    for state in RunState::ALL {
        h.ctx().agent.update(|a| a.set_state(state));
        for name in ["status", "uploadstatus", "history", "help", "hostinfo"] {
            let resp = h.cmd("bob", name, "");
            assert_eq!(resp.code, ResponseCode::Ack, "{name} in {state}");
        }
        assert_eq!(h.state(), state);
    }
}

#[test]
fn goidle_resets_from_every_settled_state() {
    let h = Harness::new();
    for state in SETTLED_STATES {
        h.ctx().agent.update(|a| {
            a.set_state(*state);
            a.state_msg = "busy".into();
            a.counters.test_count = 9;
        });
        let resp = h.cmd("bob", "goidle", "");
        assert_eq!(resp.code, ResponseCode::Ack, "goidle from {state}");
        assert_eq!(resp.payload, "<state>Idle</state>\n");
        h.ctx().agent.read(|a| {
            assert_eq!(a.state, RunState::Idle);
            assert_eq!(a.counters.test_count, 0);
            assert_eq!(a.state_msg, "idle");
        });
    }
}

#[test]
fn transitions_are_logged_with_origin() {
    let h = Harness::new();
    assert_eq!(h.cmd("bob", "load", "widget/smoke").code, ResponseCode::Ack);
    let path: Vec<_> = h
        .ctx()
        .agent
        .read(|a| a.transitions.iter().map(|t| (t.from, t.to)).collect());
    assert_eq!(
        path,
        vec![
            (RunState::Idle, RunState::SuiteLoading),
            (RunState::SuiteLoading, RunState::SuiteLoaded),
        ]
    );
}

#[test]
fn long_running_states_return_to_previous_state() {
    let h = Harness::new();
    assert_eq!(h.cmd("bob", "takesnapshot", "clean").code, ResponseCode::Ack);
    h.settle();
    assert_eq!(h.state(), RunState::Idle);
    assert_eq!(*h.snapshots.taken.lock().expect("taken"), vec!["clean".to_string()]);
    h.ctx().agent.read(|a| {
        assert!(a.transitions.iter().any(|t| t.to == RunState::Rebooting));
        assert!(a.active_tasks.is_empty());
    });

    assert_eq!(
        h.cmd("bob", "reverttolatestsnapshotofname", "clean").code,
        ResponseCode::Ack
    );
    h.settle();
    assert_eq!(h.state(), RunState::Idle);
    assert_eq!(*h.snapshots.reverted.lock().expect("reverted"), vec!["clean".to_string()]);
}
