#[path = "../common/mod.rs"]
mod common;

use common::Harness;
use serde_json::{Map, Value, json};
use std::sync::atomic::Ordering;
use svcrunner::core::args::RawArgs;
use svcrunner::core::protocol::ResponseCode;
use svcrunner::core::state::{RunState, UploadState};
use svcrunner::core::suite::CaseResult;

fn keyed(pairs: &[(&str, Value)]) -> RawArgs {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    RawArgs::Keyed(map)
}

fn run_to_completion(h: &Harness) {
    assert_eq!(h.cmd("bob", "load", "widget/smoke").code, ResponseCode::Ack);
    assert_eq!(h.cmd("bob", "start", "").code, ResponseCode::Ack);
    h.settle();
    assert_eq!(h.state(), RunState::SuiteComplete);
}

#[test]
fn load_start_stop_resume_goidle() {
    let h = Harness::new();
    assert_eq!(h.cmd("bob", "lock", "").code, ResponseCode::Ack);

    let resp = h.cmd("bob", "load", "widget/smoke");
    assert_eq!(resp.code, ResponseCode::Ack, "{}", resp.payload);
    assert!(resp.payload.contains("<state>SuiteLoaded</state>"));
    assert!(resp.payload.contains("<testCount>3</testCount>"));

    h.cases.hold();
    let resp = h.cmd("bob", "start", "");
    assert_eq!(resp.code, ResponseCode::Ack, "{}", resp.payload);
    assert!(resp.payload.contains("<state>SuiteStarting</state>"));
    assert!(resp.payload.contains("<executedBy>bob</executedBy>"));
    h.wait_for_state(RunState::SuiteRunning);
    h.wait_for_cases(1);

    let resp = h.cmd("bob", "stop", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert_eq!(resp.payload, "<state>SuiteStopping</state>\n");
    h.cases.release();
    h.wait_for_state(RunState::SuiteStopped);
    h.settle();
    assert_eq!(h.ctx().agent.read(|a| a.counters.run_count), 1);

    let resp = h.cmd("bob", "resume", "");
    assert_eq!(resp.code, ResponseCode::Ack, "{}", resp.payload);
    h.settle();
    assert_eq!(h.state(), RunState::SuiteComplete);
    assert_eq!(h.cases.executed(), vec!["caseA", "caseB", "caseC"]);
    h.ctx().agent.read(|a| {
        assert_eq!(a.counters.run_count, 3);
        assert_eq!(a.counters.pass_count, 3);
        assert!(a.finish_time >= a.start_time);
    });

    let resp = h.cmd("bob", "goidle", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    h.ctx().agent.read(|a| {
        assert_eq!(a.state, RunState::Idle);
        assert!(a.suite.is_none());
        assert_eq!(a.lock.holder(), Some("bob"));
    });
}

#[test]
fn start_requires_a_loaded_suite() {
    let h = Harness::new();
    let resp = h.cmd("bob", "start", "");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "Can NOT run a test suite from state Idle");
    assert_eq!(h.state(), RunState::Idle);
}

#[test]
fn failed_load_enters_load_fail_and_reload_needs_a_suite() {
    let h = Harness::new();
    let resp = h.cmd("bob", "load", "widget/missing");
    assert_eq!(resp.code, ResponseCode::ServerError);
    assert!(resp.payload.contains("widget/missing"), "{}", resp.payload);
    assert_eq!(h.state(), RunState::SuiteLoadFail);

    let resp = h.cmd("bob", "reload", "");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(
        resp.payload,
        "Attempt to reload when there is no test suite loaded"
    );
    assert_eq!(h.state(), RunState::SuiteLoadFail);

    assert_eq!(h.cmd("bob", "load", "widget/smoke").code, ResponseCode::Ack);
    let resp = h.cmd("bob", "reload", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert_eq!(h.state(), RunState::SuiteLoaded);
}

#[test]
fn load_records_build_from_extra_key() {
    let h = Harness::new();
    let resp = h.send(
        Some("bob"),
        "load",
        keyed(&[("suite", json!("widget/smoke")), ("build", json!("1234"))]),
    );
    assert_eq!(resp.code, ResponseCode::Ack);
    assert!(resp.payload.contains("<build>1234</build>"));
}

#[test]
fn runsubset_rejects_unknown_cases() {
    let h = Harness::new();
    assert_eq!(h.cmd("bob", "load", "widget/smoke").code, ResponseCode::Ack);
    let resp = h.cmd("bob", "runsubset", "caseA,caseZ");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "No testcase named 'caseZ' in suite 'smoke'");
    assert_eq!(h.state(), RunState::SuiteLoaded);
    assert!(h.cases.executed().is_empty());
}

#[test]
fn runsubset_replaces_earlier_results_and_restores_state() {
    let h = Harness::new();
    h.cases.set("caseB", CaseResult::Fail);
    run_to_completion(&h);
    h.ctx().agent.read(|a| {
        assert_eq!(a.counters.pass_count, 2);
        assert_eq!(a.counters.fail_count, 1);
    });

    h.cases.set("caseB", CaseResult::Pass);
    let resp = h.cmd("bob", "runsubset", "caseB");
    assert_eq!(resp.code, ResponseCode::Ack, "{}", resp.payload);
    assert!(resp.payload.contains("<state>SubsetRunning</state>"));
    h.settle();

    assert_eq!(h.state(), RunState::SuiteComplete);
    h.ctx().agent.read(|a| {
        assert_eq!(a.counters.run_count, 3);
        assert_eq!(a.counters.pass_count, 3);
        assert_eq!(a.counters.fail_count, 0);
        assert!(a.subset.is_empty());
    });
    assert_eq!(h.cases.executed(), vec!["caseA", "caseB", "caseC", "caseB"]);
}

#[test]
fn stopping_a_subset_returns_to_prior_state() {
    let h = Harness::new();
    assert_eq!(h.cmd("bob", "load", "widget/smoke").code, ResponseCode::Ack);
    h.cases.hold();
    assert_eq!(h.cmd("bob", "runsubset", "caseA,caseB").code, ResponseCode::Ack);
    h.wait_for_cases(1);
    let resp = h.cmd("bob", "stop", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert_eq!(h.state(), RunState::SuiteStopping);
    h.cases.release();
    h.settle();
    assert_eq!(h.state(), RunState::SuiteLoaded);
    assert_eq!(h.ctx().agent.read(|a| a.state_msg.clone()), "subset stopped");
    assert_eq!(h.cases.executed(), vec!["caseA"]);
}

#[test]
fn completed_runs_are_saved_and_restorable() {
    let h = Harness::new();
    run_to_completion(&h);
    let run_id = h
        .ctx()
        .agent
        .read(|a| a.run_id.clone())
        .expect("run id");

    let resp = h.cmd("bob", "getsaves", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert!(resp.payload.contains(&format!("<saves>{run_id}</saves>")));

    assert_eq!(h.cmd("bob", "goidle", "").code, ResponseCode::Ack);
    let resp = h.cmd("bob", "loadstate", &run_id);
    assert_eq!(resp.code, ResponseCode::Ack, "{}", resp.payload);
    assert_eq!(h.state(), RunState::SuiteComplete);
    h.ctx().agent.read(|a| {
        assert_eq!(a.counters.pass_count, 3);
        assert_eq!(a.executed_by.as_deref(), Some("bob"));
    });

    let resp = h.cmd("bob", "loadstate", "nosuchsave");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "no saved state named 'nosuchsave'");
}

#[test]
fn upload_holds_admin_lock_and_hands_it_back() {
    let h = Harness::new();
    assert_eq!(h.cmd("bob", "lock", "").code, ResponseCode::Ack);
    run_to_completion(&h);

    let resp = h.cmd("bob", "uploadresults", "nightly");
    assert_eq!(resp.code, ResponseCode::Ack, "{}", resp.payload);
    assert!(resp.payload.contains("<uploadState>uploading</uploadState>"));
    assert!(resp.payload.contains("<uploadedBy>bob</uploadedBy>"));
    h.settle();

    assert_eq!(h.state(), RunState::SuiteComplete);
    h.ctx().agent.read(|a| {
        assert_eq!(a.lock.holder(), Some("bob"));
        assert_eq!(a.result_state.upload_state, UploadState::Uploaded);
        assert_eq!(a.result_state.import_type.as_deref(), Some("nightly"));
    });
    let requests = h.uploader.requests.lock().expect("requests");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].suite, "smoke");
}

#[test]
fn upload_failure_is_reported_in_result_state() {
    let h = Harness::new();
    run_to_completion(&h);
    h.uploader.fail.store(true, Ordering::SeqCst);
    assert_eq!(h.cmd("bob", "uploadresults", "nightly").code, ResponseCode::Ack);
    h.settle();
    assert_eq!(h.state(), RunState::SuiteComplete);
    let resp = h.cmd("bob", "uploadstatus", "");
    assert!(resp.payload.contains("<uploadState>failure</uploadState>"));
    assert!(resp.payload.contains("results server unreachable"));
    assert!(!h.ctx().agent.read(|a| a.lock.is_locked()));
}

#[test]
fn uploadresults_needs_a_finished_run() {
    let h = Harness::new();
    let resp = h.cmd("bob", "uploadresults", "nightly");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "Can NOT upload results from state Idle");
}

#[test]
fn setuploadresult_records_the_verdict() {
    let h = Harness::new();
    run_to_completion(&h);
    let resp = h.send(
        Some("results"),
        "setuploadresult",
        keyed(&[("id", json!("42")), ("error", Value::Null)]),
    );
    assert_eq!(resp.code, ResponseCode::Ack);
    assert_eq!(resp.payload, "<id>42</id><err>None</err>\n");
    let resp = h.cmd("bob", "uploadstatus", "");
    assert!(resp.payload.contains("<uploadState>success</uploadState>"));
    assert!(resp.payload.contains("<resultSetId>42</resultSetId>"));

    let resp = h.cmd("results", "setuploadresult", "None import-failed");
    assert_eq!(resp.code, ResponseCode::Ack);
    h.ctx().agent.read(|a| {
        assert_eq!(a.result_state.upload_state, UploadState::Failure);
        assert_eq!(a.result_state.upload_error.as_deref(), Some("import-failed"));
    });

    // Neither id nor error leaves the upload state alone.
    let resp = h.cmd("results", "setuploadresult", "None None");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert_eq!(resp.payload, "<id>None</id><err>None</err>\n");
    h.ctx().agent.read(|a| {
        assert_eq!(a.result_state.upload_state, UploadState::Failure);
        assert_eq!(a.result_state.upload_error, None);
        assert_eq!(a.result_state.result_set_id, None);
    });
}

#[test]
fn coverage_upload_uses_suitename_and_restores_state() {
    let h = Harness::new();
    run_to_completion(&h);
    let resp = h.send(
        Some("bob"),
        "uploadcodecoverage",
        keyed(&[("import_type", json!("lcov")), ("suitename", json!("cov-set"))]),
    );
    assert_eq!(resp.code, ResponseCode::Ack, "{}", resp.payload);
    h.settle();
    assert_eq!(h.state(), RunState::SuiteComplete);
    let requests = h.uploader.requests.lock().expect("requests");
    assert_eq!(requests[0].suite, "cov-set");
}

#[test]
fn kickstart_reinstalls_then_runs_the_suite() {
    let h = Harness::new();
    let resp = h.send(
        Some("bob"),
        "kickstart",
        keyed(&[
            ("suite", json!("widget/smoke")),
            ("install_urls", json!("http://a/1.pkg^^http://a/2.pkg")),
            ("uninstalls", json!("widget")),
        ]),
    );
    assert_eq!(resp.code, ResponseCode::Ack, "{}", resp.payload);
    h.settle();
    assert_eq!(h.state(), RunState::SuiteComplete);
    let commands = h.device.commands.lock().expect("commands").clone();
    assert_eq!(
        commands,
        vec![
            "uninstall widget".to_string(),
            "install http://a/1.pkg".to_string(),
            "install http://a/2.pkg".to_string(),
        ]
    );
    assert_eq!(h.ctx().agent.read(|a| a.counters.pass_count), 3);
}

#[test]
fn kickstart_with_missing_suite_ends_in_error() {
    let h = Harness::new();
    let resp = h.send(
        Some("bob"),
        "kickstart",
        keyed(&[
            ("suite", json!("widget/missing")),
            ("install_urls", Value::Null),
            ("uninstalls", Value::Null),
        ]),
    );
    assert_eq!(resp.code, ResponseCode::Ack);
    h.settle();
    assert_eq!(h.state(), RunState::KickstartError);
}

#[test]
fn insanity_records_builds_and_runs() {
    let h = Harness::new();
    let resp = h.cmd("bob", "insanity", "widget/smoke 2.0 1.9 compliance.basic");
    assert_eq!(resp.code, ResponseCode::Ack, "{}", resp.payload);
    h.settle();
    assert_eq!(h.state(), RunState::SuiteComplete);
    h.ctx().agent.read(|a| {
        let suite = a.suite.as_ref().expect("suite");
        assert_eq!(suite.build.as_deref(), Some("2.0"));
        assert_eq!(suite.previous_build.as_deref(), Some("1.9"));
        assert_eq!(suite.compliance_module.as_deref(), Some("compliance.basic"));
    });
}
