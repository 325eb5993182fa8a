#[path = "../common/mod.rs"]
mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::Harness;
use std::fs;
use svcrunner::core::protocol::ResponseCode;
use svcrunner::core::state::RunState;

#[test]
fn idle_status_document() {
    let h = Harness::new();
    let resp = h.cmd("bob", "status", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    let xml = resp.payload;
    assert!(xml.starts_with("<status>\n"));
    assert!(xml.ends_with("</status>\n"));
    assert!(xml.contains("<state>Idle</state>"));
    assert!(xml.contains("<locked>False</locked>"));
    assert!(xml.contains("<message><![CDATA[idle]]></message>"));
    assert!(xml.contains("<suite>None</suite>"));
    assert!(xml.contains("<testCount>0</testCount>"));
    assert!(xml.contains("<uploadState>none</uploadState>"));
}

#[test]
fn status_reflects_loaded_suite() {
    let h = Harness::new();
    assert_eq!(h.cmd("bob", "lock", "").code, ResponseCode::Ack);
    assert_eq!(h.cmd("bob", "load", "widget.smoke").code, ResponseCode::Ack);
    let xml = h.cmd("bob", "status", "").payload;
    assert!(xml.contains("<state>SuiteLoaded</state>"));
    assert!(xml.contains("<locked>bob</locked>"));
    assert!(xml.contains("<suite>smoke</suite>"));
    assert!(xml.contains("<product_name>Widget</product_name>"));
    assert!(xml.contains("<product_version>2.1</product_version>"));
    assert!(xml.contains("<testCount>3</testCount>"));
    assert!(xml.contains("<message><![CDATA[Loaded smoke]]></message>"));
}

#[test]
fn help_lists_and_describes_commands() {
    let h = Harness::new();
    let all = h.cmd("bob", "help", "").payload;
    assert!(all.starts_with("<help><![CDATA["));
    for synopsis in ["load <suite>", "getfile <testcase> <filename>", "status", "quit"] {
        assert!(all.contains(synopsis), "help is missing {synopsis}");
    }

    let one = h.cmd("bob", "help", "kickstart").payload;
    assert!(one.contains("kickstart <suite> <url1^^url2...> <product1^^product2...>"));
    assert!(one.contains("KickstartError"));

    let resp = h.cmd("bob", "help", "nope");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert!(resp.payload.contains("ERROR: no such command \"nope\""));
}

#[test]
fn hostinfo_reports_platform() {
    let h = Harness::new();
    let resp = h.cmd("bob", "hostinfo", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert_eq!(
        resp.payload,
        "<hostinfo>\n  <system>Linux</system>\n  <arch>64bit</arch>\n  <patch>6.1.0</patch>\n  \
         <version>#1 SMP</version>\n  <hardware>x86_64</hardware>\n  <uid>host-1</uid>\n</hostinfo>\n"
    );
}

#[test]
fn getsuites_groups_by_product() {
    let h = Harness::new();
    let cases = h.tmp.path().join("testcases/widget");
    fs::create_dir_all(&cases).expect("mkdir");
    fs::write(cases.join("boot.toml"), "command = \"true\"\n").expect("write");
    fs::create_dir_all(h.tmp.path().join("testsuites/.hidden")).expect("mkdir");

    let resp = h.cmd("bob", "getsuites", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert!(resp.payload.contains("<product>widget</product>"));
    assert!(resp.payload.contains("<suites>smoke</suites>"));
    assert!(resp.payload.contains("<cases>boot</cases>"));
    assert!(!resp.payload.contains(".hidden"));
}

#[test]
fn getcases_needs_a_suite() {
    let h = Harness::new();
    let resp = h.cmd("bob", "getcases", "");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "No test suite loaded");

    assert_eq!(h.cmd("bob", "load", "smoke").code, ResponseCode::Ack);
    let resp = h.cmd("bob", "getcases", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert_eq!(resp.payload.matches("<testcase>").count(), 3);
    assert_eq!(resp.payload.matches("<status>NOTRUN</status>").count(), 3);
}

#[test]
fn getsaves_is_empty_before_any_run() {
    let h = Harness::new();
    let resp = h.cmd("bob", "getsaves", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert!(resp.payload.starts_with("<saves></saves>\n"));
}

#[test]
fn caseinfo_and_getfile_after_a_run() {
    let h = Harness::new();
    assert_eq!(h.cmd("bob", "load", "widget/smoke").code, ResponseCode::Ack);
    assert_eq!(h.cmd("bob", "start", "").code, ResponseCode::Ack);
    h.settle();
    assert_eq!(h.state(), RunState::SuiteComplete);

    let resp = h.cmd("bob", "caseinfo", "caseA");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert!(resp.payload.contains("<name>caseA</name>"));
    assert!(resp.payload.contains("<files>output.log</files>"));
    assert!(resp.payload.contains("scripted"));

    let resp = h.cmd("bob", "getfile", "caseA output.log");
    assert_eq!(resp.code, ResponseCode::Ack);
    let encoded = BASE64.encode("output of caseA");
    assert_eq!(
        resp.payload,
        format!("<file name=\"output.log\"><![CDATA[{encoded}]]></file>\n")
    );

    let resp = h.cmd("bob", "getfile", "caseA missing.log");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(
        resp.payload,
        "testcase \"caseA\" has no result file named \"missing.log\""
    );

    let resp = h.cmd("bob", "caseinfo", "caseQ");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "No testcase named 'caseQ' in suite 'smoke'");

    let resp = h.cmd("bob", "getfile", "caseA");
    assert_eq!(resp.code, ResponseCode::ClientError);
    assert_eq!(resp.payload, "getfile requires a filename");
}

#[test]
fn uploadstatus_before_any_upload() {
    let h = Harness::new();
    let resp = h.cmd("bob", "uploadstatus", "");
    assert_eq!(resp.code, ResponseCode::Ack);
    assert!(resp.payload.starts_with("<resultState>\n"));
    assert!(resp.payload.contains("<uploadState>none</uploadState>"));
    assert!(resp.payload.ends_with("</resultState>\n"));
}
