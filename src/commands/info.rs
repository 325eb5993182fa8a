//! Read-only commands: status, listings, help.

use crate::core::context::Context;
use crate::core::error::RunnerError;
use crate::core::protocol::Response;
use crate::core::registry::{Command, CommandSpec, Invocation};
use crate::core::state::AgentData;
use crate::core::suite::Folder;
use crate::core::time::format_elapsed;
use crate::core::xml::{self, cdata, cdata_element, element, escape, opt_text};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fs;

const NO_SUITE: &str = "No test suite loaded";

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "history",
            params: &[],
            usage: "",
            summary: "Show the most recent commands.",
            details: "Lists up to the last 20 commands with their user and arguments, \
                      oldest first. Polling commands are not recorded.",
            allowed_states: None,
            denied_action: "show history",
            acl: false,
            factory: |inv| Box::new(History(inv)),
        },
        CommandSpec {
            name: "help",
            params: &["cmd"],
            usage: "[cmd]",
            summary: "Show available commands, or details for one command.",
            details: "Without an argument every command is listed with its synopsis. \
                      With a command name its full description is shown.",
            allowed_states: None,
            denied_action: "show help",
            acl: false,
            factory: |inv| Box::new(Help(inv)),
        },
        CommandSpec {
            name: "hostinfo",
            params: &[],
            usage: "",
            summary: "Describe the host the agent runs on.",
            details: "Reports operating system, pointer width, patch level, kernel \
                      version, hardware architecture and, when known, the machine id.",
            allowed_states: None,
            denied_action: "report host information",
            acl: false,
            factory: |inv| Box::new(HostInfo(inv)),
        },
        CommandSpec {
            name: "status",
            params: &[],
            usage: "",
            summary: "Report the agent state, lock and run counters.",
            details: "Includes the run state, lock holder, state message, loaded suite \
                      and product, active testcase, counters, timestamps and the \
                      result upload state.",
            allowed_states: None,
            denied_action: "report status",
            acl: false,
            factory: |inv| Box::new(Status(inv)),
        },
        CommandSpec {
            name: "uploadstatus",
            params: &[],
            usage: "",
            summary: "Report where the current results stand with the results server.",
            details: "Shows upload state, uploading user, import type, result set id \
                      and the last upload error.",
            allowed_states: None,
            denied_action: "report upload status",
            acl: false,
            factory: |inv| Box::new(UploadStatus(inv)),
        },
        CommandSpec {
            name: "getcases",
            params: &[],
            usage: "",
            summary: "List the enabled testcases of the loaded suite.",
            details: "Each testcase is listed with its description and current result.",
            allowed_states: None,
            denied_action: "list testcases",
            acl: false,
            factory: |inv| Box::new(GetCases(inv)),
        },
        CommandSpec {
            name: "getsuites",
            params: &[],
            usage: "",
            summary: "List the available test suites and shared testcases.",
            details: "Suites and testcases are grouped by product folder.",
            allowed_states: None,
            denied_action: "list suites",
            acl: false,
            factory: |inv| Box::new(GetSuites(inv)),
        },
        CommandSpec {
            name: "getsaves",
            params: &[],
            usage: "",
            summary: "List saved runs.",
            details: "Every finished run is saved. Saves are listed by name with a \
                      summary of each; restore one with loadstate.",
            allowed_states: None,
            denied_action: "list saves",
            acl: false,
            factory: |inv| Box::new(GetSaves(inv)),
        },
        CommandSpec {
            name: "caseinfo",
            params: &["testcase"],
            usage: "<testcase>",
            summary: "Show the details of one testcase.",
            details: "Includes documentation, result, timestamps, log lines and the \
                      names of result files that getfile can fetch.",
            allowed_states: None,
            denied_action: "describe a testcase",
            acl: false,
            factory: |inv| Box::new(CaseInfo(inv)),
        },
        CommandSpec {
            name: "getfile",
            params: &["testcase", "filename"],
            usage: "<testcase> <filename>",
            summary: "Fetch a result file of a testcase.",
            details: "The file content is returned base64 encoded.",
            allowed_states: None,
            denied_action: "fetch a result file",
            acl: false,
            factory: |inv| Box::new(GetFile(inv)),
        },
    ]
}

struct History(Invocation);

impl Command for History {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        response.ack(ctx.history().render());
        Ok(())
    }
}

struct Help(Invocation);

impl Command for Help {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let text = match self.0.args.text("cmd") {
            None => ctx
                .registry
                .list()
                .map(|spec| format!("{}\n    {}\n\n", spec.synopsis(), spec.summary))
                .collect::<String>(),
            Some(name) => match ctx.registry.lookup(&name) {
                Some(spec) => format!(
                    "{}\n\n{}\n\n{}\n",
                    spec.synopsis(),
                    spec.summary,
                    spec.details
                ),
                None => format!("  ERROR: no such command \"{name}\"\n"),
            },
        };
        response.ack(format!("<help>{}</help>\n", cdata(&text)));
        Ok(())
    }
}

struct HostInfo(Invocation);

impl Command for HostInfo {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        response.ack(ctx.services.host.platform().to_xml());
        Ok(())
    }
}

/// `<status>` document for the current agent data.
pub fn render_status(agent: &AgentData) -> String {
    let suite = agent.suite.as_ref();
    let text = |v: Option<&str>| opt_text(v).to_string();
    let c = &agent.counters;
    let tasks: Vec<_> = agent.active_tasks.iter().map(|t| t.as_str()).collect();
    let fields: Vec<(&str, String)> = vec![
        ("state", agent.state.to_string()),
        ("locked", agent.lock.display().to_string()),
        ("executedBy", text(agent.executed_by.as_deref())),
        ("suite", text(suite.map(|s| s.name.as_str()))),
        ("product_name", text(suite.map(|s| s.product_name.as_str()))),
        ("product_codename", text(suite.map(|s| s.product_codename.as_str()))),
        ("product_version", text(suite.map(|s| s.product_version.as_str()))),
        ("build", text(suite.and_then(|s| s.build.as_deref()))),
        ("testcase", text(agent.active_case.as_deref())),
        ("testCount", c.test_count.to_string()),
        ("runCount", c.run_count.to_string()),
        ("passCount", c.pass_count.to_string()),
        ("failCount", c.fail_count.to_string()),
        ("blockCount", c.block_count.to_string()),
        ("crashCount", c.crash_count.to_string()),
        ("errorCount", c.error_count.to_string()),
        ("startTime", agent.start_time.to_string()),
        ("finishTime", agent.finish_time.to_string()),
        ("elapsedTime", format_elapsed(agent.elapsed())),
        (
            "previousState",
            text(agent.previous_state.map(|s| s.as_str())),
        ),
        ("tasks", tasks.join(",")),
    ];

    let mut out = String::from("<status>\n");
    for (tag, value) in &fields[..3] {
        out.push_str(&format!("  {}\n", element(tag, value)));
    }
    out.push_str(&format!("  {}\n", cdata_element("message", &agent.state_msg)));
    for (tag, value) in &fields[3..] {
        out.push_str(&format!("  {}\n", element(tag, value)));
    }
    out.push_str("  <resultState>\n");
    for line in agent.result_state.xml_fields().lines() {
        out.push_str(&format!("  {line}\n"));
    }
    out.push_str("  </resultState>\n</status>\n");
    out
}

struct Status(Invocation);

impl Command for Status {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let xml = ctx.agent.read(render_status);
        response.ack(xml);
        Ok(())
    }
}

struct UploadStatus(Invocation);

impl Command for UploadStatus {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let fields = ctx.agent.read(|a| a.result_state.xml_fields());
        response.ack(format!("<resultState>\n{fields}</resultState>\n"));
        Ok(())
    }
}

struct GetCases(Invocation);

impl Command for GetCases {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let agent = ctx.agent.lock();
        let suite = agent.require_suite(NO_SUITE)?;
        let mut out = String::from("<testcases>\n");
        for case in suite.enabled_cases() {
            out.push_str("  <testcase>\n");
            out.push_str(&format!("    {}\n", element("name", &case.name)));
            out.push_str(&format!("    {}\n", cdata_element("description", &case.description)));
            out.push_str(&format!("    {}\n", element("status", case.result.as_str())));
            out.push_str("  </testcase>\n");
        }
        out.push_str("</testcases>\n");
        response.ack(out);
        Ok(())
    }
}

fn render_folders(root: &str, item_tag: &str, folders: &[Folder]) -> String {
    let mut out = format!("<{root}>\n");
    for folder in folders {
        out.push_str("  <folder>\n");
        out.push_str(&format!("    {}\n", element("product", &folder.name)));
        out.push_str(&format!("    {}\n", element(item_tag, &folder.entries.join(","))));
        out.push_str("  </folder>\n");
    }
    out.push_str(&format!("</{root}>\n"));
    out
}

struct GetSuites(Invocation);

impl Command for GetSuites {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let suites = ctx.catalog.list_suites()?;
        let cases = ctx.catalog.list_cases()?;
        response.ack(format!(
            "{}{}",
            render_folders("testsuites", "suites", &suites),
            render_folders("testcases", "cases", &cases)
        ));
        Ok(())
    }
}

struct GetSaves(Invocation);

impl Command for GetSaves {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let saves = ctx.saves.list()?;
        let names: Vec<_> = saves.iter().map(|(n, _)| n.as_str()).collect();
        let mut out = format!("{}\n<details>\n", element("saves", &names.join(",")));
        for (name, summary) in &saves {
            out.push_str(&format!("  <save name=\"{}\">\n", escape(name)));
            for (tag, value) in summary.fields() {
                out.push_str(&format!("    {}\n", element(tag, &value)));
            }
            out.push_str("  </save>\n");
        }
        out.push_str("</details>\n");
        response.ack(out);
        Ok(())
    }
}

fn required(inv: &Invocation, key: &str, command: &str) -> Result<String, RunnerError> {
    inv.args
        .text(key)
        .ok_or_else(|| RunnerError::client(format!("{command} requires a {key}")))
}

struct CaseInfo(Invocation);

impl Command for CaseInfo {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let name = required(&self.0, "testcase", "caseinfo")?;
        let agent = ctx.agent.lock();
        let case = agent.require_suite(NO_SUITE)?.case(&name)?;
        let files: Vec<_> = case.result_data.iter().map(|f| f.name.as_str()).collect();
        let mut out = String::from("<testcase>\n");
        out.push_str(&format!("  {}\n", element("name", &case.name)));
        out.push_str(&format!("  {}\n", cdata_element("description", &case.description)));
        out.push_str(&format!("  {}\n", cdata_element("documentation", &case.documentation)));
        out.push_str(&format!("  {}\n", element("enabled", &case.enabled.to_string())));
        out.push_str(&format!("  {}\n", element("status", case.result.as_str())));
        out.push_str(&format!("  {}\n", element("startTime", &case.start_time.to_string())));
        out.push_str(&format!("  {}\n", element("finishTime", &case.finish_time.to_string())));
        out.push_str(&format!("  {}\n", cdata_element("log", &case.log.join("\n"))));
        out.push_str(&format!("  {}\n", element("files", &files.join(","))));
        out.push_str("</testcase>\n");
        response.ack(out);
        Ok(())
    }
}

struct GetFile(Invocation);

impl Command for GetFile {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let testcase = required(&self.0, "testcase", "getfile")?;
        let filename = required(&self.0, "filename", "getfile")?;
        let path = {
            let agent = ctx.agent.lock();
            let case = agent.require_suite(NO_SUITE)?.case(&testcase)?;
            case.result_file(&filename)
                .map(|f| f.path.clone())
                .ok_or_else(|| {
                    RunnerError::client(format!(
                        "testcase \"{testcase}\" has no result file named \"{filename}\""
                    ))
                })?
        };
        let bytes = fs::read(&path).map_err(|e| {
            RunnerError::server(format!("cannot read {}: {e}", path.display()))
        })?;
        response.ack(format!(
            "<file name=\"{}\">{}</file>\n",
            xml::escape(&filename),
            cdata(&BASE64.encode(bytes))
        ));
        Ok(())
    }
}
