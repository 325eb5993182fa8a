//! Suite loading and test-run control.

use crate::commands::info::render_status;
use crate::core::context::Context;
use crate::core::device::render_template;
use crate::core::error::RunnerError;
use crate::core::protocol::Response;
use crate::core::registry::{Command, CommandSpec, Invocation};
use crate::core::runner::{RunPlan, prepare_full_run};
use crate::core::state::{
    Counters, LOAD_STATES, RESTORE_STATES, RunState, SETTLED_STATES, SUBSET_STATES,
};
use crate::core::tasks::TaskKind;
use crate::core::time;
use crate::core::xml::element;
use std::time::Duration;
use tracing::{error, info};

const LIST_SEPARATOR: &str = "^^";

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "load",
            params: &["suite"],
            usage: "<suite>",
            summary: "Load a test suite.",
            details: "The suite is named by module path, e.g. 'smoke.basic'. An extra \
                      'build' key records the build under test.",
            allowed_states: Some(LOAD_STATES),
            denied_action: "load a test suite",
            acl: true,
            factory: |inv| Box::new(Load(inv)),
        },
        CommandSpec {
            name: "reload",
            params: &[],
            usage: "",
            summary: "Load the current test suite again from disk.",
            details: "Results and counters are discarded.",
            allowed_states: Some(LOAD_STATES),
            denied_action: "reload a test suite",
            acl: true,
            factory: |inv| Box::new(Reload(inv)),
        },
        CommandSpec {
            name: "start",
            params: &[],
            usage: "",
            summary: "Run the loaded test suite.",
            details: "Every enabled testcase runs in suite order on a background worker. \
                      Poll 'status' for progress.",
            allowed_states: Some(&[RunState::SuiteLoaded]),
            denied_action: "run a test suite",
            acl: true,
            factory: |inv| Box::new(Start::new(inv)),
        },
        CommandSpec {
            name: "stop",
            params: &[],
            usage: "",
            summary: "Stop the running suite after the current testcase.",
            details: "The suite ends in SuiteStopped and may be resumed.",
            allowed_states: Some(&[RunState::SuiteRunning, RunState::SubsetRunning]),
            denied_action: "stop a test suite",
            acl: true,
            factory: |inv| Box::new(Stop(inv)),
        },
        CommandSpec {
            name: "resume",
            params: &[],
            usage: "",
            summary: "Continue a stopped suite with the testcases not yet run.",
            details: "",
            allowed_states: Some(&[RunState::SuiteStopped]),
            denied_action: "resume a test suite",
            acl: true,
            factory: |inv| Box::new(Resume::new(inv)),
        },
        CommandSpec {
            name: "runsubset",
            params: &["testcases"],
            usage: "<case1,case2,...>",
            summary: "Run the named testcases of the loaded suite.",
            details: "Cases run in the given order. Earlier results of those cases are \
                      replaced. The agent returns to its prior state afterwards.",
            allowed_states: Some(SUBSET_STATES),
            denied_action: "run a subset of testcases",
            acl: true,
            factory: |inv| Box::new(RunSubset::new(inv)),
        },
        CommandSpec {
            name: "loadstate",
            params: &["statename"],
            usage: "<statename>",
            summary: "Restore a saved run.",
            details: "Saved runs are listed by 'getsaves'. The run comes back as \
                      SuiteComplete if it had completed, otherwise as SuiteStopped.",
            allowed_states: Some(RESTORE_STATES),
            denied_action: "load a saved state",
            acl: true,
            factory: |inv| Box::new(LoadState(inv)),
        },
        CommandSpec {
            name: "kickstart",
            params: &["suite", "install_urls", "uninstalls"],
            usage: "<suite> <url1^^url2...> <product1^^product2...>",
            summary: "Reinstall the product under test, then load and run a suite.",
            details: "Products in 'uninstalls' are removed first, then every installer \
                      in 'install_urls' is installed. Lists are separated by '^^'. \
                      A failure leaves the agent in KickstartError.",
            allowed_states: Some(SETTLED_STATES),
            denied_action: "kickstart",
            acl: true,
            factory: |inv| Box::new(Kickstart::new(inv)),
        },
        CommandSpec {
            name: "insanity",
            params: &["suite", "currentbuild", "previousbuild", "compliance_module"],
            usage: "<suite> <currentbuild> <previousbuild> <compliance_module>",
            summary: "Load and run a suite comparing two builds.",
            details: "The builds and compliance module are recorded on the suite and \
                      handed to its testcases.",
            allowed_states: Some(LOAD_STATES),
            denied_action: "run an insanity suite",
            acl: true,
            factory: |inv| Box::new(Insanity::new(inv)),
        },
    ]
}

/// Loads `module` into the agent, leaving it in `SuiteLoaded` or
/// `SuiteLoadFail`.
pub(crate) fn load_suite(ctx: &Context, module: &str) -> Result<(), RunnerError> {
    ctx.agent.update(|a| {
        a.state_msg = format!("Loading {module}");
        a.set_state(RunState::SuiteLoading);
    });
    match ctx.catalog.load(module) {
        Ok(suite) => {
            info!(suite = %suite.name, cases = suite.cases.len(), "suite loaded");
            ctx.agent.update(|a| {
                a.counters = Counters {
                    test_count: suite.enabled_count(),
                    ..Counters::default()
                };
                a.run_id = None;
                a.executed_by = None;
                a.start_time = 0;
                a.finish_time = 0;
                a.active_case = None;
                a.subset.clear();
                a.result_state = Default::default();
                a.state_msg = format!("Loaded {}", suite.name);
                a.suite = Some(suite);
                a.set_state(RunState::SuiteLoaded);
            });
            Ok(())
        }
        Err(e) => {
            error!(module, error = %e, "suite load failed");
            ctx.agent.update(|a| {
                a.suite = None;
                a.counters = Counters::default();
                a.state_msg = e.to_string();
                a.set_state(RunState::SuiteLoadFail);
            });
            Err(RunnerError::server(format!(
                "Failed to load test suite '{module}': {e}"
            )))
        }
    }
}

fn required(inv: &Invocation, key: &str) -> Result<String, RunnerError> {
    inv.args
        .text(key)
        .ok_or_else(|| RunnerError::client(format!("{key} is required")))
}

fn respond_status(ctx: &Context, response: &mut Response) {
    response.ack(ctx.agent.read(render_status));
}

struct Load(Invocation);

impl Command for Load {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let module = required(&self.0, "suite")?;
        ctx.agent
            .read(|a| a.ensure_state(LOAD_STATES, "load a test suite"))?;
        load_suite(ctx, &module)?;
        if let Some(build) = self.0.args.text("build") {
            ctx.agent.update(|a| {
                if let Some(suite) = a.suite.as_mut() {
                    suite.build = Some(build);
                }
            });
        }
        respond_status(ctx, response);
        Ok(())
    }
}

struct Reload(Invocation);

impl Command for Reload {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let loaded = ctx.agent.update(|a| {
            a.ensure_state(LOAD_STATES, "reload a test suite")?;
            match a.suite.as_ref() {
                Some(s) => Ok((s.module.clone(), s.build.clone())),
                None => {
                    a.state_msg = "No test suite to reload".to_string();
                    a.set_state(RunState::SuiteLoadFail);
                    Err(RunnerError::client(
                        "Attempt to reload when there is no test suite loaded",
                    ))
                }
            }
        });
        let (module, build) = loaded?;
        load_suite(ctx, &module)?;
        ctx.agent.update(|a| {
            if let Some(suite) = a.suite.as_mut() {
                suite.build = build;
            }
        });
        respond_status(ctx, response);
        Ok(())
    }
}

/// Commands that answer first and start the run worker afterwards.
struct Launcher {
    inv: Invocation,
    plan: Option<RunPlan>,
}

impl Launcher {
    fn new(inv: Invocation) -> Self {
        Self { inv, plan: None }
    }

    fn launch(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        match self.plan.take() {
            Some(plan) => ctx.runner.launch(ctx, plan),
            None => Ok(()),
        }
    }
}

struct Start(Launcher);

impl Start {
    fn new(inv: Invocation) -> Self {
        Self(Launcher::new(inv))
    }
}

impl Command for Start {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let results_dir = ctx.config.paths.results_dir();
        let mut agent = ctx.agent.lock();
        prepare_full_run(&mut agent, self.0.inv.user(), &results_dir)?;
        response.ack(render_status(&agent));
        self.0.plan = Some(RunPlan::Pending);
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        self.0.launch(ctx)
    }
}

struct Stop(Invocation);

impl Command for Stop {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let mut agent = ctx.agent.lock();
        agent.ensure_state(
            &[RunState::SuiteRunning, RunState::SubsetRunning],
            "stop a test suite",
        )?;
        agent.state_msg = "stopping".to_string();
        agent.set_state(RunState::SuiteStopping);
        ctx.runner.request_stop();
        info!(user = self.0.user(), "stop requested");
        response.ack(format!("{}\n", element("state", agent.state.as_str())));
        Ok(())
    }
}

struct Resume(Launcher);

impl Resume {
    fn new(inv: Invocation) -> Self {
        Self(Launcher::new(inv))
    }
}

impl Command for Resume {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let mut agent = ctx.agent.lock();
        agent.ensure_state(&[RunState::SuiteStopped], "resume a test suite")?;
        agent.require_suite("no test suite loaded")?;
        agent.finish_time = 0;
        agent.state_msg = "resuming".to_string();
        agent.set_state(RunState::SuiteStarting);
        info!(user = self.0.inv.user(), "resume requested");
        response.ack(render_status(&agent));
        self.0.plan = Some(RunPlan::Pending);
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        self.0.launch(ctx)
    }
}

struct RunSubset(Launcher);

impl RunSubset {
    fn new(inv: Invocation) -> Self {
        Self(Launcher::new(inv))
    }
}

impl Command for RunSubset {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let names = self.0.inv.args.list("testcases", ",");
        if names.is_empty() {
            return Err(RunnerError::client("no testcases given"));
        }
        let results_dir = ctx.config.paths.results_dir();
        let user = self.0.inv.user().to_string();

        let mut guard = ctx.agent.lock();
        let agent = &mut *guard;
        agent.ensure_state(SUBSET_STATES, "run a subset of testcases")?;
        let suite = agent
            .suite
            .as_mut()
            .ok_or_else(|| RunnerError::client("no test suite loaded"))?;
        for name in &names {
            suite.case(name)?;
        }
        if agent.run_id.is_none() {
            let run_id = time::new_event_id();
            suite.result_data_dir = suite
                .result_data_enabled
                .then(|| results_dir.join(&run_id));
            agent.run_id = Some(run_id);
            agent.executed_by = Some(user);
            agent.start_time = time::now_epoch();
        }
        agent.subset = names.clone();
        agent.state_msg = format!("running subset of {} testcases", names.len());
        agent.enter_long_running(RunState::SubsetRunning);
        response.ack(render_status(agent));
        self.0.plan = Some(RunPlan::Subset(names));
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        self.0.launch(ctx)
    }
}

struct LoadState(Invocation);

impl Command for LoadState {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let name = required(&self.0, "statename")?;
        let snapshot = ctx.saves.load(&name)?;
        let mut agent = ctx.agent.lock();
        agent.ensure_state(RESTORE_STATES, "load a saved state")?;
        agent.restore_snapshot(snapshot);
        agent.state_msg = format!("Restored {name}");
        info!(save = %name, state = %agent.state, "saved run restored");
        response.ack(render_status(&agent));
        Ok(())
    }
}

struct KickstartPlan {
    suite: String,
    installs: Vec<String>,
    uninstalls: Vec<String>,
    user: String,
}

struct Kickstart {
    inv: Invocation,
    plan: Option<KickstartPlan>,
}

impl Kickstart {
    fn new(inv: Invocation) -> Self {
        Self { inv, plan: None }
    }
}

impl Command for Kickstart {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let suite = required(&self.inv, "suite")?;
        let installs = self.inv.args.list("install_urls", LIST_SEPARATOR);
        let uninstalls = self.inv.args.list("uninstalls", LIST_SEPARATOR);
        let kickstart = &ctx.config.kickstart;
        if !installs.is_empty() && kickstart.install_command.is_none() {
            return Err(RunnerError::client("no install command configured"));
        }
        if !uninstalls.is_empty() && kickstart.uninstall_command.is_none() {
            return Err(RunnerError::client("no uninstall command configured"));
        }

        let mut agent = ctx.agent.lock();
        agent.ensure_state(SETTLED_STATES, "kickstart")?;
        agent.state_msg = "Initializing Kickstart".to_string();
        agent.set_state(RunState::Kickstart);
        response.ack(format!("{}\n", element("kickstart", &suite)));
        self.plan = Some(KickstartPlan {
            suite,
            installs,
            uninstalls,
            user: self.inv.user().to_string(),
        });
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        let Some(plan) = self.plan.take() else {
            return Ok(());
        };
        let task_ctx = ctx.clone();
        ctx.tasks
            .spawn(&ctx.agent, TaskKind::Kickstart, Duration::ZERO, move || {
                if let Err(e) = run_kickstart(&task_ctx, &plan) {
                    error!(suite = %plan.suite, error = %e, "kickstart failed");
                    task_ctx.agent.update(|a| {
                        a.state_msg = format!("Kickstart failed: {e}");
                        a.set_state(RunState::KickstartError);
                    });
                }
            })
    }
}

fn run_device_step(ctx: &Context, template: &str, key: &str, value: &str) -> Result<(), RunnerError> {
    let command = render_template(template, &[(key, value)]);
    let out = ctx
        .services
        .device
        .run_shell_command(&command, ctx.config.timeouts.device_command())?;
    if !out.success() {
        return Err(RunnerError::server(format!(
            "'{command}' failed: {}",
            out.stderr.trim()
        )));
    }
    Ok(())
}

fn run_kickstart(ctx: &Context, plan: &KickstartPlan) -> Result<(), RunnerError> {
    let kickstart = &ctx.config.kickstart;
    if let Some(template) = kickstart.uninstall_command.as_deref() {
        for product in &plan.uninstalls {
            ctx.agent.update(|a| a.state_msg = format!("Uninstalling {product}"));
            run_device_step(ctx, template, "product", product)?;
        }
    }
    if let Some(template) = kickstart.install_command.as_deref() {
        for url in &plan.installs {
            ctx.agent.update(|a| a.state_msg = format!("Installing {url}"));
            run_device_step(ctx, template, "url", url)?;
        }
    }

    load_suite(ctx, &plan.suite)?;
    let results_dir = ctx.config.paths.results_dir();
    ctx.agent
        .update(|a| prepare_full_run(a, &plan.user, &results_dir))?;
    info!(suite = %plan.suite, "kickstart complete, starting run");
    ctx.runner.launch(ctx, RunPlan::Pending)
}

struct Insanity(Launcher);

impl Insanity {
    fn new(inv: Invocation) -> Self {
        Self(Launcher::new(inv))
    }
}

impl Command for Insanity {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let inv = &self.0.inv;
        let module = required(inv, "suite")?;
        let current = inv.args.text("currentbuild");
        let previous = inv.args.text("previousbuild");
        let compliance = inv.args.text("compliance_module");
        ctx.agent
            .read(|a| a.ensure_state(LOAD_STATES, "run an insanity suite"))?;
        load_suite(ctx, &module)?;

        let results_dir = ctx.config.paths.results_dir();
        let mut agent = ctx.agent.lock();
        if let Some(suite) = agent.suite.as_mut() {
            suite.build = current;
            suite.previous_build = previous;
            suite.compliance_module = compliance;
        }
        prepare_full_run(&mut agent, inv.user(), &results_dir)?;
        response.ack(render_status(&agent));
        self.0.plan = Some(RunPlan::Pending);
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        self.0.launch(ctx)
    }
}
