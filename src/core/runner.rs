//! Test execution.
//!
//! A run executes the loaded suite's cases one at a time on a background
//! worker. Between cases the worker checks the stop flag; a stop request
//! therefore lets the current case finish. Counters and case results are
//! written back under the agent lock one case at a time.

use crate::core::context::Context;
use crate::core::device::{Device, DeviceError};
use crate::core::error::RunnerError;
use crate::core::state::{AgentData, RunState};
use crate::core::suite::{CaseResult, ResultFile, TestCase};
use crate::core::tasks::TaskKind;
use crate::core::time;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

pub const CASE_OUTPUT_FILE: &str = "output.log";

/// One case handed to a [`CaseExecutor`].
#[derive(Debug, Clone)]
pub struct CaseRun {
    pub suite: String,
    pub case: TestCase,
    /// Where result files go, when the suite keeps result data.
    pub result_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseReport {
    pub result: CaseResult,
    pub log: Vec<String>,
    pub files: Vec<ResultFile>,
}

impl CaseReport {
    pub fn new(result: CaseResult) -> Self {
        Self {
            result,
            log: Vec::new(),
            files: Vec::new(),
        }
    }
}

pub trait CaseExecutor: Send + Sync {
    fn run_case(&self, run: &CaseRun) -> Result<CaseReport, RunnerError>;
}

/// Runs each case's command on the device. Exit code 0 passes, 1 fails,
/// 2 blocks, a signal is a crash, anything else is an error.
pub struct DeviceCaseExecutor {
    device: Arc<dyn Device>,
}

impl DeviceCaseExecutor {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self { device }
    }
}

fn classify(exit_code: Option<i32>) -> CaseResult {
    match exit_code {
        Some(0) => CaseResult::Pass,
        Some(1) => CaseResult::Fail,
        Some(2) => CaseResult::Block,
        None => CaseResult::Crash,
        Some(_) => CaseResult::Error,
    }
}

impl CaseExecutor for DeviceCaseExecutor {
    fn run_case(&self, run: &CaseRun) -> Result<CaseReport, RunnerError> {
        let Some(command) = run.case.command.as_deref() else {
            let mut report = CaseReport::new(CaseResult::Block);
            report.log.push("no command defined for testcase".into());
            return Ok(report);
        };

        let timeout = Duration::from_secs(run.case.timeout_secs);
        let out = match self.device.run_shell_command(command, timeout) {
            Ok(out) => out,
            Err(DeviceError::Timeout { secs, .. }) => {
                let mut report = CaseReport::new(CaseResult::Error);
                report.log.push(format!("timed out after {secs}s"));
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        let mut report = CaseReport::new(classify(out.exit_code));
        report.log.push(match out.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        });

        if let Some(dir) = &run.result_dir {
            let case_dir = dir.join(&run.case.name);
            fs::create_dir_all(&case_dir)?;
            let path = case_dir.join(CASE_OUTPUT_FILE);
            fs::write(&path, format!("{}{}", out.stdout, out.stderr))?;
            report.files.push(ResultFile {
                path,
                name: CASE_OUTPUT_FILE.to_string(),
            });
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPlan {
    /// Every enabled case not yet executed, in suite order.
    Pending,
    /// The named cases, in the given order.
    Subset(Vec<String>),
}

#[derive(Debug, Default)]
pub struct TestRunner {
    stop: AtomicBool,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Starts the worker. The caller has already moved the agent into
    /// `SuiteStarting` or `SubsetRunning`.
    pub fn launch(&self, ctx: &Context, plan: RunPlan) -> Result<(), RunnerError> {
        self.stop.store(false, Ordering::SeqCst);
        let worker_ctx = ctx.clone();
        ctx.tasks
            .spawn(&ctx.agent, TaskKind::TestRun, Duration::ZERO, move || {
                run_plan(&worker_ctx, plan)
            })
    }
}

/// Resets results and counters and enters `SuiteStarting` for a fresh run.
pub fn prepare_full_run(
    agent: &mut AgentData,
    user: &str,
    results_dir: &Path,
) -> Result<(), RunnerError> {
    agent.ensure_state(&[RunState::SuiteLoaded], "run a test suite")?;
    let run_id = time::new_event_id();
    let suite = agent
        .suite
        .as_mut()
        .ok_or_else(|| RunnerError::client("no test suite loaded"))?;
    suite.reset_results();
    suite.result_data_dir = suite
        .result_data_enabled
        .then(|| results_dir.join(&run_id));
    agent.counters.clear_results();
    agent.executed_by = Some(user.to_string());
    agent.run_id = Some(run_id);
    agent.start_time = time::now_epoch();
    agent.finish_time = 0;
    agent.result_state = Default::default();
    agent.subset.clear();
    agent.state_msg = "starting".to_string();
    agent.set_state(RunState::SuiteStarting);
    Ok(())
}

fn plan_indices(agent: &AgentData, plan: &RunPlan) -> Vec<usize> {
    let Some(suite) = agent.suite.as_ref() else {
        return Vec::new();
    };
    match plan {
        RunPlan::Pending => suite
            .cases
            .iter()
            .enumerate()
            .filter(|(_, c)| c.enabled && !c.result.is_executed())
            .map(|(i, _)| i)
            .collect(),
        RunPlan::Subset(names) => names
            .iter()
            .filter_map(|n| suite.cases.iter().position(|c| &c.name == n))
            .collect(),
    }
}

fn run_plan(ctx: &Context, plan: RunPlan) {
    let subset = matches!(plan, RunPlan::Subset(_));
    let (indices, result_dir) = {
        let mut agent = ctx.agent.lock();
        if agent.suite.is_none() {
            agent.state_msg = "no test suite loaded".to_string();
            agent.set_state(RunState::SuiteErrored);
            return;
        }
        if !subset {
            agent.set_state(RunState::SuiteRunning);
            agent.state_msg = "running".to_string();
        }
        let dir = agent.suite.as_ref().and_then(|s| s.result_data_dir.clone());
        (plan_indices(&agent, &plan), dir)
    };
    if let Some(dir) = &result_dir {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "cannot create result directory");
        }
    }
    info!(cases = indices.len(), subset, "test run started");

    for index in indices {
        if ctx.runner.stop_requested() {
            break;
        }
        let run = {
            let mut guard = ctx.agent.lock();
            let agent = &mut *guard;
            let Some(suite) = agent.suite.as_mut() else {
                break;
            };
            let suite_name = suite.name.clone();
            let dir = suite.result_data_dir.clone();
            let Some(case) = suite.cases.get_mut(index) else {
                continue;
            };
            case.start_time = time::now_epoch();
            let run = CaseRun {
                suite: suite_name,
                case: case.clone(),
                result_dir: dir,
            };
            agent.active_case = Some(run.case.name.clone());
            agent.state_msg = format!("running {}", run.case.name);
            run
        };

        let report = match ctx.services.cases.run_case(&run) {
            Ok(report) => report,
            Err(e) => {
                warn!(case = %run.case.name, error = %e, "testcase execution failed");
                let mut report = CaseReport::new(CaseResult::Error);
                report.log.push(e.to_string());
                report
            }
        };
        info!(case = %run.case.name, result = report.result.as_str(), "testcase finished");

        let mut guard = ctx.agent.lock();
        let agent = &mut *guard;
        if let Some(case) = agent.suite.as_mut().and_then(|s| s.cases.get_mut(index)) {
            if case.result.is_executed() {
                agent.counters.retract(case.result);
            }
            case.result = report.result;
            case.finish_time = time::now_epoch();
            case.log.extend(report.log);
            case.result_data.extend(report.files);
            agent.counters.record(report.result);
        }
        agent.active_case = None;
    }

    let stopped = ctx.runner.stop_requested();
    let snapshot = {
        let mut agent = ctx.agent.lock();
        if subset {
            agent.subset.clear();
            agent.restore_previous(&[RunState::SubsetRunning, RunState::SuiteStopping]);
            agent.state_msg = if stopped {
                "subset stopped".to_string()
            } else {
                "subset complete".to_string()
            };
        } else if matches!(agent.state, RunState::SuiteRunning | RunState::SuiteStopping) {
            if stopped {
                agent.set_state(RunState::SuiteStopped);
                agent.state_msg = "stopped".to_string();
            } else {
                agent.finish_time = time::now_epoch();
                agent.set_state(RunState::SuiteComplete);
                agent.state_msg = "complete".to_string();
            }
        }
        agent.snapshot()
    };
    info!(stopped, "test run finished");

    if let Some(snap) = snapshot {
        if let Err(e) = ctx.saves.save(&snap) {
            warn!(run_id = %snap.run_id, error = %e, "failed to save run state");
        }
    }
}
