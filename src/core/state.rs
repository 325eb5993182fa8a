//! Run-state machine and the shared agent data it lives in.
//!
//! `AgentData` sits behind one mutex ([`SharedAgent`]). Command handlers and
//! background workers take the lock for one logical update at a time, so a
//! caller polling `status` never observes half of a transition.

use crate::core::error::RunnerError;
use crate::core::lock::LockState;
use crate::core::suite::{CaseResult, Suite};
use crate::core::tasks::TaskKind;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

const TRANSITION_LOG_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    SuiteLoading,
    SuiteLoaded,
    SuiteLoadFail,
    SuiteStarting,
    SuiteRunning,
    SubsetRunning,
    SuiteStopping,
    SuiteStopped,
    SuiteComplete,
    SuiteErrored,
    Uploading,
    UploadingCodeCoverage,
    Rebooting,
    Maintenance,
    MaintenanceError,
    Kickstart,
    KickstartError,
}

impl RunState {
    pub const ALL: [RunState; 18] = [
        RunState::Idle,
        RunState::SuiteLoading,
        RunState::SuiteLoaded,
        RunState::SuiteLoadFail,
        RunState::SuiteStarting,
        RunState::SuiteRunning,
        RunState::SubsetRunning,
        RunState::SuiteStopping,
        RunState::SuiteStopped,
        RunState::SuiteComplete,
        RunState::SuiteErrored,
        RunState::Uploading,
        RunState::UploadingCodeCoverage,
        RunState::Rebooting,
        RunState::Maintenance,
        RunState::MaintenanceError,
        RunState::Kickstart,
        RunState::KickstartError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::SuiteLoading => "SuiteLoading",
            RunState::SuiteLoaded => "SuiteLoaded",
            RunState::SuiteLoadFail => "SuiteLoadFail",
            RunState::SuiteStarting => "SuiteStarting",
            RunState::SuiteRunning => "SuiteRunning",
            RunState::SubsetRunning => "SubsetRunning",
            RunState::SuiteStopping => "SuiteStopping",
            RunState::SuiteStopped => "SuiteStopped",
            RunState::SuiteComplete => "SuiteComplete",
            RunState::SuiteErrored => "SuiteErrored",
            RunState::Uploading => "Uploading",
            RunState::UploadingCodeCoverage => "UploadingCodeCoverage",
            RunState::Rebooting => "Rebooting",
            RunState::Maintenance => "Maintenance",
            RunState::MaintenanceError => "MaintenanceError",
            RunState::Kickstart => "Kickstart",
            RunState::KickstartError => "KickstartError",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States in which nothing is in flight; `goidle` and `kickstart` are legal here.
pub const SETTLED_STATES: &[RunState] = &[
    RunState::Idle,
    RunState::SuiteLoaded,
    RunState::SuiteLoadFail,
    RunState::SuiteStopped,
    RunState::SuiteComplete,
    RunState::SuiteErrored,
    RunState::KickstartError,
    RunState::MaintenanceError,
];

/// States from which a saved run may be restored.
pub const RESTORE_STATES: &[RunState] = &[
    RunState::Idle,
    RunState::SuiteLoaded,
    RunState::SuiteLoadFail,
    RunState::SuiteStopped,
    RunState::SuiteComplete,
    RunState::SuiteErrored,
];

/// States from which a suite may be (re)loaded.
pub const LOAD_STATES: &[RunState] = &[
    RunState::Idle,
    RunState::SuiteLoaded,
    RunState::SuiteLoadFail,
    RunState::SuiteStopped,
    RunState::SuiteComplete,
    RunState::SuiteErrored,
    RunState::Kickstart,
];

pub const SUBSET_STATES: &[RunState] = &[
    RunState::SuiteLoaded,
    RunState::SuiteComplete,
    RunState::SuiteStopped,
];

pub const UPLOAD_STATES: &[RunState] = &[RunState::SuiteStopped, RunState::SuiteComplete];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub test_count: u32,
    pub run_count: u32,
    pub pass_count: u32,
    pub fail_count: u32,
    pub block_count: u32,
    pub crash_count: u32,
    pub error_count: u32,
}

impl Counters {
    fn slot(&mut self, result: CaseResult) -> Option<&mut u32> {
        match result {
            CaseResult::Pass => Some(&mut self.pass_count),
            CaseResult::Fail => Some(&mut self.fail_count),
            CaseResult::Block => Some(&mut self.block_count),
            CaseResult::Crash => Some(&mut self.crash_count),
            CaseResult::Error => Some(&mut self.error_count),
            CaseResult::NotRun => None,
        }
    }

    pub fn record(&mut self, result: CaseResult) {
        if let Some(slot) = self.slot(result) {
            *slot += 1;
            self.run_count += 1;
        }
    }

    /// Takes a previously recorded result back out, for re-executed cases.
    pub fn retract(&mut self, result: CaseResult) {
        if let Some(slot) = self.slot(result) {
            *slot = slot.saturating_sub(1);
            self.run_count = self.run_count.saturating_sub(1);
        }
    }

    /// Zeroes everything but the test count.
    pub fn clear_results(&mut self) {
        *self = Counters {
            test_count: self.test_count,
            ..Counters::default()
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UploadState {
    #[default]
    None,
    Uploading,
    Uploaded,
    Success,
    Failure,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::None => "none",
            UploadState::Uploading => "uploading",
            UploadState::Uploaded => "uploaded",
            UploadState::Success => "success",
            UploadState::Failure => "failure",
        }
    }
}

/// Where the results of the current run stand with the results server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultState {
    pub upload_state: UploadState,
    pub uploaded_by: Option<String>,
    pub import_type: Option<String>,
    pub result_set_id: Option<String>,
    pub upload_error: Option<String>,
}

impl ResultState {
    /// Inner lines of a `<resultState>` element.
    pub fn xml_fields(&self) -> String {
        use crate::core::xml::{element, opt_text};
        format!(
            "  {}\n  {}\n  {}\n  {}\n  {}\n",
            element("uploadState", self.upload_state.as_str()),
            element("uploadedBy", opt_text(self.uploaded_by.as_deref())),
            element("importType", opt_text(self.import_type.as_deref())),
            element("resultSetId", opt_text(self.result_set_id.as_deref())),
            element("uploadError", opt_text(self.upload_error.as_deref())),
        )
    }
}

/// Persistable copy of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub suite: Suite,
    pub counters: Counters,
    pub executed_by: Option<String>,
    pub start_time: u64,
    pub finish_time: u64,
    pub state: RunState,
    pub result_state: ResultState,
}

#[derive(Debug, Clone)]
pub struct AgentData {
    pub state: RunState,
    pub previous_state: Option<RunState>,
    pub state_msg: String,
    pub state_changed_at: u64,
    pub lock: LockState,
    pub executed_by: Option<String>,
    pub suite: Option<Suite>,
    pub counters: Counters,
    pub active_case: Option<String>,
    pub start_time: u64,
    pub finish_time: u64,
    pub run_id: Option<String>,
    pub subset: Vec<String>,
    pub result_state: ResultState,
    pub active_tasks: BTreeSet<TaskKind>,
    pub transitions: VecDeque<Transition>,
}

impl Default for AgentData {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            previous_state: None,
            state_msg: "idle".to_string(),
            state_changed_at: time::now_epoch(),
            lock: LockState::default(),
            executed_by: None,
            suite: None,
            counters: Counters::default(),
            active_case: None,
            start_time: 0,
            finish_time: 0,
            run_id: None,
            subset: Vec::new(),
            result_state: ResultState::default(),
            active_tasks: BTreeSet::new(),
            transitions: VecDeque::new(),
        }
    }
}

impl AgentData {
    /// Unconditional transition. Legality is checked by the caller.
    pub fn set_state(&mut self, to: RunState) {
        let from = self.state;
        let at = time::now_epoch();
        self.state = to;
        self.state_changed_at = at;
        if self.transitions.len() == TRANSITION_LOG_LEN {
            self.transitions.pop_front();
        }
        self.transitions.push_back(Transition { from, to, at });
        debug!(from = %from, to = %to, "state transition");
    }

    pub fn ensure_state(&self, allowed: &[RunState], action: &str) -> Result<(), RunnerError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RunnerError::client(format!(
                "Can NOT {action} from state {}",
                self.state
            )))
        }
    }

    /// Enters a long-running state, remembering where to come back to.
    pub fn enter_long_running(&mut self, to: RunState) {
        self.previous_state = Some(self.state);
        self.set_state(to);
    }

    /// Returns to `PREVIOUS_STATE` if the state is still `expected`; a later
    /// writer wins otherwise.
    pub fn restore_previous(&mut self, expected: &[RunState]) -> bool {
        if !expected.contains(&self.state) {
            return false;
        }
        let prev = self.previous_state.take().unwrap_or(RunState::Idle);
        self.set_state(prev);
        true
    }

    /// Back to a fresh idle agent. The lock, running tasks and transition log
    /// survive.
    pub fn reset(&mut self) {
        let lock = std::mem::take(&mut self.lock);
        let tasks = std::mem::take(&mut self.active_tasks);
        let transitions = std::mem::take(&mut self.transitions);
        let from = self.state;
        *self = AgentData {
            state: from,
            lock,
            active_tasks: tasks,
            transitions,
            ..AgentData::default()
        };
        self.set_state(RunState::Idle);
    }

    pub fn require_suite(&self, msg: &str) -> Result<&Suite, RunnerError> {
        self.suite.as_ref().ok_or_else(|| RunnerError::client(msg))
    }

    pub fn elapsed(&self) -> u64 {
        if self.start_time == 0 {
            return 0;
        }
        let end = if self.finish_time > 0 {
            self.finish_time
        } else {
            time::now_epoch()
        };
        end.saturating_sub(self.start_time)
    }

    pub fn snapshot(&self) -> Option<RunSnapshot> {
        Some(RunSnapshot {
            run_id: self.run_id.clone()?,
            suite: self.suite.clone()?,
            counters: self.counters.clone(),
            executed_by: self.executed_by.clone(),
            start_time: self.start_time,
            finish_time: self.finish_time,
            state: self.state,
            result_state: self.result_state.clone(),
        })
    }

    /// Replaces the current run with a saved one.
    pub fn restore_snapshot(&mut self, snap: RunSnapshot) {
        self.run_id = Some(snap.run_id);
        self.suite = Some(snap.suite);
        self.counters = snap.counters;
        self.executed_by = snap.executed_by;
        self.start_time = snap.start_time;
        self.finish_time = snap.finish_time;
        self.result_state = snap.result_state;
        self.active_case = None;
        self.subset.clear();
        let state = if snap.state == RunState::SuiteComplete {
            RunState::SuiteComplete
        } else {
            RunState::SuiteStopped
        };
        self.set_state(state);
    }
}

/// Handle to the agent data shared by the executor and background workers.
#[derive(Debug, Clone, Default)]
pub struct SharedAgent(Arc<Mutex<AgentData>>);

impl SharedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poisoning is ignored: every update leaves the data consistent before
    /// it can panic.
    pub fn lock(&self) -> MutexGuard<'_, AgentData> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read<R>(&self, f: impl FnOnce(&AgentData) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut AgentData) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }
}
