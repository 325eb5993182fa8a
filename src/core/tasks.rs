//! Detached background work.
//!
//! Long operations (test runs, uploads, snapshots, kickstart, OS updates) run
//! on named threads. Each kind is recorded in `AgentData::active_tasks` while
//! it runs so `status` can report it; results flow back only through agent
//! data field writes.

use crate::core::error::RunnerError;
use crate::core::state::SharedAgent;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    TestRun,
    Upload,
    CodeCoverage,
    Snapshot,
    Revert,
    Kickstart,
    OsUpdate,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::TestRun => "testrun",
            TaskKind::Upload => "upload",
            TaskKind::CodeCoverage => "codecoverage",
            TaskKind::Snapshot => "snapshot",
            TaskKind::Revert => "revert",
            TaskKind::Kickstart => "kickstart",
            TaskKind::OsUpdate => "osupdate",
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskSet {
    handles: Mutex<Vec<(TaskKind, JoinHandle<()>)>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` on a new thread after `delay`.
    pub fn spawn<F>(
        &self,
        agent: &SharedAgent,
        kind: TaskKind,
        delay: Duration,
        work: F,
    ) -> Result<(), RunnerError>
    where
        F: FnOnce() + Send + 'static,
    {
        agent.update(|a| a.active_tasks.insert(kind));
        let task_agent = agent.clone();
        let spawned = thread::Builder::new()
            .name(format!("svcrunner-{}", kind.as_str()))
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                info!(task = kind.as_str(), "background task started");
                if catch_unwind(AssertUnwindSafe(work)).is_err() {
                    error!(task = kind.as_str(), "background task panicked");
                }
                task_agent.update(|a| a.active_tasks.remove(&kind));
                info!(task = kind.as_str(), "background task finished");
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                agent.update(|a| a.active_tasks.remove(&kind));
                return Err(e.into());
            }
        };

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|(_, h)| !h.is_finished());
        handles.push((kind, handle));
        Ok(())
    }

    /// Number of tasks whose threads have not exited.
    pub fn running(&self) -> usize {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Waits for every task, including tasks spawned by tasks.
    pub fn join_all(&self) {
        loop {
            let drained: Vec<_> = {
                let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
                handles.drain(..).collect()
            };
            if drained.is_empty() {
                return;
            }
            for (kind, handle) in drained {
                if handle.join().is_err() {
                    error!(task = kind.as_str(), "background task thread failed to join");
                }
            }
        }
    }
}
