//! VM snapshot management.

use crate::core::device::{Device, render_template};
use crate::core::error::RunnerError;
use std::sync::Arc;
use std::time::Duration;

pub trait SnapshotManager: Send + Sync {
    fn take_snapshot(&self, name: &str) -> Result<(), RunnerError>;
    fn revert_to_latest(&self, name: &str) -> Result<(), RunnerError>;
}

/// Runs configured hypervisor commands through the device shell.
pub struct ScriptedSnapshots {
    device: Arc<dyn Device>,
    take_command: Option<String>,
    revert_command: Option<String>,
    timeout: Duration,
}

impl ScriptedSnapshots {
    pub fn new(
        device: Arc<dyn Device>,
        take_command: Option<String>,
        revert_command: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            device,
            take_command,
            revert_command,
            timeout,
        }
    }

    fn run(&self, template: Option<&str>, what: &str, name: &str) -> Result<(), RunnerError> {
        let template = template.ok_or_else(|| {
            RunnerError::server(format!("no {what} command configured"))
        })?;
        let command = render_template(template, &[("name", name)]);
        let out = self.device.run_shell_command(&command, self.timeout)?;
        if out.success() {
            Ok(())
        } else {
            Err(RunnerError::server(format!(
                "{what} '{name}' failed: {}",
                out.stderr.trim()
            )))
        }
    }
}

impl SnapshotManager for ScriptedSnapshots {
    fn take_snapshot(&self, name: &str) -> Result<(), RunnerError> {
        self.run(self.take_command.as_deref(), "snapshot", name)
    }

    fn revert_to_latest(&self, name: &str) -> Result<(), RunnerError> {
        self.run(self.revert_command.as_deref(), "revert", name)
    }
}
