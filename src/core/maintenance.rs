//! Operating-system update collaborator for the `osupdate` command.

use crate::core::device::Device;
use crate::core::error::RunnerError;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: u32,
    pub failed: u32,
    pub reboot_required: bool,
}

pub trait OsUpdater: Send + Sync {
    fn supported(&self) -> bool;
    /// Number of applicable updates.
    fn search(&self) -> Result<u32, RunnerError>;
    /// Number of updates downloaded.
    fn download(&self) -> Result<u32, RunnerError>;
    fn install(&self) -> Result<InstallReport, RunnerError>;
}

/// Drives the update through three configured commands whose stdout carries
/// the counts.
pub struct ScriptedOsUpdater {
    device: Arc<dyn Device>,
    search: Option<String>,
    download: Option<String>,
    install: Option<String>,
    timeout: Duration,
}

impl ScriptedOsUpdater {
    pub fn new(
        device: Arc<dyn Device>,
        search: Option<String>,
        download: Option<String>,
        install: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            device,
            search,
            download,
            install,
            timeout,
        }
    }

    fn numbers(&self, command: Option<&str>, what: &str) -> Result<Vec<u32>, RunnerError> {
        let command =
            command.ok_or_else(|| RunnerError::server(format!("no {what} command configured")))?;
        let out = self.device.run_shell_command(command, self.timeout)?;
        if !out.success() {
            return Err(RunnerError::server(format!(
                "{what} failed: {}",
                out.stderr.trim()
            )));
        }
        out.stdout
            .split_whitespace()
            .map(|t| {
                t.parse::<u32>().map_err(|_| {
                    RunnerError::server(format!("{what} printed non-numeric output '{t}'"))
                })
            })
            .collect()
    }
}

impl OsUpdater for ScriptedOsUpdater {
    fn supported(&self) -> bool {
        self.search.is_some() && self.download.is_some() && self.install.is_some()
    }

    fn search(&self) -> Result<u32, RunnerError> {
        Ok(self
            .numbers(self.search.as_deref(), "update search")?
            .first()
            .copied()
            .unwrap_or(0))
    }

    fn download(&self) -> Result<u32, RunnerError> {
        Ok(self
            .numbers(self.download.as_deref(), "update download")?
            .first()
            .copied()
            .unwrap_or(0))
    }

    fn install(&self) -> Result<InstallReport, RunnerError> {
        let n = self.numbers(self.install.as_deref(), "update install")?;
        match n.as_slice() {
            [installed, failed, reboot] => Ok(InstallReport {
                installed: *installed,
                failed: *failed,
                reboot_required: *reboot != 0,
            }),
            _ => Err(RunnerError::server(
                "update install must print '<installed> <failed> <reboot>'",
            )),
        }
    }
}
