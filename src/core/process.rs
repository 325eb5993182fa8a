//! Control over the agent's own process and host.

use crate::core::error::RunnerError;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub trait ProcessControl: Send + Sync {
    /// Asks the accept loop to stop after the current connection.
    fn request_quit(&self);
    fn quit_requested(&self) -> bool;
    /// Replaces the running agent with a fresh instance.
    fn restart(&self) -> Result<(), RunnerError>;
    fn reboot(&self) -> Result<(), RunnerError>;
}

#[derive(Debug, Default)]
pub struct SystemProcess {
    quit: AtomicBool,
    reboot_command: Option<String>,
}

impl SystemProcess {
    pub fn new(reboot_command: Option<String>) -> Self {
        Self {
            quit: AtomicBool::new(false),
            reboot_command,
        }
    }
}

impl ProcessControl for SystemProcess {
    fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    fn restart(&self) -> Result<(), RunnerError> {
        let exe = std::env::current_exe()?;
        let args: Vec<String> = std::env::args().skip(1).collect();
        info!(exe = %exe.display(), "restarting agent");
        Command::new(&exe).args(&args).spawn()?;
        std::process::exit(0);
    }

    fn reboot(&self) -> Result<(), RunnerError> {
        let Some(cmd) = self.reboot_command.as_deref() else {
            warn!("reboot requested but no reboot command configured");
            return Err(RunnerError::server("no reboot command configured"));
        };
        info!(command = cmd, "rebooting host");
        let status = Command::new("sh").arg("-c").arg(cmd).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(RunnerError::server(format!("reboot command exited with {status}")))
        }
    }
}
