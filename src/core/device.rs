//! Device under test.
//!
//! The agent only talks to the device through [`Device`]. [`ShellDevice`] runs
//! everything through a local shell; bridge tools (adb, ssh, serial consoles)
//! are reached by configuring command strings that wrap them.

use crate::core::config::DeviceConfig;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

static PROPERTY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(.+)\]: \[(.*)\]$").unwrap());

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },
    #[error("failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("device command failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
        }
    }
}

pub trait Device: Send + Sync {
    fn run_shell_command(&self, command: &str, timeout: Duration)
    -> Result<CommandOutput, DeviceError>;
    fn push_file(&self, local: &Path, remote: &Path) -> Result<(), DeviceError>;
    fn pull_file(&self, remote: &Path, local: &Path) -> Result<(), DeviceError>;
    fn read_properties(&self) -> Result<BTreeMap<String, String>, DeviceError>;
    fn control_service(&self, name: &str, action: ServiceAction) -> Result<(), DeviceError>;
}

/// Parses `[key]: [value]` lines; anything else is ignored.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            PROPERTY_LINE
                .captures(line.trim())
                .map(|c| (c[1].to_string(), c[2].to_string()))
        })
        .collect()
}

/// Substitutes `{key}` placeholders.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (k, v)| {
        acc.replace(&format!("{{{k}}}"), v)
    })
}

/// Reads `pipe` to its end on a detached thread. Invalid UTF-8 is replaced
/// rather than dropping the stream.
fn spawn_reader(pipe: Option<impl Read + Send + 'static>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                warn!(error = %e, read = buf.len(), "device output read failed");
            }
        }
        // The receiver is gone once the caller has timed out.
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

#[derive(Debug, Clone)]
pub struct ShellDevice {
    config: DeviceConfig,
    timeout: Duration,
}

impl ShellDevice {
    pub fn new(config: DeviceConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    fn copy_verified(from: &Path, to: &Path) -> Result<(), DeviceError> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| DeviceError::Transfer(e.to_string()))?;
        }
        let copied = fs::copy(from, to).map_err(|e| {
            DeviceError::Transfer(format!("{} -> {}: {e}", from.display(), to.display()))
        })?;
        let expected = fs::metadata(from)
            .map_err(|e| DeviceError::Transfer(e.to_string()))?
            .len();
        if copied != expected {
            return Err(DeviceError::Transfer(format!(
                "{} -> {}: copied {copied} of {expected} bytes",
                from.display(),
                to.display()
            )));
        }
        Ok(())
    }
}

impl Device for ShellDevice {
    fn run_shell_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, DeviceError> {
        debug!(command, timeout_secs = timeout.as_secs(), "device command");
        let mut child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DeviceError::Launch {
                command: command.to_string(),
                source,
            })?;

        // Drain pipes on their own threads so a chatty child cannot block on a
        // full pipe while we poll.
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let started = Instant::now();
        let deadline = started + timeout;
        let timed_out = || DeviceError::Timeout {
            command: command.to_string(),
            secs: timeout.as_secs(),
        };
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= timeout => {
                    if let Err(e) = child.kill() {
                        warn!(command, error = %e, "failed to kill timed out command");
                    }
                    if let Err(e) = child.wait() {
                        warn!(command, error = %e, "failed to reap timed out command");
                    }
                    return Err(timed_out());
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(DeviceError::Failed(format!("{command}: {e}")));
                }
            }
        };

        // A background grandchild can hold the pipes open after the shell exits.
        let collect = |rx: Receiver<String>| {
            let wait = deadline
                .saturating_duration_since(Instant::now())
                .max(POLL_INTERVAL);
            rx.recv_timeout(wait).map_err(|_| {
                warn!(command, "output pipe still open at deadline");
                timed_out()
            })
        };
        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;
        Ok(CommandOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }

    fn push_file(&self, local: &Path, remote: &Path) -> Result<(), DeviceError> {
        Self::copy_verified(local, remote)
    }

    fn pull_file(&self, remote: &Path, local: &Path) -> Result<(), DeviceError> {
        Self::copy_verified(remote, local)
    }

    fn read_properties(&self) -> Result<BTreeMap<String, String>, DeviceError> {
        let out = self.run_shell_command(&self.config.properties_command, self.timeout)?;
        if !out.success() {
            return Err(DeviceError::Failed(format!(
                "'{}' exited with {:?}",
                self.config.properties_command, out.exit_code
            )));
        }
        Ok(parse_properties(&out.stdout))
    }

    fn control_service(&self, name: &str, action: ServiceAction) -> Result<(), DeviceError> {
        let command = render_template(
            &self.config.service_command,
            &[("name", name), ("action", action.as_str())],
        );
        let out = self.run_shell_command(&command, self.timeout)?;
        if out.success() {
            Ok(())
        } else {
            Err(DeviceError::Failed(format!(
                "{command}: {}",
                out.stderr.trim()
            )))
        }
    }
}
