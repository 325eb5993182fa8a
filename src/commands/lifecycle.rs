//! Process, host and VM lifecycle commands.

use crate::core::context::Context;
use crate::core::error::RunnerError;
use crate::core::protocol::Response;
use crate::core::registry::{Command, CommandSpec, Invocation};
use crate::core::state::{RunState, SETTLED_STATES};
use crate::core::tasks::TaskKind;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "quit",
            params: &[],
            usage: "",
            summary: "Stop the agent.",
            details: "The agent answers, closes the connection, then stops accepting \
                      requests and exits.",
            allowed_states: None,
            denied_action: "quit",
            acl: true,
            factory: |inv| Box::new(Quit(inv)),
        },
        CommandSpec {
            name: "restart",
            params: &[],
            usage: "",
            summary: "Restart the agent process.",
            details: "Only legal while idle. The agent answers first, then replaces \
                      itself with a fresh instance.",
            allowed_states: Some(&[RunState::Idle]),
            denied_action: "restart service",
            acl: true,
            factory: |inv| Box::new(Restart(inv)),
        },
        CommandSpec {
            name: "goidle",
            params: &[],
            usage: "",
            summary: "Discard the loaded suite and results and return to Idle.",
            details: "Legal whenever nothing is in flight. The lock is kept.",
            allowed_states: Some(SETTLED_STATES),
            denied_action: "go idle",
            acl: true,
            factory: |inv| Box::new(GoIdle(inv)),
        },
        CommandSpec {
            name: "error",
            params: &[],
            usage: "",
            summary: "Fail on purpose with a server error.",
            details: "Used to exercise client error handling.",
            allowed_states: None,
            denied_action: "raise an error",
            acl: false,
            factory: |inv| Box::new(Fault(inv)),
        },
        CommandSpec {
            name: "cleanup",
            params: &[],
            usage: "",
            summary: "Empty the installers and results directories.",
            details: "Removes downloaded installers, result files and saved runs.",
            allowed_states: None,
            denied_action: "clean up",
            acl: false,
            factory: |inv| Box::new(Cleanup(inv)),
        },
        CommandSpec {
            name: "osupdate",
            params: &[],
            usage: "",
            summary: "Search for, download and install operating-system updates.",
            details: "Only legal while idle. The agent enters Maintenance, returns to \
                      Idle when done, enters MaintenanceError on failure, and reboots \
                      the host when an update requires it.",
            allowed_states: Some(&[RunState::Idle]),
            denied_action: "update the OS",
            acl: false,
            factory: |inv| Box::new(OsUpdate { inv, started: false }),
        },
        CommandSpec {
            name: "takesnapshot",
            params: &["snapshotname"],
            usage: "<snapshotname>",
            summary: "Take a VM snapshot of the host.",
            details: "Only legal while idle. The snapshot starts shortly after the \
                      response so the connection can close first.",
            allowed_states: Some(&[RunState::Idle]),
            denied_action: "take snapshot",
            acl: true,
            factory: |inv| Box::new(Snapshot::new(inv, SnapshotOp::Take)),
        },
        CommandSpec {
            name: "reverttolatestsnapshotofname",
            params: &["snapshotname"],
            usage: "<snapshotname>",
            summary: "Revert the host VM to the latest snapshot with the given name.",
            details: "Only legal while idle. The revert starts shortly after the \
                      response so the connection can close first.",
            allowed_states: Some(&[RunState::Idle]),
            denied_action: "revert to snapshot",
            acl: true,
            factory: |inv| Box::new(Snapshot::new(inv, SnapshotOp::Revert)),
        },
    ]
}

struct Quit(Invocation);

impl Command for Quit {
    fn execute(&mut self, _ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        response.ack("<quit>True</quit>\n");
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        info!(user = self.0.user(), "quit requested");
        ctx.services.process.request_quit();
        Ok(())
    }
}

struct Restart(Invocation);

impl Command for Restart {
    fn execute(&mut self, _ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        response.ack("<restart>True</restart>\n");
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        info!(user = self.0.user(), "restart requested");
        ctx.services.process.restart()
    }
}

struct GoIdle(Invocation);

impl Command for GoIdle {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let mut agent = ctx.agent.lock();
        agent.ensure_state(SETTLED_STATES, "go idle")?;
        agent.reset();
        response.ack(format!("<state>{}</state>\n", agent.state));
        Ok(())
    }
}

struct Fault(Invocation);

impl Command for Fault {
    fn execute(&mut self, _ctx: &Context, _response: &mut Response) -> Result<(), RunnerError> {
        Err(RunnerError::server("Server side error"))
    }
}

fn empty_dir(dir: &Path) -> Result<usize, RunnerError> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

struct Cleanup(Invocation);

impl Command for Cleanup {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let paths = &ctx.config.paths;
        let mut removed = 0;
        for dir in [paths.installers_dir(), paths.results_dir()] {
            removed += empty_dir(&dir)?;
        }
        info!(removed, "cleanup completed");
        response.ack("Cleanup completed \n");
        Ok(())
    }
}

struct OsUpdate {
    inv: Invocation,
    started: bool,
}

impl Command for OsUpdate {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        if !ctx.services.updater.supported() {
            return Err(RunnerError::client("Cannot perform updates on this host"));
        }
        let mut agent = ctx.agent.lock();
        agent.ensure_state(&[RunState::Idle], "update the OS")?;
        agent.state_msg = "Searching for updates".to_string();
        agent.enter_long_running(RunState::Maintenance);
        self.started = true;
        info!(user = self.inv.user(), "os update started");
        response.ack(format!("<state>{}</state>\n", agent.state));
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        if !self.started {
            return Ok(());
        }
        let task_ctx = ctx.clone();
        ctx.tasks
            .spawn(&ctx.agent, TaskKind::OsUpdate, Duration::ZERO, move || {
                run_os_update(&task_ctx)
            })
    }
}

fn run_os_update(ctx: &Context) {
    let updater = &ctx.services.updater;
    let set_msg = |msg: String| ctx.agent.update(|a| a.state_msg = msg);
    let fail = |msg: String| {
        error!(error = %msg, "os update failed");
        ctx.agent.update(|a| {
            a.state_msg = msg;
            a.set_state(RunState::MaintenanceError);
        });
    };

    let found = match updater.search() {
        Ok(n) => n,
        Err(e) => return fail(format!("update search failed: {e}")),
    };
    if found == 0 {
        ctx.agent.update(|a| {
            a.state_msg = "No updates available".to_string();
            a.restore_previous(&[RunState::Maintenance]);
        });
        return;
    }

    set_msg(format!("Downloading {found} updates"));
    let downloaded = match updater.download() {
        Ok(n) => n,
        Err(e) => return fail(format!("update download failed: {e}")),
    };
    if downloaded == 0 {
        return fail("No updates were downloaded".to_string());
    }

    set_msg(format!("Installing {downloaded} updates"));
    let report = match updater.install() {
        Ok(r) => r,
        Err(e) => return fail(format!("update install failed: {e}")),
    };
    if report.failed > 0 {
        fail(format!("{} updates failed to install", report.failed));
    }
    if report.reboot_required {
        ctx.agent.update(|a| {
            if report.failed == 0 {
                a.state_msg = "Rebooting to finish updates".to_string();
            }
            a.set_state(RunState::Rebooting);
        });
        if let Err(e) = ctx.services.process.reboot() {
            fail(format!("reboot failed: {e}"));
        }
        return;
    }
    if report.failed == 0 {
        ctx.agent.update(|a| {
            a.state_msg = format!("Installed {} updates", report.installed);
            a.restore_previous(&[RunState::Maintenance]);
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotOp {
    Take,
    Revert,
}

struct Snapshot {
    inv: Invocation,
    op: SnapshotOp,
    name: Option<String>,
}

impl Snapshot {
    fn new(inv: Invocation, op: SnapshotOp) -> Self {
        Self { inv, op, name: None }
    }
}

impl Command for Snapshot {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let name = self
            .inv
            .args
            .text("snapshotname")
            .ok_or_else(|| RunnerError::client("a snapshot name is required"))?;
        let (action, msg) = match self.op {
            SnapshotOp::Take => ("take snapshot", format!("Taking snapshot '{name}'")),
            SnapshotOp::Revert => (
                "revert to snapshot",
                format!("Reverting to snapshot '{name}'"),
            ),
        };
        let mut agent = ctx.agent.lock();
        agent.ensure_state(&[RunState::Idle], action)?;
        agent.state_msg = msg;
        agent.enter_long_running(RunState::Rebooting);
        response.ack(format!("<snapshot>{}</snapshot>\n", crate::core::xml::escape(&name)));
        self.name = Some(name);
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        let Some(name) = self.name.take() else {
            return Ok(());
        };
        let op = self.op;
        let kind = match op {
            SnapshotOp::Take => TaskKind::Snapshot,
            SnapshotOp::Revert => TaskKind::Revert,
        };
        let task_ctx = ctx.clone();
        ctx.tasks.spawn(
            &ctx.agent,
            kind,
            ctx.config.timeouts.snapshot_delay(),
            move || {
                let snapshots = &task_ctx.services.snapshots;
                let result = match op {
                    SnapshotOp::Take => snapshots.take_snapshot(&name),
                    SnapshotOp::Revert => snapshots.revert_to_latest(&name),
                };
                task_ctx.agent.update(|a| {
                    a.state_msg = match &result {
                        Ok(()) => format!("Snapshot operation on '{name}' complete"),
                        Err(e) => {
                            warn!(snapshot = %name, error = %e, "snapshot operation failed");
                            format!("Snapshot operation on '{name}' failed: {e}")
                        }
                    };
                    a.restore_previous(&[RunState::Rebooting]);
                });
            },
        )
    }
}
