//! Result and coverage uploads.

use crate::core::context::Context;
use crate::core::error::RunnerError;
use crate::core::lock::ADMIN_USER;
use crate::core::protocol::Response;
use crate::core::registry::{Command, CommandSpec, Invocation};
use crate::core::state::{ResultState, RunState, UPLOAD_STATES, UploadState};
use crate::core::tasks::TaskKind;
use crate::core::time;
use crate::core::upload::{UploadKind, UploadRequest};
use crate::core::xml::{element, opt_text};
use std::time::Duration;
use tracing::{info, warn};

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "uploadresults",
            params: &["import_type"],
            usage: "<import_type>",
            summary: "Upload the results of the last run to the results server.",
            details: "Legal once a run is stopped or complete. The service is locked to \
                      the administrator while the upload runs and handed back afterwards. \
                      The results server reports the import outcome with setuploadresult.",
            allowed_states: Some(UPLOAD_STATES),
            denied_action: "upload results",
            acl: true,
            factory: |inv| Box::new(UploadResults { inv, request: None }),
        },
        CommandSpec {
            name: "uploadcodecoverage",
            params: &["import_type"],
            usage: "<import_type>",
            summary: "Upload collected code-coverage data.",
            details: "Legal once a run is stopped or complete. An extra 'suitename' key \
                      names the coverage set; it defaults to the loaded suite.",
            allowed_states: Some(UPLOAD_STATES),
            denied_action: "upload code coverage",
            acl: false,
            factory: |inv| Box::new(UploadCoverage { inv, request: None }),
        },
        CommandSpec {
            name: "setuploadresult",
            params: &["id", "error"],
            usage: "<id> <error>",
            summary: "Record the results server's verdict on an upload.",
            details: "Pass the result set id on success, or an error text on failure. \
                      The run is saved with the outcome.",
            allowed_states: None,
            denied_action: "set the upload result",
            acl: false,
            factory: |inv| Box::new(SetUploadResult(inv)),
        },
    ]
}

/// Runs `request` in the background and writes the outcome back.
fn spawn_upload(
    ctx: &Context,
    request: UploadRequest,
    task: TaskKind,
    running_state: RunState,
    release_admin_lock: bool,
) -> Result<(), RunnerError> {
    let task_ctx = ctx.clone();
    ctx.tasks.spawn(&ctx.agent, task, Duration::ZERO, move || {
        let outcome = task_ctx.services.uploader.upload(&request);
        let snapshot = task_ctx.agent.update(|a| {
            match &outcome {
                Ok(receipt) => {
                    info!(
                        kind = request.kind.as_str(),
                        files = receipt.files,
                        bytes = receipt.bytes,
                        dest = %receipt.destination.display(),
                        "upload finished"
                    );
                    if request.kind == UploadKind::Results {
                        a.result_state.upload_state = UploadState::Uploaded;
                    }
                    a.state_msg = format!("{} upload complete", request.kind.as_str());
                }
                Err(e) => {
                    warn!(kind = request.kind.as_str(), error = %e, "upload failed");
                    if request.kind == UploadKind::Results {
                        a.result_state.upload_state = UploadState::Failure;
                        a.result_state.upload_error = Some(e.to_string());
                    }
                    a.state_msg = format!("{} upload failed: {e}", request.kind.as_str());
                }
            }
            a.restore_previous(&[running_state]);
            if release_admin_lock && a.lock.holder() == Some(ADMIN_USER) {
                if let Err(e) = a.lock.release(ADMIN_USER) {
                    warn!(error = %e, "failed to hand back the service lock after upload");
                }
            }
            a.snapshot()
        });
        if let Some(snap) = snapshot {
            if let Err(e) = task_ctx.saves.save(&snap) {
                warn!(error = %e, "failed to save run state after upload");
            }
        }
    })
}

struct UploadResults {
    inv: Invocation,
    request: Option<UploadRequest>,
}

impl Command for UploadResults {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let import_type = self.inv.args.text("import_type");
        let mut agent = ctx.agent.lock();
        let suite = agent.require_suite("Cannot upload results, no suite loaded!")?;
        let (suite_name, enabled, dir) = (
            suite.name.clone(),
            suite.result_data_enabled,
            suite.result_data_dir.clone(),
        );
        agent.ensure_state(UPLOAD_STATES, "upload results")?;
        if !enabled {
            return Err(RunnerError::client(
                "Cannot upload results, result data is disabled for this suite",
            ));
        }
        let dir = match dir {
            Some(d) if d.is_dir() => d,
            Some(d) => {
                return Err(RunnerError::server(format!(
                    "result directory {} does not exist",
                    d.display()
                )));
            }
            None => return Err(RunnerError::server("no result directory for this run")),
        };
        let run_id = agent
            .run_id
            .clone()
            .ok_or_else(|| RunnerError::client("Cannot upload results, suite has not run"))?;

        agent.lock.acquire(ADMIN_USER).map_err(|e| {
            RunnerError::server(format!("failed to acquire lock of service: {e}"))
        })?;
        agent.enter_long_running(RunState::Uploading);
        agent.state_msg = "Uploading results".to_string();
        agent.result_state = ResultState {
            upload_state: UploadState::Uploading,
            uploaded_by: Some(self.inv.user.clone().unwrap_or_else(|| "Anonymous".into())),
            import_type: import_type.clone(),
            ..ResultState::default()
        };
        response.ack(format!(
            "<resultState>\n{}</resultState>\n",
            agent.result_state.xml_fields()
        ));

        self.request = Some(UploadRequest {
            kind: UploadKind::Results,
            suite: suite_name,
            run_id,
            import_type,
            source: dir,
        });
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        match self.request.take() {
            Some(req) => spawn_upload(ctx, req, TaskKind::Upload, RunState::Uploading, true),
            None => Ok(()),
        }
    }
}

struct UploadCoverage {
    inv: Invocation,
    request: Option<UploadRequest>,
}

impl Command for UploadCoverage {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let import_type = self.inv.args.text("import_type");
        let source = ctx.config.paths.coverage_dir();
        let mut agent = ctx.agent.lock();
        let loaded = agent
            .require_suite("Cannot upload code coverage, no suite loaded!")?
            .name
            .clone();
        agent.ensure_state(UPLOAD_STATES, "upload code coverage")?;
        let suite = self.inv.args.text("suitename").unwrap_or(loaded);
        let run_id = agent.run_id.clone().unwrap_or_else(time::new_event_id);

        agent.enter_long_running(RunState::UploadingCodeCoverage);
        agent.state_msg = format!("Uploading code coverage for {suite}");
        response.ack(format!("{}\n", element("codecoverage", &suite)));
        self.request = Some(UploadRequest {
            kind: UploadKind::CodeCoverage,
            suite,
            run_id,
            import_type,
            source,
        });
        Ok(())
    }

    fn post_response(&mut self, ctx: &Context) -> Result<(), RunnerError> {
        match self.request.take() {
            Some(req) => spawn_upload(
                ctx,
                req,
                TaskKind::CodeCoverage,
                RunState::UploadingCodeCoverage,
                false,
            ),
            None => Ok(()),
        }
    }
}

struct SetUploadResult(Invocation);

impl Command for SetUploadResult {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let id = self.0.args.text("id");
        let err = self.0.args.text("error");
        let snapshot = ctx.agent.update(|a| {
            let rs = &mut a.result_state;
            rs.result_set_id = id.clone();
            rs.upload_error = err.clone();
            if err.is_some() {
                rs.upload_state = UploadState::Failure;
            } else if id.is_some() {
                rs.upload_state = UploadState::Success;
            }
            a.snapshot()
        });
        if let Some(snap) = snapshot {
            ctx.saves.save(&snap)?;
        }
        response.ack(format!(
            "{}{}\n",
            element("id", opt_text(id.as_deref())),
            element("err", opt_text(err.as_deref()))
        ));
        Ok(())
    }
}
