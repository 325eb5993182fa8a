//! Two-phase request dispatch.
//!
//! For every request: look the command up, decode its arguments, check the
//! lock and the run state, execute, then write the response and close the
//! connection. Only after the caller has its answer does the command's
//! post-response action run, followed by the history entry.
//!
//! Decode, lock and state failures never reach `execute` or `post_response`.
//! A failed `execute` still gets its `post_response`.

use crate::core::args::DecodedArgs;
use crate::core::context::Context;
use crate::core::error::RunnerError;
use crate::core::lock::ANONYMOUS_USER;
use crate::core::protocol::{Request, Response, ResponseCode, Transport, encode_response};
use crate::core::registry::{Command, CommandSpec};
use crate::core::time;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{error, info, info_span, warn};

pub struct Executor {
    ctx: Context,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "command panicked".to_string()
    }
}

impl Executor {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Handles one request end to end and returns the code that was sent.
    pub fn handle(&self, request: &Request, transport: &mut dyn Transport) -> ResponseCode {
        let user = request.user.as_deref().unwrap_or(ANONYMOUS_USER);
        let request_id = time::new_event_id();
        let span = info_span!(
            "request",
            request_id = %request_id,
            command = %request.command,
            user = %user,
            version = request.version
        );
        let _entered = span.enter();

        let mut response = Response::new();

        let Some(spec) = self.ctx.registry.lookup(&request.command) else {
            warn!("unknown command");
            response.fail(
                ResponseCode::ClientError,
                format!("unknown command '{}'", request.command),
            );
            return self.transmit(&response, transport);
        };

        let args = match spec.decode(&request.args) {
            Ok(args) => args,
            Err(e) => {
                warn!(error = %e, "argument decoding failed");
                response.fail(e.response_code(), e.to_string());
                return self.transmit(&response, transport);
            }
        };

        if let Err(e) = self.admit(spec, user) {
            warn!(args = %args, error = %e, "request refused");
            response.fail(e.response_code(), e.to_string());
            let code = self.transmit(&response, transport);
            self.record(user, spec, &args);
            return code;
        }

        let mut command = spec.instantiate(request.user.clone(), args.clone());
        self.execute(command.as_mut(), &args, &mut response);
        let code = self.transmit(&response, transport);
        self.post_response(command.as_mut(), &args);
        self.record(user, spec, &args);
        code
    }

    /// Lock check for gated commands, then the state check.
    fn admit(&self, spec: &CommandSpec, user: &str) -> Result<(), RunnerError> {
        let mut agent = self.ctx.agent.lock();
        if spec.acl {
            agent.lock.check(user)?;
        }
        if let Some(allowed) = spec.allowed_states {
            agent.ensure_state(allowed, spec.denied_action)?;
        }
        Ok(())
    }

    fn execute(&self, command: &mut dyn Command, args: &DecodedArgs, response: &mut Response) {
        let outcome = catch_unwind(AssertUnwindSafe(|| command.execute(&self.ctx, response)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                match e.response_code() {
                    ResponseCode::ClientError => warn!(args = %args, error = %e, "command refused"),
                    _ => error!(args = %args, error = %e, "command failed"),
                }
                response.fail(e.response_code(), e.to_string());
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(args = %args, panic = %msg, "command panicked");
                response.fail(ResponseCode::ServerError, msg);
            }
        }
    }

    /// Writes, flushes and closes. Transport failures are logged, never raised.
    fn transmit(&self, response: &Response, transport: &mut dyn Transport) -> ResponseCode {
        let (code, frame) = match response.to_frame() {
            Ok(frame) => (response.code(), frame),
            Err(e) => {
                error!(error = %e, "response could not be framed");
                let msg = e.to_string();
                match encode_response(ResponseCode::ServerError, &msg) {
                    Ok(frame) => (ResponseCode::ServerError, frame),
                    Err(_) => (ResponseCode::ServerError, Vec::new()),
                }
            }
        };
        if let Err(e) = transport.send(&frame) {
            warn!(error = %e, "failed to send response");
        }
        if let Err(e) = transport.close() {
            warn!(error = %e, "failed to close connection");
        }
        info!(code = code.as_str(), bytes = frame.len(), "response sent");
        code
    }

    fn post_response(&self, command: &mut dyn Command, args: &DecodedArgs) {
        match catch_unwind(AssertUnwindSafe(|| command.post_response(&self.ctx))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(args = %args, error = %e, "post-response action failed"),
            Err(panic) => {
                error!(
                    args = %args,
                    panic = %panic_message(panic.as_ref()),
                    "post-response action panicked"
                );
            }
        }
    }

    fn record(&self, user: &str, spec: &CommandSpec, args: &DecodedArgs) {
        self.ctx.history().record(user, spec.name, args);
    }
}
