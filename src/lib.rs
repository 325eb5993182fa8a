//! svcrunner: a long-running automation agent.
//!
//! The agent loads test suites, runs their testcases on a target device and
//! answers control requests from a remote controller over a small framed TCP
//! protocol. One request is handled at a time; long work (test runs, uploads,
//! snapshots, kickstarts, OS updates) continues on background threads and is
//! observed by polling `status`.
//!
//! # Architecture
//!
//! ## Two-phase dispatch
//!
//! Every command first produces its response, which is written and the
//! connection closed, and only then runs its post-response action. This is
//! what lets `quit`, `restart` and reboot-inducing commands answer before
//! the process or host goes away.
//!
//! ## Shared agent data
//!
//! Run state, counters, the loaded suite and the service lock live in one
//! [`core::state::AgentData`] behind a mutex. Commands and background workers
//! update it one logical step at a time.
//!
//! # Crate Structure
//!
//! - [`core`]: protocol, dispatch, state machine, runner and collaborators
//! - [`commands`]: the command catalog
//!
//! # Examples
//!
//! ```bash
//! # Serve on the configured port
//! svcrunner serve
//!
//! # Load and start a suite as user bob
//! svcrunner send -u bob load smoke.basic
//! svcrunner send -u bob start
//! svcrunner send status
//! ```

pub mod commands;
pub mod core;
mod cli;

use crate::cli::{Cli, Command, SendCli, ServeCli};
use crate::core::args::RawArgs;
use crate::core::client::Client;
use crate::core::config::Config;
use crate::core::context::Context;
use crate::core::error::RunnerError;
use crate::core::executor::Executor;
use crate::core::protocol::{Request, ResponseCode};
use crate::core::registry::Registry;
use crate::core::server::Server;
use clap::Parser;
use colored::Colorize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() -> Result<(), RunnerError> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.logging.level);

    match cli.command {
        Command::Serve(serve) => run_serve(config, serve),
        Command::Send(send) => run_send(&config, send),
        Command::Commands => {
            let registry = Registry::new(commands::catalog());
            for spec in registry.list() {
                let acl = if spec.acl { " [locked]" } else { "" };
                println!(
                    "{}{}\n    {}",
                    spec.synopsis().bright_white().bold(),
                    acl.bright_black(),
                    spec.summary
                );
            }
            Ok(())
        }
        Command::Config => {
            let text = toml::to_string_pretty(&config)
                .map_err(|e| RunnerError::ConfigError(e.to_string()))?;
            print!("{text}");
            Ok(())
        }
    }
}

fn run_serve(mut config: Config, serve: ServeCli) -> Result<(), RunnerError> {
    if let Some(bind) = serve.bind {
        config.server.bind = bind;
    }
    if let Some(port) = serve.port {
        config.server.port = port;
    }
    let addr = config.bind_address();
    let ctx = Context::from_config(config);
    let server = Server::bind(&addr, Executor::new(ctx))?;
    server.run()?;
    info!("waiting for background tasks");
    server.executor().context().tasks.join_all();
    Ok(())
}

/// Builds the request arguments from positional and `key=value` inputs.
fn send_args(send: &SendCli) -> Result<RawArgs, RunnerError> {
    match (send.args.is_empty(), send.keyed.is_empty()) {
        (true, true) => Ok(RawArgs::Absent),
        (false, true) => Ok(RawArgs::Legacy(send.args.join(" "))),
        (true, false) => {
            if send.protocol < 2 {
                return Err(RunnerError::client(
                    "keyed arguments need protocol version 2",
                ));
            }
            let mut map = Map::new();
            for pair in &send.keyed {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    RunnerError::client(format!("expected key=value, got '{pair}'"))
                })?;
                map.insert(key.to_string(), Value::String(value.to_string()));
            }
            Ok(RawArgs::Keyed(map))
        }
        (false, false) => Err(RunnerError::client(
            "use either positional or keyed arguments, not both",
        )),
    }
}

fn run_send(config: &Config, send: SendCli) -> Result<(), RunnerError> {
    let args = send_args(&send)?;
    let port = send.port.unwrap_or(config.server.port);
    let mut request = Request::new(send.user.as_deref(), &send.command, args);
    request.version = send.protocol;

    let client = Client::new(
        format!("{}:{port}", send.host),
        Duration::from_secs(send.timeout),
    );
    let response = client.call(&request)?;
    let code = match response.code {
        ResponseCode::Ack => response.code.as_str().bright_green().bold(),
        ResponseCode::ClientError => response.code.as_str().bright_yellow().bold(),
        ResponseCode::ServerError | ResponseCode::ConnectionError => {
            response.code.as_str().bright_red().bold()
        }
    };
    println!("{code}");
    print!("{}", response.payload);
    if !response.payload.ends_with('\n') {
        println!();
    }
    if response.code == ResponseCode::Ack {
        Ok(())
    } else {
        Err(RunnerError::client(format!(
            "agent answered {}",
            response.code
        )))
    }
}
