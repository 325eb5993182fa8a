//! CLI struct definitions for the svcrunner command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "svcrunner",
    version = env!("CARGO_PKG_VERSION"),
    about = "Automation agent: loads test suites, runs them on the target device and answers control requests over TCP."
)]
pub(crate) struct Cli {
    /// Configuration file (defaults to $SVCRUNNER_CONFIG, then ./svcrunner.toml).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run the agent and serve requests until `quit`
    #[clap(name = "serve")]
    Serve(ServeCli),

    /// Send one command to a running agent and print the response
    #[clap(name = "send", visible_alias = "s")]
    Send(SendCli),

    /// List the commands the agent serves
    #[clap(name = "commands")]
    Commands,

    /// Print the effective configuration as TOML
    #[clap(name = "config")]
    Config,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ServeCli {
    /// Address to bind (overrides `server.bind`).
    #[clap(long)]
    pub bind: Option<String>,
    /// Port to listen on (overrides `server.port`).
    #[clap(long, short)]
    pub port: Option<u16>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct SendCli {
    /// Agent host.
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Agent port (defaults to `server.port`).
    #[clap(long, short)]
    pub port: Option<u16>,
    /// User sending the request.
    #[clap(long, short)]
    pub user: Option<String>,
    /// Wire protocol version: 0, 1 or 2.
    #[clap(long, default_value_t = 2)]
    pub protocol: u8,
    /// Socket timeout in seconds.
    #[clap(long, default_value_t = 30)]
    pub timeout: u64,
    /// Keyed argument, `key=value`; repeatable. Protocol 2 only.
    #[clap(long = "arg", short = 'a')]
    pub keyed: Vec<String>,
    /// Command name.
    pub command: String,
    /// Positional arguments, sent as one space-separated string.
    pub args: Vec<String>,
}
