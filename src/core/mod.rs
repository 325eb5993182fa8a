//! Core modules of the agent.
//!
//! Wire protocol, request dispatch, the run-state machine, test execution
//! and the external collaborators behind their traits all live here. The
//! command implementations themselves live in [`crate::commands`].

pub mod args;
pub mod client;
pub mod config;
pub mod context;
pub mod db;
pub mod device;
pub mod error;
pub mod executor;
pub mod history;
pub mod host;
pub mod lock;
pub mod maintenance;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod runner;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod suite;
pub mod tasks;
pub mod time;
pub mod upload;
pub mod xml;
