use crate::core::device::DeviceError;
use crate::core::protocol::ResponseCode;
use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// Arguments did not match the command's declared parameters.
    #[error("{0}")]
    ArgDecode(String),
    /// The caller asked for something the agent refuses in its current state.
    #[error("{0}")]
    Client(String),
    /// The agent failed while carrying out a legal request.
    #[error("{0}")]
    Server(String),
    /// Transport failure before a command could be identified.
    #[error("connection error: {0}")]
    Connection(String),
    #[error("timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl RunnerError {
    pub fn client(msg: impl Into<String>) -> Self {
        RunnerError::Client(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        RunnerError::Server(msg.into())
    }

    /// Wire code this error is reported with.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            RunnerError::ArgDecode(_) | RunnerError::Client(_) | RunnerError::NotFound(_) => {
                ResponseCode::ClientError
            }
            RunnerError::Connection(_) => ResponseCode::ConnectionError,
            _ => ResponseCode::ServerError,
        }
    }
}
