//! Wire protocol.
//!
//! # Request frame
//!
//! ```text
//! VV LLLLLLLL payload
//! ```
//!
//! Two ASCII digits of protocol version, eight ASCII digits of payload length,
//! then the UTF-8 payload:
//!
//! - version 00: `command [arg ...]`, no user
//! - version 01: `user command [arg ...]`
//! - version 02 and newer: `{"user": ..., "command": ..., "args": null | "..." | {...}}`
//!
//! # Response frame
//!
//! ```text
//! CCC LLLLLLLL payload
//! ```
//!
//! Three-byte status code (`ack`, `cer`, `ser`, `ecn`), eight ASCII digits of
//! payload length, then the payload: XML on `ack`, error text otherwise.

use crate::core::args::RawArgs;
use crate::core::error::RunnerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::{self, Read, Write};

pub const VERSION_DIGITS: usize = 2;
pub const CODE_LEN: usize = 3;
pub const LENGTH_DIGITS: usize = 8;
pub const MAX_PAYLOAD: usize = 99_999_999;
const READ_CHUNK: usize = 64 * 1024;
/// Newest request shape this build speaks.
pub const CURRENT_VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ack,
    ClientError,
    ServerError,
    ConnectionError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Ack => "ack",
            ResponseCode::ClientError => "cer",
            ResponseCode::ServerError => "ser",
            ResponseCode::ConnectionError => "ecn",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "ack" => Some(ResponseCode::Ack),
            "cer" => Some(ResponseCode::ClientError),
            "ser" => Some(ResponseCode::ServerError),
            "ecn" => Some(ResponseCode::ConnectionError),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub version: u8,
    pub user: Option<String>,
    pub command: String,
    pub args: RawArgs,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRequest {
    #[serde(default)]
    user: Option<String>,
    command: String,
    #[serde(default)]
    args: Value,
}

impl Request {
    pub fn new(user: Option<&str>, command: &str, args: RawArgs) -> Self {
        Self {
            version: CURRENT_VERSION,
            user: user.map(str::to_string),
            command: command.to_string(),
            args,
        }
    }

    fn encode_payload(&self) -> Result<String, RunnerError> {
        let legacy_tail = |args: &RawArgs| -> Result<String, RunnerError> {
            match args {
                RawArgs::Absent => Ok(String::new()),
                RawArgs::Legacy(s) => Ok(format!(" {s}")),
                _ => Err(RunnerError::client(format!(
                    "protocol version {:02} only carries string arguments",
                    self.version
                ))),
            }
        };
        match self.version {
            0 => Ok(format!("{}{}", self.command, legacy_tail(&self.args)?)),
            1 => {
                let user = self.user.as_deref().ok_or_else(|| {
                    RunnerError::client("protocol version 01 requires a user")
                })?;
                Ok(format!("{user} {}{}", self.command, legacy_tail(&self.args)?))
            }
            _ => Ok(serde_json::to_string(&JsonRequest {
                user: self.user.clone(),
                command: self.command.clone(),
                args: self.args.to_json(),
            })?),
        }
    }

    fn decode_payload(version: u8, payload: &str) -> Result<Self, RunnerError> {
        let bad = |what: &str| RunnerError::Connection(format!("malformed request: {what}"));
        match version {
            0 | 1 => {
                let text = payload.trim();
                let (user, rest) = if version == 1 {
                    let (user, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
                    (Some(user.to_string()), rest.trim_start())
                } else {
                    (None, text)
                };
                let (command, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if command.is_empty() {
                    return Err(bad("missing command"));
                }
                let args = args.trim();
                Ok(Request {
                    version,
                    user,
                    command: command.to_string(),
                    args: if args.is_empty() {
                        RawArgs::Absent
                    } else {
                        RawArgs::Legacy(args.to_string())
                    },
                })
            }
            _ => {
                let parsed: JsonRequest =
                    serde_json::from_str(payload).map_err(|e| bad(&e.to_string()))?;
                if parsed.command.trim().is_empty() {
                    return Err(bad("missing command"));
                }
                Ok(Request {
                    version,
                    user: parsed.user.filter(|u| !u.is_empty()),
                    command: parsed.command,
                    args: RawArgs::from_json(parsed.args),
                })
            }
        }
    }
}

fn length_field(len: usize) -> Result<String, RunnerError> {
    if len > MAX_PAYLOAD {
        return Err(RunnerError::server(format!(
            "payload of {len} bytes exceeds the frame limit"
        )));
    }
    Ok(format!("{len:0width$}", width = LENGTH_DIGITS))
}

fn parse_digits(field: &[u8], what: &str) -> Result<usize, RunnerError> {
    if !field.iter().all(u8::is_ascii_digit) {
        return Err(RunnerError::Connection(format!("non-numeric {what} field")));
    }
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RunnerError::Connection(format!("bad {what} field")))
}

fn read_failure(e: io::Error, what: &str) -> RunnerError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            RunnerError::Connection(format!("connection closed while reading {what}"))
        }
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            RunnerError::Connection(format!("timed out reading {what}"))
        }
        _ => RunnerError::Connection(format!("failed reading {what}: {e}")),
    }
}

fn read_exact_or(reader: &mut impl Read, buf: &mut [u8], what: &str) -> Result<(), RunnerError> {
    reader.read_exact(buf).map_err(|e| read_failure(e, what))
}

/// The declared length is untrusted, so the buffer grows with the bytes that
/// actually arrive.
fn read_payload(reader: &mut impl Read) -> Result<String, RunnerError> {
    let mut len_buf = [0u8; LENGTH_DIGITS];
    read_exact_or(reader, &mut len_buf, "length")?;
    let len = parse_digits(&len_buf, "length")?;
    let mut payload = Vec::with_capacity(len.min(READ_CHUNK));
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut payload)
        .map_err(|e| read_failure(e, "payload"))?;
    if payload.len() != len {
        return Err(read_failure(io::ErrorKind::UnexpectedEof.into(), "payload"));
    }
    String::from_utf8(payload).map_err(|_| RunnerError::Connection("payload is not UTF-8".into()))
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, RunnerError> {
    let payload = request.encode_payload()?;
    let mut frame = format!(
        "{:0width$}{}",
        request.version,
        length_field(payload.len())?,
        width = VERSION_DIGITS
    )
    .into_bytes();
    frame.extend_from_slice(payload.as_bytes());
    Ok(frame)
}

/// Reads one request frame. Every failure is a connection-class error.
pub fn read_request(reader: &mut impl Read) -> Result<Request, RunnerError> {
    let mut version_buf = [0u8; VERSION_DIGITS];
    read_exact_or(reader, &mut version_buf, "version")?;
    let version = parse_digits(&version_buf, "version")? as u8;
    let payload = read_payload(reader)?;
    Request::decode_payload(version, &payload)
}

pub fn encode_response(code: ResponseCode, payload: &str) -> Result<Vec<u8>, RunnerError> {
    let mut frame = format!("{}{}", code.as_str(), length_field(payload.len())?).into_bytes();
    frame.extend_from_slice(payload.as_bytes());
    Ok(frame)
}

/// A response as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub code: ResponseCode,
    pub payload: String,
}

pub fn read_response(reader: &mut impl Read) -> Result<WireResponse, RunnerError> {
    let mut code_buf = [0u8; CODE_LEN];
    read_exact_or(reader, &mut code_buf, "status code")?;
    let code = std::str::from_utf8(&code_buf)
        .ok()
        .and_then(ResponseCode::parse)
        .ok_or_else(|| RunnerError::Connection("unknown status code".into()))?;
    let payload = read_payload(reader)?;
    Ok(WireResponse { code, payload })
}

/// Response under construction by a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: ResponseCode,
    data: String,
    error: Option<String>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            code: ResponseCode::Ack,
            data: String::new(),
            error: None,
        }
    }

    pub fn ack(&mut self, data: impl Into<String>) {
        self.code = ResponseCode::Ack;
        self.data = data.into();
        self.error = None;
    }

    pub fn fail(&mut self, code: ResponseCode, msg: impl Into<String>) {
        self.code = code;
        self.error = Some(msg.into());
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn payload(&self) -> &str {
        match self.code {
            ResponseCode::Ack => &self.data,
            _ => self.error.as_deref().unwrap_or(""),
        }
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, RunnerError> {
        encode_response(self.code, self.payload())
    }
}

/// Outbound half of a connection.
pub trait Transport {
    /// Writes the whole frame and flushes it.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for std::net::TcpStream {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.write_all(frame)?;
        self.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Both)
    }
}

impl Transport for Vec<u8> {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.extend_from_slice(frame);
        Ok(())
    }
}
