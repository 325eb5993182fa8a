//! Client side of the protocol.

use crate::core::error::RunnerError;
use crate::core::protocol::{self, Request, ResponseCode, WireResponse};
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use tracing::debug;

pub const CONNECT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
    timeout: Duration,
    retry_delay: Duration,
}

impl Client {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn connect(&self) -> Result<TcpStream, RunnerError> {
        let addrs: Vec<_> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| RunnerError::Connection(format!("cannot resolve {}: {e}", self.addr)))?
            .collect();
        let mut last_err = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            for addr in &addrs {
                match TcpStream::connect_timeout(addr, self.timeout) {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        debug!(%addr, attempt, error = %e, "connect failed");
                        last_err = Some(e);
                    }
                }
            }
            if attempt < CONNECT_ATTEMPTS {
                thread::sleep(self.retry_delay * attempt);
            }
        }
        Err(RunnerError::Connection(match last_err {
            Some(e) => format!("cannot connect to {}: {e}", self.addr),
            None => format!("no addresses for {}", self.addr),
        }))
    }

    /// Sends `request` and waits for the response frame.
    pub fn send(&self, request: &Request) -> Result<WireResponse, RunnerError> {
        let frame = protocol::encode_request(request)?;
        let mut stream = self.connect()?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream
            .write_all(&frame)
            .and_then(|_| stream.flush())
            .map_err(|e| RunnerError::Connection(format!("send failed: {e}")))?;
        protocol::read_response(&mut stream)
    }

    /// Like [`Client::send`], but connection failures come back as an `ecn`
    /// response instead of an error.
    pub fn call(&self, request: &Request) -> Result<WireResponse, RunnerError> {
        match self.send(request) {
            Err(RunnerError::Connection(msg)) => Ok(WireResponse {
                code: ResponseCode::ConnectionError,
                payload: msg,
            }),
            other => other,
        }
    }
}
