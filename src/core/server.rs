//! TCP front end.
//!
//! One connection at a time: read a request frame, hand it to the executor,
//! move on. The loop ends after the connection on which a quit was requested.

use crate::core::error::RunnerError;
use crate::core::executor::Executor;
use crate::core::protocol::{self, ResponseCode, Transport, encode_response};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::{error, info, warn};

pub struct Server {
    listener: TcpListener,
    executor: Executor,
    io_timeout: Duration,
}

impl Server {
    pub fn bind(addr: &str, executor: Executor) -> Result<Self, RunnerError> {
        let listener = TcpListener::bind(addr)?;
        let io_timeout = Duration::from_secs(executor.context().config.server.io_timeout_secs);
        Ok(Self {
            listener,
            executor,
            io_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RunnerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Serves until a `quit` command has been handled.
    pub fn run(&self) -> Result<(), RunnerError> {
        info!(addr = %self.local_addr()?, "listening");
        let process = self.executor.context().services.process.clone();
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => self.handle_connection(stream),
                Err(e) => warn!(error = %e, "accept failed"),
            }
            if process.quit_requested() {
                info!("quit requested, shutting down");
                break;
            }
        }
        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        if let Err(e) = stream
            .set_read_timeout(Some(self.io_timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.io_timeout)))
        {
            error!(peer = %peer, error = %e, "failed to set socket timeouts");
            return;
        }

        match protocol::read_request(&mut stream) {
            Ok(request) => {
                self.executor.handle(&request, &mut stream);
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "unreadable request");
                if let Ok(frame) = encode_response(ResponseCode::ConnectionError, &e.to_string()) {
                    let _ = stream.send(&frame);
                }
                let _ = Transport::close(&mut stream);
            }
        }
    }
}
