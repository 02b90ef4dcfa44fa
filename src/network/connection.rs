//! Client connection
//!
//! One request/response loop per TCP client.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;
use crate::error::{AllyError, Result};
use crate::protocol::{read_command, write_response, Command, Response};

/// A connected client
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    engine: Arc<Engine>,
    /// `ip:port` of the client, for log fields
    peer: String,
}

impl Connection {
    /// Wrap an accepted stream
    ///
    /// Nagle is disabled: every response is a small frame the client is
    /// waiting on.
    pub fn new(stream: TcpStream, engine: Arc<Engine>) -> Result<Self> {
        let peer = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => String::from("unknown"),
        };
        stream.set_nodelay(true)?;

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            engine,
            peer,
        })
    }

    /// Apply socket timeouts; 0 leaves a direction blocking
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        let to_duration = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));

        self.reader.get_ref().set_read_timeout(to_duration(read_ms))?;
        self.writer.get_ref().set_write_timeout(to_duration(write_ms))?;
        Ok(())
    }

    /// Serve requests until the client goes away
    ///
    /// A malformed frame is answered with an ERROR response and ends the
    /// connection, since the stream position can no longer be trusted.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!(peer = %self.peer, "Client connected");

        while let Some(command) = self.next_command()? {
            tracing::trace!(peer = %self.peer, ?command, "Request");

            let response = self.dispatch(command);
            match write_response(&mut self.writer, &response) {
                Ok(()) => {}
                Err(AllyError::Io(e)) if is_disconnect(e.kind()) => {
                    tracing::debug!(peer = %self.peer, "Client left before the response was sent");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Next request, or None once the client has disconnected
    fn next_command(&mut self) -> Result<Option<Command>> {
        match read_command(&mut self.reader) {
            Ok(command) => Ok(Some(command)),
            Err(AllyError::Io(e)) if is_disconnect(e.kind()) => {
                tracing::debug!(peer = %self.peer, reason = ?e.kind(), "Client disconnected");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "Malformed request");
                let _ = write_response(&mut self.writer, &Response::error(&e.to_string()));
                Err(e)
            }
        }
    }

    fn dispatch(&self, command: Command) -> Response {
        self.engine.execute(command).unwrap_or_else(|e| {
            tracing::error!(peer = %self.peer, error = %e, "Request failed");
            Response::error(&e.to_string())
        })
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer
    }
}

/// The peer closed, reset, or idled past the read timeout
fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}
