//! TCP Server
//!
//! Accepts connections and dispatches them to a fixed pool of workers.

use std::collections::HashMap;
use std::io::BufWriter;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, TrySendError};
use parking_lot::Mutex;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{AllyError, Result};
use crate::protocol::{write_response, Response};

use super::Connection;

/// How long the accept loop sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// TCP server for AllyKV
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    open: Arc<OpenStreams>,
}

impl Server {
    /// Bind the listen address from the config
    pub fn bind(config: Config, engine: Arc<Engine>) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .map_err(|e| AllyError::Network(format!("cannot bind {}: {}", addr, e)))?;
        // Non-blocking accept so the loop can observe shutdown
        listener.set_nonblocking(true)?;

        Ok(Self {
            config,
            engine,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            open: Arc::new(OpenStreams::default()),
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that stops `run` when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Accept connections until shutdown (blocking)
    ///
    /// On shutdown every open connection is closed, which ends the worker
    /// blocked on it even with no read timeout, and the workers are joined
    /// before `run` returns.
    pub fn run(&self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            workers = self.config.worker_threads,
            "Server listening"
        );

        let (sender, receiver) = channel::bounded::<(u64, TcpStream)>(self.config.max_connections);
        let workers = self.spawn_workers(receiver)?;

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::trace!(%peer, "Accepted connection");
                    if let Err(e) = stream.set_nonblocking(false) {
                        tracing::warn!(%peer, error = %e, "Dropping connection");
                        continue;
                    }
                    let id = match self.open.register(&stream) {
                        Ok(id) => id,
                        Err(e) => {
                            tracing::warn!(%peer, error = %e, "Dropping connection");
                            continue;
                        }
                    };
                    match sender.try_send((id, stream)) {
                        Ok(()) => {}
                        Err(TrySendError::Full((id, stream))) => {
                            self.open.remove(id);
                            reject_busy(stream);
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            return Err(AllyError::Network("worker pool is gone".to_string()));
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                }
            }
        }

        // Closing the channel lets every worker drain and exit
        drop(sender);
        let closed = self.open.close_all();
        if closed > 0 {
            tracing::info!(connections = closed, "Closed open connections");
        }
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Connection worker panicked");
            }
        }

        tracing::info!("Server stopped accepting connections");
        Ok(())
    }

    fn spawn_workers(&self, receiver: Receiver<(u64, TcpStream)>) -> Result<Vec<JoinHandle<()>>> {
        (0..self.config.worker_threads)
            .map(|id| {
                let receiver = receiver.clone();
                let engine = Arc::clone(&self.engine);
                let open = Arc::clone(&self.open);
                let (read_ms, write_ms) = (self.config.read_timeout_ms, self.config.write_timeout_ms);

                thread::Builder::new()
                    .name(format!("allykv-conn-{}", id))
                    .spawn(move || {
                        for (conn_id, stream) in receiver.iter() {
                            serve(stream, Arc::clone(&engine), read_ms, write_ms);
                            open.remove(conn_id);
                        }
                    })
                    .map_err(AllyError::from)
            })
            .collect()
    }
}

/// Handles to every accepted stream not yet finished by a worker
#[derive(Default)]
struct OpenStreams {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl OpenStreams {
    fn register(&self, stream: &TcpStream) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().insert(id, stream.try_clone()?);
        Ok(id)
    }

    fn remove(&self, id: u64) {
        self.streams.lock().remove(&id);
    }

    /// Shut down every open stream; a read blocked on one sees end of stream
    fn close_all(&self) -> usize {
        let streams: Vec<TcpStream> = self.streams.lock().drain().map(|(_, s)| s).collect();
        for stream in &streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
        streams.len()
    }
}

fn serve(stream: TcpStream, engine: Arc<Engine>, read_ms: u64, write_ms: u64) {
    let mut connection = match Connection::new(stream, engine) {
        Ok(connection) => connection,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to set up connection");
            return;
        }
    };

    if let Err(e) = connection.set_timeouts(read_ms, write_ms) {
        tracing::warn!(peer = %connection.peer_addr(), error = %e, "Failed to set timeouts");
        return;
    }

    if let Err(e) = connection.handle() {
        tracing::debug!(peer = %connection.peer_addr(), error = %e, "Connection closed with error");
    }
}

fn reject_busy(stream: TcpStream) {
    tracing::warn!("Connection queue full, rejecting client");
    let mut writer = BufWriter::new(stream);
    let _ = write_response(&mut writer, &Response::error("server busy"));
}
