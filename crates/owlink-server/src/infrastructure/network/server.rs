//! TCP accept loop and connection bookkeeping.
//!
//! # Threading modes
//!
//! - **Multi-threaded** (default): every accepted connection gets its own
//!   named handler thread (`owlink-session-N`).  The socket and the thread
//!   handle are registered in a tracked set so [`TunnelServer::shutdown`] can
//!   close the sockets and join the threads.
//! - **Single-threaded**: the accept loop serves one connection to
//!   completion before accepting the next.  That connection is tracked too,
//!   so closing its socket is what lets a stop request reach the loop.
//!
//! # Stopping the loop
//!
//! The listener is non-blocking.  Between connections the loop sleeps for
//! [`ACCEPT_POLL_INTERVAL`] and re-checks the shared `running` flag, the
//! same way the discovery responder polls its socket timeout.

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use owlink_core::BusAdapter;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::infrastructure::network::is_timeout_error;
use crate::infrastructure::network::session::Session;

/// How long the accept loop sleeps when no connection is pending.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for the tunnel server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The TCP listener could not be bound.
    #[error("failed to bind tunnel listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Any other socket or thread failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The accept thread panicked.
    #[error("accept thread panicked")]
    AcceptPanicked,
}

/// Listener settings resolved from config and CLI.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub listen: SocketAddr,
    pub secret: Vec<u8>,
    pub multithreaded: bool,
    /// Per-connection read timeout.  `None` blocks forever.
    pub socket_timeout: Option<Duration>,
}

/// A live connection as seen by the server.
struct TrackedConnection {
    stream: TcpStream,
    handle: Option<JoinHandle<()>>,
}

type ConnectionTable = Arc<Mutex<HashMap<u64, TrackedConnection>>>;

/// Serves a [`BusAdapter`] to authenticated tunnel clients.
pub struct TunnelServer {
    listener: TcpListener,
    adapter: Arc<dyn BusAdapter>,
    secret: Arc<[u8]>,
    multithreaded: bool,
    socket_timeout: Option<Duration>,
    running: Arc<AtomicBool>,
    connections: ConnectionTable,
    next_id: AtomicU64,
}

impl TunnelServer {
    /// Binds the listener.  No connection is accepted until [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the address is in use or not
    /// local.
    pub fn bind(options: ServerOptions, adapter: Arc<dyn BusAdapter>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(options.listen).map_err(|source| {
            ServerError::BindFailed {
                addr: options.listen,
                source,
            }
        })?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            adapter,
            secret: Arc::from(options.secret),
            multithreaded: options.multithreaded,
            socket_timeout: options.socket_timeout,
            running: Arc::new(AtomicBool::new(true)),
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// The flag [`run`](Self::run) polls; clearing it stops the server.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Accepts and serves connections until the running flag is cleared,
    /// then shuts down every open connection.
    pub fn run(&self) -> Result<(), ServerError> {
        info!(
            addr = %self.local_addr()?,
            adapter = %self.adapter.adapter_name(),
            multithreaded = self.multithreaded,
            "tunnel server listening"
        );

        while self.running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.accept(stream, peer) {
                        warn!(%peer, "failed to start session: {e}");
                    }
                }
                Err(e) if is_timeout_error(&e) => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) => {
                    error!("accept failed: {e}");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        self.shutdown();
        info!("tunnel server stopped");
        Ok(())
    }

    /// Clears the running flag and shuts down every tracked socket without
    /// waiting for the sessions.  A session blocked in a read, including one
    /// served inline by a single-threaded loop, then sees end of stream.
    pub fn close_connections(&self) {
        self.running.store(false, Ordering::Relaxed);
        for (id, connection) in lock(&self.connections).iter() {
            debug!(connection = id, "closing connection for shutdown");
            let _ = connection.stream.shutdown(Shutdown::Both);
        }
    }

    /// Closes every tracked socket and joins the handler threads.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        let drained: Vec<(u64, TrackedConnection)> = lock(&self.connections).drain().collect();

        for (id, connection) in drained {
            debug!(connection = id, "closing connection for shutdown");
            let _ = connection.stream.shutdown(Shutdown::Both);
            if let Some(handle) = connection.handle {
                if handle.join().is_err() {
                    warn!(connection = id, "session thread panicked");
                }
            }
        }
    }

    /// Moves the server onto a background accept thread.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let server = Arc::new(self);
        let accept = Arc::clone(&server);
        let thread = thread::Builder::new()
            .name("owlink-accept".to_string())
            .spawn(move || accept.run())?;
        Ok(ServerHandle {
            server,
            thread: Some(thread),
        })
    }

    fn accept(&self, stream: TcpStream, peer: SocketAddr) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.socket_timeout)?;
        stream.set_nodelay(true)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(connection = id, %peer, "connection accepted");

        let mut session = Session::new(Arc::clone(&self.adapter), Arc::clone(&self.secret));
        lock(&self.connections).insert(
            id,
            TrackedConnection {
                stream: stream.try_clone()?,
                handle: None,
            },
        );

        // A stop request that swept the table before this insert is only
        // visible through the flag.
        if !self.running.load(Ordering::Relaxed) {
            lock(&self.connections).remove(&id);
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(());
        }

        if !self.multithreaded {
            session.run(stream);
            lock(&self.connections).remove(&id);
            return Ok(());
        }

        let connections = Arc::clone(&self.connections);
        let spawned = thread::Builder::new()
            .name(format!("owlink-session-{id}"))
            .spawn(move || {
                session.run(stream);
                lock(&connections).remove(&id);
            });

        match spawned {
            Ok(handle) => {
                // The session may already have finished and removed itself.
                if let Some(entry) = lock(&self.connections).get_mut(&id) {
                    entry.handle = Some(handle);
                }
                Ok(())
            }
            Err(e) => {
                lock(&self.connections).remove(&id);
                Err(e)
            }
        }
    }
}

/// A [`TunnelServer`] running on its own accept thread.
pub struct ServerHandle {
    server: Arc<TunnelServer>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.server.local_addr()
    }

    pub fn active_connections(&self) -> usize {
        self.server.active_connections()
    }

    /// Stops accepting, closes every connection and waits for the threads.
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<(), ServerError> {
        self.server.close_connections();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ServerError::AcceptPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop_and_join() {
            error!("tunnel server did not stop cleanly: {e}");
        }
    }
}

fn lock(connections: &ConnectionTable) -> MutexGuard<'_, HashMap<u64, TrackedConnection>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
