//! One tunnel connection, from handshake to close.
//!
//! # Session lifecycle
//!
//! ```text
//! Unauthenticated ──handshake ok──► Serving ──close / I/O error / desync / timeout──► Closed
//!        └────────────handshake failure──────────────────────────────────────────────────┘
//! ```
//!
//! Each session mints its own [`OwnerId`].  Whatever way the session ends,
//! including a panic inside the adapter, an [`ExclusiveRelease`] guard calls
//! `end_exclusive(owner)` on the wrapped adapter, so a vanished client can
//! never keep the bus locked.

use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::TcpStream;
use std::sync::Arc;

use owlink_core::protocol::codec::{read_request, write_failure, write_success, ProtocolError};
use owlink_core::protocol::handshake::server_handshake;
use owlink_core::protocol::messages::VERSION_UID;
use owlink_core::{BusAdapter, OwnerId};
use tracing::{debug, info, warn};

use crate::application::dispatch::{handle_request, Dispatch};
use crate::infrastructure::network::is_timeout_error;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Serving,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent `CLOSECONNECTION`.
    ClientClosed,
    /// The peer closed the socket between requests.
    PeerDisconnected,
    /// No request arrived within the socket timeout.
    IdleTimeout,
    /// The handshake failed; carries the reason.
    AuthenticationFailed(String),
    /// An opcode this server does not know.
    UnknownCommand(u8),
    /// A request payload could not be decoded.
    MalformedRequest(String),
    /// Reading or writing the socket failed.
    Transport(String),
}

/// Releases the session's exclusive claim on the adapter when dropped.
struct ExclusiveRelease<'a> {
    adapter: &'a dyn BusAdapter,
    owner: OwnerId,
}

impl Drop for ExclusiveRelease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.adapter.end_exclusive(self.owner) {
            warn!(owner = %self.owner, "failed to release exclusive use on close: {e}");
        }
    }
}

/// Server side of one connection.
pub struct Session {
    adapter: Arc<dyn BusAdapter>,
    secret: Arc<[u8]>,
    owner: OwnerId,
    state: SessionState,
}

impl Session {
    pub fn new(adapter: Arc<dyn BusAdapter>, secret: Arc<[u8]>) -> Self {
        Self {
            adapter,
            secret,
            owner: OwnerId::new(),
            state: SessionState::Unauthenticated,
        }
    }

    /// Exclusivity handle used for this connection's requests.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serves `stream` until the session ends.  Always leaves the session in
    /// [`SessionState::Closed`].
    pub fn run(&mut self, mut stream: TcpStream) -> CloseReason {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let adapter = Arc::clone(&self.adapter);
        let _release = ExclusiveRelease {
            adapter: adapter.as_ref(),
            owner: self.owner,
        };

        let reason = match server_handshake(&mut stream, &self.secret, VERSION_UID) {
            Ok(()) => {
                info!(%peer, owner = %self.owner, "session authenticated");
                self.state = SessionState::Serving;
                self.serve(adapter.as_ref(), stream)
            }
            Err(e) => {
                warn!(%peer, "handshake failed: {e}");
                CloseReason::AuthenticationFailed(e.to_string())
            }
        };

        self.state = SessionState::Closed;
        info!(%peer, owner = %self.owner, ?reason, "session closed");
        reason
    }

    /// The request loop.  Strictly one request, one response.
    fn serve(&self, adapter: &dyn BusAdapter, stream: TcpStream) -> CloseReason {
        let write_half = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => return CloseReason::Transport(e.to_string()),
        };
        let mut reader = BufReader::new(stream);
        let mut writer = BufWriter::new(write_half);

        loop {
            let request = match read_request(&mut reader) {
                Ok(request) => request,
                Err(ProtocolError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return CloseReason::PeerDisconnected;
                }
                Err(ProtocolError::Io(e)) if is_timeout_error(&e) => {
                    return CloseReason::IdleTimeout;
                }
                Err(ProtocolError::Io(e)) => return CloseReason::Transport(e.to_string()),
                Err(ProtocolError::UnknownCommand(opcode)) => {
                    // The payload length is unknown, so the stream cannot be resynchronized.
                    warn!(owner = %self.owner, "unknown opcode 0x{opcode:02X}");
                    let _ = write_failure(&mut writer, &format!("unknown command 0x{opcode:02X}"))
                        .and_then(|_| writer.flush());
                    return CloseReason::UnknownCommand(opcode);
                }
                Err(other) => {
                    warn!(owner = %self.owner, "malformed request: {other}");
                    let message = other.to_string();
                    let _ = write_failure(&mut writer, &message).and_then(|_| writer.flush());
                    return CloseReason::MalformedRequest(message);
                }
            };

            let command = request.command();
            debug!(owner = %self.owner, ?command, "request");

            let written = match handle_request(adapter, self.owner, request) {
                Ok(Dispatch::Close) => return CloseReason::ClientClosed,
                Ok(Dispatch::Reply(reply)) => write_success(&mut writer, &reply),
                Err(e) => {
                    debug!(owner = %self.owner, ?command, "request failed: {e}");
                    write_failure(&mut writer, &e.to_string())
                }
            };
            if let Err(e) = written.and_then(|_| writer.flush()) {
                return CloseReason::Transport(e.to_string());
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
