//! Multicast beacon responder.
//!
//! Clients that do not know the server's address multicast a 4-byte probe
//! (the protocol version) to `228.5.6.7:6163`.  The responder answers each
//! valid probe with the server's TCP port, unicast back to the sender:
//!
//! ```text
//! client ── probe: VERSION_UID:i32 ──────────► 228.5.6.7:6163
//! client ◄── reply: port:i32 RET_SUCCESS ───── server
//! ```
//!
//! The responder is off unless `[multicast] enabled = true`.
//!
//! # Read timeout
//!
//! The socket has a 500 ms read timeout.  On each timeout the loop checks
//! the shared `running` flag and exits once it is cleared.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use owlink_core::protocol::beacon::{is_probe, reply_datagram};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::infrastructure::network::is_timeout_error;

/// Error type for the beacon responder.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind beacon socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The multicast group is not an IPv4 address.
    #[error("invalid multicast group {0:?}")]
    InvalidGroup(String),
    /// The responder thread could not be started.
    #[error("failed to spawn beacon thread: {0}")]
    Spawn(std::io::Error),
}

/// Where the responder listens and what it announces.
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// TCP port announced in replies.
    pub listen_port: u16,
}

impl BeaconConfig {
    /// Parses `group` as an IPv4 address.
    pub fn new(group: &str, port: u16, listen_port: u16) -> Result<Self, DiscoveryError> {
        let group = group
            .parse()
            .map_err(|_| DiscoveryError::InvalidGroup(group.to_string()))?;
        Ok(Self {
            group,
            port,
            listen_port,
        })
    }
}

/// Binds the beacon socket and answers probes on a background thread until
/// `running` is cleared.
///
/// Joining the multicast group is best effort: if the host has no multicast
/// route the responder still answers probes sent directly to its port.
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] if the socket cannot be bound.
pub fn start_beacon_responder(
    config: BeaconConfig,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, DiscoveryError> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
    let socket =
        UdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    socket.set_read_timeout(Some(Duration::from_millis(500))).ok();

    if let Err(e) = socket.join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED) {
        warn!(group = %config.group, "could not join multicast group: {e}");
    }

    let listen_port = config.listen_port;
    let handle = std::thread::Builder::new()
        .name("owlink-beacon".to_string())
        .spawn(move || beacon_loop(socket, listen_port, running))
        .map_err(DiscoveryError::Spawn)?;

    info!(group = %config.group, port = config.port, "beacon responder listening");
    Ok(handle)
}

fn beacon_loop(socket: UdpSocket, listen_port: u16, running: Arc<AtomicBool>) {
    let mut buf = [0u8; 64];
    let reply = reply_datagram(listen_port);

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("beacon recv error: {e}");
                continue;
            }
        };

        if !is_probe(&buf[..len]) {
            debug!(%src, len, "ignoring non-probe datagram");
            continue;
        }
        debug!(%src, "beacon probe");
        if let Err(e) = socket.send_to(&reply, src) {
            warn!(%src, "failed to send beacon reply: {e}");
        }
    }

    info!("beacon responder stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
