//! Multicast probe for finding tunnel servers on the LAN.
//!
//! # How the probe works (for beginners)
//!
//! 1. The client sends one small UDP datagram (the protocol version) to the
//!    multicast group `228.5.6.7:6163`.  Every host that joined the group
//!    receives it.
//! 2. Each `owlink-server` with its beacon enabled answers with a unicast
//!    datagram carrying its TCP port.
//! 3. The client collects answers until the timeout expires.  The server's
//!    IP is the datagram's source address; the port comes from the payload.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use owlink_core::protocol::beacon::{parse_reply, probe_datagram};
use thiserror::Error;
use tracing::{debug, info};

/// Error type for the multicast probe.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The multicast group is not an IPv4 address.
    #[error("invalid multicast group {0:?}")]
    InvalidGroup(String),
    /// The probe socket could not be created or used.
    #[error("probe socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends one probe to `target` and returns every server that answered
/// within `timeout`, sorted and without duplicates.
pub fn probe(target: SocketAddr, timeout: Duration) -> Result<Vec<SocketAddr>, DiscoveryError> {
    let socket = UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))?;
    socket.set_multicast_ttl_v4(1)?;
    socket.send_to(&probe_datagram(), target)?;
    debug!(%target, "beacon probe sent");

    let deadline = Instant::now() + timeout;
    let mut servers = BTreeSet::new();
    let mut buf = [0u8; 64];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        socket.set_read_timeout(Some(remaining))?;

        match socket.recv_from(&mut buf) {
            Ok((len, src)) => match parse_reply(&buf[..len]) {
                Some(port) => {
                    let server = SocketAddr::new(src.ip(), port);
                    if servers.insert(server) {
                        info!(%server, "tunnel server found");
                    }
                }
                None => debug!(%src, len, "ignoring malformed beacon reply"),
            },
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                break
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(servers.into_iter().collect())
}

/// Probes the multicast group `group:port`.
pub fn probe_multicast(
    group: &str,
    port: u16,
    timeout: Duration,
) -> Result<Vec<SocketAddr>, DiscoveryError> {
    let group: Ipv4Addr = group
        .parse()
        .map_err(|_| DiscoveryError::InvalidGroup(group.to_string()))?;
    probe(SocketAddr::V4(SocketAddrV4::new(group, port)), timeout)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use owlink_core::protocol::beacon::{is_probe, reply_datagram};
    use std::thread;

    /// A unicast stand-in for the server beacon: answers each probe with
    /// every reply in `replies`.
    fn fake_beacon(replies: Vec<Vec<u8>>) -> (SocketAddr, thread::JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 16];
            if let Ok((len, src)) = socket.recv_from(&mut buf) {
                if is_probe(&buf[..len]) {
                    for reply in &replies {
                        socket.send_to(reply, src).unwrap();
                    }
                }
            }
        });
        (addr, handle)
    }

    #[test]
    fn test_probe_collects_announced_port() {
        // Arrange
        let (beacon, server) = fake_beacon(vec![reply_datagram(6161).to_vec()]);

        // Act
        let found = probe(beacon, Duration::from_millis(500)).unwrap();
        server.join().unwrap();

        // Assert
        assert_eq!(found, vec!["127.0.0.1:6161".parse().unwrap()]);
    }

    #[test]
    fn test_probe_deduplicates_and_skips_malformed_replies() {
        // Arrange
        let (beacon, server) = fake_beacon(vec![
            reply_datagram(7000).to_vec(),
            vec![0xDE, 0xAD],
            reply_datagram(7000).to_vec(),
        ]);

        // Act
        let found = probe(beacon, Duration::from_millis(500)).unwrap();
        server.join().unwrap();

        // Assert
        assert_eq!(found, vec!["127.0.0.1:7000".parse().unwrap()]);
    }

    #[test]
    fn test_probe_with_no_answer_returns_empty_list() {
        // Arrange: a socket that never answers
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();

        // Act
        let found = probe(silent.local_addr().unwrap(), Duration::from_millis(200)).unwrap();

        // Assert
        assert!(found.is_empty());
    }

    #[test]
    fn test_probe_multicast_rejects_bad_group() {
        assert!(matches!(
            probe_multicast("nope", 6163, Duration::from_millis(10)),
            Err(DiscoveryError::InvalidGroup(_))
        ));
    }
}
