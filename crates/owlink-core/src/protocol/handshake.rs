//! Version check and shared-secret challenge/response.
//!
//! ```text
//! server                               client
//!   ── version:i32 ──────────────────────►
//!   ◄──────────────── RET_SUCCESS | RET_FAILURE (version mismatch, abort)
//!   ── challenge:[u8; 8] ────────────────►
//!   ◄──────────────── response:i32 = crc16(challenge, crc16(secret, 0))
//!   ── RET_SUCCESS | RET_FAILURE + msg ──►
//! ```
//!
//! No request is accepted on a connection until the server side of this
//! exchange has returned `Ok`.

use std::io::{self, Read, Write};

use rand::RngCore;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::crc::crc16;
use crate::protocol::codec::{
    read_i32, read_string, read_u8, write_i32, write_string, write_u8, ProtocolError,
};
use crate::protocol::messages::{RET_FAILURE, RET_SUCCESS};

/// Length of the random challenge.
pub const CHALLENGE_LEN: usize = 8;

/// Errors that end a handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The two sides speak different protocol versions.
    #[error("protocol version mismatch: server {server}, client {client}")]
    VersionMismatch { server: i32, client: i32 },

    /// The client refused the server's version.
    #[error("client rejected protocol version {0}")]
    VersionRejected(i32),

    /// The challenge response did not match.
    #[error("challenge response mismatch")]
    BadResponse,

    /// The server refused the client's response.
    #[error("server rejected authentication: {0}")]
    Rejected(String),

    /// A status byte other than success or failure arrived.
    #[error("unexpected status byte during handshake: 0x{0:02X}")]
    UnexpectedStatus(u8),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<io::Error> for HandshakeError {
    fn from(err: io::Error) -> Self {
        HandshakeError::Protocol(ProtocolError::Io(err))
    }
}

/// Computes the expected response to `challenge` for `secret`.
pub fn challenge_response(secret: &[u8], challenge: &[u8; CHALLENGE_LEN]) -> u16 {
    crc16(challenge, crc16(secret, 0))
}

/// Produces a fresh random challenge.
pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Runs the client half of the handshake over `stream`.
pub fn client_handshake<S>(stream: &mut S, secret: &[u8], version: i32) -> Result<(), HandshakeError>
where
    S: Read + Write + ?Sized,
{
    let server_version = read_i32(stream)?;
    if server_version != version {
        write_u8(stream, RET_FAILURE)?;
        stream.flush()?;
        return Err(HandshakeError::VersionMismatch {
            server: server_version,
            client: version,
        });
    }
    write_u8(stream, RET_SUCCESS)?;
    stream.flush()?;

    let mut challenge = [0u8; CHALLENGE_LEN];
    stream.read_exact(&mut challenge)?;
    write_i32(stream, i32::from(challenge_response(secret, &challenge)))?;
    stream.flush()?;

    match read_u8(stream)? {
        RET_SUCCESS => {
            debug!("handshake accepted by server");
            Ok(())
        }
        RET_FAILURE => Err(HandshakeError::Rejected(read_string(stream)?)),
        other => Err(HandshakeError::UnexpectedStatus(other)),
    }
}

/// Runs the server half of the handshake over `stream`.
///
/// On a bad response the failure message is sent before returning, so the
/// caller only has to close the connection.
pub fn server_handshake<S>(stream: &mut S, secret: &[u8], version: i32) -> Result<(), HandshakeError>
where
    S: Read + Write + ?Sized,
{
    server_handshake_with(stream, secret, version, generate_challenge())
}

/// Server half with a caller-supplied challenge.
pub fn server_handshake_with<S>(
    stream: &mut S,
    secret: &[u8],
    version: i32,
    challenge: [u8; CHALLENGE_LEN],
) -> Result<(), HandshakeError>
where
    S: Read + Write + ?Sized,
{
    write_i32(stream, version)?;
    stream.flush()?;
    match read_u8(stream)? {
        RET_SUCCESS => {}
        RET_FAILURE => return Err(HandshakeError::VersionRejected(version)),
        other => return Err(HandshakeError::UnexpectedStatus(other)),
    }

    stream.write_all(&challenge)?;
    stream.flush()?;

    let response = read_i32(stream)?;
    let expected = i32::from(challenge_response(secret, &challenge));
    if response != expected {
        warn!("client failed the challenge");
        write_u8(stream, RET_FAILURE)?;
        write_string(stream, "authentication failed: bad challenge response")?;
        stream.flush()?;
        return Err(HandshakeError::BadResponse);
    }

    write_u8(stream, RET_SUCCESS)?;
    stream.flush()?;
    Ok(())
}
