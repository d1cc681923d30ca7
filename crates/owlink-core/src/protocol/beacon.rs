//! Datagrams of the multicast server beacon.
//!
//! ```text
//! probe: VERSION_UID:i32
//! reply: listen_port:i32  RET_SUCCESS
//! ```
//!
//! Anything that does not match these shapes exactly is ignored by both ends.

use crate::protocol::messages::{RET_SUCCESS, VERSION_UID};

pub const PROBE_LEN: usize = 4;
pub const REPLY_LEN: usize = 5;

/// The probe a client multicasts.
pub fn probe_datagram() -> [u8; PROBE_LEN] {
    VERSION_UID.to_be_bytes()
}

/// `true` if `datagram` is a probe for this protocol version.
pub fn is_probe(datagram: &[u8]) -> bool {
    datagram == probe_datagram()
}

/// The reply a server sends back, announcing its TCP port.
pub fn reply_datagram(listen_port: u16) -> [u8; REPLY_LEN] {
    let mut reply = [0u8; REPLY_LEN];
    reply[..4].copy_from_slice(&i32::from(listen_port).to_be_bytes());
    reply[4] = RET_SUCCESS;
    reply
}

/// Extracts the announced TCP port from a reply.
pub fn parse_reply(datagram: &[u8]) -> Option<u16> {
    let (port, status) = match datagram {
        [a, b, c, d, status] => (i32::from_be_bytes([*a, *b, *c, *d]), *status),
        _ => return None,
    };
    if status != RET_SUCCESS {
        return None;
    }
    u16::try_from(port).ok().filter(|p| *p != 0)
}
