//! Tunnel protocol: opcodes, the blocking codec, the authentication
//! handshake and the multicast beacon datagrams.

pub mod beacon;
pub mod codec;
pub mod handshake;
pub mod messages;

pub use codec::{
    read_request, read_response, write_failure, write_request, write_success, ProtocolError,
    Response,
};
pub use handshake::{client_handshake, server_handshake, HandshakeError};
pub use messages::*;
