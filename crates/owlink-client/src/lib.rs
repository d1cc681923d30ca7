//! owlink-client library entry point.
//!
//! The binary in `main.rs` and the server's end-to-end tests share this
//! module tree.
//!
//! # What does owlink-client do? (for beginners)
//!
//! The 1-Wire hardware is plugged into some other machine running
//! `owlink-server`.  [`TunnelClient`] connects to it, proves it knows the
//! shared secret, and then implements the full
//! [`BusAdapter`](owlink_core::BusAdapter) API by sending one small request
//! per call.  Application code cannot tell it apart from a local adapter:
//!
//! 1. `TunnelClient::connect` opens TCP and runs the handshake.
//! 2. Every adapter call becomes `[opcode][payload]` on the wire and waits
//!    for `[status][reply]`.
//! 3. `begin_exclusive` takes a local token first, then the server's, so
//!    threads of this process and other clients are both kept out.  Calls
//!    for any other owner wait until the holder is done.

pub mod application;
pub mod infrastructure;

pub use infrastructure::network::{TunnelClient, TunnelOptions};
