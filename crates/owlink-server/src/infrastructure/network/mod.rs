//! Network infrastructure for the tunnel server.
//!
//! # Sub-modules
//!
//! - **`server`** – The TCP accept loop, in single- or multi-threaded mode,
//!   with a tracked set of live connections for clean shutdown.
//!
//! - **`session`** – One connection's lifecycle: handshake, the strictly
//!   synchronous request loop, and the guaranteed exclusivity release.
//!
//! - **`discovery`** – The optional multicast beacon that lets clients find
//!   the server without knowing its address.

pub mod discovery;
pub mod server;
pub mod session;

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
