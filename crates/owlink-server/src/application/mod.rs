//! Application layer use cases for the tunnel server.
//!
//! # Sub-modules
//!
//! - **`dispatch`** – Executes one decoded request against the wrapped
//!   [`BusAdapter`](owlink_core::BusAdapter) and says what to send back.
//!   It depends only on the adapter trait, so it is tested against a
//!   `LocalAdapter` over the simulated bus with no sockets involved.

pub mod dispatch;
