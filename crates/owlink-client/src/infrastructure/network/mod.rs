//! Network infrastructure for the client.
//!
//! - **`tunnel`** – [`TunnelClient`], the [`BusAdapter`](owlink_core::BusAdapter)
//!   that forwards every call to an `owlink-server`.
//! - **`discovery`** – The multicast probe used to find servers.

pub mod discovery;
pub mod tunnel;

pub use tunnel::{TunnelClient, TunnelOptions};
