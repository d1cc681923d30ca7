//! Application layer use cases for the client.
//!
//! Both use cases are written against `&dyn BusAdapter`, so the same code
//! drives a remote server through `TunnelClient` or a local bus in tests.
//!
//! # Sub-modules
//!
//! - **`list_devices`** – Enumerates the bus, optionally filtered by family
//!   or alarm state, inside an exclusive-use bracket.
//!
//! - **`check_presence`** – Verifies a single known address.

pub mod check_presence;
pub mod list_devices;
