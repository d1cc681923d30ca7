//! Bus-master abstraction.
//!
//! - **`transceiver`** – the [`BusTransceiver`](transceiver::BusTransceiver)
//!   trait every backend implements, plus the enums shared with the wire
//!   protocol (reset result, speed, power settings).
//! - **`simulated`** – an in-memory bus used by tests, benchmarks and the
//!   server's demo mode.
//! - **`exclusive`** – the exclusive-use token adapters hand out.

pub mod exclusive;
pub mod simulated;
pub mod transceiver;
