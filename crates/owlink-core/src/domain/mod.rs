//! Domain types for the 1-Wire bus.
//!
//! Everything in here is pure data and arithmetic: no I/O, no locking, no
//! sockets.  The rest of the crate (the search engine, the adapter layer, the
//! tunnel protocol) is built on top of these types.
//!
//! - **`address`** – the 64-bit ROM id and its bit-level accessors.
//! - **`crc`** – CRC8 (ROM ids) and CRC16 (memory pages, tunnel handshake).
//! - **`search_state`** – discrepancy bookkeeping and family filters for one
//!   search session.
//! - **`family`** – the explicit family code → device container registry.

pub mod address;
pub mod crc;
pub mod family;
pub mod search_state;
