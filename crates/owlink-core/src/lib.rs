//! # owlink-core
//!
//! Shared library for owlink: 1-Wire device discovery, presence
//! verification, the adapter abstraction and the binary tunnel protocol.
//!
//! This crate is used by both the server and the client.  It opens no
//! sockets of its own; the protocol functions run over any `Read + Write`.
//!
//! # Architecture overview (for beginners)
//!
//! A 1-Wire bus is a single data line shared by many small devices, each with
//! a unique 64-bit ROM id.  A bus master finds the devices by walking the id
//! space bit by bit, then talks to one device at a time.  owlink lets the
//! master be local, or remote behind a TCP tunnel, with the same API.
//!
//! - **`domain`** – Pure data: the ROM id, CRC8/CRC16, the search session
//!   state and the family registry.
//!
//! - **`bus`** – The [`BusTransceiver`] trait a hardware backend implements,
//!   an in-memory [`SimulatedBus`], and the exclusive-use token.
//!
//! - **`discovery`** – The binary-tree ROM search and single-device
//!   presence verification, written against `BusTransceiver`.
//!
//! - **`adapter`** – The [`BusAdapter`] trait (the full bus API) and
//!   [`LocalAdapter`], which implements it over a transceiver.
//!
//! - **`protocol`** – Opcodes, the blocking request/response codec and the
//!   shared-secret handshake used between `owlink-client` and
//!   `owlink-server`.

pub mod adapter;
pub mod bus;
pub mod discovery;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `owlink_core::RomId` instead of `owlink_core::domain::address::RomId`.
pub use adapter::local::LocalAdapter;
pub use adapter::{AdapterError, BusAdapter};
pub use bus::exclusive::{ExclusivityToken, OwnerId};
pub use bus::simulated::{SimulatedBus, SimulatedDevice};
pub use bus::transceiver::{
    BusError, BusTransceiver, Capability, PowerChangeCondition, PowerDuration, ResetResult, Speed,
};
pub use domain::address::RomId;
pub use domain::family::{DeviceContainer, FamilyRegistry};
pub use domain::search_state::SearchState;
pub use protocol::ProtocolError;
