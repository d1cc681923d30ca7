//! Device discovery on top of a [`BusTransceiver`](crate::bus::transceiver::BusTransceiver).
//!
//! - **`search`** – `find_first` / `find_next` enumeration with family
//!   filtering.
//! - **`verify`** – single-address presence and alarm checks, plus MATCH ROM
//!   selection.
//!
//! All functions take the transceiver and the [`SearchState`](crate::domain::search_state::SearchState)
//! explicitly; nothing here owns either.

pub mod search;
pub mod verify;

/// ROM command: search every device.
pub const SEARCH_ROM: u8 = 0xF0;
/// ROM command: search alarming devices only.
pub const ALARM_SEARCH: u8 = 0xEC;
/// ROM command: address one device by its 64-bit id.
pub const MATCH_ROM: u8 = 0x55;
/// ROM command: read the id of the only device on the bus.
pub const READ_ROM: u8 = 0x33;
/// ROM command: address every device at once.
pub const SKIP_ROM: u8 = 0xCC;
