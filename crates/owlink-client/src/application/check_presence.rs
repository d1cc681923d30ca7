//! CheckPresenceUseCase: is one specific device on the bus, and is it
//! alarming?
//!
//! Both questions are answered with the bit-exact verification exchange
//! rather than a search, so they cost one reset and one 24-byte block each.

use owlink_core::{AdapterError, BusAdapter, OwnerId, RomId};

/// Result of checking one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub address: RomId,
    pub present: bool,
    /// Only meaningful when `present`.
    pub alarming: bool,
}

pub fn check_presence(
    adapter: &dyn BusAdapter,
    owner: OwnerId,
    address: RomId,
) -> Result<Presence, AdapterError> {
    let present = adapter.is_present(owner, address)?;
    let alarming = present && adapter.is_alarming(owner, address)?;
    Ok(Presence {
        address,
        present,
        alarming,
    })
}
