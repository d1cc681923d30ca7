//! ListDevicesUseCase: enumerate the bus under exclusive use.
//!
//! The enumeration is a sequence of `find_first` / `find_next` / `address`
//! calls.  Another client searching at the same time would move the shared
//! search cursor underneath us, so the whole sequence runs inside a
//! `begin_exclusive` / `end_exclusive` bracket, and the search options are
//! put back to "all devices, all families" afterwards.

use owlink_core::{AdapterError, BusAdapter, FamilyRegistry, OwnerId, RomId};
use thiserror::Error;
use tracing::debug;

/// Errors from the listing use case.
#[derive(Debug, Error)]
pub enum ListError {
    /// Another owner kept the bus for longer than the exclusive wait.
    #[error("bus is in exclusive use by another client")]
    Busy,

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Which devices to list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Only these families.  Empty means all.
    pub include: Vec<u8>,
    /// Never these families.
    pub exclude: Vec<u8>,
    /// Only devices with their alarm flag set.
    pub alarm_only: bool,
}

/// One found device, named through the family registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    pub address: RomId,
    pub name: String,
    pub description: String,
    pub crc_valid: bool,
}

/// Enumerates every device matching `filter` on behalf of `owner`.
pub fn list_devices(
    adapter: &dyn BusAdapter,
    owner: OwnerId,
    filter: &SearchFilter,
    registry: &FamilyRegistry,
) -> Result<Vec<DeviceListing>, ListError> {
    if !adapter.begin_exclusive(owner, true)? {
        return Err(ListError::Busy);
    }

    let found = enumerate(adapter, owner, filter);
    let restored = restore_defaults(adapter, owner);
    let released = adapter.end_exclusive(owner);

    let addresses = found?;
    restored?;
    released?;
    debug!(count = addresses.len(), "enumeration finished");

    Ok(addresses
        .into_iter()
        .map(|address| {
            let container = registry.create(address);
            DeviceListing {
                address,
                name: container.name().to_string(),
                description: container.description().to_string(),
                crc_valid: address.is_crc_valid(),
            }
        })
        .collect())
}

fn enumerate(
    adapter: &dyn BusAdapter,
    owner: OwnerId,
    filter: &SearchFilter,
) -> Result<Vec<RomId>, AdapterError> {
    adapter.set_search_all_devices(owner)?;
    adapter.target_all_families(owner)?;
    if !filter.include.is_empty() {
        adapter.target_family(owner, &filter.include)?;
    }
    if !filter.exclude.is_empty() {
        adapter.exclude_family(owner, &filter.exclude)?;
    }
    if filter.alarm_only {
        adapter.set_search_only_alarming(owner)?;
    }
    adapter.devices(owner)
}

fn restore_defaults(adapter: &dyn BusAdapter, owner: OwnerId) -> Result<(), AdapterError> {
    adapter.set_search_all_devices(owner)?;
    adapter.target_all_families(owner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
