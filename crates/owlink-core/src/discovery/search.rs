//! Conflict-biased binary-tree search over the 64-bit address space.
//!
//! This is the classic 1-Wire ROM search: each pass walks the address tree
//! from bit 1 to bit 64, one triplet per bit, and the [`SearchState`]
//! remembers which branches are still unexplored so the next pass finds the
//! next device.
//!
//! [`find_first`] and [`find_next`] add family filtering on top of the raw
//! pass ([`search_pass`]).  A rejected candidate is skipped cheaply when the
//! state still has an unexplored branch inside the family byte: the next
//! pass jumps straight to that branch instead of enumerating every device of
//! the unwanted family.

use tracing::trace;

use crate::bus::transceiver::{BusError, BusTransceiver};
use crate::discovery::{ALARM_SEARCH, SEARCH_ROM};
use crate::domain::address::{RomId, ROM_BITS};
use crate::domain::search_state::{SearchState, MAX_DISCREPANCY};

/// Bits 1..=8 hold the family code.
const FAMILY_BITS: u8 = 8;

/// Runs one raw search pass.
///
/// Returns `Ok(true)` with `state.current_address` holding the device found,
/// or `Ok(false)` when the bus had nothing to offer (no presence pulse, no
/// participating device, or a CRC failure under `require_valid_crc`).  A
/// failed pass resets the traversal bookkeeping.
pub fn search_pass<T>(bus: &mut T, state: &mut SearchState) -> Result<bool, BusError>
where
    T: BusTransceiver + ?Sized,
{
    if !state.skip_reset_on_search {
        let reset = bus.reset()?;
        if !reset.has_presence() {
            trace!(?reset, "no presence pulse, search pass aborted");
            state.reset_traversal();
            return Ok(false);
        }
    }

    bus.send_byte(if state.alarm_only { ALARM_SEARCH } else { SEARCH_ROM })?;

    let mut address = state.current_address;
    let mut last_zero = 0u8;
    state.last_family_discrepancy = 0;

    for bit_number in 1..=ROM_BITS as u8 {
        let index = usize::from(bit_number - 1);
        let direction = if bit_number < state.last_discrepancy {
            address.bit(index)
        } else {
            bit_number == state.last_discrepancy
        };

        let triplet = bus.triplet(direction)?;
        if triplet.is_empty() {
            trace!(bit_number, "no device answered, search pass aborted");
            state.reset_traversal();
            return Ok(false);
        }
        if triplet.is_conflict() && !triplet.taken {
            last_zero = bit_number;
            if last_zero <= FAMILY_BITS {
                state.last_family_discrepancy = last_zero;
            }
        }
        address.set_bit(index, triplet.taken);
    }

    if state.require_valid_crc && !address.is_crc_valid() {
        trace!(%address, "candidate failed CRC8, search pass aborted");
        state.reset_traversal();
        return Ok(false);
    }

    state.current_address = address;
    state.last_discrepancy = last_zero;
    if last_zero == 0 {
        state.last_device_flag = true;
    }
    Ok(true)
}

/// Restarts the enumeration and returns the first matching device.
pub fn find_first<T>(bus: &mut T, state: &mut SearchState) -> Result<bool, BusError>
where
    T: BusTransceiver + ?Sized,
{
    state.reset_traversal();
    find_next(bus, state)
}

/// Returns the next device that passes the family filters.
///
/// After the last device has been reported, the following call returns
/// `Ok(false)` and leaves the state ready for a fresh enumeration.
pub fn find_next<T>(bus: &mut T, state: &mut SearchState) -> Result<bool, BusError>
where
    T: BusTransceiver + ?Sized,
{
    loop {
        if state.last_device_flag {
            state.reset_traversal();
            return Ok(false);
        }

        if state.is_fresh() {
            if let Some(family) = state.single_target_family() {
                let mut seed = [0u8; 8];
                seed[0] = family;
                state.current_address = RomId::new(seed);
                state.last_discrepancy = MAX_DISCREPANCY;
            }
        }

        if !search_pass(bus, state)? {
            return Ok(false);
        }

        let family = state.current_address.family();
        if state.accepts_family(family) {
            return Ok(true);
        }

        trace!(
            family = format_args!("0x{family:02X}"),
            skip_to = state.last_family_discrepancy,
            "candidate rejected by family filter"
        );
        if state.last_family_discrepancy == 0 {
            state.reset_traversal();
            return Ok(false);
        }
        state.last_discrepancy = state.last_family_discrepancy;
        state.last_family_discrepancy = 0;
        state.last_device_flag = false;
    }
}
