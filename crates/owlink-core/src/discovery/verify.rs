//! Single-device presence and alarm verification.
//!
//! Instead of running a full search, the master replays the search protocol
//! for one known address in a single 24-byte block: every triplet's two read
//! slots are left released (1) and the write slot carries the expected
//! address bit.  If the device is on the bus it stays in the race to the
//! end, so the last eight triplets answer cleanly with its bits.
//!
//! ```text
//! triplet for address bit i:  positions 3i, 3i+1, 3i+2
//!                             [ id ][ cmp ][ write = bit i ]
//! ```
//!
//! [`evaluate`] is pure so that both the transceiver-level helpers here and
//! the adapter-level provided methods (which run over a tunnel using
//! `reset` + `put_byte` + `data_block`) share one decision rule.

use tracing::trace;

use crate::bus::transceiver::{BusError, BusTransceiver};
use crate::discovery::{ALARM_SEARCH, MATCH_ROM, SEARCH_ROM};
use crate::domain::address::{RomId, ROM_BITS};

/// Length of the verification block in bytes (64 triplets).
pub const VERIFY_BLOCK_LEN: usize = 24;

/// The triplets covering address bits 56..=63 start here.
const TAIL_START: usize = 168;

/// Good tail triplets required for a positive answer.
const REQUIRED_GOOD_BITS: u8 = 8;

/// Result of evaluating one verification block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub present: bool,
    pub good_bits: u8,
}

impl VerifyOutcome {
    const ABSENT: VerifyOutcome = VerifyOutcome {
        present: false,
        good_bits: 0,
    };
}

fn block_bit(block: &[u8], position: usize) -> bool {
    (block[position / 8] >> (position % 8)) & 0x01 != 0
}

/// Builds the block to exchange after the search ROM command.
pub fn build_verify_block(address: RomId) -> [u8; VERIFY_BLOCK_LEN] {
    let mut block = [0xFFu8; VERIFY_BLOCK_LEN];
    for i in 0..ROM_BITS {
        if !address.bit(i) {
            let position = (i + 1) * 3 - 1;
            block[position / 8] &= !(1 << (position % 8));
        }
    }
    block
}

/// Scores the exchanged block against the expected address.
///
/// A tail triplet reading `11` means nobody answered and ends the scan with
/// zero good bits.  `10` for an expected 1 and `01` for an expected 0 each
/// count as good.
pub fn evaluate(address: RomId, block: &[u8; VERIFY_BLOCK_LEN]) -> VerifyOutcome {
    let mut good_bits = 0u8;
    for (n, position) in (TAIL_START..VERIFY_BLOCK_LEN * 8).step_by(3).enumerate() {
        let id_bit = block_bit(block, position);
        let complement_bit = block_bit(block, position + 1);
        let expected = address.bit(TAIL_START / 3 + n);
        match (id_bit, complement_bit) {
            (true, true) => return VerifyOutcome::ABSENT,
            (true, false) if expected => good_bits += 1,
            (false, true) if !expected => good_bits += 1,
            _ => {}
        }
    }
    VerifyOutcome {
        present: good_bits >= REQUIRED_GOOD_BITS,
        good_bits,
    }
}

/// Runs a verification exchange and returns the detailed outcome.
pub fn verify<T>(bus: &mut T, address: RomId, alarm_only: bool) -> Result<VerifyOutcome, BusError>
where
    T: BusTransceiver + ?Sized,
{
    let reset = bus.reset()?;
    if !reset.has_presence() {
        return Ok(VerifyOutcome::ABSENT);
    }
    bus.send_byte(if alarm_only { ALARM_SEARCH } else { SEARCH_ROM })?;
    let mut block = build_verify_block(address);
    bus.exchange_block(&mut block)?;
    let outcome = evaluate(address, &block);
    trace!(%address, alarm_only, good_bits = outcome.good_bits, "verification block evaluated");
    Ok(outcome)
}

/// Returns `true` if the device with `address` is on the bus.
pub fn is_present<T>(bus: &mut T, address: RomId) -> Result<bool, BusError>
where
    T: BusTransceiver + ?Sized,
{
    verify(bus, address, false).map(|o| o.present)
}

/// Returns `true` if the device with `address` is on the bus and alarming.
pub fn is_alarming<T>(bus: &mut T, address: RomId) -> Result<bool, BusError>
where
    T: BusTransceiver + ?Sized,
{
    verify(bus, address, true).map(|o| o.present)
}

/// Resets the bus and addresses one device with MATCH ROM.
///
/// Returns `false` if no presence pulse was seen.
pub fn select<T>(bus: &mut T, address: RomId) -> Result<bool, BusError>
where
    T: BusTransceiver + ?Sized,
{
    if !bus.reset()?.has_presence() {
        return Ok(false);
    }
    bus.send_byte(MATCH_ROM)?;
    for byte in address.bytes() {
        bus.send_byte(byte)?;
    }
    Ok(true)
}
