//! The full bus API shared by local and tunnelled adapters.
//!
//! [`BusAdapter`] is what application code programs against.  It is object
//! safe and every method takes `&self`, so an adapter can sit behind an
//! `Arc<dyn BusAdapter>` and be shared between threads; implementations
//! serialize individual primitives internally.
//!
//! Every bus and search call names the [`OwnerId`] it is made for.  The
//! caller mints one owner and reuses it.  Multi-step transactions are
//! bracketed by [`begin_exclusive`](BusAdapter::begin_exclusive) /
//! [`end_exclusive`](BusAdapter::end_exclusive); while one owner holds the
//! adapter, calls for any other owner wait a bounded time and then fail
//! with [`AdapterError::Busy`].  Only `adapter_name` and `supports` are
//! ungated.
//!
//! # Two implementations (for beginners)
//!
//! - [`LocalAdapter`](local::LocalAdapter) wraps a
//!   [`BusTransceiver`](crate::bus::transceiver::BusTransceiver) and runs the
//!   discovery engine in-process.
//! - `TunnelClient` (in the `owlink-client` crate) forwards every call over
//!   TCP to an `owlink-server`, which in turn drives a `LocalAdapter`.
//!
//! The provided methods ([`select`](BusAdapter::select),
//! [`is_present`](BusAdapter::is_present), ...) are written purely in terms
//! of the required ones, so they behave identically over the tunnel.

pub mod local;

use std::io;

use thiserror::Error;

use crate::bus::exclusive::OwnerId;
use crate::bus::transceiver::{
    BusError, Capability, PowerChangeCondition, PowerDuration, ResetResult, Speed,
};
use crate::discovery::verify::{build_verify_block, evaluate, VERIFY_BLOCK_LEN};
use crate::discovery::{ALARM_SEARCH, MATCH_ROM, SEARCH_ROM};
use crate::domain::address::RomId;
use crate::protocol::{HandshakeError, ProtocolError};

/// Errors surfaced by a [`BusAdapter`].
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The bus itself misbehaved (echo mismatch, short, unsupported feature).
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// The remote adapter reported a failure; the connection is still usable.
    #[error("remote adapter error: {0}")]
    Remote(String),

    /// The peer sent a status byte that is neither success nor failure.
    #[error("protocol desync: unexpected status byte 0x{0:02X}")]
    Desync(u8),

    /// The handshake failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[source] ProtocolError),

    /// The adapter cannot be used any more.
    #[error("adapter closed")]
    Closed,

    /// Another owner kept exclusive use for longer than the caller waits.
    #[error("adapter is in exclusive use by {0}")]
    Busy(OwnerId),
}

impl From<ProtocolError> for AdapterError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(io) => AdapterError::Transport(io),
            other => AdapterError::Protocol(other),
        }
    }
}

impl From<HandshakeError> for AdapterError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Protocol(protocol) => protocol.into(),
            other => AdapterError::Authentication(other.to_string()),
        }
    }
}

impl AdapterError {
    /// `true` for errors after which the connection must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AdapterError::Desync(_)
                | AdapterError::Authentication(_)
                | AdapterError::Transport(_)
                | AdapterError::Protocol(_)
                | AdapterError::Closed
        )
    }
}

/// The complete low-level 1-Wire API.
pub trait BusAdapter: Send + Sync {
    /// Human readable adapter name, e.g. `"simulated"` or `"tunnel:host:6161"`.
    fn adapter_name(&self) -> String;

    // ── Raw bus I/O ───────────────────────────────────────────────────────────

    fn reset(&self, owner: OwnerId) -> Result<ResetResult, AdapterError>;

    /// Writes one bit; fails with [`BusError::BitEchoMismatch`] if the bus
    /// did not echo it.
    fn put_bit(&self, owner: OwnerId, bit: bool) -> Result<(), AdapterError>;

    fn get_bit(&self, owner: OwnerId) -> Result<bool, AdapterError>;

    /// Writes one byte; fails with [`BusError::ByteEchoMismatch`] if the bus
    /// did not echo it.
    fn put_byte(&self, owner: OwnerId, byte: u8) -> Result<(), AdapterError>;

    fn get_byte(&self, owner: OwnerId) -> Result<u8, AdapterError>;

    /// Reads `len` bytes.
    fn get_block(&self, owner: OwnerId, len: usize) -> Result<Vec<u8>, AdapterError>;

    /// Touches every byte of `block` in place.
    fn data_block(&self, owner: OwnerId, block: &mut [u8]) -> Result<(), AdapterError>;

    // ── Power and speed ───────────────────────────────────────────────────────

    fn set_power_duration(
        &self,
        owner: OwnerId,
        duration: PowerDuration,
    ) -> Result<(), AdapterError>;

    fn start_power_delivery(
        &self,
        owner: OwnerId,
        condition: PowerChangeCondition,
    ) -> Result<bool, AdapterError>;

    fn set_program_pulse_duration(
        &self,
        owner: OwnerId,
        duration: PowerDuration,
    ) -> Result<(), AdapterError>;

    fn start_program_pulse(
        &self,
        owner: OwnerId,
        condition: PowerChangeCondition,
    ) -> Result<bool, AdapterError>;

    fn start_break(&self, owner: OwnerId) -> Result<(), AdapterError>;

    fn set_power_normal(&self, owner: OwnerId) -> Result<(), AdapterError>;

    fn set_speed(&self, owner: OwnerId, speed: Speed) -> Result<(), AdapterError>;

    fn speed(&self, owner: OwnerId) -> Result<Speed, AdapterError>;

    fn supports(&self, capability: Capability) -> Result<bool, AdapterError>;

    // ── Exclusivity ───────────────────────────────────────────────────────────

    /// Claims exclusive use for `owner`.  With `blocking`, waits a bounded
    /// time; otherwise makes one attempt.  Re-entrant for the current owner.
    fn begin_exclusive(&self, owner: OwnerId, blocking: bool) -> Result<bool, AdapterError>;

    /// Releases exclusive use held by `owner`.  A no-op for anyone else.
    fn end_exclusive(&self, owner: OwnerId) -> Result<(), AdapterError>;

    // ── Search ────────────────────────────────────────────────────────────────

    fn find_first_device(&self, owner: OwnerId) -> Result<bool, AdapterError>;

    fn find_next_device(&self, owner: OwnerId) -> Result<bool, AdapterError>;

    /// Address found by the most recent successful `find_*` call.
    fn address(&self, owner: OwnerId) -> Result<RomId, AdapterError>;

    fn set_search_only_alarming(&self, owner: OwnerId) -> Result<(), AdapterError>;

    fn set_no_reset_search(&self, owner: OwnerId) -> Result<(), AdapterError>;

    /// Clears both the alarm-only and the no-reset search options.
    fn set_search_all_devices(&self, owner: OwnerId) -> Result<(), AdapterError>;

    fn target_all_families(&self, owner: OwnerId) -> Result<(), AdapterError>;

    fn target_family(&self, owner: OwnerId, families: &[u8]) -> Result<(), AdapterError>;

    fn exclude_family(&self, owner: OwnerId, families: &[u8]) -> Result<(), AdapterError>;

    // ── Provided ──────────────────────────────────────────────────────────────

    /// Resets the bus and addresses `address` with MATCH ROM.
    fn select(&self, owner: OwnerId, address: RomId) -> Result<bool, AdapterError> {
        if !self.reset(owner)?.has_presence() {
            return Ok(false);
        }
        let mut block = [0u8; 9];
        block[0] = MATCH_ROM;
        block[1..].copy_from_slice(address.as_bytes());
        let sent = block;
        self.data_block(owner, &mut block)?;
        if let Some((&s, &e)) = sent.iter().zip(block.iter()).find(|(s, e)| s != e) {
            return Err(BusError::ByteEchoMismatch { sent: s, echoed: e }.into());
        }
        Ok(true)
    }

    /// `true` if the device with `address` answers a verification exchange.
    fn is_present(&self, owner: OwnerId, address: RomId) -> Result<bool, AdapterError> {
        verify_via(self, owner, address, SEARCH_ROM)
    }

    /// `true` if the device with `address` is present and alarming.
    fn is_alarming(&self, owner: OwnerId, address: RomId) -> Result<bool, AdapterError> {
        verify_via(self, owner, address, ALARM_SEARCH)
    }

    /// Runs a complete enumeration and collects every address.
    fn devices(&self, owner: OwnerId) -> Result<Vec<RomId>, AdapterError> {
        let mut found = Vec::new();
        let mut more = self.find_first_device(owner)?;
        while more {
            found.push(self.address(owner)?);
            more = self.find_next_device(owner)?;
        }
        Ok(found)
    }
}

fn verify_via<A>(
    adapter: &A,
    owner: OwnerId,
    address: RomId,
    command: u8,
) -> Result<bool, AdapterError>
where
    A: BusAdapter + ?Sized,
{
    if !adapter.reset(owner)?.has_presence() {
        return Ok(false);
    }
    adapter.put_byte(owner, command)?;
    let mut block: [u8; VERIFY_BLOCK_LEN] = build_verify_block(address);
    adapter.data_block(owner, &mut block)?;
    Ok(evaluate(address, &block).present)
}
