//! [`BusAdapter`] over an in-process [`BusTransceiver`].
//!
//! The transceiver and the search session share one mutex.  Every bus and
//! search call gets that mutex through [`ExclusivityToken::admit`], so while
//! one owner holds exclusive use, calls for other owners wait up to the
//! exclusive wait and then fail with [`AdapterError::Busy`].

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::adapter::{AdapterError, BusAdapter};
use crate::bus::exclusive::{ExclusivityToken, OwnerId, DEFAULT_EXCLUSIVE_WAIT};
use crate::bus::transceiver::{
    BusError, BusTransceiver, Capability, PowerChangeCondition, PowerDuration, ResetResult, Speed,
};
use crate::discovery::{search, verify};
use crate::domain::address::RomId;
use crate::domain::search_state::SearchState;

struct Inner<T> {
    bus: T,
    search: SearchState,
}

/// Adapter that owns a transceiver and one search session.
pub struct LocalAdapter<T> {
    name: String,
    inner: Mutex<Inner<T>>,
    exclusive: ExclusivityToken,
    exclusive_wait: Duration,
}

impl<T: BusTransceiver> LocalAdapter<T> {
    pub fn new(name: impl Into<String>, bus: T) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                bus,
                search: SearchState::new(),
            }),
            exclusive: ExclusivityToken::new(),
            exclusive_wait: DEFAULT_EXCLUSIVE_WAIT,
        }
    }

    /// Bounds how long a blocking `begin_exclusive` waits, and how long a
    /// call waits while another owner holds exclusive use.
    pub fn with_exclusive_wait(mut self, wait: Duration) -> Self {
        self.exclusive_wait = wait;
        self
    }

    /// Applies search options that have no opcode of their own.
    pub fn configure_search<F>(&self, configure: F)
    where
        F: FnOnce(&mut SearchState),
    {
        configure(&mut self.lock().search);
    }

    /// Snapshot of the current search session.
    pub fn search_state(&self) -> SearchState {
        self.lock().search.clone()
    }

    /// Runs `f` with direct access to the transceiver.
    pub fn with_transceiver<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        f(&mut self.lock().bus)
    }

    pub fn exclusive_holder(&self) -> Option<OwnerId> {
        self.exclusive.holder()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the adapter for `owner` once no other owner holds it.
    fn access(&self, owner: OwnerId) -> Result<MutexGuard<'_, Inner<T>>, AdapterError> {
        self.exclusive
            .admit(owner, &self.inner, self.exclusive_wait)
            .map_err(|holder| {
                debug!(adapter = %self.name, %owner, %holder, "call refused");
                AdapterError::Busy(holder)
            })
    }

    fn with_bus<R, F>(&self, owner: OwnerId, f: F) -> Result<R, AdapterError>
    where
        F: FnOnce(&mut T) -> Result<R, BusError>,
    {
        f(&mut self.access(owner)?.bus).map_err(AdapterError::from)
    }

    fn with_search<R, F>(&self, owner: OwnerId, f: F) -> Result<R, AdapterError>
    where
        F: FnOnce(&mut SearchState) -> R,
    {
        Ok(f(&mut self.access(owner)?.search))
    }
}

impl<T: BusTransceiver> BusAdapter for LocalAdapter<T> {
    fn adapter_name(&self) -> String {
        self.name.clone()
    }

    fn reset(&self, owner: OwnerId) -> Result<ResetResult, AdapterError> {
        self.with_bus(owner, |bus| bus.reset())
    }

    fn put_bit(&self, owner: OwnerId, bit: bool) -> Result<(), AdapterError> {
        self.with_bus(owner, |bus| bus.send_bit(bit))
    }

    fn get_bit(&self, owner: OwnerId) -> Result<bool, AdapterError> {
        self.with_bus(owner, |bus| bus.recv_bit())
    }

    fn put_byte(&self, owner: OwnerId, byte: u8) -> Result<(), AdapterError> {
        self.with_bus(owner, |bus| bus.send_byte(byte))
    }

    fn get_byte(&self, owner: OwnerId) -> Result<u8, AdapterError> {
        self.with_bus(owner, |bus| bus.recv_byte())
    }

    fn get_block(&self, owner: OwnerId, len: usize) -> Result<Vec<u8>, AdapterError> {
        let mut block = vec![0xFF; len];
        self.with_bus(owner, |bus| bus.exchange_block(&mut block))?;
        Ok(block)
    }

    fn data_block(&self, owner: OwnerId, block: &mut [u8]) -> Result<(), AdapterError> {
        self.with_bus(owner, |bus| bus.exchange_block(block))
    }

    fn set_power_duration(
        &self,
        owner: OwnerId,
        duration: PowerDuration,
    ) -> Result<(), AdapterError> {
        self.with_bus(owner, |bus| bus.set_power_duration(duration))
    }

    fn start_power_delivery(
        &self,
        owner: OwnerId,
        condition: PowerChangeCondition,
    ) -> Result<bool, AdapterError> {
        self.with_bus(owner, |bus| bus.start_power_delivery(condition))
    }

    fn set_program_pulse_duration(
        &self,
        owner: OwnerId,
        duration: PowerDuration,
    ) -> Result<(), AdapterError> {
        self.with_bus(owner, |bus| bus.set_program_pulse_duration(duration))
    }

    fn start_program_pulse(
        &self,
        owner: OwnerId,
        condition: PowerChangeCondition,
    ) -> Result<bool, AdapterError> {
        self.with_bus(owner, |bus| bus.start_program_pulse(condition))
    }

    fn start_break(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.with_bus(owner, |bus| bus.start_break())
    }

    fn set_power_normal(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.with_bus(owner, |bus| bus.set_power_normal())
    }

    fn set_speed(&self, owner: OwnerId, speed: Speed) -> Result<(), AdapterError> {
        self.with_bus(owner, |bus| bus.set_speed(speed))
    }

    fn speed(&self, owner: OwnerId) -> Result<Speed, AdapterError> {
        self.with_bus(owner, |bus| Ok(bus.speed()))
    }

    fn supports(&self, capability: Capability) -> Result<bool, AdapterError> {
        Ok(self.lock().bus.supports(capability))
    }

    fn begin_exclusive(&self, owner: OwnerId, blocking: bool) -> Result<bool, AdapterError> {
        let granted = if blocking {
            self.exclusive.acquire_timeout(owner, self.exclusive_wait)
        } else {
            self.exclusive.try_acquire(owner)
        };
        if !granted {
            debug!(adapter = %self.name, %owner, blocking, "exclusive use refused");
        }
        Ok(granted)
    }

    fn end_exclusive(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.exclusive.release(owner);
        Ok(())
    }

    fn find_first_device(&self, owner: OwnerId) -> Result<bool, AdapterError> {
        let mut inner = self.access(owner)?;
        let Inner { bus, search: state } = &mut *inner;
        Ok(search::find_first(bus, state)?)
    }

    fn find_next_device(&self, owner: OwnerId) -> Result<bool, AdapterError> {
        let mut inner = self.access(owner)?;
        let Inner { bus, search: state } = &mut *inner;
        Ok(search::find_next(bus, state)?)
    }

    fn address(&self, owner: OwnerId) -> Result<RomId, AdapterError> {
        self.with_search(owner, |state| state.current_address)
    }

    fn set_search_only_alarming(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.with_search(owner, |state| state.alarm_only = true)
    }

    fn set_no_reset_search(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.with_search(owner, |state| state.skip_reset_on_search = true)
    }

    fn set_search_all_devices(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.with_search(owner, |state| {
            state.search_all_devices();
            state.skip_reset_on_search = false;
        })
    }

    fn target_all_families(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.with_search(owner, SearchState::target_all_families)
    }

    fn target_family(&self, owner: OwnerId, families: &[u8]) -> Result<(), AdapterError> {
        self.with_search(owner, |state| state.target_families(families))
    }

    fn exclude_family(&self, owner: OwnerId, families: &[u8]) -> Result<(), AdapterError> {
        self.with_search(owner, |state| state.exclude_families(families))
    }

    fn select(&self, owner: OwnerId, address: RomId) -> Result<bool, AdapterError> {
        self.with_bus(owner, |bus| verify::select(bus, address))
    }

    fn is_present(&self, owner: OwnerId, address: RomId) -> Result<bool, AdapterError> {
        self.with_bus(owner, |bus| verify::is_present(bus, address))
    }

    fn is_alarming(&self, owner: OwnerId, address: RomId) -> Result<bool, AdapterError> {
        self.with_bus(owner, |bus| verify::is_alarming(bus, address))
    }
}
