//! An in-memory 1-Wire bus with wired-AND semantics.
//!
//! [`SimulatedBus`] implements [`BusTransceiver`] by modelling each attached
//! device's ROM-level state machine slot by slot.  It understands the ROM
//! commands that matter for enumeration and selection:
//!
//! | Command | Code | Behaviour                                            |
//! |---------|------|------------------------------------------------------|
//! | Search  | 0xF0 | every device takes part in triplets                  |
//! | Alarm   | 0xEC | only alarming devices take part                      |
//! | Match   | 0x55 | master writes 64 bits, mismatching devices drop out  |
//! | Read    | 0x33 | every device drives its address (AND on collision)   |
//! | Skip    | 0xCC | every device is selected                             |
//!
//! Function commands after selection are not modelled: the line simply
//! echoes whatever the master writes.  This is enough to exercise the search
//! engine, presence verification and the network tunnel without hardware.

use std::collections::BTreeSet;

use tracing::trace;

use crate::bus::transceiver::{
    BusError, BusTransceiver, Capability, PowerChangeCondition, PowerDuration, ResetResult, Speed,
};
use crate::discovery::{ALARM_SEARCH, MATCH_ROM, READ_ROM, SEARCH_ROM, SKIP_ROM};
use crate::domain::address::{RomId, ROM_BITS};

/// One device attached to a [`SimulatedBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    pub address: RomId,
    pub alarm: bool,
}

impl SimulatedDevice {
    pub fn new(address: RomId) -> Self {
        Self {
            address,
            alarm: false,
        }
    }

    pub fn alarming(address: RomId) -> Self {
        Self {
            address,
            alarm: true,
        }
    }
}

/// Where the devices are in their ROM-level state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    /// No reset since the last transaction ended; devices ignore the line.
    Idle,
    /// Receiving the ROM command byte.
    Command { value: u8, received: u8 },
    /// Inside a search.  `slot` is 0 (id bit), 1 (complement) or 2 (write).
    Search {
        bit: usize,
        slot: u8,
        active: Vec<bool>,
    },
    /// Receiving a match ROM address.
    Match { bit: usize, active: Vec<bool> },
    /// Devices are transmitting their address.
    ReadRom { bit: usize },
    /// ROM phase done; the listed devices are selected.
    Selected { active: Vec<bool> },
}

/// Slot-level counters for tests and benchmarks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub resets: u64,
    pub slots: u64,
}

/// In-memory transceiver.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    devices: Vec<SimulatedDevice>,
    phase: Phase,
    shorted: bool,
    speed: Speed,
    capabilities: BTreeSet<Capability>,
    power_duration: Option<PowerDuration>,
    program_duration: Option<PowerDuration>,
    power_pending: Option<PowerChangeCondition>,
    stats: BusStats,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            phase: Phase::Idle,
            shorted: false,
            speed: Speed::Regular,
            capabilities: BTreeSet::new(),
            power_duration: None,
            program_duration: None,
            power_pending: None,
            stats: BusStats::default(),
        }
    }

    /// Creates a bus with the given non-alarming devices attached.
    pub fn with_devices<I>(addresses: I) -> Self
    where
        I: IntoIterator<Item = RomId>,
    {
        let mut bus = Self::new();
        for address in addresses {
            bus.attach(SimulatedDevice::new(address));
        }
        bus
    }

    /// Attaches a device.  Takes effect at the next reset.
    pub fn attach(&mut self, device: SimulatedDevice) {
        self.devices.push(device);
        self.phase = Phase::Idle;
    }

    /// Detaches every device with `address`.  Returns `true` if one was found.
    pub fn detach(&mut self, address: RomId) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d.address != address);
        self.phase = Phase::Idle;
        self.devices.len() != before
    }

    /// Sets or clears the alarm condition of a device.
    pub fn set_alarm(&mut self, address: RomId, alarm: bool) -> bool {
        let mut found = false;
        for device in self.devices.iter_mut().filter(|d| d.address == address) {
            device.alarm = alarm;
            found = true;
        }
        found
    }

    /// Simulates a short circuit on the line.
    pub fn set_shorted(&mut self, shorted: bool) {
        self.shorted = shorted;
    }

    /// Declares an optional feature as available.
    pub fn enable(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    pub fn devices(&self) -> &[SimulatedDevice] {
        &self.devices
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Devices currently selected by a completed match, skip or search.
    pub fn selected(&self) -> Vec<RomId> {
        match &self.phase {
            Phase::Selected { active } => self
                .devices
                .iter()
                .zip(active)
                .filter(|(_, a)| **a)
                .map(|(d, _)| d.address)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn power_duration(&self) -> Option<PowerDuration> {
        self.power_duration
    }

    pub fn program_pulse_duration(&self) -> Option<PowerDuration> {
        self.program_duration
    }

    /// Strong pull-up armed by `start_power_delivery`, if any.
    pub fn power_pending(&self) -> Option<PowerChangeCondition> {
        self.power_pending
    }

    /// AND of `value(device)` over the active devices, or `true` if none.
    fn wired_and<F>(&self, active: &[bool], value: F) -> bool
    where
        F: Fn(&SimulatedDevice) -> bool,
    {
        self.devices
            .iter()
            .zip(active)
            .filter(|(_, a)| **a)
            .all(|(d, _)| value(d))
    }

    fn start_rom_command(&mut self, command: u8) {
        let all = vec![true; self.devices.len()];
        self.phase = match command {
            SEARCH_ROM => Phase::Search {
                bit: 0,
                slot: 0,
                active: all,
            },
            ALARM_SEARCH => Phase::Search {
                bit: 0,
                slot: 0,
                active: self.devices.iter().map(|d| d.alarm).collect(),
            },
            MATCH_ROM => Phase::Match { bit: 0, active: all },
            READ_ROM => Phase::ReadRom { bit: 0 },
            SKIP_ROM => Phase::Selected { active: all },
            other => {
                trace!("unknown ROM command 0x{other:02X}, bus idle");
                Phase::Idle
            }
        };
    }
}

impl BusTransceiver for SimulatedBus {
    fn reset(&mut self) -> Result<ResetResult, BusError> {
        self.stats.resets += 1;
        self.power_pending = None;
        if self.shorted {
            self.phase = Phase::Idle;
            return Ok(ResetResult::Short);
        }
        self.phase = Phase::Command {
            value: 0,
            received: 0,
        };
        Ok(if self.devices.is_empty() {
            ResetResult::NoPresence
        } else {
            ResetResult::Presence
        })
    }

    fn touch_bit(&mut self, bit: bool) -> Result<bool, BusError> {
        self.stats.slots += 1;
        if self.shorted {
            return Ok(false);
        }

        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        let (line, next) = match phase {
            Phase::Idle => (bit, Phase::Idle),

            Phase::Command { value, received } => {
                let value = value | (u8::from(bit) << received);
                if received + 1 == 8 {
                    self.start_rom_command(value);
                    let started = std::mem::replace(&mut self.phase, Phase::Idle);
                    (bit, started)
                } else {
                    (
                        bit,
                        Phase::Command {
                            value,
                            received: received + 1,
                        },
                    )
                }
            }

            Phase::Search {
                bit: index,
                slot,
                mut active,
            } => match slot {
                0 => {
                    let line = bit && self.wired_and(&active, |d| d.address.bit(index));
                    (line, Phase::Search { bit: index, slot: 1, active })
                }
                1 => {
                    let line = bit && self.wired_and(&active, |d| !d.address.bit(index));
                    (line, Phase::Search { bit: index, slot: 2, active })
                }
                _ => {
                    for (device, flag) in self.devices.iter().zip(active.iter_mut()) {
                        if device.address.bit(index) != bit {
                            *flag = false;
                        }
                    }
                    let next = if index + 1 == ROM_BITS {
                        Phase::Selected { active }
                    } else {
                        Phase::Search {
                            bit: index + 1,
                            slot: 0,
                            active,
                        }
                    };
                    (bit, next)
                }
            },

            Phase::Match {
                bit: index,
                mut active,
            } => {
                for (device, flag) in self.devices.iter().zip(active.iter_mut()) {
                    if device.address.bit(index) != bit {
                        *flag = false;
                    }
                }
                let next = if index + 1 == ROM_BITS {
                    Phase::Selected { active }
                } else {
                    Phase::Match {
                        bit: index + 1,
                        active,
                    }
                };
                (bit, next)
            }

            Phase::ReadRom { bit: index } => {
                let everyone = vec![true; self.devices.len()];
                let line = bit && self.wired_and(&everyone, |d| d.address.bit(index));
                let next = if index + 1 == ROM_BITS {
                    Phase::Selected { active: everyone }
                } else {
                    Phase::ReadRom { bit: index + 1 }
                };
                (line, next)
            }

            selected @ Phase::Selected { .. } => (bit, selected),
        };

        self.phase = next;
        Ok(line)
    }

    fn speed(&self) -> Speed {
        self.speed
    }

    fn set_speed(&mut self, speed: Speed) -> Result<(), BusError> {
        let needed = match speed {
            Speed::Regular => None,
            Speed::Flex => Some(Capability::Flex),
            Speed::Overdrive => Some(Capability::Overdrive),
            Speed::Hyperdrive => Some(Capability::Hyperdrive),
        };
        if let Some(capability) = needed {
            if !self.capabilities.contains(&capability) {
                return Err(BusError::Unsupported("set_speed"));
            }
        }
        self.speed = speed;
        Ok(())
    }

    fn set_power_duration(&mut self, duration: PowerDuration) -> Result<(), BusError> {
        if !self.capabilities.contains(&Capability::PowerDelivery) {
            return Err(BusError::Unsupported("set_power_duration"));
        }
        self.power_duration = Some(duration);
        Ok(())
    }

    fn start_power_delivery(&mut self, condition: PowerChangeCondition) -> Result<bool, BusError> {
        if !self.capabilities.contains(&Capability::PowerDelivery) {
            return Err(BusError::Unsupported("start_power_delivery"));
        }
        self.power_pending = Some(condition);
        Ok(true)
    }

    fn set_program_pulse_duration(&mut self, duration: PowerDuration) -> Result<(), BusError> {
        if !self.capabilities.contains(&Capability::ProgramPulse) {
            return Err(BusError::Unsupported("set_program_pulse_duration"));
        }
        self.program_duration = Some(duration);
        Ok(())
    }

    fn start_program_pulse(&mut self, _condition: PowerChangeCondition) -> Result<bool, BusError> {
        if !self.capabilities.contains(&Capability::ProgramPulse) {
            return Err(BusError::Unsupported("start_program_pulse"));
        }
        Ok(true)
    }

    fn start_break(&mut self) -> Result<(), BusError> {
        if !self.capabilities.contains(&Capability::Break) {
            return Err(BusError::Unsupported("start_break"));
        }
        self.phase = Phase::Idle;
        Ok(())
    }

    fn set_power_normal(&mut self) -> Result<(), BusError> {
        self.power_pending = None;
        Ok(())
    }

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
