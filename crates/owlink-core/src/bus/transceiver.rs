//! The hardware-facing capability every 1-Wire backend implements.
//!
//! A [`BusTransceiver`] is the thinnest possible view of a bus master: it can
//! issue a reset pulse and run one time slot at a time.  Serial bit-bangers,
//! USB bridges and native drivers all reduce to this; the search engine and
//! the adapter layer are written purely against it.
//!
//! Only [`reset`](BusTransceiver::reset) and
//! [`touch_bit`](BusTransceiver::touch_bit) are required.  Everything else
//! has a default built from those two, so a backend overrides a method only
//! when its hardware can do the job faster (a native triplet, a block
//! transfer) or supports an optional feature (overdrive, strong pull-up).
//!
//! # Time slots (for beginners)
//!
//! The 1-Wire bus is open-drain: any device may pull the line low, nobody
//! drives it high.  A "touch" is the master's half of one time slot:
//!
//! - touching with `1` releases the line, so the value read back is `0` if
//!   *any* device pulled it low and `1` otherwise (a *read*);
//! - touching with `0` holds the line low, so everyone reads `0` (a *write*).
//!
//! Sending a byte is eight touches, least significant bit first.

use thiserror::Error;

/// Errors raised by a transceiver or by echo verification on top of one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A written bit did not read back as written.
    #[error("bit echo mismatch: sent {sent}, read back {echoed}")]
    BitEchoMismatch { sent: bool, echoed: bool },

    /// A written byte did not read back as written.
    #[error("byte echo mismatch: sent 0x{sent:02X}, read back 0x{echoed:02X}")]
    ByteEchoMismatch { sent: u8, echoed: u8 },

    /// The bus line is held low permanently.
    #[error("1-Wire bus is shorted")]
    Short,

    /// The backend does not implement the requested feature.
    #[error("operation not supported by this transceiver: {0}")]
    Unsupported(&'static str),

    /// Backend-specific failure (serial port gone, USB stall, ...).
    #[error("transceiver failure: {0}")]
    Hardware(String),
}

/// Outcome of a reset pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResetResult {
    /// No device answered with a presence pulse.
    NoPresence = 0,
    /// At least one device is present.
    Presence = 1,
    /// A device answered with an alarming presence pulse.
    Alarm = 2,
    /// The line is shorted.
    Short = 3,
}

impl ResetResult {
    /// Returns `true` if at least one device answered the reset.
    pub fn has_presence(self) -> bool {
        matches!(self, ResetResult::Presence | ResetResult::Alarm)
    }
}

impl TryFrom<u8> for ResetResult {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(ResetResult::NoPresence),
            1 => Ok(ResetResult::Presence),
            2 => Ok(ResetResult::Alarm),
            3 => Ok(ResetResult::Short),
            _ => Err(()),
        }
    }
}

/// Bus communication speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Speed {
    /// Standard 16 kbit/s timing.
    #[default]
    Regular = 0,
    /// Standard speed with relaxed, long-line timing.
    Flex = 1,
    /// 142 kbit/s overdrive timing.
    Overdrive = 2,
    /// Hyperdrive timing (few adapters support it).
    Hyperdrive = 3,
}

impl TryFrom<u8> for Speed {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(Speed::Regular),
            1 => Ok(Speed::Flex),
            2 => Ok(Speed::Overdrive),
            3 => Ok(Speed::Hyperdrive),
            _ => Err(()),
        }
    }
}

/// How long a strong pull-up or program pulse is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerDuration {
    HalfSecond = 0,
    OneSecond = 1,
    TwoSeconds = 2,
    FourSeconds = 3,
    /// Until the device signals completion.
    SmartDone = 4,
    /// Until [`BusTransceiver::set_power_normal`] is called.
    Infinite = 5,
    /// Until the current draw drops.
    CurrentDetect = 6,
    /// Standard EPROM programming pulse length.
    Eprom = 7,
}

impl TryFrom<u8> for PowerDuration {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(PowerDuration::HalfSecond),
            1 => Ok(PowerDuration::OneSecond),
            2 => Ok(PowerDuration::TwoSeconds),
            3 => Ok(PowerDuration::FourSeconds),
            4 => Ok(PowerDuration::SmartDone),
            5 => Ok(PowerDuration::Infinite),
            6 => Ok(PowerDuration::CurrentDetect),
            7 => Ok(PowerDuration::Eprom),
            _ => Err(()),
        }
    }
}

/// When a power or program pulse should start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerChangeCondition {
    Now = 0,
    AfterNextBit = 1,
    AfterNextByte = 2,
}

impl TryFrom<u8> for PowerChangeCondition {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(PowerChangeCondition::Now),
            1 => Ok(PowerChangeCondition::AfterNextBit),
            2 => Ok(PowerChangeCondition::AfterNextByte),
            _ => Err(()),
        }
    }
}

/// Optional features a transceiver may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Overdrive,
    Hyperdrive,
    Flex,
    ProgramPulse,
    PowerDelivery,
    SmartPowerDelivery,
    Break,
}

/// Result of one search triplet: two read slots and one write slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    /// AND of the participating devices' address bits.
    pub id_bit: bool,
    /// AND of the participating devices' complemented address bits.
    pub complement_bit: bool,
    /// The branch that was written back to the bus.
    pub taken: bool,
}

impl Triplet {
    /// `true` when no device took part in the slot (`1,1`).
    pub fn is_empty(&self) -> bool {
        self.id_bit && self.complement_bit
    }

    /// `true` when devices disagreed on this bit (`0,0`).
    pub fn is_conflict(&self) -> bool {
        !self.id_bit && !self.complement_bit
    }
}

/// Low-level 1-Wire master.
#[cfg_attr(test, mockall::automock)]
pub trait BusTransceiver: Send {
    /// Issues a reset pulse and samples the presence response.
    fn reset(&mut self) -> Result<ResetResult, BusError>;

    /// Runs one time slot, driving `bit` and returning the sampled line.
    fn touch_bit(&mut self, bit: bool) -> Result<bool, BusError>;

    /// Runs eight time slots, least significant bit first.
    fn touch_byte(&mut self, byte: u8) -> Result<u8, BusError> {
        let mut result = 0u8;
        for i in 0..8 {
            if self.touch_bit((byte >> i) & 0x01 != 0)? {
                result |= 1 << i;
            }
        }
        Ok(result)
    }

    /// Touches every byte of `block` in place.
    fn exchange_block(&mut self, block: &mut [u8]) -> Result<(), BusError> {
        for byte in block.iter_mut() {
            *byte = self.touch_byte(*byte)?;
        }
        Ok(())
    }

    /// Runs one search triplet.
    ///
    /// `direction` is the branch to write when the two read slots conflict;
    /// otherwise the only branch that any device can follow is written.
    fn triplet(&mut self, direction: bool) -> Result<Triplet, BusError> {
        let id_bit = self.touch_bit(true)?;
        let complement_bit = self.touch_bit(true)?;
        let taken = match (id_bit, complement_bit) {
            (false, false) => direction,
            (true, true) => true,
            (bit, _) => bit,
        };
        self.touch_bit(taken)?;
        Ok(Triplet {
            id_bit,
            complement_bit,
            taken,
        })
    }

    /// Writes one bit and checks that it reads back unchanged.
    fn send_bit(&mut self, bit: bool) -> Result<(), BusError> {
        let echoed = self.touch_bit(bit)?;
        if echoed != bit {
            return Err(BusError::BitEchoMismatch { sent: bit, echoed });
        }
        Ok(())
    }

    /// Reads one bit.
    fn recv_bit(&mut self) -> Result<bool, BusError> {
        self.touch_bit(true)
    }

    /// Writes one byte and checks that it reads back unchanged.
    fn send_byte(&mut self, byte: u8) -> Result<(), BusError> {
        let echoed = self.touch_byte(byte)?;
        if echoed != byte {
            return Err(BusError::ByteEchoMismatch { sent: byte, echoed });
        }
        Ok(())
    }

    /// Reads one byte.
    fn recv_byte(&mut self) -> Result<u8, BusError> {
        self.touch_byte(0xFF)
    }

    /// Current bus speed.
    fn speed(&self) -> Speed {
        Speed::Regular
    }

    /// Changes the bus speed.
    fn set_speed(&mut self, speed: Speed) -> Result<(), BusError> {
        match speed {
            Speed::Regular => Ok(()),
            _ => Err(BusError::Unsupported("set_speed")),
        }
    }

    /// Sets how long the next strong pull-up is held.
    fn set_power_duration(&mut self, _duration: PowerDuration) -> Result<(), BusError> {
        Err(BusError::Unsupported("set_power_duration"))
    }

    /// Arms or starts a strong pull-up.
    fn start_power_delivery(&mut self, _condition: PowerChangeCondition) -> Result<bool, BusError> {
        Err(BusError::Unsupported("start_power_delivery"))
    }

    /// Sets how long the next program pulse is held.
    fn set_program_pulse_duration(&mut self, _duration: PowerDuration) -> Result<(), BusError> {
        Err(BusError::Unsupported("set_program_pulse_duration"))
    }

    /// Arms or starts a program pulse.
    fn start_program_pulse(&mut self, _condition: PowerChangeCondition) -> Result<bool, BusError> {
        Err(BusError::Unsupported("start_program_pulse"))
    }

    /// Holds the line low indefinitely.
    fn start_break(&mut self) -> Result<(), BusError> {
        Err(BusError::Unsupported("start_break"))
    }

    /// Returns the line to normal, weakly pulled-up operation.
    fn set_power_normal(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Reports whether an optional feature is available.
    fn supports(&self, _capability: Capability) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transceiver that echoes every write and lets the test choose what a
    /// released line reads as.
    struct ScriptedLine {
        reads: Vec<bool>,
        touches: Vec<bool>,
    }

    impl BusTransceiver for ScriptedLine {
        fn reset(&mut self) -> Result<ResetResult, BusError> {
            Ok(ResetResult::Presence)
        }

        fn touch_bit(&mut self, bit: bool) -> Result<bool, BusError> {
            self.touches.push(bit);
            if bit {
                Ok(if self.reads.is_empty() { true } else { self.reads.remove(0) })
            } else {
                Ok(false)
            }
        }
    }

    fn line(reads: &[bool]) -> ScriptedLine {
        ScriptedLine {
            reads: reads.to_vec(),
            touches: Vec::new(),
        }
    }

    #[test]
    fn test_touch_byte_sends_lsb_first() {
        let mut bus = line(&[]);
        bus.touch_byte(0b0000_0110).unwrap();
        assert_eq!(
            bus.touches,
            vec![false, true, true, false, false, false, false, false]
        );
    }

    #[test]
    fn test_recv_byte_assembles_lsb_first() {
        // Arrange: the line reads 1,0,0,0,0,0,0,1
        let mut bus = line(&[true, false, false, false, false, false, false, true]);

        // Act
        let byte = bus.recv_byte().unwrap();

        // Assert
        assert_eq!(byte, 0x81);
    }

    #[test]
    fn test_send_byte_reports_echo_mismatch() {
        // A device pulls the line low during the first released slot.
        let mut bus = line(&[false]);
        let err = bus.send_byte(0xFF).unwrap_err();
        assert_eq!(
            err,
            BusError::ByteEchoMismatch {
                sent: 0xFF,
                echoed: 0xFE
            }
        );
    }

    #[test]
    fn test_send_bit_reports_echo_mismatch() {
        let mut bus = line(&[false]);
        assert_eq!(
            bus.send_bit(true),
            Err(BusError::BitEchoMismatch {
                sent: true,
                echoed: false
            })
        );
    }

    #[test]
    fn test_triplet_takes_direction_on_conflict() {
        let mut bus = line(&[false, false]);
        let t = bus.triplet(true).unwrap();
        assert!(t.is_conflict());
        assert!(t.taken);
        assert_eq!(bus.touches, vec![true, true, true]);
    }

    #[test]
    fn test_triplet_follows_only_branch_without_conflict() {
        // id bit 0, complement 1 → every device has a 0 here.
        let mut bus = line(&[false, true]);
        let t = bus.triplet(true).unwrap();
        assert!(!t.taken);
        assert_eq!(bus.touches, vec![true, true, false]);
    }

    #[test]
    fn test_default_optional_features_are_unsupported() {
        let mut bus = line(&[]);
        assert!(!bus.supports(Capability::Overdrive));
        assert_eq!(bus.set_speed(Speed::Overdrive), Err(BusError::Unsupported("set_speed")));
        assert!(bus.set_speed(Speed::Regular).is_ok());
        assert!(bus.start_break().is_err());
    }

    #[test]
    fn test_reset_result_codes_round_trip() {
        for code in 0u8..4 {
            let result = ResetResult::try_from(code).unwrap();
            assert_eq!(result as u8, code);
        }
        assert!(ResetResult::try_from(4).is_err());
        assert!(ResetResult::Alarm.has_presence());
        assert!(!ResetResult::Short.has_presence());
    }
}
