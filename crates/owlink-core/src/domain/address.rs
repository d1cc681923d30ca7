//! The 64-bit ROM id that identifies every device on a 1-Wire bus.
//!
//! ```text
//! byte:   0        1 .. 6          7
//!       [family][ 48-bit serial ][CRC8]
//! ```
//!
//! The search algorithm walks the id one *bit* at a time, least significant
//! bit of byte 0 first, so [`RomId::bit`] and [`RomId::set_bit`] use that
//! ordering: bit `i` lives in bit `i % 8` of byte `i / 8`.
//!
//! The textual form is the conventional one printed on device labels and in
//! vendor tools: sixteen hex digits with the CRC byte first and the family
//! byte last, e.g. `A200000001B81C02`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::crc::crc8;

/// Number of bits in a ROM id.
pub const ROM_BITS: usize = 64;

/// Errors produced when parsing a [`RomId`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    /// The string does not contain exactly 16 hex digits.
    #[error("address must be 16 hex digits, got {0} characters")]
    BadLength(usize),
    /// A character is not a hex digit.
    #[error("invalid hex digit in address: {0:?}")]
    BadDigit(char),
}

/// An 8-byte 1-Wire device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RomId([u8; 8]);

impl RomId {
    /// Wraps raw address bytes (byte 0 = family).
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Builds an address from a family code and 48-bit serial, appending a
    /// correct CRC8.
    pub fn with_crc(family: u8, serial: [u8; 6]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0] = family;
        bytes[1..7].copy_from_slice(&serial);
        bytes[7] = crc8(&bytes[..7], 0);
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn bytes(&self) -> [u8; 8] {
        self.0
    }

    /// Returns the raw bytes by reference.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Family code (byte 0).
    pub const fn family(&self) -> u8 {
        self.0[0]
    }

    /// The 48-bit serial number (bytes 1–6).
    pub fn serial(&self) -> [u8; 6] {
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&self.0[1..7]);
        serial
    }

    /// The stored CRC byte (byte 7).
    pub const fn crc(&self) -> u8 {
        self.0[7]
    }

    /// Returns `true` if byte 7 is the CRC8 of bytes 0–6.
    pub fn is_crc_valid(&self) -> bool {
        crc8(&self.0, 0) == 0
    }

    /// Returns address bit `index` (0..64), LSB of byte 0 first.
    ///
    /// # Panics
    ///
    /// Panics if `index >= 64`.
    pub fn bit(&self, index: usize) -> bool {
        assert!(index < ROM_BITS, "ROM bit index out of range: {index}");
        (self.0[index / 8] >> (index % 8)) & 0x01 != 0
    }

    /// Sets address bit `index` (0..64) to `value`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= 64`.
    pub fn set_bit(&mut self, index: usize, value: bool) {
        assert!(index < ROM_BITS, "ROM bit index out of range: {index}");
        let mask = 1u8 << (index % 8);
        if value {
            self.0[index / 8] |= mask;
        } else {
            self.0[index / 8] &= !mask;
        }
    }
}

impl From<[u8; 8]> for RomId {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl From<RomId> for [u8; 8] {
    fn from(id: RomId) -> Self {
        id.0
    }
}

impl fmt::Display for RomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl FromStr for RomId {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 16 {
            return Err(AddressParseError::BadLength(s.chars().count()));
        }
        if let Some(bad) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(AddressParseError::BadDigit(bad));
        }
        let mut bytes = [0u8; 8];
        for (i, slot) in bytes.iter_mut().rev().enumerate() {
            let pair = &s[i * 2..i * 2 + 2];
            // Both characters were validated as hex digits above.
            *slot = u8::from_str_radix(pair, 16).map_err(|_| AddressParseError::BadDigit('?'))?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for RomId {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RomId> for String {
    fn from(id: RomId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_serial_and_crc_accessors() {
        let id = RomId::new([0x28, 1, 2, 3, 4, 5, 6, 0x99]);
        assert_eq!(id.family(), 0x28);
        assert_eq!(id.serial(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(id.crc(), 0x99);
    }

    #[test]
    fn test_with_crc_produces_valid_address() {
        let id = RomId::with_crc(0x02, [0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(id.crc(), 0xA2);
        assert!(id.is_crc_valid());
    }

    #[test]
    fn test_is_crc_valid_rejects_corrupted_address() {
        let mut bytes = RomId::with_crc(0x10, [9, 8, 7, 6, 5, 4]).bytes();
        bytes[3] ^= 0x01;
        assert!(!RomId::new(bytes).is_crc_valid());
    }

    #[test]
    fn test_bit_indexing_is_lsb_first_per_byte() {
        // Arrange: only bit 0 of byte 0 and bit 7 of byte 7 set.
        let id = RomId::new([0x01, 0, 0, 0, 0, 0, 0, 0x80]);

        // Act / Assert
        assert!(id.bit(0));
        assert!(!id.bit(1));
        assert!(id.bit(63));
        assert!(!id.bit(62));
    }

    #[test]
    fn test_set_bit_round_trips_every_position() {
        let mut id = RomId::default();
        for i in (0..ROM_BITS).step_by(3) {
            id.set_bit(i, true);
        }
        for i in 0..ROM_BITS {
            assert_eq!(id.bit(i), i % 3 == 0, "bit {i}");
        }
        id.set_bit(0, false);
        assert!(!id.bit(0));
    }

    #[test]
    fn test_display_prints_crc_byte_first() {
        let id = RomId::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(id.to_string(), "0807060504030201");
    }

    #[test]
    fn test_parse_accepts_display_form() {
        let id: RomId = "A200000001B81C02".parse().unwrap();
        assert_eq!(id.bytes(), [0x02, 0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00, 0xA2]);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert_eq!("0102".parse::<RomId>(), Err(AddressParseError::BadLength(4)));
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert_eq!(
            "0807060504030G01".parse::<RomId>(),
            Err(AddressParseError::BadDigit('G'))
        );
    }
}
