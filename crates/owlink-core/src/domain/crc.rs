//! The two CRCs used on a 1-Wire bus.
//!
//! - **CRC8** (polynomial `x^8 + x^5 + x^4 + 1`, reflected `0x8C`) protects the
//!   64-bit ROM id: byte 7 of every address is the CRC8 of bytes 0–6, so the
//!   CRC8 computed over all eight bytes of a valid id is zero.
//! - **CRC16** (polynomial `x^16 + x^15 + x^2 + 1`, reflected `0xA001`) protects
//!   memory pages on many devices, and the tunnel handshake reuses it as a
//!   lightweight challenge-response digest.
//!
//! Both functions take an explicit seed so a computation can be *continued*
//! across several buffers without concatenating them:
//!
//! ```rust
//! use owlink_core::domain::crc::crc16;
//!
//! let whole = crc16(b"secretchallenge", 0);
//! let continued = crc16(b"challenge", crc16(b"secret", 0));
//! assert_eq!(whole, continued);
//! ```

const CRC8_POLY_REFLECTED: u8 = 0x8C;
const CRC16_POLY_REFLECTED: u16 = 0xA001;

/// Computes the Dallas/Maxim CRC8 of `data`, starting from `seed`.
pub fn crc8(data: &[u8], seed: u8) -> u8 {
    let mut crc = seed;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            let mix = (crc ^ b) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= CRC8_POLY_REFLECTED;
            }
            b >>= 1;
        }
    }
    crc
}

/// Computes the 1-Wire CRC16 of `data`, starting from `seed`.
///
/// The seed is a full 16-bit value; passing the result of a previous call
/// continues that computation.
pub fn crc16(data: &[u8], seed: u16) -> u16 {
    let mut crc = seed;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_of_empty_slice_is_seed() {
        assert_eq!(crc8(&[], 0), 0);
        assert_eq!(crc8(&[], 0x5A), 0x5A);
    }

    #[test]
    fn test_crc8_matches_application_note_example() {
        // Maxim AN27 example ROM: 02 1C B8 01 00 00 00 A2
        let rom = [0x02, 0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(crc8(&rom, 0), 0xA2);
    }

    #[test]
    fn test_crc8_over_valid_rom_including_crc_is_zero() {
        let rom = [0x02, 0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00, 0xA2];
        assert_eq!(crc8(&rom, 0), 0);
    }

    #[test]
    fn test_crc16_check_value_for_ascii_digits() {
        // CRC-16/ARC check value.
        assert_eq!(crc16(b"123456789", 0), 0xBB3D);
    }

    #[test]
    fn test_crc16_can_be_continued_across_buffers() {
        // Arrange
        let first = b"Adapter Secret Default";
        let second = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut joined = first.to_vec();
        joined.extend_from_slice(&second);

        // Act
        let continued = crc16(&second, crc16(first, 0));

        // Assert
        assert_eq!(continued, crc16(&joined, 0));
    }
}
