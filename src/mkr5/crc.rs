//! # CRC-16/CCITT Implementation
//!
//! CRC-16 checksum calculation for MKR5 frames.
//!
//! **Polynomial**: 0x1021 (x^16 + x^12 + x^5 + 1)
//! **Initial Value**: 0x0000
//! **Bit order**: most-significant bit first, no reflection, no final XOR
//!
//! The checksum covers ADR..last payload byte and is stored high byte first,
//! so running the CRC over ADR..CRC-L of an intact frame leaves 0x0000.

/// CRC-16/CCITT polynomial
const CRC16_POLY: u16 = 0x1021;

/// Precomputed CRC16 lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate CRC-16/CCITT checksum using lookup table (fast)
///
/// # Arguments
///
/// * `data` - Byte slice to calculate CRC for (ADR + CTRL + TRANS + LNG + payload)
///
/// # Returns
///
/// * `u16` - Calculated CRC16 checksum
///
/// # Examples
///
/// ```
/// use mkr5_bridge::mkr5::crc::crc16_ccitt;
///
/// let data = [0x50, 0x81, 0x01, 0x01, 0x00];
/// assert_eq!(crc16_ccitt(&data), 0xBABF);
/// ```
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in data {
        crc = (crc << 8) ^ CRC16_TABLE[((crc >> 8) as u8 ^ byte) as usize];
    }

    crc
}

/// Append the checksum of `message` to it, high byte first.
pub fn append_crc16(message: &mut Vec<u8>) {
    let crc = crc16_ccitt(message);
    message.extend_from_slice(&crc.to_be_bytes());
}

/// Calculate CRC-16/CCITT checksum using direct algorithm (slow, for verification)
///
/// Each byte is XORed into the top of the register, then the register is
/// shifted left eight times, XORing in the polynomial whenever the top bit
/// was set.
#[allow(dead_code)]
fn crc16_ccitt_slow(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in data {
        crc ^= (byte as u16) << 8;

        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
