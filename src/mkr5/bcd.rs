//! # Packed BCD Codec
//!
//! Two decimal digits per byte, high nibble first, most significant byte first.
//! Prices and volumes travel in thousandths, amounts in hundredths.

use crate::error::{PumpError, Result};

/// Whether every nibble of `bytes` is a decimal digit
pub fn is_valid_bcd(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| (b >> 4) <= 9 && (b & 0x0F) <= 9)
}

/// Decode packed BCD into an integer
///
/// Each byte contributes `high * 10 + low`, weighted by its position.
/// Callers pass at most 9 bytes (18 digits), which always fits a `u64`.
///
/// # Examples
///
/// ```
/// use mkr5_bridge::mkr5::bcd::bcd_to_decimal;
///
/// assert_eq!(bcd_to_decimal(&[0x00, 0x12, 0x34]), 1234);
/// ```
pub fn bcd_to_decimal(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &byte| {
        acc * 100 + (byte >> 4) as u64 * 10 + (byte & 0x0F) as u64
    })
}

/// Render packed BCD as its digit string, leading zeros kept
pub fn bcd_to_string(bytes: &[u8]) -> String {
    let mut digits = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        for nibble in [byte >> 4, byte & 0x0F] {
            // from_digit cannot fail for a nibble in radix 16
            digits.push(char::from_digit(nibble as u32, 16).unwrap_or('?').to_ascii_uppercase());
        }
    }
    digits
}

/// Encode an integer as `byte_count` bytes of packed BCD, zero-padded on the left
///
/// # Errors
///
/// Returns `PumpError::Encoding` if `value` needs more than `2 * byte_count` digits
///
/// # Examples
///
/// ```
/// use mkr5_bridge::mkr5::bcd::decimal_to_bcd;
///
/// assert_eq!(decimal_to_bcd(1599, 3).unwrap(), vec![0x00, 0x15, 0x99]);
/// assert!(decimal_to_bcd(1_000_000, 3).is_err());
/// ```
pub fn decimal_to_bcd(value: u64, byte_count: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; byte_count];
    let mut remaining = value;

    for slot in bytes.iter_mut().rev() {
        let pair = (remaining % 100) as u8;
        *slot = ((pair / 10) << 4) | (pair % 10);
        remaining /= 100;
    }

    if remaining != 0 {
        return Err(PumpError::Encoding(format!(
            "Value {} does not fit in {} BCD bytes",
            value, byte_count
        )));
    }

    Ok(bytes)
}

/// Scale a fixed-point value and encode it as packed BCD
///
/// The scaled value is rounded to the nearest unit, so `1.599` at scale 1000
/// becomes `1599` rather than `1598`.
///
/// # Errors
///
/// Returns `PumpError::Encoding` for negative or non-finite input, or when the
/// scaled value does not fit `byte_count` bytes
pub fn fixed_to_bcd(value: f64, scale: u64, byte_count: usize) -> Result<Vec<u8>> {
    if !value.is_finite() || value < 0.0 {
        return Err(PumpError::Encoding(format!(
            "Value {} cannot be encoded as BCD",
            value
        )));
    }

    let scaled = (value * scale as f64).round();
    if scaled >= u64::MAX as f64 {
        return Err(PumpError::Encoding(format!(
            "Value {} does not fit in {} BCD bytes",
            value, byte_count
        )));
    }

    decimal_to_bcd(scaled as u64, byte_count)
}

/// Decode packed BCD and divide by `scale`
pub fn fixed_from_bcd(bytes: &[u8], scale: u64) -> f64 {
    bcd_to_decimal(bytes) as f64 / scale as f64
}
