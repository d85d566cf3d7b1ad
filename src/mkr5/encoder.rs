//! # MKR5 Frame Encoder
//!
//! Builds master frames: CD1 commands and CD5 price updates.

use super::bcd::fixed_to_bcd;
use super::crc::append_crc16;
use super::protocol::*;
use crate::error::{PumpError, Result};

/// Encode a frame into its wire form
///
/// Appends the checksum (high byte first) and the `ETX SF` terminator.
///
/// # Returns
///
/// * `Vec<u8>` - Complete frame (ADR + CTRL + TRANS + LNG + payload + CRC + ETX + SF)
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.wire_size());
    bytes.push(frame.address);
    bytes.push(frame.control);
    bytes.push(frame.transaction);
    bytes.push(frame.length());
    bytes.extend_from_slice(&frame.payload);

    // Checksum covers ADR..last payload byte
    append_crc16(&mut bytes);
    bytes.extend_from_slice(&TERMINATOR);

    bytes
}

/// Encode a CD1 command frame
///
/// # Arguments
///
/// * `address` - Pump address (0x50-0x6F)
/// * `command` - Command to send
///
/// # Returns
///
/// * `Vec<u8>` - Complete 9-byte frame
///
/// # Examples
///
/// ```
/// use mkr5_bridge::mkr5::encoder::encode_command;
/// use mkr5_bridge::mkr5::protocol::PumpCommand;
///
/// let frame = encode_command(0x50, PumpCommand::ReturnStatus);
/// assert_eq!(frame, vec![0x50, 0x81, 0x01, 0x01, 0x00, 0xBA, 0xBF, 0x03, 0xFA]);
/// ```
pub fn encode_command(address: u8, command: PumpCommand) -> Vec<u8> {
    let frame = Frame {
        address,
        control: MASTER_CONTROL,
        transaction: CD1_COMMAND,
        payload: vec![command.code()],
    };
    encode_frame(&frame)
}

/// Encode a CD5 price update frame
///
/// Prices are written in ascending nozzle order, 3 BCD bytes each, in
/// thousandths of a currency unit.
///
/// # Errors
///
/// Returns `PumpError::Encoding` if the list is empty or longer than the
/// number of nozzles, a nozzle is outside 1-8 or repeated, or a price is
/// outside 0.00-999.99. Nothing is encoded in that case.
pub fn encode_price_update(address: u8, prices: &[PriceEntry]) -> Result<Vec<u8>> {
    let payload = encode_price_payload(prices)?;
    let frame = Frame::new(address, MASTER_CONTROL, CD5_PRICE_UPDATE, payload)?;
    Ok(encode_frame(&frame))
}

/// Encode the CD5 payload (3 bytes per price)
pub fn encode_price_payload(prices: &[PriceEntry]) -> Result<Vec<u8>> {
    if prices.is_empty() {
        return Err(PumpError::Encoding("No prices provided for update".to_string()));
    }

    let mut sorted = prices.to_vec();
    sorted.sort_by_key(|entry| entry.nozzle);

    for pair in sorted.windows(2) {
        if pair[0].nozzle == pair[1].nozzle {
            return Err(PumpError::Encoding(format!(
                "Nozzle {} listed more than once",
                pair[0].nozzle
            )));
        }
    }

    let mut payload = Vec::with_capacity(PRICE_BCD_BYTES * sorted.len());
    for entry in &sorted {
        validate_price_entry(entry)?;
        payload.extend_from_slice(&fixed_to_bcd(entry.price, PRICE_SCALE, PRICE_BCD_BYTES)?);
    }

    Ok(payload)
}

fn validate_price_entry(entry: &PriceEntry) -> Result<()> {
    if !(1..=MAX_NOZZLES).contains(&entry.nozzle) {
        return Err(PumpError::Encoding(format!(
            "Nozzle {} out of range 1-{}",
            entry.nozzle, MAX_NOZZLES
        )));
    }

    if !entry.price.is_finite() || entry.price < 0.0 || entry.price > MAX_PRICE {
        return Err(PumpError::Encoding(format!(
            "Price {} for nozzle {} out of range 0-{}",
            entry.price, entry.nozzle, MAX_PRICE
        )));
    }

    Ok(())
}
