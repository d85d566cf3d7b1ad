//! # MKR5 Frame Decoder
//!
//! Validates pump replies and interprets their payload by transaction type
//! (pump status, filled info, nozzle status, identity).

use super::bcd::{bcd_to_string, fixed_from_bcd, is_valid_bcd};
use super::crc::crc16_ccitt;
use super::protocol::*;
use crate::error::{PumpError, Result};

/// Decode a complete MKR5 frame
///
/// # Arguments
///
/// * `frame` - Exactly one frame (ADR through SF)
///
/// # Returns
///
/// * `Result<ParsedFrame>` - Decoded frame, or error if invalid
///
/// # Errors
///
/// Returns error if:
/// - Frame is shorter than 8 bytes or its size disagrees with LNG
/// - The `ETX SF` terminator is missing
/// - The checksum does not zero-check
/// - The transaction type is unknown or its payload is too short
pub fn decode_frame(frame: &[u8]) -> Result<ParsedFrame> {
    let payload = check_envelope(frame)?;

    let transaction = TransactionType::from_code(frame[2]).ok_or_else(|| {
        PumpError::MalformedFrame(format!("Unknown transaction type: 0x{:02X}", frame[2]))
    })?;

    let response = decode_payload(transaction, payload)?;

    Ok(ParsedFrame {
        address: frame[0],
        control: frame[1],
        response,
    })
}

/// Decode a master CD1 command frame into its address and command
///
/// Used to inspect traffic sent by a master (bus monitors, pump simulators).
pub fn decode_command_frame(frame: &[u8]) -> Result<(u8, PumpCommand)> {
    let payload = check_envelope(frame)?;

    if frame[2] != CD1_COMMAND || payload.len() != 1 {
        return Err(PumpError::MalformedFrame(format!(
            "Not a command frame: TRANS 0x{:02X}, LNG {}",
            frame[2],
            payload.len()
        )));
    }

    let command = PumpCommand::from_code(payload[0]).ok_or_else(|| {
        PumpError::MalformedFrame(format!("Unknown command code: 0x{:02X}", payload[0]))
    })?;

    Ok((frame[0], command))
}

/// Validate size, terminator and checksum; returns the payload
fn check_envelope(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(PumpError::MalformedFrame(format!(
            "Frame too short: {} bytes",
            frame.len()
        )));
    }

    if frame[frame.len() - 2..] != TERMINATOR {
        return Err(PumpError::MalformedFrame(format!(
            "Missing terminator, frame ends with {:02X} {:02X}",
            frame[frame.len() - 2],
            frame[frame.len() - 1]
        )));
    }

    let length = frame[3] as usize;
    let expected = HEADER_SIZE + length + TRAILER_SIZE;
    if frame.len() != expected {
        return Err(PumpError::MalformedFrame(format!(
            "Frame size {} does not match LNG {} (expected {} bytes)",
            frame.len(),
            length,
            expected
        )));
    }

    // CRC over ADR..CRC-L must leave a zero residue
    let crc_end = HEADER_SIZE + length + 2;
    let residue = crc16_ccitt(&frame[..crc_end]);
    if residue != 0 {
        return Err(PumpError::Checksum {
            stored: u16::from_be_bytes([frame[crc_end - 2], frame[crc_end - 1]]),
            residue,
        });
    }

    Ok(&frame[HEADER_SIZE..HEADER_SIZE + length])
}

/// Interpret a payload according to its transaction type
pub fn decode_payload(transaction: TransactionType, payload: &[u8]) -> Result<ParsedResponse> {
    let response = match transaction {
        TransactionType::PumpStatus => ParsedResponse::Status(decode_pump_status(payload)?),
        TransactionType::FilledInfo => ParsedResponse::FilledInfo(decode_filled_info(payload)?),
        TransactionType::NozzleStatus => {
            ParsedResponse::NozzleStatus(decode_nozzle_status(payload)?)
        }
        TransactionType::PumpIdentity => ParsedResponse::Identity(decode_identity(payload)?),
    };
    Ok(response)
}

/// Decode DC1 pump status payload (1 byte)
pub fn decode_pump_status(payload: &[u8]) -> Result<PumpStatus> {
    check_payload_len(TransactionType::PumpStatus, payload)?;

    PumpStatus::from_code(payload[0]).ok_or_else(|| {
        PumpError::MalformedFrame(format!("Unknown pump status code: {}", payload[0]))
    })
}

/// Decode DC2 filled info payload (4-byte volume + 4-byte amount, packed BCD)
pub fn decode_filled_info(payload: &[u8]) -> Result<FilledInfo> {
    check_payload_len(TransactionType::FilledInfo, payload)?;

    let volume = &payload[..VOLUME_BCD_BYTES];
    let amount = &payload[VOLUME_BCD_BYTES..VOLUME_BCD_BYTES + AMOUNT_BCD_BYTES];
    check_bcd("filled info", &payload[..VOLUME_BCD_BYTES + AMOUNT_BCD_BYTES])?;

    Ok(FilledInfo {
        volume: fixed_from_bcd(volume, VOLUME_SCALE),
        amount: fixed_from_bcd(amount, AMOUNT_SCALE),
    })
}

/// Decode DC3 nozzle status payload (3-byte price + NOZIO)
pub fn decode_nozzle_status(payload: &[u8]) -> Result<NozzleStatus> {
    check_payload_len(TransactionType::NozzleStatus, payload)?;

    let price = &payload[..PRICE_BCD_BYTES];
    check_bcd("filling price", price)?;
    let nozio = payload[PRICE_BCD_BYTES];

    Ok(NozzleStatus {
        price: fixed_from_bcd(price, PRICE_SCALE),
        nozzle: nozio & NOZIO_NOZZLE_MASK,
        nozzle_out: nozio & NOZIO_OUT_FLAG != 0,
    })
}

/// Decode DC9 pump identity payload (5 bytes packed BCD)
pub fn decode_identity(payload: &[u8]) -> Result<String> {
    check_payload_len(TransactionType::PumpIdentity, payload)?;

    let identity = &payload[..IDENTITY_BCD_BYTES];
    check_bcd("identity", identity)?;
    Ok(bcd_to_string(identity))
}

/// Size of the frame starting at `buffer[0]`, once its header has arrived
pub fn frame_size(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < HEADER_SIZE {
        return None;
    }
    Some(HEADER_SIZE + buffer[3] as usize + TRAILER_SIZE)
}

/// Whether `buffer` ends a frame
///
/// The buffer must end with `ETX SF` and, once LNG is known, hold at least
/// the whole frame it announces. A checksum that happens to read `03 FA`
/// therefore does not end the frame early.
pub fn is_frame_complete(buffer: &[u8]) -> bool {
    if !buffer.ends_with(&TERMINATOR) {
        return false;
    }
    match frame_size(buffer) {
        Some(size) => buffer.len() >= size,
        None => true,
    }
}

fn check_payload_len(transaction: TransactionType, payload: &[u8]) -> Result<()> {
    let needed = transaction.min_payload_len();
    if payload.len() < needed {
        return Err(PumpError::MalformedFrame(format!(
            "{:?} payload too short: {} bytes, need {}",
            transaction,
            payload.len(),
            needed
        )));
    }
    Ok(())
}

fn check_bcd(field: &str, bytes: &[u8]) -> Result<()> {
    if !is_valid_bcd(bytes) {
        return Err(PumpError::MalformedFrame(format!(
            "Invalid BCD in {}: {}",
            field,
            hex::encode_upper(bytes)
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_frames::*;
    use super::*;
    use crate::mkr5::encoder::encode_command;

    #[test]
    fn test_decode_frame_too_short() {
        let frame = [0x50, 0x01, 0x01, 0x00, 0x03, 0xFA];
        let result = decode_frame(&frame);
        assert!(matches!(result, Err(PumpError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_frame_missing_terminator() {
        let mut frame = status_reply(0x50, PumpStatus::Reset);
        let len = frame.len();
        frame[len - 1] = 0x00;

        let result = decode_frame(&frame);
        assert!(matches!(result, Err(PumpError::MalformedFrame(_))));

        // Terminator dropped entirely
        let frame = status_reply(0x50, PumpStatus::Reset);
        let result = decode_frame(&frame[..frame.len() - 2]);
        assert!(matches!(result, Err(PumpError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_frame_checksum_error() {
        let mut frame = status_reply(0x50, PumpStatus::Filling);
        frame[5] ^= 0xFF;

        let result = decode_frame(&frame);
        assert!(matches!(result, Err(PumpError::Checksum { .. })));
    }

    #[test]
    fn test_decode_frame_corrupted_payload() {
        let mut frame = status_reply(0x50, PumpStatus::Filling);
        frame[4] = PumpStatus::Reset.code();

        let result = decode_frame(&frame);
        assert!(matches!(result, Err(PumpError::Checksum { .. })));
    }

    #[test]
    fn test_decode_frame_length_mismatch() {
        let mut frame = status_reply(0x50, PumpStatus::Filling);
        frame[3] = 2;

        let result = decode_frame(&frame);
        assert!(matches!(result, Err(PumpError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_frame_unknown_transaction() {
        let frame = reply(0x50, 0x07, &[0x00]);
        let result = decode_frame(&frame);
        assert!(matches!(result, Err(PumpError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_status() {
        let frame = status_reply(0x51, PumpStatus::Authorized);
        let decoded = decode_frame(&frame).unwrap();

        assert_eq!(decoded.address, 0x51);
        assert_eq!(decoded.control, PUMP_CONTROL);
        assert!(!decoded.is_master());
        assert_eq!(decoded.response, ParsedResponse::Status(PumpStatus::Authorized));
    }

    #[test]
    fn test_decode_unknown_status_code() {
        let frame = reply(0x50, DC1_PUMP_STATUS, &[3]);
        let result = decode_frame(&frame);
        assert!(matches!(result, Err(PumpError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_filled_info() {
        let decoded = decode_frame(&filled_info_reply(0x50)).unwrap();

        match decoded.response {
            ParsedResponse::FilledInfo(info) => {
                assert!((info.volume - 12.345).abs() < 1e-9);
                assert!((info.amount - 56.78).abs() < 1e-9);
            }
            other => panic!("Expected FilledInfo, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_filled_info_too_short() {
        let frame = reply(0x50, DC2_FILLED_INFO, &[0x00, 0x01, 0x23, 0x45]);
        let result = decode_frame(&frame);
        assert!(matches!(result, Err(PumpError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_nozzle_status() {
        let decoded = decode_frame(&nozzle_status_reply(0x50)).unwrap();

        match decoded.response {
            ParsedResponse::NozzleStatus(nozzle) => {
                assert!((nozzle.price - 1.599).abs() < 1e-9);
                assert_eq!(nozzle.nozzle, 2);
                assert!(nozzle.nozzle_out);
            }
            other => panic!("Expected NozzleStatus, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_nozzle_in_holster() {
        let payload = [0x00, 0x20, 0x00, 0x03];
        let nozzle = decode_nozzle_status(&payload).unwrap();
        assert_eq!(nozzle.nozzle, 3);
        assert!(!nozzle.nozzle_out);
        assert!((nozzle.price - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_identity() {
        let frame = identity_reply(0x50, [0x00, 0x12, 0x34, 0x56, 0x78]);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.response, ParsedResponse::Identity("0012345678".to_string()));
    }

    #[test]
    fn test_decode_identity_invalid_bcd() {
        let frame = identity_reply(0x50, [0x00, 0x12, 0x3A, 0x56, 0x78]);
        let result = decode_frame(&frame);
        assert!(matches!(result, Err(PumpError::MalformedFrame(_))));
    }

    #[test]
    fn test_command_frame_round_trip() {
        for address in [MIN_PUMP_ADDRESS, 0x5A, MAX_PUMP_ADDRESS] {
            for command in PumpCommand::ALL {
                let frame = encode_command(address, command);
                assert_eq!(decode_command_frame(&frame).unwrap(), (address, command));
            }
        }
    }

    #[test]
    fn test_decode_command_frame_rejects_replies() {
        let frame = identity_reply(0x50, [0x00, 0x12, 0x34, 0x56, 0x78]);
        assert!(matches!(decode_command_frame(&frame), Err(PumpError::MalformedFrame(_))));
    }

    #[test]
    fn test_is_frame_complete() {
        let frame = status_reply(0x50, PumpStatus::Reset);
        assert!(is_frame_complete(&frame));
        assert!(!is_frame_complete(&frame[..frame.len() - 1]));
        assert!(is_frame_complete(&[0x03, 0xFA]));
    }

    #[test]
    fn test_is_frame_complete_ignores_early_terminator_pattern() {
        // LNG announces 8 payload bytes; the trailing 03 FA is inside the payload
        let partial = [0x50, 0x01, 0x02, 0x08, 0x00, 0x03, 0xFA];
        assert!(!is_frame_complete(&partial));
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(frame_size(&[0x50, 0x01, 0x01]), None);
        assert_eq!(frame_size(&[0x50, 0x01, 0x01, 0x01]), Some(9));
        assert_eq!(frame_size(&filled_info_reply(0x50)), Some(16));
    }
}
