//! # Frame Dumps
//!
//! Hex rendering of bus traffic for the TX/RX trace.

use tracing::debug;

use crate::mkr5::protocol::{CONTROL_MASTER_FLAG, CONTROL_SEQUENCE_MASK, HEADER_SIZE};

/// Direction of a traced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Tx => "TX",
            Direction::Rx => "RX",
        }
    }
}

/// Uppercase hex, one space between bytes (`50 81 01`)
pub fn spaced_hex(data: &[u8]) -> String {
    let encoded = hex::encode_upper(data);
    let mut out = String::with_capacity(data.len() * 3);
    for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(std::str::from_utf8(pair).unwrap_or("??"));
    }
    out
}

/// Field-by-field breakdown of a frame (`ADR=50 CTRL=81(master,TX#1) ...`)
///
/// Tolerates truncated input; missing fields are left out.
pub fn describe_frame(frame: &[u8]) -> String {
    if frame.len() < HEADER_SIZE {
        return format!("partial: {}", spaced_hex(frame));
    }

    let control = frame[1];
    let role = if control & CONTROL_MASTER_FLAG != 0 { "master" } else { "slave" };
    let length = frame[3] as usize;
    let data_end = (HEADER_SIZE + length).min(frame.len());

    let mut out = format!(
        "ADR={:02X} CTRL={:02X}({},TX#{}) TRANS={:02X} LNG={} DATA=[{}]",
        frame[0],
        control,
        role,
        control & CONTROL_SEQUENCE_MASK,
        frame[2],
        length,
        spaced_hex(&frame[HEADER_SIZE..data_end])
    );

    if frame.len() >= data_end + 4 {
        out.push_str(&format!(
            " CRC={:02X}{:02X} ETX={:02X} SF={:02X}",
            frame[data_end],
            frame[data_end + 1],
            frame[data_end + 2],
            frame[data_end + 3]
        ));
    }

    out
}

/// Trace one frame at debug level
pub fn trace_frame(direction: Direction, address: u8, frame: &[u8], description: &str) {
    debug!(
        "{} pump 0x{:02X} ({}): {} [{} bytes] {}",
        direction.label(),
        address,
        description,
        spaced_hex(frame),
        frame.len(),
        describe_frame(frame)
    );
}
