//! # Error Types
//!
//! Custom error types for MKR5 Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for MKR5 Bridge
#[derive(Debug, Error)]
pub enum PumpError {
    /// Serial channel could not be opened, written or flushed
    #[error("Transport error: {0}")]
    Transport(String),

    /// None of the candidate device paths could be opened
    #[error("No serial port could be opened (tried: {0})")]
    SerialPortNotFound(String),

    /// No terminated frame arrived inside the response window
    #[error("Timeout waiting for pump 0x{address:02X} after {waited_ms}ms ({received} bytes received)")]
    Timeout {
        address: u8,
        waited_ms: u64,
        received: usize,
    },

    /// CRC computed over address..checksum did not leave a zero residue
    #[error("Checksum error: stored 0x{stored:04X}, residue 0x{residue:04X}")]
    Checksum { stored: u16, residue: u16 },

    /// Reply came from a different address than the one addressed
    #[error("Address mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    AddressMismatch { expected: u8, actual: u8 },

    /// Frame too short, badly terminated, or of an unknown transaction type
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Value cannot be represented in the target field
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Valid frame, but not the transaction type the command calls for
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PumpError {
    /// Whether this error means "the pump gave no usable answer".
    ///
    /// Timeouts and protocol violations fall in this class; transport,
    /// encoding and configuration failures do not.
    pub fn is_no_response(&self) -> bool {
        matches!(
            self,
            PumpError::Timeout { .. }
                | PumpError::Checksum { .. }
                | PumpError::AddressMismatch { .. }
                | PumpError::MalformedFrame(_)
        )
    }
}

/// Result type alias for MKR5 Bridge
pub type Result<T> = std::result::Result<T, PumpError>;
