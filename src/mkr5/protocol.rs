//! # MKR5 Protocol Constants and Types
//!
//! Core protocol definitions for the MKR5 (DART pump interface) bus.
//!
//! Frame layout: `ADR CTRL TRANS LNG DATA.. CRC-H CRC-L ETX SF`

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{PumpError, Result};

/// Lowest pump address on the bus
pub const MIN_PUMP_ADDRESS: u8 = 0x50;

/// Highest pump address on the bus
pub const MAX_PUMP_ADDRESS: u8 = 0x6F;

/// Number of addressable pumps
pub const MAX_PUMPS: usize = (MAX_PUMP_ADDRESS - MIN_PUMP_ADDRESS) as usize + 1;

/// End of text
pub const ETX: u8 = 0x03;

/// Stop flag
pub const SF: u8 = 0xFA;

/// Fixed two-byte frame terminator
pub const TERMINATOR: [u8; 2] = [ETX, SF];

/// Control byte sent by the master (master bit set, TX# = 1)
pub const MASTER_CONTROL: u8 = 0x81;

/// Master/slave flag in the control byte
pub const CONTROL_MASTER_FLAG: u8 = 0x80;

/// Sequence number bits in the control byte
pub const CONTROL_SEQUENCE_MASK: u8 = 0x0F;

/// ADR + CTRL + TRANS + LNG
pub const HEADER_SIZE: usize = 4;

/// CRC (2) + ETX + SF
pub const TRAILER_SIZE: usize = 4;

/// Smallest possible frame (empty payload)
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + TRAILER_SIZE;

/// LNG is a single byte
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Command to pump (master -> pump)
pub const CD1_COMMAND: u8 = 0x01;

/// Price update (master -> pump)
pub const CD5_PRICE_UPDATE: u8 = 0x05;

/// Pump status (pump -> master)
pub const DC1_PUMP_STATUS: u8 = 0x01;

/// Filled volume and amount (pump -> master)
pub const DC2_FILLED_INFO: u8 = 0x02;

/// Nozzle status and filling price (pump -> master)
pub const DC3_NOZZLE_STATUS: u8 = 0x03;

/// Pump identity (pump -> master)
pub const DC9_PUMP_IDENTITY: u8 = 0x09;

/// Nozzles per pump addressable by a price update
pub const MAX_NOZZLES: u8 = 8;

/// Packed BCD widths
pub const PRICE_BCD_BYTES: usize = 3;
pub const VOLUME_BCD_BYTES: usize = 4;
pub const AMOUNT_BCD_BYTES: usize = 4;
pub const IDENTITY_BCD_BYTES: usize = 5;

/// Fixed-point scales (prices and volumes in thousandths, amounts in hundredths)
pub const PRICE_SCALE: u64 = 1000;
pub const VOLUME_SCALE: u64 = 1000;
pub const AMOUNT_SCALE: u64 = 100;

/// Highest unit price accepted by a price update
pub const MAX_PRICE: f64 = 999.99;

/// Nozzle number bits of the NOZIO byte
pub const NOZIO_NOZZLE_MASK: u8 = 0x0F;

/// Nozzle-out flag of the NOZIO byte
pub const NOZIO_OUT_FLAG: u8 = 0x10;

/// Whether `address` lies on the pump address range
pub fn is_valid_address(address: u8) -> bool {
    (MIN_PUMP_ADDRESS..=MAX_PUMP_ADDRESS).contains(&address)
}

/// Commands carried in a CD1 transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PumpCommand {
    ReturnStatus,
    ReturnPumpParameters,
    ReturnPumpIdentity,
    ReturnFillingInformation,
    Reset,
    Authorize,
    Stop,
    SwitchOff,
}

impl PumpCommand {
    /// All commands, in code order
    pub const ALL: [PumpCommand; 8] = [
        PumpCommand::ReturnStatus,
        PumpCommand::ReturnPumpParameters,
        PumpCommand::ReturnPumpIdentity,
        PumpCommand::ReturnFillingInformation,
        PumpCommand::Reset,
        PumpCommand::Authorize,
        PumpCommand::Stop,
        PumpCommand::SwitchOff,
    ];

    /// Wire code (DCC byte)
    pub fn code(self) -> u8 {
        match self {
            PumpCommand::ReturnStatus => 0x00,
            PumpCommand::ReturnPumpParameters => 0x02,
            PumpCommand::ReturnPumpIdentity => 0x03,
            PumpCommand::ReturnFillingInformation => 0x04,
            PumpCommand::Reset => 0x05,
            PumpCommand::Authorize => 0x06,
            PumpCommand::Stop => 0x08,
            PumpCommand::SwitchOff => 0x0A,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            PumpCommand::ReturnStatus => "RETURN_STATUS",
            PumpCommand::ReturnPumpParameters => "RETURN_PUMP_PARAMETERS",
            PumpCommand::ReturnPumpIdentity => "RETURN_PUMP_IDENTITY",
            PumpCommand::ReturnFillingInformation => "RETURN_FILLING_INFORMATION",
            PumpCommand::Reset => "RESET",
            PumpCommand::Authorize => "AUTHORIZE",
            PumpCommand::Stop => "STOP",
            PumpCommand::SwitchOff => "SWITCH_OFF",
        }
    }
}

impl fmt::Display for PumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PumpCommand {
    type Err = PumpError;

    /// Accepts short operator names (`status`, `switch-off`) as well as wire names.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let command = match normalized.as_str() {
            "status" | "return-status" => PumpCommand::ReturnStatus,
            "parameters" | "return-pump-parameters" => PumpCommand::ReturnPumpParameters,
            "identity" | "return-pump-identity" => PumpCommand::ReturnPumpIdentity,
            "filling-info" | "return-filling-information" => PumpCommand::ReturnFillingInformation,
            "reset" => PumpCommand::Reset,
            "authorize" => PumpCommand::Authorize,
            "stop" => PumpCommand::Stop,
            "switch-off" => PumpCommand::SwitchOff,
            _ => return Err(PumpError::Encoding(format!("Unknown pump command: {}", s))),
        };
        Ok(command)
    }
}

/// Pump state reported in a DC1 transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PumpStatus {
    NotProgrammed,
    Reset,
    Authorized,
    Filling,
    FillingCompleted,
    LimitReached,
    SwitchedOff,
}

impl PumpStatus {
    pub fn code(self) -> u8 {
        match self {
            PumpStatus::NotProgrammed => 0,
            PumpStatus::Reset => 1,
            PumpStatus::Authorized => 2,
            PumpStatus::Filling => 4,
            PumpStatus::FillingCompleted => 5,
            PumpStatus::LimitReached => 6,
            PumpStatus::SwitchedOff => 7,
        }
    }

    /// Code 3 is unassigned.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PumpStatus::NotProgrammed),
            1 => Some(PumpStatus::Reset),
            2 => Some(PumpStatus::Authorized),
            4 => Some(PumpStatus::Filling),
            5 => Some(PumpStatus::FillingCompleted),
            6 => Some(PumpStatus::LimitReached),
            7 => Some(PumpStatus::SwitchedOff),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PumpStatus::NotProgrammed => "NOT_PROGRAMMED",
            PumpStatus::Reset => "RESET",
            PumpStatus::Authorized => "AUTHORIZED",
            PumpStatus::Filling => "FILLING",
            PumpStatus::FillingCompleted => "FILLING_COMPLETED",
            PumpStatus::LimitReached => "LIMIT_REACHED",
            PumpStatus::SwitchedOff => "SWITCHED_OFF",
        }
    }
}

impl fmt::Display for PumpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transaction types a pump may answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    PumpStatus,
    FilledInfo,
    NozzleStatus,
    PumpIdentity,
}

impl TransactionType {
    pub fn code(self) -> u8 {
        match self {
            TransactionType::PumpStatus => DC1_PUMP_STATUS,
            TransactionType::FilledInfo => DC2_FILLED_INFO,
            TransactionType::NozzleStatus => DC3_NOZZLE_STATUS,
            TransactionType::PumpIdentity => DC9_PUMP_IDENTITY,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            DC1_PUMP_STATUS => Some(TransactionType::PumpStatus),
            DC2_FILLED_INFO => Some(TransactionType::FilledInfo),
            DC3_NOZZLE_STATUS => Some(TransactionType::NozzleStatus),
            DC9_PUMP_IDENTITY => Some(TransactionType::PumpIdentity),
            _ => None,
        }
    }

    /// Minimum payload length the transaction needs
    pub fn min_payload_len(self) -> usize {
        match self {
            TransactionType::PumpStatus => 1,
            TransactionType::FilledInfo => VOLUME_BCD_BYTES + AMOUNT_BCD_BYTES,
            TransactionType::NozzleStatus => PRICE_BCD_BYTES + 1,
            TransactionType::PumpIdentity => IDENTITY_BCD_BYTES,
        }
    }
}

/// Filled volume and amount of the current or last filling
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilledInfo {
    /// Volume in litres
    pub volume: f64,

    /// Amount in currency units
    pub amount: f64,
}

/// Nozzle status and filling price
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NozzleStatus {
    /// Unit price of the selected grade
    pub price: f64,

    /// Selected nozzle (0 = none)
    pub nozzle: u8,

    /// Nozzle lifted out of its holster
    pub nozzle_out: bool,
}

/// Decoded payload, tagged by transaction type
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Status(PumpStatus),
    FilledInfo(FilledInfo),
    NozzleStatus(NozzleStatus),
    Identity(String),
}

impl ParsedResponse {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            ParsedResponse::Status(_) => TransactionType::PumpStatus,
            ParsedResponse::FilledInfo(_) => TransactionType::FilledInfo,
            ParsedResponse::NozzleStatus(_) => TransactionType::NozzleStatus,
            ParsedResponse::Identity(_) => TransactionType::PumpIdentity,
        }
    }

    /// Short name for logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedResponse::Status(_) => "Status",
            ParsedResponse::FilledInfo(_) => "FilledInfo",
            ParsedResponse::NozzleStatus(_) => "NozzleStatus",
            ParsedResponse::Identity(_) => "Identity",
        }
    }
}

/// A complete, checksum-verified frame received from a pump
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub address: u8,
    pub control: u8,
    pub response: ParsedResponse,
}

impl ParsedFrame {
    /// Whether the sender set the master flag
    pub fn is_master(&self) -> bool {
        self.control & CONTROL_MASTER_FLAG != 0
    }

    /// Transaction sequence number (TX#)
    pub fn sequence(&self) -> u8 {
        self.control & CONTROL_SEQUENCE_MASK
    }
}

/// Raw MKR5 frame (header + payload, before checksum and terminator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub control: u8,
    pub transaction: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame
    ///
    /// # Errors
    ///
    /// Returns error if the payload does not fit the one-byte LNG field
    pub fn new(address: u8, control: u8, transaction: u8, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PumpError::Encoding(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        Ok(Self {
            address,
            control,
            transaction,
            payload,
        })
    }

    /// LNG field value
    ///
    /// Cannot overflow since payload is validated to be at most 255 bytes
    pub fn length(&self) -> u8 {
        self.payload.len() as u8
    }

    /// Size of the encoded frame on the wire
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }
}

/// One entry of a price update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceEntry {
    /// Nozzle number (1-8)
    pub nozzle: u8,

    /// Unit price (0.00-999.99)
    pub price: f64,
}

impl PriceEntry {
    pub fn new(nozzle: u8, price: f64) -> Self {
        Self { nozzle, price }
    }
}

impl FromStr for PriceEntry {
    type Err = PumpError;

    /// Parses `NOZZLE=PRICE`, e.g. `1=1.599`
    fn from_str(s: &str) -> Result<Self> {
        let (nozzle, price) = s
            .split_once('=')
            .ok_or_else(|| PumpError::Encoding(format!("Expected NOZZLE=PRICE, got '{}'", s)))?;
        let nozzle = nozzle
            .trim()
            .parse::<u8>()
            .map_err(|e| PumpError::Encoding(format!("Invalid nozzle '{}': {}", nozzle, e)))?;
        let price = price
            .trim()
            .parse::<f64>()
            .map_err(|e| PumpError::Encoding(format!("Invalid price '{}': {}", price, e)))?;
        Ok(Self { nozzle, price })
    }
}

/// Parse an operator-supplied pump address
///
/// Accepts `0x50`, `50h` and plain numbers; plain numbers are read as decimal
/// first and as hex only if that fails (`80` is 0x50, `5A` is 0x5A).
///
/// # Errors
///
/// Returns error if the text is not a number or lies outside 0x50-0x6F
pub fn parse_address(text: &str) -> Result<u8> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = text.strip_suffix('h').or_else(|| text.strip_suffix('H')) {
        u8::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<u8>()
            .ok()
            .or_else(|| u8::from_str_radix(text, 16).ok())
    };

    let address =
        parsed.ok_or_else(|| PumpError::Encoding(format!("Invalid address format: {}", text)))?;

    if !is_valid_address(address) {
        return Err(PumpError::Encoding(format!(
            "Invalid pump address 0x{:02X}, must be between 0x{:02X} and 0x{:02X}",
            address, MIN_PUMP_ADDRESS, MAX_PUMP_ADDRESS
        )));
    }

    Ok(address)
}
