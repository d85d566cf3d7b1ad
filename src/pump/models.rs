//! # Pump Records
//!
//! What the scanner and dispatcher hand back to callers. Records are plain
//! data: built per call, owned by the caller, holding no port or lock.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::mkr5::protocol::{FilledInfo, NozzleStatus, PumpStatus};

/// One nozzle as last reported by its pump
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NozzleRecord {
    pub nozzle_number: u8,

    /// Nozzle out of its holster
    pub is_out: bool,

    pub filling_price: Option<f64>,
}

impl From<NozzleStatus> for NozzleRecord {
    fn from(status: NozzleStatus) -> Self {
        Self {
            nozzle_number: status.nozzle,
            is_out: status.nozzle_out,
            filling_price: Some(status.price),
        }
    }
}

/// Everything known about one pump after a scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PumpRecord {
    #[serde(serialize_with = "serialize_address")]
    pub address: u8,
    pub status: PumpStatus,
    pub identity: Option<String>,
    pub nozzles: Vec<NozzleRecord>,
    pub filled_volume: Option<f64>,
    pub filled_amount: Option<f64>,
    pub is_online: bool,
    pub error_message: Option<String>,
}

impl PumpRecord {
    /// A pump that has just answered STATUS
    pub fn online(address: u8, status: PumpStatus) -> Self {
        Self {
            address,
            status,
            identity: None,
            nozzles: Vec::new(),
            filled_volume: None,
            filled_amount: None,
            is_online: true,
            error_message: None,
        }
    }

    /// Take over volume, amount and, if reported, the nozzle of the last filling
    pub fn apply_filling_info(&mut self, info: &FillingInfo) {
        self.filled_volume = Some(info.filled_volume);
        self.filled_amount = Some(info.filled_amount);

        if let (Some(nozzle), Some(nozzle_out), Some(price)) =
            (info.nozzle_number, info.is_nozzle_out, info.filling_price)
        {
            self.apply_nozzle_status(NozzleStatus { price, nozzle, nozzle_out });
        }
    }

    /// Replace the record for the reported nozzle, or add it
    pub fn apply_nozzle_status(&mut self, status: NozzleStatus) {
        let record = NozzleRecord::from(status);
        match self
            .nozzles
            .iter_mut()
            .find(|n| n.nozzle_number == record.nozzle_number)
        {
            Some(existing) => *existing = record,
            None => self.nozzles.push(record),
        }
    }
}

/// Result of RETURN_FILLING_INFORMATION, with the chained nozzle status if one came
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FillingInfo {
    #[serde(serialize_with = "serialize_address")]
    pub pump_address: u8,
    pub filled_volume: f64,
    pub filled_amount: f64,
    pub nozzle_number: Option<u8>,
    pub is_nozzle_out: Option<bool>,
    pub filling_price: Option<f64>,
}

impl FillingInfo {
    pub fn new(pump_address: u8, info: FilledInfo) -> Self {
        Self {
            pump_address,
            filled_volume: info.volume,
            filled_amount: info.amount,
            nozzle_number: None,
            is_nozzle_out: None,
            filling_price: None,
        }
    }

    pub fn merge_nozzle_status(&mut self, status: NozzleStatus) {
        self.nozzle_number = Some(status.nozzle);
        self.is_nozzle_out = Some(status.nozzle_out);
        self.filling_price = Some(status.price);
    }
}

/// A finished scan over an address range
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    #[serde(serialize_with = "serialize_address")]
    pub min_address: u8,
    #[serde(serialize_with = "serialize_address")]
    pub max_address: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_pumps_found: usize,
    pub pumps: Vec<PumpRecord>,
}

/// Addresses are rendered as `0x50` in reports
fn serialize_address<S: Serializer>(address: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{:02X}", address))
}
