//! # MKR5 Protocol Module
//!
//! Implementation of the MKR5 (DART pump interface) master/slave protocol.
//!
//! This module handles:
//! - Command and price update frame encoding
//! - Reply decoding (pump status, filled info, nozzle status, identity)
//! - CRC-16/CCITT checksum calculation
//! - Packed BCD conversion of prices, volumes and amounts

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
pub mod bcd;
