//! # MKR5 Bridge Library
//!
//! Drive MKR5 (DART) fuel dispenser controllers over a half-duplex serial bus.
//!
//! This library provides the protocol engine: frame encoding and decoding,
//! CRC and BCD conversion, timeout-bound request/response exchanges, and
//! address-range scanning that skips pumps which do not answer.

pub mod config;
pub mod error;
pub mod mkr5;
pub mod pump;
pub mod serial;
pub mod util;
