//! # Pump Layer
//!
//! Command exchanges with individual pumps and scans over address ranges,
//! built on the MKR5 codec and the serial transport.

pub mod dispatcher;
pub mod models;
pub mod scanner;

pub use dispatcher::{CommandDispatcher, DispatchTimings, Reply};
pub use models::{FillingInfo, NozzleRecord, PumpRecord, ScanReport};
pub use scanner::DeviceScanner;
