//! # Device Scanner
//!
//! Walks an address range one address at a time and collects the pumps that
//! answer. Silent or garbled addresses are skipped; only a failing port
//! aborts the scan.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::{PumpError, Result};
use crate::mkr5::protocol::{is_valid_address, ParsedResponse, PumpCommand, PumpStatus};
use crate::pump::dispatcher::CommandDispatcher;
use crate::pump::models::{PumpRecord, ScanReport};
use crate::serial::port_trait::SerialPortIO;

/// Address-range scanner over a borrowed dispatcher
pub struct DeviceScanner<'a, P: SerialPortIO> {
    dispatcher: &'a mut CommandDispatcher<P>,
}

impl<'a, P: SerialPortIO> DeviceScanner<'a, P> {
    pub fn new(dispatcher: &'a mut CommandDispatcher<P>) -> Self {
        Self { dispatcher }
    }

    /// Query every address in `min_address..=max_address`, in ascending order
    ///
    /// # Returns
    ///
    /// One record per pump that answered STATUS, ordered by address. An
    /// empty list is a successful scan.
    ///
    /// # Errors
    ///
    /// - `Encoding` if the range is outside 0x50-0x6F or reversed
    /// - `Transport` if the port fails; the partial result is dropped
    pub async fn scan_range(&mut self, min_address: u8, max_address: u8) -> Result<Vec<PumpRecord>> {
        check_range(min_address, max_address)?;
        info!(
            "Scanning for pumps from 0x{:02X} to 0x{:02X}",
            min_address, max_address
        );

        let mut pumps = Vec::new();
        for address in min_address..=max_address {
            if let Some(record) = self.probe(address).await? {
                info!(
                    "Found pump at 0x{:02X}: {} ({})",
                    address,
                    record.status,
                    record.identity.as_deref().unwrap_or("no identity")
                );
                pumps.push(record);
            }
        }

        info!("Scan complete: {} pump(s) found", pumps.len());
        Ok(pumps)
    }

    /// [`scan_range`](Self::scan_range) over the configured range, with timestamps
    pub async fn scan(&mut self, config: &ScanConfig) -> Result<ScanReport> {
        let started_at = Utc::now();
        let pumps = self.scan_range(config.min_address, config.max_address).await?;

        Ok(ScanReport {
            min_address: config.min_address,
            max_address: config.max_address,
            started_at,
            finished_at: Utc::now(),
            total_pumps_found: pumps.len(),
            pumps,
        })
    }

    /// Read the last filling of every pump in `pumps` into its record
    ///
    /// Pumps that stay silent keep empty volume and amount; a reply of the
    /// wrong type is noted in `error_message`.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the port fails
    pub async fn collect_filling_info(&mut self, pumps: &mut [PumpRecord]) -> Result<()> {
        for record in pumps.iter_mut() {
            match self.dispatcher.get_filling_information(record.address).await {
                Ok(Some(info)) => record.apply_filling_info(&info),
                Ok(None) => debug!("No filling information from pump 0x{:02X}", record.address),
                Err(e @ PumpError::UnexpectedResponse { .. }) => {
                    warn!("Pump 0x{:02X}: {}", record.address, e);
                    record.error_message = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// STATUS, then IDENTITY if the pump is there
    async fn probe(&mut self, address: u8) -> Result<Option<PumpRecord>> {
        let Some(reply) = self.dispatcher.query(address, PumpCommand::ReturnStatus).await? else {
            debug!("No pump at 0x{:02X}", address);
            return Ok(None);
        };

        let mut record = match reply.status() {
            Some(status) => PumpRecord::online(address, status),
            None => {
                // Answered, so present, but the status is unknown
                let mut record = PumpRecord::online(address, PumpStatus::NotProgrammed);
                record.error_message = Some(format!(
                    "STATUS answered with {}",
                    reply.response().kind()
                ));
                record
            }
        };

        if let Some(nozzle) = reply.chained {
            record.apply_nozzle_status(nozzle);
        }

        match self.dispatcher.query(address, PumpCommand::ReturnPumpIdentity).await? {
            Some(identity) => match identity.frame.response {
                ParsedResponse::Identity(id) => record.identity = Some(id),
                ref other => {
                    warn!(
                        "Pump 0x{:02X} answered IDENTITY with {}",
                        address,
                        other.kind()
                    );
                    record.error_message = Some(format!("IDENTITY answered with {}", other.kind()));
                }
            },
            None => debug!("Pump 0x{:02X} did not report an identity", address),
        }

        Ok(Some(record))
    }
}

fn check_range(min_address: u8, max_address: u8) -> Result<()> {
    if !is_valid_address(min_address) || !is_valid_address(max_address) {
        return Err(PumpError::Encoding(format!(
            "Scan range 0x{:02X}-0x{:02X} is outside the pump address space",
            min_address, max_address
        )));
    }
    if min_address > max_address {
        return Err(PumpError::Encoding(format!(
            "Scan range is reversed: 0x{:02X} > 0x{:02X}",
            min_address, max_address
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkr5::decoder::decode_command_frame;
    use crate::mkr5::decoder::test_frames::*;
    use crate::pump::dispatcher::DispatchTimings;
    use crate::serial::port_trait::mocks::{bus_with_pumps, MockSerialPort, SimulatedPump};
    use crate::serial::TransportSession;
    use std::collections::HashMap;
    use std::io;
    use std::time::Duration;

    fn dispatcher(port: &MockSerialPort) -> CommandDispatcher<MockSerialPort> {
        let timings = DispatchTimings {
            response_timeout: Duration::from_millis(10),
            price_update_timeout: Duration::from_millis(10),
            price_update_settle: Duration::ZERO,
            secondary_delay: Duration::ZERO,
            secondary_window: Duration::from_millis(5),
        };
        CommandDispatcher::new(TransportSession::new(port.clone(), "mock"), timings)
    }

    fn one_pump_at_0x51() -> MockSerialPort {
        let mut pumps = HashMap::new();
        pumps.insert(
            0x51,
            SimulatedPump::new(PumpStatus::Reset).with_identity([0x00, 0x12, 0x34, 0x56, 0x78]),
        );
        bus_with_pumps(pumps)
    }

    #[tokio::test]
    async fn test_scan_skips_silent_addresses() {
        let port = one_pump_at_0x51();
        let mut dispatcher = dispatcher(&port);
        let mut scanner = DeviceScanner::new(&mut dispatcher);

        let pumps = scanner.scan_range(0x50, 0x52).await.unwrap();

        assert_eq!(pumps.len(), 1);
        assert_eq!(pumps[0].address, 0x51);
        assert_eq!(pumps[0].status, PumpStatus::Reset);
        assert_eq!(pumps[0].identity.as_deref(), Some("0012345678"));
        assert!(pumps[0].is_online);
        assert!(pumps[0].error_message.is_none());
    }

    #[tokio::test]
    async fn test_scan_is_sequential_and_ascending() {
        let port = one_pump_at_0x51();
        let mut dispatcher = dispatcher(&port);
        DeviceScanner::new(&mut dispatcher).scan_range(0x50, 0x52).await.unwrap();

        let sent: Vec<(u8, PumpCommand)> = port
            .get_written_data()
            .iter()
            .map(|frame| decode_command_frame(frame).unwrap())
            .collect();

        assert_eq!(
            sent,
            vec![
                (0x50, PumpCommand::ReturnStatus),
                (0x51, PumpCommand::ReturnStatus),
                (0x51, PumpCommand::ReturnPumpIdentity),
                (0x52, PumpCommand::ReturnStatus),
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_scans_are_identical() {
        let mut pumps = HashMap::new();
        pumps.insert(0x50, SimulatedPump::new(PumpStatus::Authorized));
        pumps.insert(0x53, SimulatedPump::new(PumpStatus::SwitchedOff).with_identity([0; 5]));
        let port = bus_with_pumps(pumps);
        let mut dispatcher = dispatcher(&port);
        let mut scanner = DeviceScanner::new(&mut dispatcher);

        let first = scanner.scan_range(0x50, 0x54).await.unwrap();
        let second = scanner.scan_range(0x50, 0x54).await.unwrap();

        assert_eq!(first, second);
        let addresses: Vec<u8> = first.iter().map(|p| p.address).collect();
        assert_eq!(addresses, vec![0x50, 0x53]);
        assert!(first[0].identity.is_none());
        assert_eq!(first[1].identity.as_deref(), Some("0000000000"));
    }

    #[test]
    fn test_scan_from_blocking_caller() {
        let port = one_pump_at_0x51();
        let mut dispatcher = dispatcher(&port);

        let pumps =
            tokio_test::block_on(DeviceScanner::new(&mut dispatcher).scan_range(0x51, 0x51))
                .unwrap();
        assert_eq!(pumps.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_bus_is_successful_scan() {
        let port = MockSerialPort::new();
        let mut dispatcher = dispatcher(&port);

        let pumps = DeviceScanner::new(&mut dispatcher).scan_range(0x60, 0x62).await.unwrap();
        assert!(pumps.is_empty());
    }

    #[tokio::test]
    async fn test_garbled_reply_skips_address() {
        let port = MockSerialPort::new();
        port.respond_with(|frame| {
            let mut reply = status_reply(frame[0], PumpStatus::Reset);
            reply[4] = 0xFF;
            vec![(Duration::ZERO, reply)]
        });
        let mut dispatcher = dispatcher(&port);

        let pumps = DeviceScanner::new(&mut dispatcher).scan_range(0x50, 0x51).await.unwrap();
        assert!(pumps.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_aborts_scan() {
        let port = one_pump_at_0x51();
        port.set_write_error(io::ErrorKind::NotConnected);
        let mut dispatcher = dispatcher(&port);

        let result = DeviceScanner::new(&mut dispatcher).scan_range(0x50, 0x52).await;
        assert!(matches!(result, Err(PumpError::Transport(_))));
    }

    #[tokio::test]
    async fn test_nozzle_chained_to_status_is_recorded() {
        let port = MockSerialPort::new();
        port.respond_with(|frame| match decode_command_frame(frame) {
            Ok((0x55, PumpCommand::ReturnStatus)) => {
                let mut both = status_reply(0x55, PumpStatus::Filling);
                both.extend(nozzle_status_reply(0x55));
                vec![(Duration::ZERO, both)]
            }
            _ => Vec::new(),
        });
        let mut dispatcher = dispatcher(&port);

        let pumps = DeviceScanner::new(&mut dispatcher).scan_range(0x55, 0x55).await.unwrap();

        assert_eq!(pumps.len(), 1);
        assert_eq!(pumps[0].nozzles.len(), 1);
        assert_eq!(pumps[0].nozzles[0].nozzle_number, 2);
        assert!(pumps[0].nozzles[0].is_out);
        assert!(pumps[0].identity.is_none());
    }

    #[tokio::test]
    async fn test_non_status_reply_is_recorded_with_error() {
        let port = MockSerialPort::new();
        port.respond_with(|frame| match decode_command_frame(frame) {
            Ok((address, PumpCommand::ReturnStatus)) => {
                vec![(Duration::ZERO, filled_info_reply(address))]
            }
            _ => Vec::new(),
        });
        let mut dispatcher = dispatcher(&port);

        let pumps = DeviceScanner::new(&mut dispatcher).scan_range(0x50, 0x50).await.unwrap();

        assert_eq!(pumps.len(), 1);
        assert_eq!(pumps[0].status, PumpStatus::NotProgrammed);
        assert_eq!(pumps[0].error_message.as_deref(), Some("STATUS answered with FilledInfo"));
    }

    #[tokio::test]
    async fn test_invalid_range_rejected_without_traffic() {
        let port = MockSerialPort::new();
        let mut dispatcher = dispatcher(&port);
        let mut scanner = DeviceScanner::new(&mut dispatcher);

        assert!(matches!(scanner.scan_range(0x40, 0x52).await, Err(PumpError::Encoding(_))));
        assert!(matches!(scanner.scan_range(0x55, 0x50).await, Err(PumpError::Encoding(_))));
        assert!(port.get_written_data().is_empty());
    }

    #[tokio::test]
    async fn test_collect_filling_info() {
        let port = MockSerialPort::new();
        port.respond_with(|frame| match decode_command_frame(frame) {
            Ok((0x50, PumpCommand::ReturnStatus)) => {
                vec![(Duration::ZERO, status_reply(0x50, PumpStatus::FillingCompleted))]
            }
            Ok((0x51, PumpCommand::ReturnStatus)) => {
                vec![(Duration::ZERO, status_reply(0x51, PumpStatus::Reset))]
            }
            Ok((0x50, PumpCommand::ReturnFillingInformation)) => {
                let mut both = filled_info_reply(0x50);
                both.extend(nozzle_status_reply(0x50));
                vec![(Duration::ZERO, both)]
            }
            Ok((0x51, PumpCommand::ReturnFillingInformation)) => {
                vec![(Duration::ZERO, status_reply(0x51, PumpStatus::Reset))]
            }
            _ => Vec::new(),
        });
        let mut dispatcher = dispatcher(&port);
        let mut scanner = DeviceScanner::new(&mut dispatcher);

        let mut pumps = scanner.scan_range(0x50, 0x51).await.unwrap();
        scanner.collect_filling_info(&mut pumps).await.unwrap();

        assert_eq!(pumps[0].filled_volume, Some(12.345));
        assert_eq!(pumps[0].filled_amount, Some(56.78));
        assert_eq!(pumps[0].nozzles[0].nozzle_number, 2);

        assert!(pumps[1].filled_volume.is_none());
        assert!(pumps[1]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("expected FilledInfo, got Status")));
    }

    #[tokio::test]
    async fn test_collect_filling_info_aborts_on_transport_error() {
        let port = MockSerialPort::new();
        let mut dispatcher = dispatcher(&port);
        let mut pumps = vec![PumpRecord::online(0x50, PumpStatus::Reset)];
        port.set_write_error(io::ErrorKind::BrokenPipe);

        let result = DeviceScanner::new(&mut dispatcher).collect_filling_info(&mut pumps).await;
        assert!(matches!(result, Err(PumpError::Transport(_))));
    }

    #[tokio::test]
    async fn test_scan_report() {
        let port = one_pump_at_0x51();
        let mut dispatcher = dispatcher(&port);
        let config = ScanConfig {
            min_address: 0x50,
            max_address: 0x52,
        };

        let report = DeviceScanner::new(&mut dispatcher).scan(&config).await.unwrap();

        assert_eq!(report.total_pumps_found, 1);
        assert_eq!(report.pumps[0].address, 0x51);
        assert!(report.finished_at >= report.started_at);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["min_address"], "0x50");
        assert_eq!(json["max_address"], "0x52");
    }
}
