//! # Command Dispatcher
//!
//! One request/response exchange at a time over a [`TransportSession`]:
//! discard stale input, write the frame, wait for the reply, decode it and
//! check it came from the addressed pump.
//!
//! RETURN_FILLING_INFORMATION may be answered by a filled-info frame followed
//! shortly by a nozzle-status frame. The dispatcher waits a bounded window for
//! that second frame and attaches it to the reply when it arrives.

use std::time::Duration;

use bytes::BytesMut;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::error::{PumpError, Result};
use crate::mkr5::decoder::{decode_frame, frame_size, is_frame_complete};
use crate::mkr5::encoder::{encode_command, encode_price_update};
use crate::mkr5::protocol::{
    NozzleStatus, ParsedFrame, ParsedResponse, PriceEntry, PumpCommand, PumpStatus,
};
use crate::pump::models::FillingInfo;
use crate::serial::port_trait::SerialPortIO;
use crate::serial::TransportSession;
use crate::util::hex::{trace_frame, Direction};

/// Timing of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimings {
    /// Reply window for ordinary commands
    pub response_timeout: Duration,

    /// Reply window for price updates (pumps acknowledge these slower)
    pub price_update_timeout: Duration,

    /// Pause between discarding input and writing a price update
    pub price_update_settle: Duration,

    /// Extra time allowed for a chained frame to start arriving
    pub secondary_delay: Duration,

    /// Window for the chained frame after the delay
    pub secondary_window: Duration,
}

impl Default for DispatchTimings {
    fn default() -> Self {
        Self::from(&ProtocolConfig::default())
    }
}

impl From<&ProtocolConfig> for DispatchTimings {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            response_timeout: config.response_timeout(),
            price_update_timeout: config.price_update_timeout(),
            price_update_settle: config.price_update_settle(),
            secondary_delay: config.secondary_delay(),
            secondary_window: config.secondary_window(),
        }
    }
}

/// A decoded reply plus the nozzle status chained behind it, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub frame: ParsedFrame,
    pub chained: Option<NozzleStatus>,
}

impl Reply {
    pub fn response(&self) -> &ParsedResponse {
        &self.frame.response
    }

    /// The reported status, if this is a status reply
    pub fn status(&self) -> Option<PumpStatus> {
        match self.frame.response {
            ParsedResponse::Status(status) => Some(status),
            _ => None,
        }
    }
}

/// Drives command exchanges on one bus
pub struct CommandDispatcher<P: SerialPortIO> {
    session: TransportSession<P>,
    timings: DispatchTimings,
}

impl<P: SerialPortIO> std::fmt::Debug for CommandDispatcher<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("session", &self.session)
            .field("timings", &self.timings)
            .finish()
    }
}

impl<P: SerialPortIO> CommandDispatcher<P> {
    pub fn new(session: TransportSession<P>, timings: DispatchTimings) -> Self {
        Self { session, timings }
    }

    pub fn timings(&self) -> &DispatchTimings {
        &self.timings
    }

    pub fn session(&self) -> &TransportSession<P> {
        &self.session
    }

    /// Give the session back, e.g. to close it
    pub fn into_session(self) -> TransportSession<P> {
        self.session
    }

    /// Send a command and decode the reply
    ///
    /// # Arguments
    ///
    /// * `address` - Pump address (0x50-0x6F)
    /// * `command` - Command to send
    /// * `timeout` - How long to wait for the reply
    ///
    /// # Errors
    ///
    /// - `Timeout`, `Checksum`, `MalformedFrame`, `AddressMismatch` when no
    ///   usable reply arrived (see [`PumpError::is_no_response`])
    /// - `Transport` when the port fails
    pub async fn send_command(
        &mut self,
        address: u8,
        command: PumpCommand,
        timeout: Duration,
    ) -> Result<Reply> {
        let frame = encode_command(address, command);
        let (primary, mut rest) = self
            .exchange(address, &frame, Duration::ZERO, timeout, command.name())
            .await?;

        let chained = match command {
            PumpCommand::ReturnFillingInformation
                if matches!(primary.response, ParsedResponse::FilledInfo(_)) =>
            {
                let window = self.timings.secondary_delay + self.timings.secondary_window;
                self.read_chained(address, &mut rest, window).await?
            }
            // A nozzle frame already on the line behind a status reply is kept, never waited for
            PumpCommand::ReturnStatus => self.read_chained(address, &mut rest, Duration::ZERO).await?,
            _ => None,
        };

        Ok(Reply {
            frame: primary,
            chained,
        })
    }

    /// [`send_command`](Self::send_command) with the default timeout; a pump
    /// that gives no usable reply yields `Ok(None)`
    ///
    /// # Errors
    ///
    /// Returns error only for transport failures
    pub async fn query(&mut self, address: u8, command: PumpCommand) -> Result<Option<Reply>> {
        let timeout = self.timings.response_timeout;
        absent_on_no_response(address, self.send_command(address, command, timeout).await)
    }

    /// Program unit prices
    ///
    /// Prices are validated and encoded before anything is written; invalid
    /// input never reaches the bus.
    ///
    /// # Errors
    ///
    /// - `Encoding` for invalid nozzle numbers or prices
    /// - the no-response class and `Transport` as for [`send_command`](Self::send_command)
    pub async fn send_price_update(
        &mut self,
        address: u8,
        prices: &[PriceEntry],
        timeout: Duration,
    ) -> Result<Reply> {
        let frame = encode_price_update(address, prices)?;
        let settle = self.timings.price_update_settle;
        let (primary, _) = self
            .exchange(address, &frame, settle, timeout, "PRICE_UPDATE")
            .await?;

        Ok(Reply {
            frame: primary,
            chained: None,
        })
    }

    /// [`send_price_update`](Self::send_price_update) with the price update timeout;
    /// no usable reply yields `Ok(None)`
    pub async fn update_prices(
        &mut self,
        address: u8,
        prices: &[PriceEntry],
    ) -> Result<Option<Reply>> {
        let timeout = self.timings.price_update_timeout;
        let result = self.send_price_update(address, prices, timeout).await;
        absent_on_no_response(address, result)
    }

    /// Current pump state, `None` if the pump is silent
    ///
    /// # Errors
    ///
    /// - `UnexpectedResponse` if the pump answers with anything but a status
    /// - `Transport` when the port fails
    pub async fn status(&mut self, address: u8) -> Result<Option<PumpStatus>> {
        let Some(reply) = self.query(address, PumpCommand::ReturnStatus).await? else {
            return Ok(None);
        };
        match reply.frame.response {
            ParsedResponse::Status(status) => Ok(Some(status)),
            ref other => Err(PumpError::UnexpectedResponse {
                expected: "Status",
                actual: other.kind(),
            }),
        }
    }

    /// Pump identity as a decimal digit string, `None` if the pump is silent
    pub async fn identity(&mut self, address: u8) -> Result<Option<String>> {
        let Some(reply) = self.query(address, PumpCommand::ReturnPumpIdentity).await? else {
            return Ok(None);
        };
        match reply.frame.response {
            ParsedResponse::Identity(identity) => Ok(Some(identity)),
            ref other => Err(PumpError::UnexpectedResponse {
                expected: "Identity",
                actual: other.kind(),
            }),
        }
    }

    /// Read the last filling: volume, amount and, when the pump chains it,
    /// the nozzle status
    ///
    /// `Ok(None)` means the pump gave no usable answer (silence, bad checksum,
    /// garbled or foreign frame). A valid frame of another transaction type is
    /// not treated as silence: the pump did answer, so the caller gets a hard
    /// `UnexpectedResponse` error (the CLI exits with it).
    ///
    /// # Errors
    ///
    /// - `UnexpectedResponse` if the pump answers with anything but filled info
    /// - `Transport` when the port fails
    pub async fn get_filling_information(&mut self, address: u8) -> Result<Option<FillingInfo>> {
        info!("Getting filling information from pump 0x{:02X}", address);

        let Some(reply) = self.query(address, PumpCommand::ReturnFillingInformation).await? else {
            return Ok(None);
        };

        let filled = match reply.frame.response {
            ParsedResponse::FilledInfo(filled) => filled,
            ref other => {
                return Err(PumpError::UnexpectedResponse {
                    expected: "FilledInfo",
                    actual: other.kind(),
                })
            }
        };

        let mut info = FillingInfo::new(address, filled);
        if let Some(nozzle) = reply.chained {
            info.merge_nozzle_status(nozzle);
        }
        Ok(Some(info))
    }

    /// One exchange: discard, (settle), write, read, decode, check address
    ///
    /// Returns the first frame and whatever bytes followed it.
    async fn exchange(
        &mut self,
        address: u8,
        frame: &[u8],
        settle: Duration,
        timeout: Duration,
        description: &str,
    ) -> Result<(ParsedFrame, BytesMut)> {
        self.session.discard_input().await?;
        if !settle.is_zero() {
            sleep(settle).await;
        }

        trace_frame(Direction::Tx, address, frame, description);
        self.session.write(frame).await?;

        let started = Instant::now();
        let mut buffer = self.session.read_until_terminator(timeout).await?;

        let Some(reply) = split_frame(&mut buffer) else {
            if buffer.is_empty() || !is_frame_complete(&buffer) {
                return Err(PumpError::Timeout {
                    address,
                    waited_ms: started.elapsed().as_millis() as u64,
                    received: buffer.len(),
                });
            }
            // Terminated, but too short to announce a length
            trace_frame(Direction::Rx, address, &buffer, "response");
            return Err(PumpError::MalformedFrame(format!(
                "{} byte reply is not a frame",
                buffer.len()
            )));
        };

        trace_frame(Direction::Rx, address, &reply, "response");
        let parsed = decode_frame(&reply)?;
        check_address(address, &parsed)?;

        debug!("Pump 0x{:02X} replied with {}", address, parsed.response.kind());
        Ok((parsed, buffer))
    }

    /// Wait up to `window` for a nozzle-status frame behind the primary reply
    ///
    /// Anything else that arrives, or nothing at all, is not an error.
    async fn read_chained(
        &mut self,
        address: u8,
        buffer: &mut BytesMut,
        window: Duration,
    ) -> Result<Option<NozzleStatus>> {
        self.session.read_more(buffer, window).await?;

        let Some(frame) = split_frame(buffer) else {
            if !buffer.is_empty() {
                debug!("Dropped {} trailing bytes from pump 0x{:02X}", buffer.len(), address);
            }
            return Ok(None);
        };

        trace_frame(Direction::Rx, address, &frame, "chained response");
        match decode_frame(&frame) {
            Ok(ParsedFrame {
                address: from,
                response: ParsedResponse::NozzleStatus(nozzle),
                ..
            }) if from == address => Ok(Some(nozzle)),
            Ok(other) => {
                debug!("Ignoring chained {} frame from 0x{:02X}", other.response.kind(), other.address);
                Ok(None)
            }
            Err(e) => {
                debug!("Ignoring unreadable chained frame from pump 0x{:02X}: {}", address, e);
                Ok(None)
            }
        }
    }
}

/// Take the first whole frame off the front of `buffer`, if one is there
fn split_frame(buffer: &mut BytesMut) -> Option<BytesMut> {
    let size = frame_size(buffer)?;
    if buffer.len() < size {
        return None;
    }
    Some(buffer.split_to(size))
}

fn check_address(expected: u8, frame: &ParsedFrame) -> Result<()> {
    if frame.address != expected {
        return Err(PumpError::AddressMismatch {
            expected,
            actual: frame.address,
        });
    }
    Ok(())
}

fn absent_on_no_response<T>(address: u8, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_no_response() => {
            warn!("No usable response from pump 0x{:02X}: {}", address, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
