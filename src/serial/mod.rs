//! # Serial Communication Module
//!
//! Handles the half-duplex RS-485 / current-loop line to the pumps.
//!
//! This module handles:
//! - Opening the serial port (9600 or 19200 baud, 8 data bits, 1 stop bit, configurable parity)
//! - Writing complete frames
//! - Polling for a reply until the `ETX SF` terminator or a timeout
//! - Discarding stale input before each exchange

pub mod port_trait;

use std::time::Duration;

use bytes::BytesMut;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{PumpError, Result};
use crate::mkr5::decoder::is_frame_complete;
use crate::mkr5::protocol::{MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE};
use port_trait::{SerialPortIO, TokioSerialPort};

/// Baud rates supported by MKR5 pump electronics
pub const SUPPORTED_BAUD_RATES: [u32; 2] = [9600, 19200];

/// Default pump device paths to try (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-RS485 adapters
    "/dev/ttyS0",   // On-board UART
];

/// Interval between input polls while waiting for a reply
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Read chunk size
const READ_CHUNK: usize = 256;

/// Most bytes one read may collect: a largest frame plus a chained one
pub const MAX_BUFFERED: usize = 2 * (MIN_FRAME_SIZE + MAX_PAYLOAD_SIZE);

/// Half-duplex byte channel to the pump bus
///
/// Owns the port; dropping or closing the session closes the port. All
/// methods take `&mut self`, so only one exchange can run at a time.
pub struct TransportSession<P: SerialPortIO> {
    port: P,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl<P: SerialPortIO> std::fmt::Debug for TransportSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl TransportSession<TokioSerialPort> {
    /// Open the port named in the configuration
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Transport` if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mkr5_bridge::config::Config;
    /// use mkr5_bridge::serial::TransportSession;
    ///
    /// let config = Config::default();
    /// let session = TransportSession::open(&config.serial)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = open_port(config, &config.port)?;
        info!(
            "Opened pump bus at {} ({} baud, parity {:?})",
            config.port, config.baud_rate, config.parity
        );
        Ok(Self::new(TokioSerialPort::new(port), &config.port))
    }

    /// Open the first of `paths` that can be opened, with the configured line settings
    ///
    /// # Errors
    ///
    /// Returns `PumpError::SerialPortNotFound` listing every path tried
    pub fn open_with_paths(config: &SerialConfig, paths: &[&str]) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match open_port(config, path) {
                Ok(port) => {
                    info!("Successfully opened pump bus at {}", path);
                    return Ok(Self::new(TokioSerialPort::new(port), path));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(PumpError::SerialPortNotFound(paths.join(", ")))
    }
}

impl<P: SerialPortIO> TransportSession<P> {
    /// Wrap an already opened port
    pub fn new(port: P, device_path: &str) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
        }
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Send one complete frame
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Transport` if the write or flush fails
    pub async fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.port
            .write_all(frame)
            .await
            .map_err(|e| PumpError::Transport(format!("Failed to write frame: {}", e)))?;

        self.port
            .flush()
            .await
            .map_err(|e| PumpError::Transport(format!("Failed to flush serial port: {}", e)))?;

        Ok(())
    }

    /// Drop any input left over from a previous exchange
    ///
    /// Clears the driver's input buffer, then drains whatever is still
    /// readable so no tail bytes can leak into the next reply.
    pub async fn discard_input(&mut self) -> Result<()> {
        self.port
            .clear_input()
            .map_err(|e| PumpError::Transport(format!("Failed to clear input buffer: {}", e)))?;

        let mut discarded = 0usize;
        let mut chunk = [0u8; READ_CHUNK];
        while discarded < MAX_BUFFERED && self.available()? > 0 {
            let n = self.read_chunk(&mut chunk).await?;
            if n == 0 {
                break;
            }
            discarded += n;
        }

        if discarded >= MAX_BUFFERED {
            warn!("Input keeps arriving, stopped discarding after {} bytes", discarded);
        } else if discarded > 0 {
            debug!("Discarded {} stale bytes", discarded);
        }
        Ok(())
    }

    /// Poll for input until a frame terminator arrives or `timeout` elapses
    ///
    /// Returns whatever was received either way; the caller tells success
    /// from timeout by checking for a complete frame.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Transport` only if the port itself fails
    pub async fn read_until_terminator(&mut self, timeout: Duration) -> Result<BytesMut> {
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);
        self.read_more(&mut buffer, timeout).await?;
        Ok(buffer)
    }

    /// Like [`read_until_terminator`](Self::read_until_terminator), appending to `buffer`
    ///
    /// Returns immediately if `buffer` already ends a frame. The deadline
    /// holds even while input keeps arriving, and the buffer never grows
    /// past [`MAX_BUFFERED`].
    pub async fn read_more(&mut self, buffer: &mut BytesMut, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if is_frame_complete(buffer) {
                return Ok(());
            }

            if buffer.len() >= MAX_BUFFERED {
                warn!("{} bytes received without a frame terminator", buffer.len());
                return Ok(());
            }

            let mut received = false;
            if self.available()? > 0 {
                let room = (MAX_BUFFERED - buffer.len()).min(READ_CHUNK);
                let n = self.read_chunk(&mut chunk[..room]).await?;
                buffer.extend_from_slice(&chunk[..n]);
                received = n > 0;
            }

            if Instant::now() >= deadline {
                return Ok(());
            }

            if received {
                tokio::task::yield_now().await;
            } else {
                sleep(POLL_INTERVAL).await;
            }
        }
    }

    /// Close the session and release the port
    pub fn close(self) {
        info!("Closed pump bus at {}", self.device_path);
    }

    fn available(&self) -> Result<usize> {
        self.port
            .bytes_available()
            .map_err(|e| PumpError::Transport(format!("Failed to query input buffer: {}", e)))
    }

    async fn read_chunk(&mut self, chunk: &mut [u8]) -> Result<usize> {
        self.port
            .read(chunk)
            .await
            .map_err(|e| PumpError::Transport(format!("Failed to read: {}", e)))
    }
}

/// Open a specific serial port with MKR5 line settings
fn open_port(config: &SerialConfig, path: &str) -> Result<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let port = tokio_serial::new(path, config.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(config.parity.into())
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| PumpError::Transport(format!("Failed to open {}: {}", path, e)))?;

    Ok(port)
}
