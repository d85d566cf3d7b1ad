//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;
use tokio_serial::{ClearBuffer, SerialPort};

/// Trait for serial port I/O operations
///
/// This is everything the protocol engine needs from the bus: a write, a
/// count of buffered input, a read, and a way to drop buffered input.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Number of received bytes waiting to be read
    fn bytes_available(&self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes that are already buffered
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard everything in the input buffer
    fn clear_input(&self) -> io::Result<()>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }

    fn bytes_available(&self) -> io::Result<usize> {
        let count = self.port.bytes_to_read().map_err(io::Error::from)?;
        Ok(count as usize)
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read(buf).await
    }

    fn clear_input(&self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}
