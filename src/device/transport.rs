//! Serial transport for the GMC device
//!
//! Abstracts the serial port behind a small trait so protocol logic can be
//! exercised against a mock transport in tests. The GQ-RFC1201 protocol has
//! no framing marker, so the transport exposes an explicit purge operation
//! and a deadline-bounded read that returns however many bytes arrived.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::error::{GmcSrvError, Result};

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialTransportConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout for individual commands
    pub read_timeout: Duration,
    /// Write timeout for individual commands
    pub write_timeout: Duration,
    /// Settle delay after opening the port
    pub open_settle_delay: Duration,
}

impl Default for SerialTransportConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(1),
            open_settle_delay: Duration::from_millis(500),
        }
    }
}

impl SerialTransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(GmcSrvError::ConfigError(
                "Port path cannot be empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(GmcSrvError::ConfigError(
                "Baud rate must be greater than zero".to_string(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(GmcSrvError::ConfigError(
                "Read timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Byte-stream transport to the device
#[async_trait]
pub trait Transport: Send {
    /// Open the underlying stream
    async fn open(&mut self) -> Result<()>;

    /// Close the underlying stream; idempotent
    async fn close(&mut self) -> Result<()>;

    /// Whether the stream is currently open
    fn is_open(&self) -> bool;

    /// Discard any pending input and output bytes
    async fn purge(&mut self) -> Result<()>;

    /// Write all bytes, bounded by the write timeout
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read into `buf` until it is full or the deadline passes.
    ///
    /// Returns the number of bytes actually read; short reads are reported
    /// through the count, not as an error, since response-length policy
    /// belongs to the protocol layer.
    async fn read_upto(&mut self, buf: &mut [u8], deadline: Duration) -> Result<usize>;
}

/// Serial transport implementation over tokio-serial
#[derive(Debug)]
pub struct SerialTransport {
    config: SerialTransportConfig,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    /// Create a new serial transport with configuration
    pub fn new(config: SerialTransportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stream: None,
        })
    }

    fn stream_mut(&mut self) -> Result<&mut SerialStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| GmcSrvError::TransportError("Serial port not open".to_string()))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<()> {
        debug!("Opening serial port: {}", self.config.port);

        // GMC-300E Plus is fixed at 8N1, no flow control
        #[allow(unused_mut)]
        let mut port = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.config.read_timeout)
            .open_native_async()
            .map_err(|e| {
                GmcSrvError::TransportError(format!(
                    "Failed to open serial port {}: {e}",
                    self.config.port
                ))
            })?;

        #[cfg(unix)]
        port.set_exclusive(false).map_err(|e| {
            GmcSrvError::TransportError(format!("Failed to set exclusive mode: {e}"))
        })?;

        self.stream = Some(port);

        // Let the port settle before the first exchange
        tokio::time::sleep(self.config.open_settle_delay).await;

        info!("Opened serial port: {}", self.config.port);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            // Serial port is closed when dropped
            info!("Closed serial port: {}", self.config.port);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn purge(&mut self) -> Result<()> {
        let stream = self.stream_mut()?;
        stream
            .clear(ClearBuffer::All)
            .map_err(|e| GmcSrvError::TransportError(format!("Failed to purge buffers: {e}")))?;
        Ok(())
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let write_timeout = self.config.write_timeout;
        let stream = self.stream_mut()?;

        let write_op = async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok::<_, std::io::Error>(())
        };

        match timeout(write_timeout, write_op).await {
            Ok(Ok(())) => {
                debug!(
                    hex_data = %data.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" "),
                    length = data.len(),
                    direction = "send",
                    "[Serial] Raw packet"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                // Connection is likely broken, drop it
                self.stream = None;
                Err(GmcSrvError::TransportError(format!(
                    "Failed to send data: {e}"
                )))
            }
            Err(_) => Err(GmcSrvError::Timeout(format!(
                "Send operation timed out after {write_timeout:?}"
            ))),
        }
    }

    async fn read_upto(&mut self, buf: &mut [u8], deadline: Duration) -> Result<usize> {
        let stream = self.stream_mut()?;
        let mut filled = 0;

        let result = timeout(deadline, async {
            loop {
                if filled >= buf.len() {
                    break;
                }
                let n = stream.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            Ok::<_, std::io::Error>(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stream = None;
                return Err(GmcSrvError::TransportError(format!(
                    "Failed to receive data: {e}"
                )));
            }
            // The device simply stopped sending; report what arrived
            Err(_) => {}
        }

        if filled > 0 {
            debug!(
                hex_data = %buf[..filled].iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" "),
                length = filled,
                direction = "recv",
                "[Serial] Raw packet"
            );
        }
        Ok(filled)
    }
}
