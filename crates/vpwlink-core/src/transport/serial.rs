//! Serial port transport
//!
//! Provides low-level serial port access for adapter communication.

use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use super::{PortConfig, Transport};
use crate::protocol::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Open a serial port with the given speed and read timeout
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    serialport::new(name, baud)
        .timeout(timeout)
        .open()
        .map_err(|e| ProtocolError::TransportError(e.to_string()))
}

/// Configure a serial port for adapter communication
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    // Standard 8N1 configuration
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::TransportError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::TransportError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::TransportError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::TransportError(e.to_string()))?;

    // some USB adapters hold the interface in reset while DTR is low
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!("configure_port: failed to set DTR high: {} (continuing)", e);
    }

    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::TransportError(e.to_string()))
}

/// Transport over a named serial port
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Transport for the named port, not yet opened
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: None,
        }
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once opened
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, ProtocolError> {
        self.port.as_mut().ok_or(ProtocolError::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, config: &PortConfig) -> Result<(), ProtocolError> {
        let (baud_rate, timeout_ms) = match *config {
            PortConfig::Serial {
                baud_rate,
                timeout_ms,
            } => (Some(baud_rate), timeout_ms),
            PortConfig::Plain => (None, DEFAULT_TIMEOUT_MS),
        };
        let mut port = open_port(&self.name, baud_rate, Duration::from_millis(timeout_ms))?;
        configure_port(port.as_mut())?;
        tracing::info!(
            "opened {} at {} baud",
            self.name,
            baud_rate.unwrap_or(DEFAULT_BAUD_RATE)
        );
        self.port = Some(port);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, ProtocolError> {
        match self.port()?.read(buffer) {
            Ok(0) => Err(ProtocolError::Timeout),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(ProtocolError::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    fn discard_buffers(&mut self) -> Result<(), ProtocolError> {
        clear_buffers(self.port()?.as_mut())
    }

    fn queued_byte_count(&mut self) -> Result<usize, ProtocolError> {
        self.port()?
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| ProtocolError::TransportError(e.to_string()))
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        self.port()?
            .set_timeout(timeout)
            .map_err(|e| ProtocolError::TransportError(e.to_string()))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!("closed {}", self.name);
        }
    }
}
