//! Register bus transport.
//!
//! The controller only needs two register operations, so the seam is a small
//! trait. [`RtuBus`] implements it over a blocking serial port; tests use a
//! scripted in-memory bus.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use brewpilot_core::rtu::{self, RtuError, RESPONSE_HEAD_LEN};
use thiserror::Error;
use tokio_serial::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("serial I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Rtu(#[from] RtuError),
}

/// Register access to the capture microcontroller.
pub trait RegisterBus: Send {
    fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError>;

    fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), BusError>;
}

/// Serial link settings.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub path: PathBuf,
    pub baud_rate: u32,
    pub unit: u8,
    pub timeout: Duration,
}

/// Modbus RTU master over a serial port (8 data bits, even parity, 1 stop bit).
pub struct RtuBus {
    port: Box<dyn SerialPort>,
    unit: u8,
    timeout: Duration,
}

impl RtuBus {
    pub fn open(config: &SerialConfig) -> anyhow::Result<Self> {
        let path = config.path.to_string_lossy().into_owned();
        let port = tokio_serial::new(path.as_str(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .timeout(config.timeout)
            .open()
            .with_context(|| format!("opening serial port {}", path))?;

        info!(
            "Opened {} at {} baud, unit {}",
            path, config.baud_rate, config.unit
        );
        Ok(Self {
            port,
            unit: config.unit,
            timeout: config.timeout,
        })
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let timeout = self.timeout;
        self.port.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => BusError::Timeout(timeout),
            _ => BusError::Io(e),
        })
    }

    /// Send one request frame and read back one complete response frame.
    fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>, BusError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)?;
        self.port.write_all(request)?;
        self.port.flush()?;

        let mut frame = vec![0u8; RESPONSE_HEAD_LEN];
        self.read_exact(&mut frame)?;
        let len = rtu::response_len(&frame)?;
        frame.resize(len, 0);
        self.read_exact(&mut frame[RESPONSE_HEAD_LEN..])?;
        debug!("rtu {:02x?} -> {:02x?}", request, frame);
        Ok(frame)
    }
}

impl RegisterBus for RtuBus {
    fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError> {
        let request = rtu::encode_read_input_registers(self.unit, address, count)?;
        let frame = self.transact(&request)?;
        Ok(rtu::decode_read_input_registers(&frame, self.unit, count)?)
    }

    fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        let request = rtu::encode_write_single_register(self.unit, address, value);
        let frame = self.transact(&request)?;
        Ok(rtu::decode_write_single_register(&frame, self.unit, address, value)?)
    }
}
