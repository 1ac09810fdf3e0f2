//! Transport adapters
//!
//! This module defines the [`Transport`] port the session engine talks
//! through, and its implementations: a serial/USB-serial adapter built on the
//! `serialport` crate and an in-memory mock used by tests and simulations.
//!
//! Selecting which physical port to open (USB enumeration, serial port
//! naming) is the adapter's job; the session only hands over a
//! [`PortSelector`].

pub mod mock_adapter;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock_adapter::{MockHandle, MockTransport};
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which physical port to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortSelector {
    /// n-th matching USB device
    Usb { index: u32 },
    /// Serial device path (e.g., "/dev/ttyUSB0", "COM3")
    Serial { path: String },
}

impl FromStr for PortSelector {
    type Err = String;

    /// Parses `usb:<n>` or a serial device path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty port selector".to_string());
        }
        match s.strip_prefix("usb:") {
            Some(index) => index
                .parse()
                .map(|index| Self::Usb { index })
                .map_err(|_| format!("invalid USB index in '{}'", s)),
            None => Ok(Self::Serial {
                path: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for PortSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb { index } => write!(f, "usb:{}", index),
            Self::Serial { path } => f.write_str(path),
        }
    }
}

/// Line parameters for opening a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommsParams {
    /// Baud rate for serial links (ignored by USB transports)
    pub baud_rate: u32,
    /// Hardware flow control
    pub flow_control: bool,
}

impl Default for CommsParams {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            flow_control: false,
        }
    }
}

/// What the transport found at the other end of the port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortIdentity {
    /// USB vendor id, when known
    pub vendor_id: Option<u16>,
    /// USB product id, when known
    pub product_id: Option<u16>,
    /// Free-form description (product string, port name)
    pub description: String,
}

impl PortIdentity {
    /// Identity of a USB device.
    pub fn usb(vendor_id: u16, product_id: u16, description: impl Into<String>) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            description: description.into(),
        }
    }
}

/// Byte-level communications channel to one instrument.
///
/// A transport is exclusively owned by one session. `receive` returns at most
/// `max_len` bytes; it may return fewer when the device goes quiet before the
/// timeout, which callers validate against their expected frame size.
#[async_trait]
pub trait Transport: Send {
    /// Short adapter name for logs.
    fn name(&self) -> &str;

    /// Open and configure the channel.
    async fn open(
        &mut self,
        selector: &PortSelector,
        params: &CommsParams,
        timeout: Duration,
    ) -> Result<PortIdentity, TransportError>;

    /// Write a complete message.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read up to `max_len` bytes.
    async fn receive(&mut self, max_len: usize, timeout: Duration)
        -> Result<Vec<u8>, TransportError>;

    /// Release the channel. Closing a closed transport is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}
