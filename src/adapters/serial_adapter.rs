//! Serial transport for RS-232 and USB-serial instruments
//!
//! This adapter wraps the serialport crate and provides async I/O
//! using Tokio's blocking task executor for synchronous serial operations.

use super::{CommsParams, PortIdentity, PortSelector, Transport};
use crate::error::TransportError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serialport::{FlowControl, SerialPort, SerialPortType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Internal poll interval for blocking reads
const READ_SLICE: Duration = Duration::from_millis(50);

/// Serial transport
#[derive(Default)]
pub struct SerialTransport {
    /// Resolved port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// The actual serial port (behind Arc<Mutex> for async access)
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    /// Create an unopened serial transport
    pub fn new() -> Self {
        Self::default()
    }

    fn port(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>, TransportError> {
        self.port.clone().ok_or(TransportError::NotOpen)
    }
}

/// Resolve a selector into a port name plus whatever identity the OS reports.
fn resolve(selector: &PortSelector) -> Result<(String, PortIdentity)> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;

    let identity_of = |port_type: &SerialPortType, name: &str| match port_type {
        SerialPortType::UsbPort(info) => PortIdentity::usb(
            info.vid,
            info.pid,
            info.product.clone().unwrap_or_else(|| name.to_string()),
        ),
        _ => PortIdentity {
            description: name.to_string(),
            ..PortIdentity::default()
        },
    };

    match selector {
        PortSelector::Usb { index } => ports
            .iter()
            .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
            .nth(*index as usize)
            .map(|p| (p.port_name.clone(), identity_of(&p.port_type, &p.port_name)))
            .ok_or_else(|| anyhow!("No USB serial device at index {}", index)),
        PortSelector::Serial { path } => {
            let identity = ports
                .iter()
                .find(|p| &p.port_name == path)
                .map(|p| identity_of(&p.port_type, path))
                .unwrap_or_else(|| PortIdentity {
                    description: path.clone(),
                    ..PortIdentity::default()
                });
            Ok((path.clone(), identity))
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        "serial"
    }

    async fn open(
        &mut self,
        selector: &PortSelector,
        params: &CommsParams,
        timeout: Duration,
    ) -> Result<PortIdentity, TransportError> {
        let label = selector.to_string();
        let selector = selector.clone();
        let params = *params;

        let opened = tokio::task::spawn_blocking(move || {
            let (port_name, identity) = resolve(&selector)?;
            let flow = if params.flow_control {
                FlowControl::Hardware
            } else {
                FlowControl::None
            };
            let port = serialport::new(&port_name, params.baud_rate)
                .timeout(timeout.min(READ_SLICE))
                .flow_control(flow)
                .open()
                .with_context(|| {
                    format!(
                        "Failed to open serial port '{}' at {} baud",
                        port_name, params.baud_rate
                    )
                })?;
            Ok::<_, anyhow::Error>((port_name, identity, port))
        })
        .await
        .map_err(|e| TransportError::Io(format!("Serial open task panicked: {}", e)))?;

        let (port_name, identity, port) = opened.map_err(|e| TransportError::Open {
            port: label,
            reason: format!("{:#}", e),
        })?;

        debug!("Serial port '{}' opened ({})", port_name, identity.description);
        self.port_name = port_name;
        self.port = Some(Arc::new(Mutex::new(port)));
        Ok(identity)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        let bytes = bytes.to_vec();

        // Execute blocking serial I/O on dedicated thread
        tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut port_guard = port.blocking_lock();
            port_guard
                .write_all(&bytes)
                .and_then(|_| port_guard.flush())
                .map_err(|e| TransportError::Io(format!("Serial write failed: {}", e)))
        })
        .await
        .map_err(|e| TransportError::Io(format!("Serial I/O task panicked: {}", e)))?
    }

    async fn receive(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let port = self.port()?;

        tokio::task::spawn_blocking(move || {
            use std::io::Read;

            let mut port_guard = port.blocking_lock();
            let mut received = Vec::with_capacity(max_len);
            let mut buffer = vec![0u8; max_len.max(1)];
            let start = Instant::now();

            while received.len() < max_len {
                if start.elapsed() > timeout {
                    break;
                }
                let want = max_len - received.len();
                match port_guard.read(&mut buffer[..want]) {
                    Ok(0) => {
                        return Err(TransportError::Io("Unexpected EOF".to_string()));
                    }
                    Ok(n) => received.extend_from_slice(&buffer[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // Device went quiet after sending something: hand back what we have
                        if !received.is_empty() {
                            break;
                        }
                    }
                    Err(e) => return Err(TransportError::Io(format!("Serial read error: {}", e))),
                }
            }

            if received.is_empty() && max_len > 0 {
                return Err(TransportError::Timeout(timeout.as_millis() as u64));
            }
            Ok(received)
        })
        .await
        .map_err(|e| TransportError::Io(format!("Serial I/O task panicked: {}", e)))?
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
