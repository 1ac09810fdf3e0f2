//! Device backends
//!
//! A backend is the model-specific half of the driver: it knows how to bring
//! an instrument up, switch it between measurement modes, take calibration
//! readings and run acquisition cycles. The session engine above it owns the
//! state machines and error classification; backends only ever hand back raw
//! [`DeviceCode`]s or transport failures.
//!
//! # Available Backends
//!
//! - [`FrameProtocolBackend`] - generic framed command protocol whose byte
//!   layout is configured by a [`ModelProfile`]

pub mod frame_protocol;
pub mod profile;

pub use frame_protocol::FrameProtocolBackend;
pub use profile::{ModelProfile, SensorLimits, SpectralBands};

use crate::adapters::{PortIdentity, Transport};
use crate::error::TransportError;
use crate::instrument::calibration::CalibrationType;
use crate::instrument::codes::DeviceCode;
use crate::instrument::mode::DeviceMode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Sub-model identity within the instrument family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentModel {
    /// Emissive/transmissive-only variant (no built-in illuminant)
    I1Monitor,
    /// Full variant with reflective measurement
    I1Pro,
}

impl fmt::Display for InstrumentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I1Monitor => f.write_str("i1 Monitor"),
            Self::I1Pro => f.write_str("i1 Pro"),
        }
    }
}

/// Features detected at runtime during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureProbe {
    /// High resolution spectral mode available
    pub high_res: bool,
    /// Ambient light diffuser fitted
    pub ambient: bool,
}

/// What bring-up learned about the attached instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Sub-model
    pub model: InstrumentModel,
    /// Firmware version (major, minor)
    pub firmware: (u8, u8),
    /// Serial number
    pub serial: u32,
    /// Runtime feature probes
    pub features: FeatureProbe,
}

/// Spectral sampling resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Native band grid
    #[default]
    Standard,
    /// Finer band grid (needs `HIGH_RES`)
    High,
}

/// One acquisition cycle, as planned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPlan {
    /// Mode the cycle runs in
    pub mode: DeviceMode,
    /// Frames requested from the device
    pub frames: usize,
    /// Bytes per frame
    pub frame_size: usize,
    /// Whether the device may stop early (strip scans)
    pub variable: bool,
    /// Receive timeout for the frame data
    pub timeout: Duration,
}

impl AcquisitionPlan {
    /// Bytes expected for a complete cycle.
    pub fn expected_bytes(&self) -> usize {
        self.frames * self.frame_size
    }
}

/// One decoded sensor frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    /// Highest raw count as a fraction of full scale
    pub raw_peak: f64,
    /// Calibrated band values
    pub values: Vec<f64>,
}

impl SensorFrame {
    /// Mean of the calibrated band values.
    pub fn level(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}

/// Failure reported by a backend: either the device's own code or the link.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The device answered with a non-zero status
    #[error("device reported code {0}")]
    Device(DeviceCode),

    /// The link failed underneath the exchange
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<DeviceCode> for BackendError {
    fn from(code: DeviceCode) -> Self {
        Self::Device(code)
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Polls the instrument's measurement switch.
///
/// Runs inside the session's background poll task, which owns the port for
/// the duration of a trigger wait.
#[async_trait]
pub trait SwitchPoller: Send + 'static {
    /// Returns true once the switch has been pressed.
    async fn poll(&mut self, port: &mut dyn Transport) -> BackendResult<bool>;
}

/// Model-specific bring-up, calibration and acquisition.
///
/// Implementations are selected at session construction time. They keep the
/// reference readings captured during calibration and turn raw frames into
/// calibrated band values; validity bookkeeping stays in the session.
#[async_trait]
pub trait DeviceBackend: Send {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Whether a freshly opened port looks like this device family.
    fn accepts(&self, identity: &PortIdentity) -> bool;

    /// Identify the instrument and probe its features.
    async fn init(&mut self, port: &mut dyn Transport) -> BackendResult<DeviceInfo>;

    /// Features found by the last successful `init`.
    fn features(&self) -> FeatureProbe;

    /// Switch the device into a measurement mode.
    async fn configure_mode(&mut self, port: &mut dyn Transport, mode: DeviceMode)
        -> BackendResult<()>;

    /// Take and validate one calibration reading, keeping it as a reference.
    async fn calibrate(
        &mut self,
        port: &mut dyn Transport,
        cal: CalibrationType,
        mode: DeviceMode,
    ) -> BackendResult<()>;

    /// Plan an acquisition cycle for `patches` patches.
    fn plan(&self, mode: DeviceMode, patches: usize) -> BackendResult<AcquisitionPlan>;

    /// Ask the device to start streaming frames for `plan`.
    async fn start_acquisition(
        &mut self,
        port: &mut dyn Transport,
        plan: &AcquisitionPlan,
    ) -> BackendResult<()>;

    /// Decode frame-aligned bytes into calibrated frames.
    fn decode(&self, plan: &AcquisitionPlan, bytes: &[u8]) -> BackendResult<Vec<SensorFrame>>;

    /// Dynamic-range limits as fractions of full scale.
    fn limits(&self) -> SensorLimits;

    /// Shortest run of steady frames that counts as a strip patch.
    fn min_patch_samples(&self) -> usize;

    /// Band grid of decoded frames at the current resolution.
    fn bands(&self) -> SpectralBands;

    /// Change the output resolution.
    fn set_resolution(&mut self, resolution: Resolution) -> BackendResult<()>;

    /// Poller for the measurement switch.
    fn switch_poller(&self) -> Box<dyn SwitchPoller>;

    /// Bring the link back in step after an exchange was abandoned midway.
    ///
    /// Stops whatever the device is doing and discards its pending output,
    /// so the next command reads only its own reply.
    async fn resync(&mut self, port: &mut dyn Transport) -> BackendResult<()>;

    /// Put the device in a quiescent state before the port is closed.
    async fn shutdown(&mut self, port: &mut dyn Transport) -> BackendResult<()>;
}

/// Receive exactly `len` bytes, accumulating partial replies.
///
/// A timeout after some data arrived is a short read; a timeout before any
/// data is passed through unchanged.
pub(crate) async fn read_exact(
    port: &mut dyn Transport,
    len: usize,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::with_capacity(len);
    while buf.len() < len {
        match port.receive(len - buf.len(), timeout).await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(TransportError::Timeout(ms)) if buf.is_empty() => {
                return Err(TransportError::Timeout(ms))
            }
            Err(TransportError::Timeout(_)) => break,
            Err(e) => return Err(e),
        }
    }
    if buf.len() < len {
        return Err(TransportError::ShortRead {
            expected: len,
            got: buf.len(),
        });
    }
    Ok(buf)
}

/// Upper bound on bytes discarded by one [`drain`].
const DRAIN_LIMIT: usize = 1 << 20;

/// Discard incoming bytes until the port stays quiet for `quiet`.
///
/// Returns the number of bytes thrown away.
pub(crate) async fn drain(port: &mut dyn Transport, quiet: Duration) -> Result<usize, TransportError> {
    let mut discarded = 0;
    while discarded < DRAIN_LIMIT {
        match port.receive(DRAIN_LIMIT - discarded, quiet).await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => discarded += chunk.len(),
            Err(TransportError::Timeout(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(discarded)
}
