//! Frame protocol backend
//!
//! Drives instruments that speak a simple framed command protocol:
//!
//! | Command     | Request                         | Reply                                           |
//! |-------------|---------------------------------|-------------------------------------------------|
//! | identify    | `[op]`                          | `[status, model, fw_major, fw_minor, features, serial u32 LE]` |
//! | set mode    | `[op, mode]`                    | `[status]`                                      |
//! | calibrate   | `[op, cal_type, mode]`          | `[status]` then one frame                       |
//! | measure     | `[op, frames u16 LE]`           | `[status]` then up to `frames` frames           |
//! | switch poll | `[op]`                          | `[state]` (non-zero = pressed)                  |
//! | abort       | `[op]`                          | none; pending output is dropped by the host     |
//! | close       | `[op]`                          | `[status]`                                      |
//!
//! A frame is `bands` little-endian `u16` counts. Opcodes, band grid and
//! limits all come from the [`ModelProfile`].

use super::{
    drain, read_exact, AcquisitionPlan, BackendError, BackendResult, DeviceBackend, DeviceInfo,
    FeatureProbe, ModelProfile, Resolution, SensorFrame, SensorLimits, SpectralBands,
    SwitchPoller,
};
use crate::adapters::{PortIdentity, Transport};
use crate::instrument::calibration::CalibrationType;
use crate::instrument::codes::DeviceCode;
use crate::instrument::mode::DeviceMode;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Feature byte: high resolution mode available
const FEATURE_HIGH_RES: u8 = 0x01;
/// Feature byte: ambient diffuser fitted
const FEATURE_AMBIENT: u8 = 0x02;
/// Length of the identify reply
const IDENTIFY_REPLY_LEN: usize = 9;

/// Backend for framed-protocol instruments.
pub struct FrameProtocolBackend {
    profile: ModelProfile,
    info: Option<DeviceInfo>,
    resolution: Resolution,
    /// Raw reference counts per calibration type
    references: BTreeMap<CalibrationType, Vec<f64>>,
}

impl FrameProtocolBackend {
    /// Create a backend for `profile`.
    pub fn new(profile: ModelProfile) -> Self {
        Self {
            profile,
            info: None,
            resolution: Resolution::Standard,
            references: BTreeMap::new(),
        }
    }

    /// The profile in use.
    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.profile.reply_timeout_ms)
    }

    /// Send a command and check its status byte.
    async fn command(&self, port: &mut dyn Transport, request: &[u8]) -> BackendResult<()> {
        trace!("frame protocol -> {:02x?}", request);
        port.send(request).await?;
        let status = read_exact(port, 1, self.reply_timeout()).await?;
        match status[0] {
            0 => Ok(()),
            code => Err(BackendError::Device(DeviceCode::from(code))),
        }
    }

    fn counts(&self, frame: &[u8]) -> Vec<f64> {
        frame
            .chunks_exact(2)
            .map(|pair| f64::from(u16::from_le_bytes([pair[0], pair[1]])))
            .collect()
    }

    fn peak(&self, counts: &[f64]) -> f64 {
        counts.iter().copied().fold(0.0, f64::max) / f64::from(self.profile.full_scale)
    }

    fn reference(&self, cal: CalibrationType) -> BackendResult<&[f64]> {
        self.references
            .get(&cal)
            .map(Vec::as_slice)
            .ok_or(BackendError::Device(DeviceCode::INT_NOTCALIBRATED))
    }

    /// Check a calibration reading against the profile's reference limits.
    fn check_reference(&self, cal: CalibrationType, peak: f64) -> Result<(), DeviceCode> {
        let profile = &self.profile;
        if peak >= profile.limits.saturation {
            return Err(DeviceCode::RD_SENSORSATURATED);
        }
        match cal {
            _ if cal.is_dark() && peak > profile.dark_max => Err(DeviceCode::RD_DARKREADINCONS),
            CalibrationType::ReflectiveWhite if peak < profile.white_min => {
                Err(DeviceCode::RD_WHITEREFERROR)
            }
            CalibrationType::TransmissionWhite => {
                let [lo, hi] = profile.trans_white_range;
                if (lo..=hi).contains(&peak) {
                    Ok(())
                } else {
                    Err(DeviceCode::RD_TRANSWHITERANGE)
                }
            }
            CalibrationType::DisplayIntegrationTime if peak < profile.limits.low => {
                Err(DeviceCode::RD_LIGHTTOOLOW)
            }
            _ => Ok(()),
        }
    }

    /// Turn raw counts into calibrated band values for `mode`.
    fn calibrate_frame(&self, mode: DeviceMode, counts: &[f64]) -> BackendResult<Vec<f64>> {
        let ratio = |dark: &[f64], white: &[f64]| -> Vec<f64> {
            counts
                .iter()
                .zip(dark.iter().zip(white))
                .map(|(c, (d, w))| (c - d) / (w - d).max(1.0))
                .collect()
        };

        let values = if mode.is_reflective() {
            ratio(
                self.reference(CalibrationType::ReflectiveDark)?,
                self.reference(CalibrationType::ReflectiveWhite)?,
            )
        } else if mode.is_transmissive() {
            ratio(
                self.reference(CalibrationType::TransmissionDark)?,
                self.reference(CalibrationType::TransmissionWhite)?,
            )
        } else {
            let dark = self.reference(CalibrationType::EmissiveDark)?;
            counts
                .iter()
                .zip(dark)
                .map(|(c, d)| (c - d) * self.profile.emissive_scale)
                .collect()
        };

        Ok(match (self.resolution, &self.profile.hires_bands) {
            (Resolution::High, Some(hires)) => resample(&values, &self.profile.bands, hires),
            _ => values,
        })
    }
}

/// Linearly resample `values` from one band grid onto another.
fn resample(values: &[f64], from: &SpectralBands, to: &SpectralBands) -> Vec<f64> {
    let step = from.spacing();
    (0..to.count)
        .map(|i| {
            let nm = to.start_nm + to.spacing() * i as f64;
            if step <= 0.0 || values.len() < 2 {
                return values.first().copied().unwrap_or(0.0);
            }
            let pos = ((nm - from.start_nm) / step).clamp(0.0, (values.len() - 1) as f64);
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(values.len() - 1);
            let frac = pos - lo as f64;
            values[lo] * (1.0 - frac) + values[hi] * frac
        })
        .collect()
}

#[async_trait]
impl DeviceBackend for FrameProtocolBackend {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn accepts(&self, identity: &PortIdentity) -> bool {
        match (identity.vendor_id, identity.product_id) {
            (Some(vendor), Some(product)) if !self.profile.usb_ids.is_empty() => self
                .profile
                .usb_ids
                .iter()
                .any(|id| id.vendor == vendor && id.product == product),
            _ => true,
        }
    }

    async fn init(&mut self, port: &mut dyn Transport) -> BackendResult<DeviceInfo> {
        self.info = None;
        self.references.clear();
        self.resolution = Resolution::Standard;

        port.send(&[self.profile.opcodes.identify]).await?;
        let reply = read_exact(port, IDENTIFY_REPLY_LEN, self.reply_timeout()).await?;
        if reply[0] != 0 {
            return Err(BackendError::Device(DeviceCode::from(reply[0])));
        }

        let model = self
            .profile
            .model(reply[1])
            .ok_or(BackendError::Device(DeviceCode::UNKNOWN_MODEL))?;
        let features = FeatureProbe {
            high_res: reply[4] & FEATURE_HIGH_RES != 0 && self.profile.hires_bands.is_some(),
            ambient: reply[4] & FEATURE_AMBIENT != 0,
        };
        let info = DeviceInfo {
            model,
            firmware: (reply[2], reply[3]),
            serial: u32::from_le_bytes([reply[5], reply[6], reply[7], reply[8]]),
            features,
        };

        info!(
            "{} identified: {} fw {}.{} serial {} ({:?})",
            self.profile.name, info.model, info.firmware.0, info.firmware.1, info.serial, features
        );
        self.info = Some(info.clone());
        Ok(info)
    }

    fn features(&self) -> FeatureProbe {
        self.info
            .as_ref()
            .map(|info| info.features)
            .unwrap_or_default()
    }

    async fn configure_mode(
        &mut self,
        port: &mut dyn Transport,
        mode: DeviceMode,
    ) -> BackendResult<()> {
        self.command(port, &[self.profile.opcodes.set_mode, mode.wire_code()])
            .await?;
        debug!("{} switched to {}", self.profile.name, mode);
        Ok(())
    }

    async fn calibrate(
        &mut self,
        port: &mut dyn Transport,
        cal: CalibrationType,
        mode: DeviceMode,
    ) -> BackendResult<()> {
        self.command(
            port,
            &[self.profile.opcodes.calibrate, cal.wire_code(), mode.wire_code()],
        )
        .await?;
        let frame = read_exact(port, self.profile.frame_size(), self.reply_timeout()).await?;
        let counts = self.counts(&frame);
        let peak = self.peak(&counts);
        trace!("{} reference peak {:.4}", cal, peak);

        self.check_reference(cal, peak)?;
        self.references.insert(cal, counts);
        debug!("{} reference captured", cal);
        Ok(())
    }

    fn plan(&self, mode: DeviceMode, patches: usize) -> BackendResult<AcquisitionPlan> {
        let profile = &self.profile;
        let (frames, variable) = if mode.is_flash() {
            (usize::from(profile.flash_frames), false)
        } else if mode.is_scan() {
            let frames = usize::from(profile.max_scan_frames);
            if patches.saturating_mul(profile.min_patch_samples) > frames {
                return Err(BackendError::Device(DeviceCode::INT_MEASBUFFTOOSMALL));
            }
            (frames, true)
        } else {
            (usize::from(profile.spot_frames), false)
        };
        Ok(AcquisitionPlan {
            mode,
            frames,
            frame_size: profile.frame_size(),
            variable,
            timeout: Duration::from_millis(profile.measure_timeout_ms),
        })
    }

    async fn start_acquisition(
        &mut self,
        port: &mut dyn Transport,
        plan: &AcquisitionPlan,
    ) -> BackendResult<()> {
        let frames = u16::try_from(plan.frames)
            .map_err(|_| BackendError::Device(DeviceCode::INT_MEASBUFFTOOSMALL))?;
        let [lo, hi] = frames.to_le_bytes();
        self.command(port, &[self.profile.opcodes.measure, lo, hi])
            .await
    }

    fn decode(&self, plan: &AcquisitionPlan, bytes: &[u8]) -> BackendResult<Vec<SensorFrame>> {
        if plan.frame_size == 0 || bytes.len() % plan.frame_size != 0 {
            return Err(BackendError::Device(DeviceCode::HW_ME_ODDREAD));
        }
        bytes
            .chunks_exact(plan.frame_size)
            .map(|frame| {
                let counts = self.counts(frame);
                Ok(SensorFrame {
                    raw_peak: self.peak(&counts),
                    values: self.calibrate_frame(plan.mode, &counts)?,
                })
            })
            .collect()
    }

    fn limits(&self) -> SensorLimits {
        self.profile.limits
    }

    fn min_patch_samples(&self) -> usize {
        self.profile.min_patch_samples
    }

    fn bands(&self) -> SpectralBands {
        match (self.resolution, &self.profile.hires_bands) {
            (Resolution::High, Some(hires)) => *hires,
            _ => self.profile.bands,
        }
    }

    fn set_resolution(&mut self, resolution: Resolution) -> BackendResult<()> {
        if resolution == Resolution::High && self.profile.hires_bands.is_none() {
            return Err(BackendError::Device(DeviceCode::UNSUPPORTED));
        }
        self.resolution = resolution;
        Ok(())
    }

    fn switch_poller(&self) -> Box<dyn SwitchPoller> {
        Box::new(FrameSwitchPoller {
            opcode: self.profile.opcodes.switch_poll,
            timeout: self.reply_timeout(),
        })
    }

    async fn resync(&mut self, port: &mut dyn Transport) -> BackendResult<()> {
        port.send(&[self.profile.opcodes.abort]).await?;
        let quiet = Duration::from_millis(self.profile.drain_quiet_ms);
        let discarded = drain(port, quiet).await?;
        if discarded > 0 {
            warn!("{} discarded {} stale bytes", self.profile.name, discarded);
        }
        Ok(())
    }

    async fn shutdown(&mut self, port: &mut dyn Transport) -> BackendResult<()> {
        self.command(port, &[self.profile.opcodes.close]).await
    }
}

/// Switch poller for the frame protocol.
struct FrameSwitchPoller {
    opcode: u8,
    timeout: Duration,
}

#[async_trait]
impl SwitchPoller for FrameSwitchPoller {
    async fn poll(&mut self, port: &mut dyn Transport) -> BackendResult<bool> {
        port.send(&[self.opcode]).await?;
        let state = read_exact(port, 1, self.timeout).await?;
        Ok(state[0] != 0)
    }
}
