//! Model profiles
//!
//! The wire layout of a frame-protocol instrument (opcodes, band grid, frame
//! counts, reference limits) is data, not code. Profiles deserialize from the
//! `[profile]` section of the driver configuration; [`ModelProfile::i1pro`]
//! is the built-in default for the i1 Pro / i1 Monitor family.

use crate::config::ConfigError;
use crate::hardware::InstrumentModel;
use serde::{Deserialize, Serialize};

/// Spectral band grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralBands {
    /// Number of bands
    pub count: usize,
    /// Centre wavelength of the first band (nm)
    pub start_nm: f64,
    /// Centre wavelength of the last band (nm)
    pub end_nm: f64,
}

impl SpectralBands {
    /// Spacing between band centres (nm).
    pub fn spacing(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.end_nm - self.start_nm) / (self.count - 1) as f64
    }
}

/// Dynamic-range limits as fractions of full scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorLimits {
    /// Raw peak at or above this is saturated
    pub saturation: f64,
    /// Emissive peak above this is too bright
    pub high: f64,
    /// Emissive peak below this is too dark
    pub low: f64,
}

/// USB vendor/product pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbId {
    /// USB vendor id
    pub vendor: u16,
    /// USB product id
    pub product: u16,
}

/// Model bytes reported in the identify reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIds {
    /// Byte identifying an i1 Monitor
    pub monitor: u8,
    /// Byte identifying an i1 Pro
    pub pro: u8,
}

/// Command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opcodes {
    /// Report model, firmware, features and serial
    pub identify: u8,
    /// Switch measurement mode
    pub set_mode: u8,
    /// Take one calibration reading
    pub calibrate: u8,
    /// Start streaming measurement frames
    pub measure: u8,
    /// Read the measurement switch state
    pub switch_poll: u8,
    /// Stop the current sequence; the device does not reply
    #[serde(default = "default_abort_opcode")]
    pub abort: u8,
    /// Quiesce before the port is closed
    pub close: u8,
}

fn default_abort_opcode() -> u8 {
    0xce
}

fn default_drain_quiet_ms() -> u64 {
    100
}

/// Wire layout and sensor limits for one instrument family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Profile name for logs
    pub name: String,
    /// Accepted USB identities; empty accepts any port
    #[serde(default)]
    pub usb_ids: Vec<UsbId>,
    /// Model bytes
    pub models: ModelIds,
    /// Command opcodes
    pub opcodes: Opcodes,
    /// Standard band grid (the frame layout)
    pub bands: SpectralBands,
    /// High resolution output grid, if the family supports one
    #[serde(default)]
    pub hires_bands: Option<SpectralBands>,
    /// Full-scale raw count
    pub full_scale: u16,
    /// Frames per spot reading
    pub spot_frames: u16,
    /// Frames per ambient flash capture
    pub flash_frames: u16,
    /// Upper bound on frames in a strip scan
    pub max_scan_frames: u16,
    /// Shortest run of frames counted as a patch
    pub min_patch_samples: usize,
    /// Dynamic-range limits
    pub limits: SensorLimits,
    /// Dark references must peak below this
    pub dark_max: f64,
    /// Reflective white reference must peak above this
    pub white_min: f64,
    /// Transmission white reference must peak inside this range
    pub trans_white_range: [f64; 2],
    /// Counts to radiance scale for emissive modes
    pub emissive_scale: f64,
    /// Timeout for command replies (ms)
    pub reply_timeout_ms: u64,
    /// Timeout for frame data (ms)
    pub measure_timeout_ms: u64,
    /// Silence that ends a resync drain (ms)
    #[serde(default = "default_drain_quiet_ms")]
    pub drain_quiet_ms: u64,
}

impl ModelProfile {
    /// Built-in profile for the i1 Pro family.
    pub fn i1pro() -> Self {
        Self {
            name: "i1pro".to_string(),
            usb_ids: vec![
                UsbId {
                    vendor: 0x0971,
                    product: 0x2000,
                },
                UsbId {
                    vendor: 0x0971,
                    product: 0x2001,
                },
            ],
            models: ModelIds {
                monitor: 0x01,
                pro: 0x02,
            },
            opcodes: Opcodes {
                identify: 0xc0,
                set_mode: 0xc1,
                calibrate: 0xc2,
                measure: 0xc3,
                switch_poll: 0xc4,
                abort: default_abort_opcode(),
                close: 0xcf,
            },
            bands: SpectralBands {
                count: 36,
                start_nm: 380.0,
                end_nm: 730.0,
            },
            hires_bands: Some(SpectralBands {
                count: 106,
                start_nm: 380.0,
                end_nm: 730.0,
            }),
            full_scale: u16::MAX,
            spot_frames: 4,
            flash_frames: 32,
            max_scan_frames: 2048,
            min_patch_samples: 3,
            limits: SensorLimits {
                saturation: 0.98,
                high: 0.9,
                low: 0.001,
            },
            dark_max: 0.05,
            white_min: 0.1,
            trans_white_range: [0.1, 0.95],
            emissive_scale: 1.0,
            reply_timeout_ms: 2_000,
            measure_timeout_ms: 20_000,
            drain_quiet_ms: default_drain_quiet_ms(),
        }
    }

    /// Look up a model byte.
    pub fn model(&self, byte: u8) -> Option<InstrumentModel> {
        if byte == self.models.pro {
            Some(InstrumentModel::I1Pro)
        } else if byte == self.models.monitor {
            Some(InstrumentModel::I1Monitor)
        } else {
            None
        }
    }

    /// Bytes in one frame.
    pub fn frame_size(&self) -> usize {
        self.bands.count * 2
    }

    /// Check the profile is internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.bands.count == 0 {
            return fail(format!("Profile '{}' has no bands", self.name));
        }
        if let Some(hires) = &self.hires_bands {
            if hires.count < self.bands.count {
                return fail(format!(
                    "Profile '{}' high resolution grid is coarser than the standard grid",
                    self.name
                ));
            }
        }
        if self.full_scale == 0 {
            return fail(format!("Profile '{}' full_scale must be non-zero", self.name));
        }
        if self.spot_frames == 0 || self.flash_frames < 2 || self.max_scan_frames == 0 {
            return fail(format!("Profile '{}' frame counts are too small", self.name));
        }
        if self.min_patch_samples == 0 {
            return fail(format!("Profile '{}' min_patch_samples must be >= 1", self.name));
        }
        let SensorLimits {
            saturation,
            high,
            low,
        } = self.limits;
        if !(0.0 < low && low < high && high <= saturation && saturation <= 1.0) {
            return fail(format!(
                "Profile '{}' limits must satisfy 0 < low < high <= saturation <= 1",
                self.name
            ));
        }
        let [trans_min, trans_max] = self.trans_white_range;
        if trans_min >= trans_max {
            return fail(format!(
                "Profile '{}' trans_white_range is empty",
                self.name
            ));
        }
        if self.reply_timeout_ms == 0 || self.measure_timeout_ms == 0 || self.drain_quiet_ms == 0 {
            return fail(format!("Profile '{}' timeouts must be positive", self.name));
        }
        Ok(())
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self::i1pro()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profile_is_valid() {
        let profile = ModelProfile::i1pro();
        profile.validate().unwrap();
        assert_eq!(profile.frame_size(), 72);
        assert!((profile.bands.spacing() - 10.0).abs() < 1e-9);
        assert_eq!(profile.model(0x02), Some(InstrumentModel::I1Pro));
        assert_eq!(profile.model(0x7f), None);
    }

    #[test]
    fn profile_serializes_losslessly() {
        let profile = ModelProfile::i1pro();
        let json = serde_json::to_string(&profile).unwrap();
        let parsed: ModelProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, profile);
    }

    #[test]
    fn older_profiles_get_resync_defaults() {
        let mut value = serde_json::to_value(ModelProfile::i1pro()).unwrap();
        value["opcodes"].as_object_mut().unwrap().remove("abort");
        value.as_object_mut().unwrap().remove("drain_quiet_ms");
        let parsed: ModelProfile = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.opcodes.abort, 0xce);
        assert_eq!(parsed.drain_quiet_ms, 100);
    }

    #[test]
    fn rejects_inverted_limits() {
        let mut profile = ModelProfile::i1pro();
        profile.limits.low = 0.95;
        assert!(profile.validate().is_err());
    }
}
