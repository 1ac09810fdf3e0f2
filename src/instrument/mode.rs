//! Mode resolution.
//!
//! Callers ask for a measurement in abstract terms (illumination/geometry ×
//! sub-mode). [`resolve`] turns that into a concrete [`DeviceMode`] through a
//! single decision table, checking the capability bit each entry needs before
//! the device is touched. Adding a variant is a table edit.

use crate::error::{InstError, InstResult};
use crate::instrument::capabilities::{Capabilities, CapabilitySet};
use crate::instrument::codes::DeviceCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Illumination / geometry selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Illumination {
    /// Light reflected off the sample
    Reflection,
    /// Light through the sample
    Transmission,
    /// Light emitted by the sample
    Emission,
}

/// Sub-mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubMode {
    /// One stationary reading
    Spot,
    /// Patches read in one sweep
    Strip,
    /// Ambient light through the diffuser
    Ambient,
    /// Flash energy through the diffuser
    AmbientFlash,
    /// Display or monitor
    Display,
    /// Illuminant spectrum
    Illuminant,
}

/// Abstract measurement-mode request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRequest {
    /// Illumination / geometry
    pub illumination: Illumination,
    /// Sub-mode within the illumination
    pub sub_mode: SubMode,
    /// Whether spectral output is wanted
    pub spectral: bool,
}

impl ModeRequest {
    /// Request with spectral output.
    pub fn spectral(illumination: Illumination, sub_mode: SubMode) -> Self {
        Self {
            illumination,
            sub_mode,
            spectral: true,
        }
    }

    /// Request with colorimetric output only.
    pub fn colorimetric(illumination: Illumination, sub_mode: SubMode) -> Self {
        Self {
            illumination,
            sub_mode,
            spectral: false,
        }
    }
}

/// Concrete device operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeviceMode {
    /// Reflective spot
    ReflectiveSpot = 0,
    /// Reflective strip scan
    ReflectiveScan = 1,
    /// Transmissive spot
    TransmissiveSpot = 2,
    /// Transmissive strip scan
    TransmissiveScan = 3,
    /// Emissive spot
    EmissiveSpot = 4,
    /// Emissive strip scan
    EmissiveScan = 5,
    /// Display spot
    DisplaySpot = 6,
    /// Ambient spot
    AmbientSpot = 7,
    /// Ambient flash capture
    AmbientFlash = 8,
}

impl DeviceMode {
    /// Mode byte sent to the device.
    pub fn wire_code(self) -> u8 {
        self as u8
    }

    /// Strip/scan modes read a variable number of frames.
    pub fn is_scan(self) -> bool {
        matches!(self, Self::ReflectiveScan | Self::TransmissiveScan | Self::EmissiveScan)
    }

    /// Reflective modes use the instrument's own lamp.
    pub fn is_reflective(self) -> bool {
        matches!(self, Self::ReflectiveSpot | Self::ReflectiveScan)
    }

    /// Transmissive modes measure against an external light table.
    pub fn is_transmissive(self) -> bool {
        matches!(self, Self::TransmissiveSpot | Self::TransmissiveScan)
    }

    /// Emissive modes (including display and ambient) measure light sources.
    pub fn is_emissive(self) -> bool {
        !self.is_reflective() && !self.is_transmissive()
    }

    /// Flash capture mode.
    pub fn is_flash(self) -> bool {
        self == Self::AmbientFlash
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReflectiveSpot => "reflective spot",
            Self::ReflectiveScan => "reflective scan",
            Self::TransmissiveSpot => "transmissive spot",
            Self::TransmissiveScan => "transmissive scan",
            Self::EmissiveSpot => "emissive spot",
            Self::EmissiveScan => "emissive scan",
            Self::DisplaySpot => "display spot",
            Self::AmbientSpot => "ambient spot",
            Self::AmbientFlash => "ambient flash",
        };
        f.write_str(name)
    }
}

/// A resolved mode, as stored by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingMode {
    /// Concrete device mode
    pub device: DeviceMode,
    /// Whether readings carry spectral data
    pub spectral: bool,
}

struct ModeEntry {
    illumination: Illumination,
    sub_mode: SubMode,
    device: DeviceMode,
    requires: Capabilities,
}

const fn entry(
    illumination: Illumination,
    sub_mode: SubMode,
    device: DeviceMode,
    requires: Capabilities,
) -> ModeEntry {
    ModeEntry {
        illumination,
        sub_mode,
        device,
        requires,
    }
}

use Illumination::{Emission, Reflection, Transmission};

/// Every legal (illumination, sub-mode) pair. Anything absent is unsupported.
static MODE_TABLE: &[ModeEntry] = &[
    entry(Reflection, SubMode::Spot, DeviceMode::ReflectiveSpot, Capabilities::REF_SPOT),
    entry(Reflection, SubMode::Strip, DeviceMode::ReflectiveScan, Capabilities::REF_STRIP),
    entry(Transmission, SubMode::Spot, DeviceMode::TransmissiveSpot, Capabilities::TRANS_SPOT),
    entry(Transmission, SubMode::Strip, DeviceMode::TransmissiveScan, Capabilities::TRANS_STRIP),
    entry(Emission, SubMode::Display, DeviceMode::DisplaySpot, Capabilities::EMIS_DISP),
    entry(Emission, SubMode::Spot, DeviceMode::EmissiveSpot, Capabilities::EMIS_SPOT),
    entry(Emission, SubMode::Illuminant, DeviceMode::EmissiveSpot, Capabilities::EMIS_ILLUM),
    entry(Emission, SubMode::Strip, DeviceMode::EmissiveScan, Capabilities::EMIS_STRIP),
    entry(Emission, SubMode::Ambient, DeviceMode::AmbientSpot, Capabilities::EMIS_AMBIENT),
    entry(
        Emission,
        SubMode::AmbientFlash,
        DeviceMode::AmbientFlash,
        Capabilities::EMIS_AMBIENT_FLASH,
    ),
];

/// Resolve an abstract request against the instrument's capabilities.
///
/// Pure: no device I/O. Fails with `unsupported` when the pair is not in the
/// table, when the entry's capability bit is absent, or when spectral output
/// is requested from an instrument without it.
pub fn resolve(request: ModeRequest, caps: &CapabilitySet) -> InstResult<OperatingMode> {
    let entry = MODE_TABLE
        .iter()
        .find(|e| e.illumination == request.illumination && e.sub_mode == request.sub_mode)
        .ok_or_else(|| {
            InstError::with_detail(
                DeviceCode::UNSUPPORTED,
                format!("{:?}/{:?} is not a measurement mode", request.illumination, request.sub_mode),
            )
        })?;

    if !caps.primary.contains(entry.requires) {
        return Err(InstError::with_detail(
            DeviceCode::UNSUPPORTED,
            format!("instrument lacks {:?} for {}", entry.requires, entry.device),
        ));
    }

    if request.spectral && !caps.primary.contains(Capabilities::SPECTRAL) {
        return Err(InstError::with_detail(
            DeviceCode::UNSUPPORTED,
            "instrument has no spectral output",
        ));
    }

    Ok(OperatingMode {
        device: entry.device,
        spectral: request.spectral,
    })
}
