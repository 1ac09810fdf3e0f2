//! Instrument capability bitmasks.
//!
//! Capabilities are computed once, during `initialize()`, from the sub-model
//! identity plus the feature probes the device reports. Afterwards they are
//! read-only: the session hands out copies and never mutates them.

use crate::hardware::{FeatureProbe, InstrumentModel};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Primary capabilities: measurement geometries and output kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        /// Reflective spot measurement
        const REF_SPOT = 1 << 0;
        /// Reflective strip (scan) measurement
        const REF_STRIP = 1 << 1;
        /// Transmissive spot measurement
        const TRANS_SPOT = 1 << 2;
        /// Transmissive strip (scan) measurement
        const TRANS_STRIP = 1 << 3;
        /// Emissive spot measurement
        const EMIS_SPOT = 1 << 4;
        /// Emissive strip (scan) measurement
        const EMIS_STRIP = 1 << 5;
        /// Display measurement
        const EMIS_DISP = 1 << 6;
        /// Illuminant (light source) measurement
        const EMIS_ILLUM = 1 << 7;
        /// Ambient light measurement
        const EMIS_AMBIENT = 1 << 8;
        /// Ambient flash measurement
        const EMIS_AMBIENT_FLASH = 1 << 9;
        /// Colorimetric output
        const COLORIMETER = 1 << 10;
        /// Spectral output
        const SPECTRAL = 1 << 11;
        /// High resolution spectral mode
        const HIGH_RES = 1 << 12;
    }
}

bitflags! {
    /// Extended capabilities: calibration types, triggering, scanning.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ExtendedCapabilities: u32 {
        /// Reflective white calibration
        const CAL_REF_WHITE = 1 << 0;
        /// Transmissive white calibration
        const CAL_TRANS_WHITE = 1 << 1;
        /// Display integration time calibration
        const CAL_DISP_INT_TIME = 1 << 2;
        /// Program triggered measurement
        const PROG_TRIG = 1 << 3;
        /// Keyboard triggered measurement
        const KEYB_TRIG = 1 << 4;
        /// Keyboard or instrument switch triggered measurement
        const KEYB_SWITCH_TRIG = 1 << 5;
        /// Strips may be scanned in either direction
        const BIDI_SCAN = 1 << 6;
        /// Scan tolerance is adjustable
        const HAS_SCAN_TOLL = 1 << 7;
        /// Instrument gives no audible/visual feedback
        const NO_FEEDBACK = 1 << 8;
    }
}

/// Both capability sets, as computed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Primary capabilities
    pub primary: Capabilities,
    /// Extended capabilities
    pub extended: ExtendedCapabilities,
}

impl CapabilitySet {
    /// Derive the capability set for a sub-model and its probed features.
    ///
    /// Every model in the family measures emissively and transmissively (the
    /// latter on a light table). Reflective measurement and reflective white
    /// calibration need the model with the built-in illuminant.
    pub fn resolve(model: InstrumentModel, probe: FeatureProbe) -> Self {
        let mut primary = Capabilities::EMIS_SPOT
            | Capabilities::EMIS_DISP
            | Capabilities::EMIS_ILLUM
            | Capabilities::TRANS_SPOT
            | Capabilities::TRANS_STRIP
            | Capabilities::EMIS_STRIP
            | Capabilities::COLORIMETER
            | Capabilities::SPECTRAL;

        let mut extended = ExtendedCapabilities::CAL_TRANS_WHITE
            | ExtendedCapabilities::CAL_DISP_INT_TIME
            | ExtendedCapabilities::PROG_TRIG
            | ExtendedCapabilities::KEYB_TRIG
            | ExtendedCapabilities::KEYB_SWITCH_TRIG
            | ExtendedCapabilities::BIDI_SCAN
            | ExtendedCapabilities::HAS_SCAN_TOLL
            | ExtendedCapabilities::NO_FEEDBACK;

        if model == InstrumentModel::I1Pro {
            primary |= Capabilities::REF_SPOT | Capabilities::REF_STRIP;
            extended |= ExtendedCapabilities::CAL_REF_WHITE;
        }

        if probe.high_res {
            primary |= Capabilities::HIGH_RES;
        }

        if probe.ambient {
            primary |= Capabilities::EMIS_AMBIENT | Capabilities::EMIS_AMBIENT_FLASH;
        }

        Self { primary, extended }
    }
}
