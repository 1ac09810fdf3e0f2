//! Custom error types for the driver.
//!
//! This module defines the error surface of the session engine. Using the
//! `thiserror` crate, it provides a centralized and consistent way to report
//! failures, from transport problems to reading-quality issues on the
//! instrument.
//!
//! ## Error Hierarchy
//!
//! - **`InstError`**: The only error that crosses the session boundary. It pairs
//!   an abstract [`ErrorCategory`] with the originating [`DeviceCode`] so that
//!   callers branch on the category while diagnostics keep the raw code.
//! - **`MisreadReason`**: A typed view of the sub-reason behind a `misread`
//!   error (saturation, too few patches, ...), derived from the device code.
//! - **`TransportError`**: Failures reported by a transport adapter. These are
//!   converted into classified errors before they leave the session.
//!
//! Configuration errors live next to the configuration loader in
//! [`crate::config::ConfigError`].

use crate::instrument::codes::{DeviceCode, ErrorCategory};
use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the classified error type.
pub type InstResult<T> = std::result::Result<T, InstError>;

/// A classified instrument error: abstract category plus originating device code.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct InstError {
    /// Abstract category callers branch on
    pub category: ErrorCategory,
    /// Device code the category was derived from
    pub code: DeviceCode,
    /// Optional context (port name, transport message, ...)
    pub detail: Option<String>,
}

impl InstError {
    /// Classify a device code.
    pub fn from_code(code: DeviceCode) -> Self {
        Self {
            category: code.category(),
            code,
            detail: None,
        }
    }

    /// Classify a device code and attach context.
    pub fn with_detail(code: DeviceCode, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::from_code(code)
        }
    }

    /// Fixed human-readable text for the underlying code.
    pub fn message(&self) -> &'static str {
        self.code.message()
    }

    /// Sub-reason for `misread` errors, `None` for every other category.
    pub fn misread_reason(&self) -> Option<MisreadReason> {
        if self.category == ErrorCategory::Misread {
            MisreadReason::from_code(self.code)
        } else {
            None
        }
    }

    /// True when the error means communications are not (or no longer) established.
    pub fn is_no_comms(&self) -> bool {
        self.code == DeviceCode::INT_NO_COMS
    }
}

impl fmt::Display for InstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (code {})", self.category, self.message(), self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

impl From<DeviceCode> for InstError {
    fn from(code: DeviceCode) -> Self {
        Self::from_code(code)
    }
}

/// Why a reading (or calibration reading) was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MisreadReason {
    /// Dark readings disagree or are too bright
    DarkInconsistent,
    /// Sensor saturated
    SensorSaturated,
    /// No usable dark reference
    DarkNotValid,
    /// White readings disagree
    WhiteInconsistent,
    /// White tile reading out of range
    WhiteReferenceError,
    /// Too little light
    LightTooLow,
    /// Too much light
    LightTooHigh,
    /// Fewer frames than the measurement needs
    ShortMeasurement,
    /// Frames of one reading disagree
    ReadingInconsistent,
    /// Transmission white outside its range
    TransmissionWhiteRange,
    /// Strip scan found fewer patches than asked for
    NotEnoughPatches,
    /// Strip scan found more patches than asked for
    TooManyPatches,
    /// A patch had too few steady frames
    NotEnoughSamples,
    /// No flash found in the capture
    NoFlashes,
    /// No ambient level before the flash
    NoAmbientBeforeFlash,
}

impl MisreadReason {
    /// Sub-reason for a reading-group device code.
    pub fn from_code(code: DeviceCode) -> Option<Self> {
        let reason = match code {
            DeviceCode::RD_DARKREADINCONS => Self::DarkInconsistent,
            DeviceCode::RD_SENSORSATURATED => Self::SensorSaturated,
            DeviceCode::RD_DARKNOTVALID => Self::DarkNotValid,
            DeviceCode::RD_WHITEREADINCONS => Self::WhiteInconsistent,
            DeviceCode::RD_WHITEREFERROR => Self::WhiteReferenceError,
            DeviceCode::RD_LIGHTTOOLOW => Self::LightTooLow,
            DeviceCode::RD_LIGHTTOOHIGH => Self::LightTooHigh,
            DeviceCode::RD_SHORTMEAS => Self::ShortMeasurement,
            DeviceCode::RD_READINCONS => Self::ReadingInconsistent,
            DeviceCode::RD_TRANSWHITERANGE => Self::TransmissionWhiteRange,
            DeviceCode::RD_NOTENOUGHPATCHES => Self::NotEnoughPatches,
            DeviceCode::RD_TOOMANYPATCHES => Self::TooManyPatches,
            DeviceCode::RD_NOTENOUGHSAMPLES => Self::NotEnoughSamples,
            DeviceCode::RD_NOFLASHES => Self::NoFlashes,
            DeviceCode::RD_NOAMBB4FLASHES => Self::NoAmbientBeforeFlash,
            _ => return None,
        };
        Some(reason)
    }
}

/// Errors reported by a transport adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The port could not be opened
    #[error("Failed to open port '{port}': {reason}")]
    Open {
        /// Port that was asked for
        port: String,
        /// What went wrong
        reason: String,
    },

    /// Operation on a closed port
    #[error("Port not open")]
    NotOpen,

    /// Read or write failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Nothing arrived in time (ms)
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The reply stopped early
    #[error("Short read: expected {expected} bytes, got {got}")]
    ShortRead {
        /// Bytes wanted
        expected: usize,
        /// Bytes received
        got: usize,
    },
}

impl TransportError {
    /// True when the link itself is gone, as opposed to a slow or short reply.
    pub fn is_link_loss(&self) -> bool {
        matches!(self, Self::Io(_) | Self::NotOpen)
    }

    /// Classified error for a failure while exchanging ordinary messages.
    pub fn into_inst_error(self) -> InstError {
        let code = match self {
            Self::ShortRead { .. } => DeviceCode::HW_ME_SHORTREAD,
            _ => DeviceCode::COMS_FAIL,
        };
        InstError::with_detail(code, self.to_string())
    }
}
