//! Instrument session engine
//!
//! Everything between the public [`Session`] operations and the device
//! backends: capability resolution, mode resolution, the calibration state
//! machine, the measurement pipeline, triggering and the error classifier.
//!
//! # Modules
//!
//! - [`codes`] - device error-code namespace and classifier
//! - [`capabilities`] - primary and extended capability bitmasks
//! - [`mode`] - abstract mode requests and the mode decision table
//! - [`calibration`] - calibration record and state machine
//! - [`measurement`] - frame validation and reduction into readings
//! - [`options`] - typed session options
//! - [`trigger`] - user keys and measurement triggering
//! - [`session`] - the session object

pub mod calibration;
pub mod capabilities;
pub mod codes;
pub mod measurement;
pub mod mode;
pub mod options;
pub mod session;
pub mod trigger;

pub use calibration::{CalCondition, CalNeed, CalTarget, CalibrationState, CalibrationType};
pub use capabilities::{Capabilities, CapabilitySet, ExtendedCapabilities};
pub use codes::{DeviceCode, ErrorCategory};
pub use measurement::{PassInfo, Reading, SpectralConverter, Spectrum, StripGeometry};
pub use mode::{DeviceMode, Illumination, ModeRequest, OperatingMode, SubMode};
pub use options::{InstOption, TriggerReturn, TriggerStyle};
pub use session::Session;
pub use trigger::{UserKey, UserKeys};
