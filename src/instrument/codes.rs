//! Device error-code namespace and the error classifier.
//!
//! Instruments report failures as numeric codes in one flat namespace. Those
//! codes never leave the session engine on their own: every code is passed
//! through [`classify`] to obtain an abstract [`ErrorCategory`], and through
//! [`message`] to obtain a fixed human-readable description.
//!
//! Both mappings are static tables rather than scattered conditionals, so the
//! totality of the classifier can be checked by iterating the tables.
//!
//! ## Namespace layout
//!
//! | Range         | Group                                   |
//! |---------------|-----------------------------------------|
//! | `0x00`        | no error                                |
//! | `0x01..=0x0b` | EEPROM data errors                      |
//! | `0x10..=0x14` | hardware errors                         |
//! | `0x30..=0x3f` | reading errors                          |
//! | `0x50..=0x6a` | internal software errors                |
//! | `0x70..=0x79` | general errors and user interaction     |

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Abstract error category exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No error
    Ok,
    /// Communications with the instrument failed
    ComsFail,
    /// The attached device is not a model this driver handles
    UnknownModel,
    /// The device replied with something that did not parse
    ProtocolError,
    /// The user hit the abort key
    UserAbort,
    /// The user hit the terminate key
    UserTerminate,
    /// The user hit the trigger key
    UserTrigger,
    /// The user hit a command key
    UserCommand,
    /// The request is not supported by this instrument or mode
    Unsupported,
    /// Calibration must be retried once the physical setup is changed
    CalSetupRequired,
    /// Instrument hardware failure
    HardwareFail,
    /// A reading was taken but is not usable
    Misread,
    /// The current mode needs calibration first
    NeedsCal,
    /// Software defect inside the driver
    InternalError,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// True for the user-interaction categories (abort, terminate, trigger, command).
    pub fn is_user_interaction(self) -> bool {
        matches!(
            self,
            Self::UserAbort | Self::UserTerminate | Self::UserTrigger | Self::UserCommand
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::ComsFail => "communications failure",
            Self::UnknownModel => "unknown model",
            Self::ProtocolError => "protocol error",
            Self::UserAbort => "user abort",
            Self::UserTerminate => "user terminate",
            Self::UserTrigger => "user trigger",
            Self::UserCommand => "user command",
            Self::Unsupported => "unsupported",
            Self::CalSetupRequired => "calibration setup required",
            Self::HardwareFail => "hardware failure",
            Self::Misread => "misread",
            Self::NeedsCal => "needs calibration",
            Self::InternalError => "internal error",
            Self::Other => "other error",
        };
        f.write_str(name)
    }
}

/// Raw device-specific error code.
///
/// A newtype over `u16` so that codes the driver has never heard of can still
/// be carried and classified (they fall into [`ErrorCategory::Other`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceCode(pub u16);

// Code names mirror the device documentation; the table below is the documentation.
#[allow(missing_docs)]
impl DeviceCode {
    pub const OK: Self = Self(0x00);

    // EEPROM data
    pub const DATA_COUNT: Self = Self(0x01);
    pub const DATA_BUFSIZE: Self = Self(0x02);
    pub const DATA_MAKE_KEY: Self = Self(0x03);
    pub const DATA_MEMORY: Self = Self(0x04);
    pub const DATA_KEYNOTFOUND: Self = Self(0x05);
    pub const DATA_WRONGTYPE: Self = Self(0x06);
    pub const DATA_KEY_CORRUPT: Self = Self(0x07);
    pub const DATA_KEY_COUNT: Self = Self(0x08);
    pub const DATA_KEY_UNKNOWN: Self = Self(0x09);
    pub const DATA_KEY_MEMRANGE: Self = Self(0x0a);
    pub const DATA_KEY_ENDMARK: Self = Self(0x0b);

    // Hardware
    pub const HW_HIGHPOWERFAIL: Self = Self(0x10);
    pub const HW_EE_SHORTREAD: Self = Self(0x11);
    pub const HW_ME_SHORTREAD: Self = Self(0x12);
    pub const HW_ME_ODDREAD: Self = Self(0x13);
    pub const HW_CALIBINFO: Self = Self(0x14);

    // Reading
    pub const RD_DARKREADINCONS: Self = Self(0x30);
    pub const RD_SENSORSATURATED: Self = Self(0x31);
    pub const RD_DARKNOTVALID: Self = Self(0x32);
    pub const RD_NEEDS_CAL: Self = Self(0x33);
    pub const RD_WHITEREADINCONS: Self = Self(0x34);
    pub const RD_WHITEREFERROR: Self = Self(0x35);
    pub const RD_LIGHTTOOLOW: Self = Self(0x36);
    pub const RD_LIGHTTOOHIGH: Self = Self(0x37);
    pub const RD_SHORTMEAS: Self = Self(0x38);
    pub const RD_READINCONS: Self = Self(0x39);
    pub const RD_TRANSWHITERANGE: Self = Self(0x3a);
    pub const RD_NOTENOUGHPATCHES: Self = Self(0x3b);
    pub const RD_TOOMANYPATCHES: Self = Self(0x3c);
    pub const RD_NOTENOUGHSAMPLES: Self = Self(0x3d);
    pub const RD_NOFLASHES: Self = Self(0x3e);
    pub const RD_NOAMBB4FLASHES: Self = Self(0x3f);

    // Internal
    pub const INT_NO_COMS: Self = Self(0x50);
    pub const INT_NOT_INITIALISED: Self = Self(0x51);
    pub const INT_EETOOBIG: Self = Self(0x52);
    pub const INT_ODDREADBUF: Self = Self(0x53);
    pub const INT_SMALLREADBUF: Self = Self(0x54);
    pub const INT_INTTOOBIG: Self = Self(0x55);
    pub const INT_INTTOOSMALL: Self = Self(0x56);
    pub const INT_ILLEGALMODE: Self = Self(0x57);
    pub const INT_ZEROMEASURES: Self = Self(0x58);
    pub const INT_WRONGPATCHES: Self = Self(0x59);
    pub const INT_MEASBUFFTOOSMALL: Self = Self(0x5a);
    pub const INT_NOTIMPLEMENTED: Self = Self(0x5b);
    pub const INT_NOTCALIBRATED: Self = Self(0x5c);
    pub const INT_NOINTERPDARK: Self = Self(0x5d);
    pub const INT_THREADFAILED: Self = Self(0x5e);
    pub const INT_BUTTONTIMEOUT: Self = Self(0x5f);
    pub const INT_CIECONVFAIL: Self = Self(0x60);
    pub const INT_PREP_LOG_DATA: Self = Self(0x61);
    pub const INT_MALLOC: Self = Self(0x62);
    pub const INT_CREATE_EEPROM_STORE: Self = Self(0x63);
    pub const INT_SAVE_SUBT_MODE: Self = Self(0x64);
    pub const INT_NO_CAL_TO_SAVE: Self = Self(0x65);
    pub const INT_EEPROM_DATA_MISSING: Self = Self(0x66);
    pub const INT_NEW_RSPL_FAILED: Self = Self(0x67);
    pub const INT_CAL_SAVE: Self = Self(0x68);
    pub const INT_CAL_RESTORE: Self = Self(0x69);
    pub const INT_ADARK_INVALID: Self = Self(0x6a);

    // General and user interaction
    pub const INTERNAL_ERROR: Self = Self(0x70);
    pub const COMS_FAIL: Self = Self(0x71);
    pub const UNKNOWN_MODEL: Self = Self(0x72);
    pub const DATA_PARSE_ERROR: Self = Self(0x73);
    pub const USER_ABORT: Self = Self(0x74);
    pub const USER_TERM: Self = Self(0x75);
    pub const USER_TRIG: Self = Self(0x76);
    pub const USER_CMND: Self = Self(0x77);
    pub const UNSUPPORTED: Self = Self(0x78);
    pub const CAL_SETUP: Self = Self(0x79);

    /// Every code the driver defines, in namespace order.
    pub const ALL: &'static [DeviceCode] = &[
        Self::OK,
        Self::DATA_COUNT,
        Self::DATA_BUFSIZE,
        Self::DATA_MAKE_KEY,
        Self::DATA_MEMORY,
        Self::DATA_KEYNOTFOUND,
        Self::DATA_WRONGTYPE,
        Self::DATA_KEY_CORRUPT,
        Self::DATA_KEY_COUNT,
        Self::DATA_KEY_UNKNOWN,
        Self::DATA_KEY_MEMRANGE,
        Self::DATA_KEY_ENDMARK,
        Self::HW_HIGHPOWERFAIL,
        Self::HW_EE_SHORTREAD,
        Self::HW_ME_SHORTREAD,
        Self::HW_ME_ODDREAD,
        Self::HW_CALIBINFO,
        Self::RD_DARKREADINCONS,
        Self::RD_SENSORSATURATED,
        Self::RD_DARKNOTVALID,
        Self::RD_NEEDS_CAL,
        Self::RD_WHITEREADINCONS,
        Self::RD_WHITEREFERROR,
        Self::RD_LIGHTTOOLOW,
        Self::RD_LIGHTTOOHIGH,
        Self::RD_SHORTMEAS,
        Self::RD_READINCONS,
        Self::RD_TRANSWHITERANGE,
        Self::RD_NOTENOUGHPATCHES,
        Self::RD_TOOMANYPATCHES,
        Self::RD_NOTENOUGHSAMPLES,
        Self::RD_NOFLASHES,
        Self::RD_NOAMBB4FLASHES,
        Self::INT_NO_COMS,
        Self::INT_NOT_INITIALISED,
        Self::INT_EETOOBIG,
        Self::INT_ODDREADBUF,
        Self::INT_SMALLREADBUF,
        Self::INT_INTTOOBIG,
        Self::INT_INTTOOSMALL,
        Self::INT_ILLEGALMODE,
        Self::INT_ZEROMEASURES,
        Self::INT_WRONGPATCHES,
        Self::INT_MEASBUFFTOOSMALL,
        Self::INT_NOTIMPLEMENTED,
        Self::INT_NOTCALIBRATED,
        Self::INT_NOINTERPDARK,
        Self::INT_THREADFAILED,
        Self::INT_BUTTONTIMEOUT,
        Self::INT_CIECONVFAIL,
        Self::INT_PREP_LOG_DATA,
        Self::INT_MALLOC,
        Self::INT_CREATE_EEPROM_STORE,
        Self::INT_SAVE_SUBT_MODE,
        Self::INT_NO_CAL_TO_SAVE,
        Self::INT_EEPROM_DATA_MISSING,
        Self::INT_NEW_RSPL_FAILED,
        Self::INT_CAL_SAVE,
        Self::INT_CAL_RESTORE,
        Self::INT_ADARK_INVALID,
        Self::INTERNAL_ERROR,
        Self::COMS_FAIL,
        Self::UNKNOWN_MODEL,
        Self::DATA_PARSE_ERROR,
        Self::USER_ABORT,
        Self::USER_TERM,
        Self::USER_TRIG,
        Self::USER_CMND,
        Self::UNSUPPORTED,
        Self::CAL_SETUP,
    ];

    /// Category for this code. See [`classify`].
    pub fn category(self) -> ErrorCategory {
        classify(self)
    }

    /// Human-readable text for this code. See [`message`].
    pub fn message(self) -> &'static str {
        message(self)
    }
}

impl fmt::Display for DeviceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

impl From<u8> for DeviceCode {
    fn from(raw: u8) -> Self {
        Self(u16::from(raw))
    }
}

use ErrorCategory as C;

/// Code to category. Codes missing here classify as [`ErrorCategory::Other`].
///
/// The EEPROM data group, the generic `INTERNAL_ERROR` and the internal codes
/// `INT_NOT_INITIALISED`, `INT_WRONGPATCHES` and `INT_CAL_RESTORE` are
/// intentionally absent.
static CATEGORY_TABLE: &[(DeviceCode, ErrorCategory)] = &[
    (DeviceCode::OK, C::Ok),
    (DeviceCode::COMS_FAIL, C::ComsFail),
    (DeviceCode::UNKNOWN_MODEL, C::UnknownModel),
    (DeviceCode::DATA_PARSE_ERROR, C::ProtocolError),
    (DeviceCode::USER_ABORT, C::UserAbort),
    (DeviceCode::USER_TERM, C::UserTerminate),
    (DeviceCode::USER_TRIG, C::UserTrigger),
    (DeviceCode::USER_CMND, C::UserCommand),
    (DeviceCode::UNSUPPORTED, C::Unsupported),
    (DeviceCode::CAL_SETUP, C::CalSetupRequired),
    (DeviceCode::HW_HIGHPOWERFAIL, C::HardwareFail),
    (DeviceCode::HW_EE_SHORTREAD, C::HardwareFail),
    (DeviceCode::HW_ME_SHORTREAD, C::HardwareFail),
    (DeviceCode::HW_ME_ODDREAD, C::HardwareFail),
    (DeviceCode::HW_CALIBINFO, C::HardwareFail),
    (DeviceCode::RD_DARKREADINCONS, C::Misread),
    (DeviceCode::RD_SENSORSATURATED, C::Misread),
    (DeviceCode::RD_DARKNOTVALID, C::Misread),
    (DeviceCode::RD_WHITEREADINCONS, C::Misread),
    (DeviceCode::RD_WHITEREFERROR, C::Misread),
    (DeviceCode::RD_LIGHTTOOLOW, C::Misread),
    (DeviceCode::RD_LIGHTTOOHIGH, C::Misread),
    (DeviceCode::RD_SHORTMEAS, C::Misread),
    (DeviceCode::RD_READINCONS, C::Misread),
    (DeviceCode::RD_TRANSWHITERANGE, C::Misread),
    (DeviceCode::RD_NOTENOUGHPATCHES, C::Misread),
    (DeviceCode::RD_TOOMANYPATCHES, C::Misread),
    (DeviceCode::RD_NOTENOUGHSAMPLES, C::Misread),
    (DeviceCode::RD_NOFLASHES, C::Misread),
    (DeviceCode::RD_NOAMBB4FLASHES, C::Misread),
    (DeviceCode::RD_NEEDS_CAL, C::NeedsCal),
    (DeviceCode::INT_NO_COMS, C::InternalError),
    (DeviceCode::INT_EETOOBIG, C::InternalError),
    (DeviceCode::INT_ODDREADBUF, C::InternalError),
    (DeviceCode::INT_SMALLREADBUF, C::InternalError),
    (DeviceCode::INT_INTTOOBIG, C::InternalError),
    (DeviceCode::INT_INTTOOSMALL, C::InternalError),
    (DeviceCode::INT_ILLEGALMODE, C::InternalError),
    (DeviceCode::INT_ZEROMEASURES, C::InternalError),
    (DeviceCode::INT_MEASBUFFTOOSMALL, C::InternalError),
    (DeviceCode::INT_NOTIMPLEMENTED, C::InternalError),
    (DeviceCode::INT_NOTCALIBRATED, C::InternalError),
    (DeviceCode::INT_NOINTERPDARK, C::InternalError),
    (DeviceCode::INT_THREADFAILED, C::InternalError),
    (DeviceCode::INT_BUTTONTIMEOUT, C::InternalError),
    (DeviceCode::INT_CIECONVFAIL, C::InternalError),
    (DeviceCode::INT_PREP_LOG_DATA, C::InternalError),
    (DeviceCode::INT_MALLOC, C::InternalError),
    (DeviceCode::INT_CREATE_EEPROM_STORE, C::InternalError),
    (DeviceCode::INT_SAVE_SUBT_MODE, C::InternalError),
    (DeviceCode::INT_NO_CAL_TO_SAVE, C::InternalError),
    (DeviceCode::INT_EEPROM_DATA_MISSING, C::InternalError),
    (DeviceCode::INT_NEW_RSPL_FAILED, C::InternalError),
    (DeviceCode::INT_CAL_SAVE, C::InternalError),
    (DeviceCode::INT_ADARK_INVALID, C::InternalError),
];

/// Code to message. Independent of the category table.
static MESSAGE_TABLE: &[(DeviceCode, &str)] = &[
    (DeviceCode::OK, "No device error"),
    (DeviceCode::INTERNAL_ERROR, "Internal software error"),
    (DeviceCode::COMS_FAIL, "Communications failure"),
    (DeviceCode::UNKNOWN_MODEL, "Not a supported instrument model"),
    (DeviceCode::DATA_PARSE_ERROR, "Data from instrument didn't parse as expected"),
    (DeviceCode::USER_ABORT, "User hit Abort key"),
    (DeviceCode::USER_TERM, "User hit Terminate key"),
    (DeviceCode::USER_TRIG, "User hit Trigger key"),
    (DeviceCode::USER_CMND, "User hit a Command key"),
    (DeviceCode::UNSUPPORTED, "Unsupported function"),
    (DeviceCode::CAL_SETUP, "Calibration retry with correct setup is needed"),
    (DeviceCode::DATA_COUNT, "EEProm data count unexpectedly small"),
    (DeviceCode::DATA_BUFSIZE, "EEProm data buffer too small"),
    (DeviceCode::DATA_MAKE_KEY, "EEProm data creating key failed"),
    (DeviceCode::DATA_MEMORY, "EEProm memory alloc failure"),
    (DeviceCode::DATA_KEYNOTFOUND, "EEProm key value wasn't found"),
    (DeviceCode::DATA_WRONGTYPE, "EEProm key is the wrong type"),
    (DeviceCode::DATA_KEY_CORRUPT, "EEProm key table seems to be corrupted"),
    (DeviceCode::DATA_KEY_COUNT, "EEProm key table count is too big or small"),
    (DeviceCode::DATA_KEY_UNKNOWN, "EEProm unknown key type"),
    (DeviceCode::DATA_KEY_MEMRANGE, "EEProm key data is out of range of EEProm"),
    (DeviceCode::DATA_KEY_ENDMARK, "EEProm end section marker was missing"),
    (DeviceCode::HW_HIGHPOWERFAIL, "Failed to switch to high power mode"),
    (DeviceCode::HW_EE_SHORTREAD, "Read less bytes for EEProm read than expected"),
    (DeviceCode::HW_ME_SHORTREAD, "Read less bytes for measurement read than expected"),
    (DeviceCode::HW_ME_ODDREAD, "Read a number of bytes not a multiple of the frame size"),
    (DeviceCode::HW_CALIBINFO, "Instrument calibration info is missing or corrupted"),
    (DeviceCode::RD_DARKREADINCONS, "Dark calibration reading is inconsistent"),
    (DeviceCode::RD_SENSORSATURATED, "Sensor is saturated"),
    (DeviceCode::RD_DARKNOTVALID, "Dark reading is not valid (too light)"),
    (DeviceCode::RD_NEEDS_CAL, "Mode needs calibration"),
    (DeviceCode::RD_WHITEREADINCONS, "White calibration reading is inconsistent"),
    (DeviceCode::RD_WHITEREFERROR, "White reference reading error"),
    (DeviceCode::RD_LIGHTTOOLOW, "Light level is too low"),
    (DeviceCode::RD_LIGHTTOOHIGH, "Light level is too high"),
    (DeviceCode::RD_SHORTMEAS, "Reading is too short"),
    (DeviceCode::RD_READINCONS, "Reading is inconsistent"),
    (DeviceCode::RD_TRANSWHITERANGE, "Transmission white reference is out of range"),
    (DeviceCode::RD_NOTENOUGHPATCHES, "Not enough patches"),
    (DeviceCode::RD_TOOMANYPATCHES, "Too many patches"),
    (DeviceCode::RD_NOTENOUGHSAMPLES, "Not enough samples per patch"),
    (DeviceCode::RD_NOFLASHES, "No flashes recognized"),
    (DeviceCode::RD_NOAMBB4FLASHES, "No ambient found before first flash"),
    (DeviceCode::INT_NO_COMS, "Communications hasn't been established"),
    (DeviceCode::INT_NOT_INITIALISED, "Instrument hasn't been initialised"),
    (DeviceCode::INT_EETOOBIG, "Read of EEProm is too big (> 65536)"),
    (DeviceCode::INT_ODDREADBUF, "Measurement read buffer is not a multiple of the frame size"),
    (DeviceCode::INT_SMALLREADBUF, "Measurement read buffer is too small for initial measurement"),
    (DeviceCode::INT_INTTOOBIG, "Integration time is too big"),
    (DeviceCode::INT_INTTOOSMALL, "Integration time is too small"),
    (DeviceCode::INT_ILLEGALMODE, "Illegal measurement mode selected"),
    (DeviceCode::INT_ZEROMEASURES, "Number of measurements requested is zero"),
    (DeviceCode::INT_WRONGPATCHES, "Number of patches to match is wrong"),
    (DeviceCode::INT_MEASBUFFTOOSMALL, "Measurement read buffer is too small"),
    (DeviceCode::INT_NOTIMPLEMENTED, "Support not implemented"),
    (DeviceCode::INT_NOTCALIBRATED, "Unexpectedly invalid calibration"),
    (DeviceCode::INT_NOINTERPDARK, "Need interpolated dark and don't have it"),
    (DeviceCode::INT_THREADFAILED, "Creation of background task failed"),
    (DeviceCode::INT_BUTTONTIMEOUT, "Button status read timed out"),
    (DeviceCode::INT_CIECONVFAIL, "Creating spectral to CIE converter failed"),
    (DeviceCode::INT_PREP_LOG_DATA, "Error in preparing log data"),
    (DeviceCode::INT_MALLOC, "Error in allocating memory"),
    (DeviceCode::INT_CREATE_EEPROM_STORE, "Error in creating EEProm store"),
    (DeviceCode::INT_SAVE_SUBT_MODE, "Can't save calibration if in subtractive mode"),
    (DeviceCode::INT_NO_CAL_TO_SAVE, "No calibration data to save"),
    (DeviceCode::INT_EEPROM_DATA_MISSING, "EEProm data is missing"),
    (DeviceCode::INT_NEW_RSPL_FAILED, "Creating interpolation object failed"),
    (DeviceCode::INT_CAL_SAVE, "Unable to save calibration to file"),
    (DeviceCode::INT_CAL_RESTORE, "Unable to restore calibration from file"),
    (DeviceCode::INT_ADARK_INVALID, "Adaptive dark calibration is invalid"),
];

static CATEGORY_INDEX: Lazy<HashMap<DeviceCode, ErrorCategory>> =
    Lazy::new(|| CATEGORY_TABLE.iter().copied().collect());

static MESSAGE_INDEX: Lazy<HashMap<DeviceCode, &'static str>> =
    Lazy::new(|| MESSAGE_TABLE.iter().copied().collect());

/// Message returned for codes outside the namespace.
pub const UNKNOWN_CODE_MESSAGE: &str = "Unknown error code";

/// Map a device code to its abstract category.
///
/// Total over every `u16`: unmapped codes are [`ErrorCategory::Other`].
pub fn classify(code: DeviceCode) -> ErrorCategory {
    CATEGORY_INDEX.get(&code).copied().unwrap_or(ErrorCategory::Other)
}

/// Map a device code to a fixed human-readable message.
///
/// Total over every `u16`: codes outside the namespace yield
/// [`UNKNOWN_CODE_MESSAGE`].
pub fn message(code: DeviceCode) -> &'static str {
    MESSAGE_INDEX.get(&code).copied().unwrap_or(UNKNOWN_CODE_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_defined_code_has_a_message() {
        for code in DeviceCode::ALL {
            let text = message(*code);
            assert!(!text.is_empty());
            assert_ne!(text, UNKNOWN_CODE_MESSAGE, "no message for {code}");
        }
    }

    #[test]
    fn tables_only_name_defined_codes() {
        let defined: HashSet<_> = DeviceCode::ALL.iter().copied().collect();
        assert_eq!(defined.len(), DeviceCode::ALL.len(), "duplicate code value");

        for (code, _) in CATEGORY_TABLE {
            assert!(defined.contains(code), "category table names undefined {code}");
        }
        for (code, _) in MESSAGE_TABLE {
            assert!(defined.contains(code), "message table names undefined {code}");
        }
        assert_eq!(MESSAGE_TABLE.len(), DeviceCode::ALL.len());
        assert_eq!(MESSAGE_INDEX.len(), MESSAGE_TABLE.len());
        assert_eq!(CATEGORY_INDEX.len(), CATEGORY_TABLE.len());
    }

    #[test]
    fn classifier_is_total_over_raw_codes() {
        for raw in 0..=u16::MAX {
            let code = DeviceCode(raw);
            let _ = classify(code);
            assert!(!message(code).is_empty());
        }
        assert_eq!(classify(DeviceCode(0xfff0)), ErrorCategory::Other);
        assert_eq!(message(DeviceCode(0xfff0)), UNKNOWN_CODE_MESSAGE);
    }

    #[test]
    fn groups_classify_as_expected() {
        type D = DeviceCode;
        let groups: &[(&[DeviceCode], ErrorCategory)] = &[
            (&[D::OK], ErrorCategory::Ok),
            (&[D::COMS_FAIL], ErrorCategory::ComsFail),
            (&[D::UNKNOWN_MODEL], ErrorCategory::UnknownModel),
            (&[D::DATA_PARSE_ERROR], ErrorCategory::ProtocolError),
            (&[D::USER_ABORT], ErrorCategory::UserAbort),
            (&[D::USER_TERM], ErrorCategory::UserTerminate),
            (&[D::USER_TRIG], ErrorCategory::UserTrigger),
            (&[D::USER_CMND], ErrorCategory::UserCommand),
            (&[D::UNSUPPORTED], ErrorCategory::Unsupported),
            (&[D::CAL_SETUP], ErrorCategory::CalSetupRequired),
            (
                &[
                    D::HW_HIGHPOWERFAIL,
                    D::HW_EE_SHORTREAD,
                    D::HW_ME_SHORTREAD,
                    D::HW_ME_ODDREAD,
                    D::HW_CALIBINFO,
                ],
                ErrorCategory::HardwareFail,
            ),
            (
                &[
                    D::RD_DARKREADINCONS,
                    D::RD_SENSORSATURATED,
                    D::RD_DARKNOTVALID,
                    D::RD_WHITEREADINCONS,
                    D::RD_WHITEREFERROR,
                    D::RD_LIGHTTOOLOW,
                    D::RD_LIGHTTOOHIGH,
                    D::RD_SHORTMEAS,
                    D::RD_READINCONS,
                    D::RD_TRANSWHITERANGE,
                    D::RD_NOTENOUGHPATCHES,
                    D::RD_TOOMANYPATCHES,
                    D::RD_NOTENOUGHSAMPLES,
                    D::RD_NOFLASHES,
                    D::RD_NOAMBB4FLASHES,
                ],
                ErrorCategory::Misread,
            ),
            (&[D::RD_NEEDS_CAL], ErrorCategory::NeedsCal),
            (
                &[
                    D::INT_NO_COMS,
                    D::INT_EETOOBIG,
                    D::INT_ODDREADBUF,
                    D::INT_SMALLREADBUF,
                    D::INT_INTTOOBIG,
                    D::INT_INTTOOSMALL,
                    D::INT_ILLEGALMODE,
                    D::INT_ZEROMEASURES,
                    D::INT_MEASBUFFTOOSMALL,
                    D::INT_NOTIMPLEMENTED,
                    D::INT_NOTCALIBRATED,
                    D::INT_NOINTERPDARK,
                    D::INT_THREADFAILED,
                    D::INT_BUTTONTIMEOUT,
                    D::INT_CIECONVFAIL,
                    D::INT_PREP_LOG_DATA,
                    D::INT_MALLOC,
                    D::INT_CREATE_EEPROM_STORE,
                    D::INT_SAVE_SUBT_MODE,
                    D::INT_NO_CAL_TO_SAVE,
                    D::INT_EEPROM_DATA_MISSING,
                    D::INT_NEW_RSPL_FAILED,
                    D::INT_CAL_SAVE,
                    D::INT_ADARK_INVALID,
                ],
                ErrorCategory::InternalError,
            ),
        ];

        let mut listed = Vec::new();
        for (codes, category) in groups {
            for code in *codes {
                assert_eq!(classify(*code), *category, "{code}");
                listed.push(*code);
            }
        }
        // Everything else, defined or not, is `Other`.
        for code in DeviceCode::ALL {
            if !listed.contains(code) {
                assert_eq!(classify(*code), ErrorCategory::Other, "{code}");
            }
        }
        assert_eq!(listed.len(), CATEGORY_TABLE.len());
        assert_eq!(classify(D::INT_NOT_INITIALISED), ErrorCategory::Other);
        assert_eq!(classify(D::INT_CAL_RESTORE), ErrorCategory::Other);
        assert_eq!(classify(D::INTERNAL_ERROR), ErrorCategory::Other);
    }

    #[test]
    fn user_interaction_categories() {
        assert!(DeviceCode::USER_ABORT.category().is_user_interaction());
        assert!(DeviceCode::USER_CMND.category().is_user_interaction());
        assert!(!DeviceCode::COMS_FAIL.category().is_user_interaction());
    }
}
