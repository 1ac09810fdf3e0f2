//! Session options.
//!
//! Each option is a typed variant carrying its own value, so a scan
//! tolerance can never be passed where a trigger style is expected.
//! [`InstOption::parse`] covers callers that hold options as text (config
//! files, command lines) and is where unrecognised names are rejected.

use crate::config::SessionConfig;
use crate::error::{InstError, InstResult};
use crate::hardware::Resolution;
use crate::instrument::capabilities::{Capabilities, CapabilitySet, ExtendedCapabilities};
use crate::instrument::codes::DeviceCode;
use serde::{Deserialize, Serialize};

/// How a measurement is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStyle {
    /// Measure as soon as asked
    #[default]
    Program,
    /// Wait for a trigger key
    Keyboard,
    /// Wait for a trigger key or the instrument switch
    KeyboardSwitch,
}

/// What a keyboard trigger does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReturn {
    /// Return a `user_trigger` result instead of measuring
    Return,
    /// Measure
    #[default]
    NoReturn,
}

/// Display technology hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayTech {
    /// Cathode ray tube
    Crt,
    /// LCD with fluorescent backlight
    LcdCcfl,
    /// LCD with LED backlight
    LcdLed,
    /// OLED panel
    Oled,
    /// Projector
    Projector,
    /// Anything else
    Other,
}

/// One option and its value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InstOption {
    /// Calibrate silently before measuring when possible
    AutoCalibrate(bool),
    /// Trigger style
    Trigger(TriggerStyle),
    /// Keyboard trigger behaviour
    TriggerReturn(TriggerReturn),
    /// Spectral resolution
    Resolution(Resolution),
    /// Multiplier on the default patch-edge tolerance
    ScanTolerance(f64),
    /// Display technology (no effect on this family)
    DisplayTechnology(DisplayTech),
}

fn unsupported(detail: String) -> InstError {
    InstError::with_detail(DeviceCode::UNSUPPORTED, detail)
}

impl InstOption {
    /// Parse a `name = value` pair.
    pub fn parse(name: &str, value: &str) -> InstResult<Self> {
        let bad_value = || unsupported(format!("invalid value '{}' for option '{}'", value, name));
        let value = value.trim();
        let option = match name.trim() {
            "auto_calibrate" => Self::AutoCalibrate(value.parse().map_err(|_| bad_value())?),
            "trigger_style" => Self::Trigger(match value {
                "program" => TriggerStyle::Program,
                "keyboard" => TriggerStyle::Keyboard,
                "keyboard_switch" => TriggerStyle::KeyboardSwitch,
                _ => return Err(bad_value()),
            }),
            "trigger_return" => Self::TriggerReturn(match value {
                "return" => TriggerReturn::Return,
                "no_return" => TriggerReturn::NoReturn,
                _ => return Err(bad_value()),
            }),
            "resolution" => Self::Resolution(match value {
                "standard" => Resolution::Standard,
                "high" => Resolution::High,
                _ => return Err(bad_value()),
            }),
            "scan_tolerance" => Self::ScanTolerance(value.parse().map_err(|_| bad_value())?),
            "display_technology" => Self::DisplayTechnology(match value {
                "crt" => DisplayTech::Crt,
                "lcd_ccfl" => DisplayTech::LcdCcfl,
                "lcd_led" => DisplayTech::LcdLed,
                "oled" => DisplayTech::Oled,
                "projector" => DisplayTech::Projector,
                "other" => DisplayTech::Other,
                _ => return Err(bad_value()),
            }),
            other => return Err(unsupported(format!("unrecognised option '{}'", other))),
        };
        Ok(option)
    }
}

/// Current option values of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Redo expired silent calibrations before a reading
    pub auto_calibrate: bool,
    /// How a reading starts
    pub trigger: TriggerStyle,
    /// Whether a trigger key ends the call instead
    pub trigger_return: TriggerReturn,
    /// Spectral output resolution
    pub resolution: Resolution,
    /// Multiplier on the strip patch tolerance
    pub scan_tolerance_ratio: f64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_calibrate: true,
            trigger: TriggerStyle::Program,
            trigger_return: TriggerReturn::NoReturn,
            resolution: Resolution::Standard,
            scan_tolerance_ratio: 1.0,
        }
    }
}

impl SessionOptions {
    /// Defaults taken from the `[session]` configuration section.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            auto_calibrate: config.auto_calibrate,
            ..Self::default()
        }
    }

    /// Check `option` against the instrument's capabilities.
    pub fn check(option: &InstOption, caps: &CapabilitySet) -> InstResult<()> {
        let has_ext = |bit: ExtendedCapabilities| caps.extended.contains(bit);
        let supported = match option {
            InstOption::AutoCalibrate(_)
            | InstOption::TriggerReturn(_)
            | InstOption::DisplayTechnology(_) => true,
            InstOption::Trigger(TriggerStyle::Program) => has_ext(ExtendedCapabilities::PROG_TRIG),
            InstOption::Trigger(TriggerStyle::Keyboard) => has_ext(ExtendedCapabilities::KEYB_TRIG),
            InstOption::Trigger(TriggerStyle::KeyboardSwitch) => {
                has_ext(ExtendedCapabilities::KEYB_SWITCH_TRIG)
            }
            InstOption::Resolution(Resolution::Standard) => true,
            InstOption::Resolution(Resolution::High) => {
                caps.primary.contains(Capabilities::HIGH_RES)
            }
            InstOption::ScanTolerance(ratio) => {
                if !ratio.is_finite() || *ratio <= 0.0 {
                    return Err(unsupported(format!("scan tolerance ratio {} is not positive", ratio)));
                }
                has_ext(ExtendedCapabilities::HAS_SCAN_TOLL)
            }
        };
        if supported {
            Ok(())
        } else {
            Err(unsupported(format!("{:?} is not supported by this instrument", option)))
        }
    }

    /// Store a checked option.
    pub fn apply(&mut self, option: InstOption) {
        match option {
            InstOption::AutoCalibrate(on) => self.auto_calibrate = on,
            InstOption::Trigger(style) => self.trigger = style,
            InstOption::TriggerReturn(ret) => self.trigger_return = ret,
            InstOption::Resolution(res) => self.resolution = res,
            InstOption::ScanTolerance(ratio) => self.scan_tolerance_ratio = ratio,
            InstOption::DisplayTechnology(_) => {}
        }
    }
}
