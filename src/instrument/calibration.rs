//! Calibration record and state machine.
//!
//! The [`CalibrationRecord`] tracks which calibrations have been performed,
//! when, at which resolution and how many readings they have served. The
//! session drives it through [`CalibrationRecord::next_step`]: each call
//! either asks the caller to change the physical setup, names the next
//! calibration to perform, or reports that everything the mode needs is done.
//!
//! ```text
//! Unknown ──► NeedsCalibration ──► AwaitingCondition ──► InProgress ──► Valid
//!                                        ▲                   │            │
//!                                        └──── Error ◄───────┘            ▼
//!                                                                     Invalid
//! ```

use crate::config::CalibrationConfig;
use crate::error::{InstError, InstResult};
use crate::hardware::Resolution;
use crate::instrument::capabilities::ExtendedCapabilities;
use crate::instrument::codes::DeviceCode;
use crate::instrument::mode::DeviceMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Maximum identifier length including the terminator slot, so at most
/// `CAL_ID_LEN - 1` bytes are kept.
pub const CAL_ID_LEN: usize = 200;

/// Kind of calibration reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CalibrationType {
    /// Dark reading for reflective modes
    ReflectiveDark = 0x01,
    /// White tile reading for reflective modes
    ReflectiveWhite = 0x02,
    /// Dark reading for emissive modes
    EmissiveDark = 0x03,
    /// Dark reading for transmission modes
    TransmissionDark = 0x04,
    /// Light source reading for transmission modes
    TransmissionWhite = 0x05,
    /// Integration time for display measurement
    DisplayIntegrationTime = 0x06,
}

impl CalibrationType {
    /// Type byte sent to the device.
    pub fn wire_code(self) -> u8 {
        self as u8
    }

    /// Physical setup the reading has to be taken in.
    pub fn condition(self) -> CalCondition {
        match self {
            Self::ReflectiveDark | Self::ReflectiveWhite | Self::EmissiveDark => {
                CalCondition::WhiteReference
            }
            Self::TransmissionDark => CalCondition::TransmissionDark,
            Self::TransmissionWhite => CalCondition::TransmissionWhite,
            Self::DisplayIntegrationTime => CalCondition::DisplayWhite,
        }
    }

    /// Dark readings are subject to the usage limit.
    pub fn is_dark(self) -> bool {
        matches!(
            self,
            Self::ReflectiveDark | Self::EmissiveDark | Self::TransmissionDark
        )
    }

    /// Extended capability bit the type needs, if any.
    pub fn required_capability(self) -> Option<ExtendedCapabilities> {
        match self {
            Self::ReflectiveWhite => Some(ExtendedCapabilities::CAL_REF_WHITE),
            Self::TransmissionWhite => Some(ExtendedCapabilities::CAL_TRANS_WHITE),
            Self::DisplayIntegrationTime => Some(ExtendedCapabilities::CAL_DISP_INT_TIME),
            _ => None,
        }
    }
}

impl fmt::Display for CalibrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReflectiveDark => "reflective dark",
            Self::ReflectiveWhite => "reflective white",
            Self::EmissiveDark => "emissive dark",
            Self::TransmissionDark => "transmission dark",
            Self::TransmissionWhite => "transmission white",
            Self::DisplayIntegrationTime => "display integration time",
        };
        f.write_str(name)
    }
}

/// Physical calibration condition, negotiated with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalCondition {
    /// Nothing in particular (initial value)
    #[default]
    None,
    /// Instrument on its white reference tile
    WhiteReference,
    /// Instrument on the light table with nothing in the path
    TransmissionWhite,
    /// Instrument on the light table with the light blocked
    TransmissionDark,
    /// Instrument on a white display patch
    DisplayWhite,
}

/// What `calibrate` is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalTarget {
    /// Every calibration the current mode still needs
    AllNeeded,
    /// One explicit calibration type
    Type(CalibrationType),
}

/// Answer of `needs_calibration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalNeed {
    /// Everything the mode needs is valid
    None,
    /// Not initialised or no mode set
    Unknown,
    /// First calibration type the mode still needs
    Needed(CalibrationType),
}

/// Calibration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationState {
    /// Nothing known yet (after init or a mode change from unknown)
    Unknown,
    /// This calibration must be done next
    NeedsCalibration(CalibrationType),
    /// Waiting for the caller to arrange a physical setup
    AwaitingCondition(CalCondition),
    /// A calibration reading is being taken
    InProgress(CalibrationType),
    /// Every calibration the mode needs is current
    Valid,
    /// A calibration expired or was invalidated
    Invalid,
    /// The last calibration failed with this code
    Error(DeviceCode),
}

/// Calibrations a mode needs before it can measure.
pub fn required_calibrations(mode: DeviceMode) -> &'static [CalibrationType] {
    use CalibrationType::*;
    if mode.is_reflective() {
        &[ReflectiveDark, ReflectiveWhite]
    } else if mode.is_transmissive() {
        &[TransmissionDark, TransmissionWhite]
    } else {
        &[EmissiveDark]
    }
}

/// Whether `cal` may be performed in `mode`.
pub fn accepts_calibration(mode: DeviceMode, cal: CalibrationType) -> bool {
    required_calibrations(mode).contains(&cal)
        || (mode == DeviceMode::DisplaySpot && cal == CalibrationType::DisplayIntegrationTime)
}

/// Expiry and usage limits.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationPolicy {
    expiry: BTreeMap<CalibrationType, Duration>,
    max_readings_per_dark: u32,
}

impl CalibrationPolicy {
    /// Policy from the `[calibration]` configuration section.
    pub fn from_config(config: &CalibrationConfig) -> Self {
        use CalibrationType::*;
        let secs = Duration::from_secs;
        let expiry = [
            (ReflectiveDark, secs(config.reflective_dark_secs)),
            (ReflectiveWhite, secs(config.reflective_white_secs)),
            (EmissiveDark, secs(config.emissive_dark_secs)),
            (TransmissionDark, secs(config.transmission_dark_secs)),
            (TransmissionWhite, secs(config.transmission_white_secs)),
            (DisplayIntegrationTime, secs(config.display_int_time_secs)),
        ]
        .into_iter()
        .collect();
        Self {
            expiry,
            max_readings_per_dark: config.max_readings_per_dark,
        }
    }

    fn expiry(&self, cal: CalibrationType) -> Duration {
        self.expiry.get(&cal).copied().unwrap_or(Duration::MAX)
    }
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self::from_config(&CalibrationConfig::default())
    }
}

/// One performed calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct CalEntry {
    /// Monotonic time it was taken
    pub performed_at: Instant,
    /// Wall-clock time it was taken
    pub wall_clock: DateTime<Utc>,
    /// Resolution it was taken at
    pub resolution: Resolution,
    /// Readings served since
    pub readings: u32,
}

/// Serialisable view of a performed calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformedCalibration {
    /// What was calibrated
    pub cal_type: CalibrationType,
    /// Wall-clock time of the reading
    pub performed_at: DateTime<Utc>,
    /// Resolution it was taken at
    pub resolution: Resolution,
    /// Readings served since
    pub readings: u32,
}

/// Serialisable snapshot of the record, for an external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    /// State machine position
    pub state: CalibrationState,
    /// Setup the record last asked for
    pub condition: CalCondition,
    /// Caller supplied identifier
    pub id: String,
    /// Completed calibrations
    pub performed: Vec<PerformedCalibration>,
}

/// Next thing the calibration sequence needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CalStep {
    /// Ask the caller to change the physical setup
    Setup(CalCondition),
    /// Take this reading now
    Perform(CalibrationType),
    /// Nothing left to do
    Done,
}

/// Context a freshness decision depends on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CalContext<'a> {
    pub mode: DeviceMode,
    /// Resolution it was taken at
    pub resolution: Resolution,
    pub now: Instant,
    pub policy: &'a CalibrationPolicy,
}

/// Per-session calibration validity.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    state: CalibrationState,
    condition: CalCondition,
    id: String,
    entries: BTreeMap<CalibrationType, CalEntry>,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationRecord {
    /// Empty record in the `Unknown` state.
    pub fn new() -> Self {
        Self {
            state: CalibrationState::Unknown,
            condition: CalCondition::None,
            id: String::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Last negotiated physical condition.
    pub fn condition(&self) -> CalCondition {
        self.condition
    }

    /// Identifier stamped on the last successful calibration.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Entry for a performed calibration type.
    pub fn entry(&self, cal: CalibrationType) -> Option<&CalEntry> {
        self.entries.get(&cal)
    }

    /// Snapshot for persistence.
    pub fn summary(&self) -> CalibrationSummary {
        CalibrationSummary {
            state: self.state,
            condition: self.condition,
            id: self.id.clone(),
            performed: self
                .entries
                .iter()
                .map(|(cal, entry)| PerformedCalibration {
                    cal_type: *cal,
                    performed_at: entry.wall_clock,
                    resolution: entry.resolution,
                    readings: entry.readings,
                })
                .collect(),
        }
    }

    fn is_fresh(&self, cal: CalibrationType, ctx: &CalContext<'_>) -> bool {
        let Some(entry) = self.entries.get(&cal) else {
            return false;
        };
        if entry.resolution != ctx.resolution {
            return false;
        }
        if ctx.now.saturating_duration_since(entry.performed_at) > ctx.policy.expiry(cal) {
            return false;
        }
        let limit = ctx.policy.max_readings_per_dark;
        !(cal.is_dark() && limit > 0 && entry.readings >= limit)
    }

    fn stale(&self, ctx: &CalContext<'_>) -> Vec<CalibrationType> {
        required_calibrations(ctx.mode)
            .iter()
            .copied()
            .filter(|cal| !self.is_fresh(*cal, ctx))
            .collect()
    }

    /// First calibration the mode still needs. Never mutates.
    pub(crate) fn needs(&self, ctx: &CalContext<'_>) -> CalNeed {
        match self.stale(ctx).first() {
            Some(cal) => CalNeed::Needed(*cal),
            None => CalNeed::None,
        }
    }

    /// Stale types that can be redone without user setup, if that is all
    /// that stands between the mode and a measurement.
    pub(crate) fn auto_recalibration(&self, ctx: &CalContext<'_>) -> Option<Vec<CalibrationType>> {
        let stale = self.stale(ctx);
        let silent = stale.iter().all(|cal| {
            *cal == CalibrationType::ReflectiveDark && self.entries.contains_key(cal)
        });
        (!stale.is_empty() && silent).then_some(stale)
    }

    /// Sequence of calibrations `target` asks for in the current context.
    pub(crate) fn plan(
        &self,
        target: CalTarget,
        ctx: &CalContext<'_>,
        extended: ExtendedCapabilities,
    ) -> InstResult<Vec<CalibrationType>> {
        match target {
            CalTarget::AllNeeded => Ok(self.stale(ctx)),
            CalTarget::Type(cal) => {
                if !accepts_calibration(ctx.mode, cal) {
                    return Err(InstError::with_detail(
                        DeviceCode::UNSUPPORTED,
                        format!("{} calibration does not apply to {}", cal, ctx.mode),
                    ));
                }
                if let Some(bit) = cal.required_capability() {
                    if !extended.contains(bit) {
                        return Err(InstError::with_detail(
                            DeviceCode::UNSUPPORTED,
                            format!("instrument does not support {} calibration", cal),
                        ));
                    }
                }
                Ok(vec![cal])
            }
        }
    }

    /// Decide the next step for the head of `pending` given the caller's
    /// current physical `condition`.
    pub(crate) fn next_step(
        &mut self,
        pending: &[CalibrationType],
        condition: CalCondition,
    ) -> CalStep {
        let Some(cal) = pending.first().copied() else {
            return CalStep::Done;
        };
        let needed = cal.condition();

        // After a hard failure the setup is re-negotiated even if it looks right.
        if matches!(self.state, CalibrationState::Error(_)) || condition != needed {
            self.state = CalibrationState::AwaitingCondition(needed);
            self.condition = needed;
            return CalStep::Setup(needed);
        }

        self.state = CalibrationState::InProgress(cal);
        self.condition = condition;
        CalStep::Perform(cal)
    }

    /// Record a successful calibration reading.
    pub(crate) fn complete(&mut self, cal: CalibrationType, resolution: Resolution, now: Instant) {
        self.entries.insert(
            cal,
            CalEntry {
                performed_at: now,
                wall_clock: Utc::now(),
                resolution,
                readings: 0,
            },
        );
    }

    /// Record a failed calibration reading.
    ///
    /// Reading-quality failures keep the record waiting on the same setup so
    /// the call can simply be repeated; anything else is an error that forces
    /// setup to be re-negotiated.
    pub(crate) fn fail(&mut self, cal: CalibrationType, err: &InstError) {
        self.entries.remove(&cal);
        self.state = if err.misread_reason().is_some() || err.category.is_user_interaction() {
            CalibrationState::AwaitingCondition(cal.condition())
        } else {
            CalibrationState::Error(err.code)
        };
    }

    /// Mark the sequence finished and stamp the identifier.
    ///
    /// The record only becomes valid when nothing the mode needs is stale.
    pub(crate) fn finish(&mut self, id: &str, ctx: &CalContext<'_>) {
        self.id = truncate_id(id).to_string();
        self.state = match self.stale(ctx).first() {
            None => CalibrationState::Valid,
            Some(cal) => CalibrationState::NeedsCalibration(*cal),
        };
    }

    /// The mode could not measure because `cal` is missing.
    pub(crate) fn mark_needed(&mut self, cal: CalibrationType) {
        self.state = CalibrationState::NeedsCalibration(cal);
    }

    /// Apply a mode change: drop calibrations that do not apply to the new
    /// mode and re-evaluate validity.
    pub(crate) fn apply_mode(&mut self, ctx: &CalContext<'_>) {
        self.entries.retain(|cal, _| accepts_calibration(ctx.mode, *cal));
        self.refresh(ctx);
    }

    /// Re-evaluate `Valid`/`Invalid` after something changed freshness.
    pub(crate) fn refresh(&mut self, ctx: &CalContext<'_>) {
        if matches!(
            self.state,
            CalibrationState::Unknown | CalibrationState::Error(_)
        ) {
            return;
        }
        self.state = match (self.stale(ctx).first(), self.state) {
            (None, _) => CalibrationState::Valid,
            (Some(_), CalibrationState::Valid | CalibrationState::Invalid) => {
                CalibrationState::Invalid
            }
            (Some(cal), _) => CalibrationState::NeedsCalibration(*cal),
        };
    }

    /// Count one measurement against the dark references the mode uses.
    pub(crate) fn note_reading(&mut self, mode: DeviceMode) {
        for cal in required_calibrations(mode) {
            if cal.is_dark() {
                if let Some(entry) = self.entries.get_mut(cal) {
                    entry.readings = entry.readings.saturating_add(1);
                }
            }
        }
    }
}

/// Keep at most `CAL_ID_LEN - 1` bytes of `id`, cutting at a char boundary.
pub fn truncate_id(id: &str) -> &str {
    let max = CAL_ID_LEN - 1;
    if id.len() <= max {
        return id;
    }
    let mut end = max;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    &id[..end]
}
