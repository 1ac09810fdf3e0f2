//! Shared helpers for integration tests: a scripted i1 Pro on a mock port.

#![allow(dead_code)]

use rust_spectro::adapters::{MockHandle, MockTransport, PortIdentity};
use rust_spectro::config::DriverConfig;
use rust_spectro::hardware::{FrameProtocolBackend, ModelProfile};
use rust_spectro::instrument::{
    CalCondition, CalTarget, ModeRequest, Session, SpectralConverter, Spectrum,
};

/// Bands in a frame of the built-in profile.
pub const BANDS: usize = 36;
/// Frames in a spot reading of the built-in profile.
pub const SPOT_FRAMES: usize = 4;
/// Frames in an ambient flash capture of the built-in profile.
pub const FLASH_FRAMES: usize = 32;

/// Stop command the built-in profile sends after an interrupted exchange.
pub const ABORT_OPCODE: u8 = 0xce;

pub const MODEL_MONITOR: u8 = 0x01;
pub const MODEL_PRO: u8 = 0x02;
pub const FEATURE_HIGH_RES: u8 = 0x01;
pub const FEATURE_AMBIENT: u8 = 0x02;

/// Dark reference counts (well below the dark limit).
pub const DARK: u16 = 1_000;
/// White reference counts.
pub const WHITE: u16 = 50_000;

/// Status byte reply.
pub fn ok() -> Vec<u8> {
    vec![0x00]
}

/// One frame with every band at `count`.
pub fn frame(count: u16) -> Vec<u8> {
    count.to_le_bytes().repeat(BANDS)
}

/// Consecutive frames at the given counts.
pub fn frames(counts: &[u16]) -> Vec<u8> {
    counts.iter().flat_map(|c| frame(*c)).collect()
}

/// Identify reply for `model` with `features`.
pub fn identify(model: u8, features: u8) -> Vec<u8> {
    let mut reply = vec![0x00, model, 1, 7, features];
    reply.extend_from_slice(&0x0001_e240u32.to_le_bytes());
    reply
}

/// Reflective ratio the backend produces for `count` against DARK/WHITE.
pub fn reflectance(count: u16) -> f64 {
    (f64::from(count) - f64::from(DARK)) / (f64::from(WHITE) - f64::from(DARK))
}

/// Session over a mock port that reports an i1 Pro USB identity.
pub fn session_with_config(config: &DriverConfig) -> (Session, MockHandle) {
    let (transport, handle) =
        MockTransport::with_identity(PortIdentity::usb(0x0971, 0x2000, "i1 Pro"));
    let backend = FrameProtocolBackend::new(ModelProfile::i1pro());
    let session = Session::new(Box::new(transport), Box::new(backend), config);
    (session, handle)
}

pub fn new_session() -> (Session, MockHandle) {
    session_with_config(&DriverConfig::default())
}

/// Connect and initialise `session` as `model` with `features`.
pub async fn bring_up(session: &mut Session, handle: &MockHandle, model: u8, features: u8) {
    session.connect().await.expect("comms");
    handle.push_reply(identify(model, features));
    session.initialize().await.expect("initialize");
}

/// Set a mode, scripting the device acknowledgement.
pub async fn set_mode(session: &mut Session, handle: &MockHandle, request: ModeRequest) {
    handle.push_reply(ok());
    session.set_mode(request).await.expect("set_mode");
}

/// Script one calibration reply at `count`.
pub fn script_calibration(handle: &MockHandle, count: u16) {
    handle.push_replies([ok(), frame(count)]);
}

/// Script one acquisition: status then the frame data.
pub fn script_measurement(handle: &MockHandle, data: Vec<u8>) {
    handle.push_replies([ok(), data]);
}

/// Run reflective calibration to completion: one setup round trip, then
/// dark and white on the white tile.
pub async fn calibrate_reflective(session: &mut Session, handle: &MockHandle, id: &str) {
    let mut condition = CalCondition::None;
    let setup = session
        .calibrate(CalTarget::AllNeeded, &mut condition, id)
        .await
        .expect_err("setup round trip");
    assert_eq!(setup.code, rust_spectro::instrument::DeviceCode::CAL_SETUP);

    script_calibration(handle, DARK);
    script_calibration(handle, WHITE);
    session
        .calibrate(CalTarget::AllNeeded, &mut condition, id)
        .await
        .expect("calibration");
}

/// An i1 Pro in `request`, calibrated for reflective measurement.
pub async fn calibrated_session(request: ModeRequest) -> (Session, MockHandle) {
    let (mut session, handle) = new_session();
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    set_mode(&mut session, &handle, request).await;
    calibrate_reflective(&mut session, &handle, "tile-1").await;
    (session, handle)
}

/// Converter reporting (sum, mean, max) of the band values.
pub struct BandStats;

impl SpectralConverter for BandStats {
    fn to_xyz(&self, spectrum: &Spectrum) -> [f64; 3] {
        let sum: f64 = spectrum.values.iter().sum();
        let max = spectrum.values.iter().copied().fold(f64::MIN, f64::max);
        [sum, sum / spectrum.values.len() as f64, max]
    }
}
