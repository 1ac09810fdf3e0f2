//! Calibration negotiation, failure handling, expiry and auto-calibration.

mod common;

use common::*;
use rust_spectro::config::DriverConfig;
use rust_spectro::instrument::calibration::CAL_ID_LEN;
use rust_spectro::instrument::{
    CalCondition, CalNeed, CalTarget, CalibrationState, CalibrationType, DeviceCode,
    ErrorCategory, Illumination, InstOption, ModeRequest, SubMode, UserKey,
};
use rust_spectro::error::MisreadReason;
use std::time::Duration;

fn reflective_spot() -> ModeRequest {
    ModeRequest::spectral(Illumination::Reflection, SubMode::Spot)
}

#[tokio::test]
async fn test_setup_round_trip_then_valid_with_truncated_id() {
    let (mut session, handle) = new_session();
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    set_mode(&mut session, &handle, reflective_spot()).await;
    assert_eq!(session.calibration_record().state(), CalibrationState::Unknown);

    let long_id = "W".repeat(300);
    let mut condition = CalCondition::None;
    let before = handle.io_count();
    let err = session
        .calibrate(CalTarget::AllNeeded, &mut condition, &long_id)
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::CalSetupRequired);
    assert_eq!(condition, CalCondition::WhiteReference);
    assert_eq!(
        session.calibration_record().state(),
        CalibrationState::AwaitingCondition(CalCondition::WhiteReference)
    );
    assert_eq!(handle.io_count(), before, "setup request needs no device I/O");

    script_calibration(&handle, DARK);
    script_calibration(&handle, WHITE);
    session
        .calibrate(CalTarget::AllNeeded, &mut condition, &long_id)
        .await
        .expect("calibration");

    let record = session.calibration_record();
    assert_eq!(record.state(), CalibrationState::Valid);
    assert_eq!(record.id().len(), CAL_ID_LEN - 1);
    assert!(record.entry(CalibrationType::ReflectiveDark).is_some());
    assert!(record.entry(CalibrationType::ReflectiveWhite).is_some());

    let summary = record.summary();
    assert_eq!(summary.performed.len(), 2);
    let json = serde_json::to_string(&summary).expect("summary serializes");
    assert!(json.contains("reflective_white"));
}

#[tokio::test]
async fn test_transmission_needs_two_setups() {
    let (mut session, handle) = new_session();
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    let request = ModeRequest::spectral(Illumination::Transmission, SubMode::Spot);
    set_mode(&mut session, &handle, request).await;

    let mut condition = CalCondition::None;
    let err = session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .unwrap_err();
    assert_eq!(err.code, DeviceCode::CAL_SETUP);
    assert_eq!(condition, CalCondition::TransmissionDark);

    script_calibration(&handle, DARK);
    let err = session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .unwrap_err();
    assert_eq!(err.code, DeviceCode::CAL_SETUP);
    assert_eq!(condition, CalCondition::TransmissionWhite);
    assert_eq!(
        session.needs_calibration(),
        CalNeed::Needed(CalibrationType::TransmissionWhite)
    );

    script_calibration(&handle, 30_000);
    session
        .calibrate(CalTarget::AllNeeded, &mut condition, "light table")
        .await
        .expect("calibration");
    assert_eq!(session.calibration_record().state(), CalibrationState::Valid);
    assert_eq!(handle.pending_replies(), 0);
}

#[tokio::test]
async fn test_misread_during_calibration_is_retryable() {
    let (mut session, handle) = new_session();
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    set_mode(&mut session, &handle, reflective_spot()).await;

    let mut condition = CalCondition::WhiteReference;
    script_calibration(&handle, 10_000);
    let err = session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::Misread);
    assert_eq!(err.misread_reason(), Some(MisreadReason::DarkInconsistent));
    assert_eq!(
        session.calibration_record().state(),
        CalibrationState::AwaitingCondition(CalCondition::WhiteReference)
    );

    script_calibration(&handle, DARK);
    script_calibration(&handle, WHITE);
    session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .expect("retry succeeds without a new setup");
    assert_eq!(session.calibration_record().state(), CalibrationState::Valid);
}

#[tokio::test(start_paused = true)]
async fn test_abort_mid_calibration_discards_the_reading() {
    let (mut session, handle) = new_session();
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    set_mode(&mut session, &handle, reflective_spot()).await;

    let mut condition = CalCondition::WhiteReference;
    handle.set_latency(Duration::from_secs(1));
    script_calibration(&handle, 2_000);
    let keys = session.user_keys();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        keys.press(UserKey::Abort);
    });

    let err = session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::UserAbort);
    assert_eq!(
        session.calibration_record().state(),
        CalibrationState::AwaitingCondition(CalCondition::WhiteReference)
    );
    assert_eq!(handle.sent().last(), Some(&vec![ABORT_OPCODE]));
    assert_eq!(handle.pending_replies(), 0);

    // The retry's dark and white readings are the ones kept.
    handle.set_latency(Duration::ZERO);
    script_calibration(&handle, DARK);
    script_calibration(&handle, WHITE);
    session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .expect("retry after abort");
    assert_eq!(session.calibration_record().state(), CalibrationState::Valid);

    script_measurement(&handle, frames(&[10_000; SPOT_FRAMES]));
    let reading = session.read_sample("P1").await.expect("reading");
    let value = reading.spectrum.expect("spectrum").values[0];
    assert!((value - reflectance(10_000)).abs() < 1e-9);
}

#[tokio::test]
async fn test_hard_failure_reasks_for_setup() {
    let (mut session, handle) = new_session();
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    set_mode(&mut session, &handle, reflective_spot()).await;

    let mut condition = CalCondition::WhiteReference;
    handle.push_reply(vec![DeviceCode::HW_HIGHPOWERFAIL.0 as u8]);
    let err = session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::HardwareFail);
    assert_eq!(
        session.calibration_record().state(),
        CalibrationState::Error(DeviceCode::HW_HIGHPOWERFAIL)
    );

    let err = session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::CalSetupRequired);

    script_calibration(&handle, DARK);
    script_calibration(&handle, WHITE);
    session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .expect("calibration after setup");
}

#[tokio::test]
async fn test_explicit_calibration_types_are_gated() {
    let (mut session, handle) = new_session();
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    let emissive = ModeRequest::spectral(Illumination::Emission, SubMode::Spot);
    set_mode(&mut session, &handle, emissive).await;

    let mut condition = CalCondition::DisplayWhite;
    let target = CalTarget::Type(CalibrationType::DisplayIntegrationTime);
    let err = session
        .calibrate(target, &mut condition, "")
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::Unsupported);

    let display = ModeRequest::spectral(Illumination::Emission, SubMode::Display);
    set_mode(&mut session, &handle, display).await;
    script_calibration(&handle, 20_000);
    session
        .calibrate(target, &mut condition, "")
        .await
        .expect("integration time calibration");

    // The dark reference the mode needs is still outstanding.
    assert_eq!(
        session.calibration_record().state(),
        CalibrationState::NeedsCalibration(CalibrationType::EmissiveDark)
    );
}

#[tokio::test]
async fn test_calibrate_requires_a_mode() {
    let (mut session, handle) = new_session();
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    let mut condition = CalCondition::None;
    let err = session
        .calibrate(CalTarget::AllNeeded, &mut condition, "")
        .await
        .unwrap_err();
    assert_eq!(err.code, DeviceCode::INT_ILLEGALMODE);
}

#[tokio::test(start_paused = true)]
async fn test_expired_dark_is_redone_automatically() {
    let mut config = DriverConfig::default();
    config.calibration.reflective_dark_secs = 60;
    let (mut session, handle) = session_with_config(&config);
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    set_mode(&mut session, &handle, reflective_spot()).await;
    calibrate_reflective(&mut session, &handle, "tile").await;

    let first_dark = session
        .calibration_record()
        .entry(CalibrationType::ReflectiveDark)
        .expect("dark entry")
        .performed_at;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(
        session.needs_calibration(),
        CalNeed::Needed(CalibrationType::ReflectiveDark)
    );

    script_calibration(&handle, DARK);
    script_measurement(&handle, frames(&[30_000; SPOT_FRAMES]));
    session.read_sample("P1").await.expect("auto calibrated reading");

    let dark = session
        .calibration_record()
        .entry(CalibrationType::ReflectiveDark)
        .expect("dark entry");
    assert!(dark.performed_at > first_dark);
    assert_eq!(dark.readings, 1);
    assert_eq!(session.calibration_record().state(), CalibrationState::Valid);
}

#[tokio::test(start_paused = true)]
async fn test_stale_calibration_fails_fast_without_auto_calibrate() {
    let mut config = DriverConfig::default();
    config.calibration.reflective_dark_secs = 60;
    let (mut session, handle) = session_with_config(&config);
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    set_mode(&mut session, &handle, reflective_spot()).await;
    calibrate_reflective(&mut session, &handle, "tile").await;
    session
        .set_option(InstOption::AutoCalibrate(false))
        .await
        .expect("option");

    tokio::time::advance(Duration::from_secs(61)).await;
    let before = handle.io_count();
    let err = session.read_sample("P1").await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::NeedsCal);
    assert_eq!(handle.io_count(), before);
    assert_eq!(
        session.calibration_record().state(),
        CalibrationState::NeedsCalibration(CalibrationType::ReflectiveDark)
    );
}

#[tokio::test]
async fn test_dark_usage_limit() {
    let mut config = DriverConfig::default();
    config.calibration.max_readings_per_dark = 1;
    config.session.auto_calibrate = false;
    let (mut session, handle) = session_with_config(&config);
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    set_mode(&mut session, &handle, reflective_spot()).await;
    calibrate_reflective(&mut session, &handle, "tile").await;

    script_measurement(&handle, frames(&[30_000; SPOT_FRAMES]));
    session.read_sample("P1").await.expect("first reading");

    let err = session.read_sample("P2").await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::NeedsCal);
}
