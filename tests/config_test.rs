//! Configuration loading and how it reaches a session.

mod common;

use common::*;
use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use rust_spectro::adapters::PortSelector;
use rust_spectro::config::{ConfigError, DriverConfig};
use rust_spectro::hardware::ModelProfile;
use rust_spectro::instrument::{ErrorCategory, Illumination, ModeRequest, SubMode};
use std::io::Write;

#[test]
fn test_load_from_toml_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
[comms]
port = "usb:2"
timeout_ms = 250

[calibration]
reflective_dark_secs = 120
max_readings_per_dark = 50

[measurement]
scan_tolerance = 0.2

[logging]
level = "debug"
json = true
"#
    )
    .expect("write config");

    let config = DriverConfig::from_figment(Figment::new().merge(Toml::file(file.path())))
        .expect("config loads");
    assert_eq!(config.port_selector().expect("port"), PortSelector::Usb { index: 2 });
    assert_eq!(config.open_timeout().as_millis(), 250);
    assert_eq!(config.calibration.reflective_dark_secs, 120);
    assert_eq!(config.calibration.max_readings_per_dark, 50);
    assert_eq!(config.measurement.scan_tolerance, 0.2);
    assert!(config.logging.json);

    // Untouched sections keep their defaults.
    assert_eq!(config.session, DriverConfig::default().session);
    assert_eq!(config.profile(), ModelProfile::i1pro());
}

#[test]
fn test_profile_override() {
    let mut profile = ModelProfile::i1pro();
    profile.name = "i1pro-rev-b".to_string();
    profile.spot_frames = 8;

    let figment = Figment::new().merge(Serialized::default("profile", &profile));
    let config = DriverConfig::from_figment(figment).expect("profile override");
    assert_eq!(config.profile().name, "i1pro-rev-b");
    assert_eq!(config.profile().spot_frames, 8);
}

#[test]
fn test_inconsistent_profile_is_rejected() {
    let mut profile = ModelProfile::i1pro();
    profile.bands.count = 0;

    let figment = Figment::new().merge(Serialized::default("profile", &profile));
    let err = DriverConfig::from_figment(figment).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(_)));
}

#[test]
fn test_malformed_file_is_a_load_error() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "[comms]\nbaud_rate = \"fast\"").expect("write config");

    let err = DriverConfig::from_figment(Figment::new().merge(Toml::file(file.path())))
        .unwrap_err();
    assert!(matches!(err, ConfigError::LoadError(_)));
}

#[tokio::test]
async fn test_auto_calibrate_setting_reaches_the_session() {
    let mut config = DriverConfig::default();
    config.session.auto_calibrate = false;
    let (mut session, handle) = session_with_config(&config);
    bring_up(&mut session, &handle, MODEL_PRO, 0).await;
    assert!(!session.options().auto_calibrate);

    set_mode(
        &mut session,
        &handle,
        ModeRequest::spectral(Illumination::Reflection, SubMode::Spot),
    )
    .await;
    let err = session.read_sample("P1").await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::NeedsCal);
}

#[tokio::test]
async fn test_bad_port_in_config_is_a_comms_failure() {
    let mut config = DriverConfig::default();
    config.comms.port = "usb:x".to_string();
    let (mut session, handle) = session_with_config(&config);

    let err = session.connect().await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::ComsFail);
    assert_eq!(handle.open_count(), 0);
}
