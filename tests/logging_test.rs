//! Subscriber installation. Kept in its own binary because it sets the
//! process-wide default subscriber.

use rust_spectro::config::LoggingConfig;
use rust_spectro::logging::init_tracing;

#[test]
fn test_second_install_is_not_an_error() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        json: true,
    };
    let _ = init_tracing(&config);
    assert!(!init_tracing(&config));
    tracing::info!("subscriber installed");
}
