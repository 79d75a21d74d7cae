//! Subscriber installation. Kept in its own binary because the subscriber is
//! process-global.

use daq_pseudomotor::config::LoggingConfig;
use daq_pseudomotor::logging;
use serial_test::serial;

#[test]
#[serial]
fn test_init_installs_once() {
    std::env::remove_var("RUST_LOG");
    let config = LoggingConfig {
        level: "daq_pseudomotor=debug".to_string(),
        json: false,
    };

    assert!(logging::init(&config).unwrap());
    assert!(!logging::init(&config).unwrap());

    let json = LoggingConfig {
        json: true,
        ..LoggingConfig::default()
    };
    assert!(!logging::init(&json).unwrap());
}

#[test]
#[serial]
fn test_rejects_bad_level() {
    std::env::remove_var("RUST_LOG");
    let config = LoggingConfig {
        level: "motor=loud".to_string(),
        json: false,
    };
    assert!(logging::init(&config).is_err());
}

#[test]
#[serial]
fn test_rust_log_overrides_level() {
    std::env::set_var("RUST_LOG", "motor=loud");
    let result = logging::init(&LoggingConfig::default());
    std::env::remove_var("RUST_LOG");
    assert!(result.is_err());
}
