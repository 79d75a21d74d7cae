//! Tests for loading motor configuration from files and the environment.

use daq_pseudomotor::config::{ConfigError, MotorConfig, MotorKind, ServerKind};
use daq_pseudomotor::motor::SlitType;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(text.as_bytes())
        .expect("Failed to write config");
    file
}

const MINIMAL: &str = r#"
[scan]
poll_interval_ms = 20

[[motors]]
name = "a"
type = "soft"
position = 4.0

[[motors]]
name = "b"
type = "soft"

[[motors]]
name = "gap"
type = "slit"
negative_motor = "a"
positive_motor = "b"
slit_type = "center_opposite"
axis = { scale = -1.0 }
"#;

#[test]
#[serial]
fn test_load_from_file() {
    let file = write_config(MINIMAL);
    let config = MotorConfig::load_from(file.path()).expect("Failed to load config");

    assert_eq!(config.scan.poll_interval_ms, 20);
    assert_eq!(config.motors.len(), 3);
    match &config.motors[2].kind {
        MotorKind::Slit { slit_type, .. } => assert_eq!(*slit_type, SlitType::CenterOpposite),
        other => panic!("Expected a slit, got {:?}", other),
    }
    assert_eq!(config.motors[2].axis.scale, -1.0);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(MINIMAL);
    std::env::set_var("PSEUDOMOTOR_SCAN__POLL_INTERVAL_MS", "5");
    std::env::set_var("PSEUDOMOTOR_LOGGING__LEVEL", "debug");

    let loaded = MotorConfig::load_from(file.path());

    std::env::remove_var("PSEUDOMOTOR_SCAN__POLL_INTERVAL_MS");
    std::env::remove_var("PSEUDOMOTOR_LOGGING__LEVEL");

    let config = loaded.expect("Failed to load config");
    assert_eq!(config.scan.poll_interval_ms, 5);
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_invalid_environment_value_fails_validation() {
    let file = write_config(MINIMAL);
    std::env::set_var("PSEUDOMOTOR_LOGGING__LEVEL", "chatty");

    let loaded = MotorConfig::load_from(file.path());
    std::env::remove_var("PSEUDOMOTOR_LOGGING__LEVEL");

    assert!(matches!(loaded, Err(ConfigError::ValidationError(_))));
}

#[test]
#[serial]
fn test_malformed_file_is_load_error() {
    let file = write_config("[[motors]]\nname = \"a\"\ntype = \"warp_drive\"\n");
    let loaded = MotorConfig::load_from(file.path());
    assert!(matches!(loaded, Err(ConfigError::LoadError(_))));
}

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    let config = MotorConfig::load().expect("config/motors.toml should load");

    let names: Vec<&str> = config.motors.iter().map(|m| m.name.as_str()).collect();
    assert!(names.contains(&"s1_center"));
    assert!(names.contains(&"table_height"));

    let ServerKind::Mock { version, records } = &config.servers[0].kind;
    assert_eq!(*version, 1_005_000);
    assert_eq!(records.len(), 2);
}
