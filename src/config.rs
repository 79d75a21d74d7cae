//! Configuration loading using Figment
//!
//! A motor configuration describes the remote servers to connect to and the
//! motor records to build from them. It is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `PSEUDOMOTOR_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! PSEUDOMOTOR_LOGGING__LEVEL=debug
//! PSEUDOMOTOR_SCAN__POLL_INTERVAL_MS=5
//! ```
//!
//! # Example
//!
//! ```toml
//! [scan]
//! poll_interval_ms = 10
//!
//! [[servers]]
//! name = "beamline"
//! type = "mock"
//! records = [{ name = "remote_theta" }]
//!
//! [[motors]]
//! name = "s1_neg"
//! type = "soft"
//!
//! [[motors]]
//! name = "s1_pos"
//! type = "soft"
//!
//! [[motors]]
//! name = "s1_width"
//! type = "slit"
//! negative_motor = "s1_neg"
//! positive_motor = "s1_pos"
//! slit_type = "width_opposite"
//!
//! [[motors]]
//! name = "theta"
//! type = "network"
//! server = "beamline"
//! remote_record = "remote_theta"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::motor::parameter::NUM_ACCELERATION_PARAMS;
use crate::motor::{AccelerationType, AxisSettings, SlitType};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level motor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MotorConfig {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Scan polling settings
    #[serde(default)]
    pub scan: ScanConfig,
    /// Remote servers, referenced by network motors
    #[serde(default)]
    pub servers: Vec<ServerDefinition>,
    /// Motor records, in dependency order
    #[serde(default)]
    pub motors: Vec<MotorDefinition>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Scan coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Interval between busy polls while waiting for motors to stop
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Give up waiting for a step after this long; unset waits forever
    #[serde(default)]
    pub settle_timeout_ms: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            settle_timeout_ms: None,
        }
    }
}

impl ScanConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Settle timeout as a duration, if any.
    pub fn settle_timeout(&self) -> Option<Duration> {
        self.settle_timeout_ms.map(Duration::from_millis)
    }
}

/// Remote server definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefinition {
    /// Unique server name
    pub name: String,
    /// Server kind and its settings
    #[serde(flatten)]
    pub kind: ServerKind,
}

/// Kinds of remote server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerKind {
    /// In-memory server hosting the listed records
    Mock {
        /// Protocol version announced by the server
        #[serde(default = "default_remote_version")]
        version: u64,
        /// Records hosted by the server
        #[serde(default)]
        records: Vec<RemoteRecordConfig>,
    },
}

/// A motor record hosted by a mock server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecordConfig {
    /// Record name on the server
    pub name: String,
    /// Driver type name reported in `mx_type`
    #[serde(default = "default_mx_type")]
    pub mx_type: String,
    /// Initial raw position
    #[serde(default)]
    pub position: f64,
    /// Initial speed
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Whether the record is itself a pseudomotor
    #[serde(default)]
    pub pseudomotor: bool,
    /// Whether position conversion can skip the server
    #[serde(default)]
    pub recursion_not_necessary: bool,
    /// Remote scale; also the factor the mock uses for position conversion
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Acceleration type reported by the record
    #[serde(default)]
    pub acceleration_type: AccelerationType,
}

impl Default for RemoteRecordConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            mx_type: default_mx_type(),
            position: 0.0,
            speed: default_speed(),
            pseudomotor: false,
            recursion_not_necessary: false,
            scale: default_scale(),
            acceleration_type: AccelerationType::None,
        }
    }
}

/// Motor record definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorDefinition {
    /// Unique record name
    pub name: String,
    /// Calibration and soft limits
    #[serde(default)]
    pub axis: AxisSettings,
    /// Driver kind and its settings
    #[serde(flatten)]
    pub kind: MotorKind,
}

/// Driver kinds a motor record can be built from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MotorKind {
    /// Simulated axis
    Soft(SoftMotorConfig),
    /// Record served by a remote server
    Network {
        /// Server name
        server: String,
        /// Record name on the server
        remote_record: String,
    },
    /// Two-blade slit
    Slit {
        /// Record driving the negative blade
        negative_motor: String,
        /// Record driving the positive blade
        positive_motor: String,
        /// Which geometric quantity the slit exposes
        slit_type: SlitType,
        /// Start both blades concurrently
        #[serde(default)]
        simultaneous_start: bool,
    },
    /// Rigid translation of several motors
    Translation {
        /// Member records
        motors: Vec<String>,
        /// Start all members concurrently
        #[serde(default)]
        simultaneous_start: bool,
    },
}

impl MotorKind {
    /// Tag used in configuration files and the driver factory table.
    pub fn type_name(&self) -> &'static str {
        match self {
            MotorKind::Soft(_) => "soft",
            MotorKind::Network { .. } => "network",
            MotorKind::Slit { .. } => "slit",
            MotorKind::Translation { .. } => "translation",
        }
    }

    /// Names of other motor records this one is built from.
    pub fn sub_motors(&self) -> Vec<&str> {
        match self {
            MotorKind::Soft(_) | MotorKind::Network { .. } => Vec::new(),
            MotorKind::Slit {
                negative_motor,
                positive_motor,
                ..
            } => vec![negative_motor.as_str(), positive_motor.as_str()],
            MotorKind::Translation { motors, .. } => motors.iter().map(String::as_str).collect(),
        }
    }
}

/// Simulated motor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftMotorConfig {
    /// Initial raw position
    pub position: f64,
    /// Raw units per second
    pub speed: f64,
    /// Speed at the start of acceleration
    pub base_speed: f64,
    /// Upper bound on speed
    pub maximum_speed: f64,
    /// How `acceleration_parameters[0]` is interpreted
    pub acceleration_type: AccelerationType,
    /// Raw acceleration parameters
    pub acceleration_parameters: [f64; NUM_ACCELERATION_PARAMS],
    /// Number of busy polls before a move completes; 0 moves instantly
    pub move_polls: u32,
}

impl Default for SoftMotorConfig {
    fn default() -> Self {
        Self {
            position: 0.0,
            speed: default_speed(),
            base_speed: 0.0,
            maximum_speed: default_maximum_speed(),
            acceleration_type: AccelerationType::None,
            acceleration_parameters: [0.0; NUM_ACCELERATION_PARAMS],
            move_polls: 0,
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_remote_version() -> u64 {
    1_005_000
}

fn default_mx_type() -> String {
    "soft_motor".to_string()
}

fn default_speed() -> f64 {
    1.0
}

fn default_maximum_speed() -> f64 {
    100.0
}

fn default_scale() -> f64 {
    1.0
}

#[allow(clippy::unwrap_used)]
static RECORD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").unwrap());

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl MotorConfig {
    /// Load configuration from `config/motors.toml` and environment variables
    ///
    /// Environment variables (`PSEUDOMOTOR_` prefix) take precedence over the
    /// file. After loading, configuration is validated.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/motors.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PSEUDOMOTOR_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the text cannot be parsed or is invalid.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::string(text))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid
    /// - Poll interval is non-zero
    /// - Server and motor names are well formed and unique
    /// - Every referenced server or motor is defined, motors before use
    /// - Slits use two distinct motors, translations at least one
    /// - Axis scale is non-zero and soft limits are ordered
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.scan.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scan.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        let mut servers = HashSet::new();
        for server in &self.servers {
            check_name("server", &server.name)?;
            if !servers.insert(server.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate server name: '{}'",
                    server.name
                )));
            }
            let ServerKind::Mock { records, .. } = &server.kind;
            for record in records {
                check_name("remote record", &record.name)?;
            }
        }

        let mut motors = HashSet::new();
        for motor in &self.motors {
            check_name("motor", &motor.name)?;
            self.validate_axis(motor)?;
            self.validate_kind(motor, &motors, &servers)?;
            if !motors.insert(motor.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate motor name: '{}'",
                    motor.name
                )));
            }
        }

        Ok(())
    }

    fn validate_axis(&self, motor: &MotorDefinition) -> Result<(), ConfigError> {
        let axis = &motor.axis;
        if axis.scale == 0.0 || !axis.scale.is_finite() {
            return Err(ConfigError::ValidationError(format!(
                "Motor '{}': scale must be finite and non-zero, got {}",
                motor.name, axis.scale
            )));
        }
        if axis.negative_limit > axis.positive_limit {
            return Err(ConfigError::ValidationError(format!(
                "Motor '{}': negative limit {} is above positive limit {}",
                motor.name, axis.negative_limit, axis.positive_limit
            )));
        }
        Ok(())
    }

    fn validate_kind(
        &self,
        motor: &MotorDefinition,
        defined: &HashSet<&str>,
        servers: &HashSet<&str>,
    ) -> Result<(), ConfigError> {
        match &motor.kind {
            MotorKind::Network { server, .. } if !servers.contains(server.as_str()) => {
                return Err(ConfigError::ValidationError(format!(
                    "Network motor '{}' references unknown server '{}'",
                    motor.name, server
                )));
            }
            MotorKind::Slit {
                negative_motor,
                positive_motor,
                ..
            } if negative_motor == positive_motor => {
                return Err(ConfigError::ValidationError(format!(
                    "Slit motor '{}' uses '{}' for both blades",
                    motor.name, negative_motor
                )));
            }
            MotorKind::Translation { motors, .. } if motors.is_empty() => {
                return Err(ConfigError::ValidationError(format!(
                    "Translation motor '{}' has no motors",
                    motor.name
                )));
            }
            _ => {}
        }

        for sub_motor in motor.kind.sub_motors() {
            if !defined.contains(sub_motor) {
                return Err(ConfigError::ValidationError(format!(
                    "Motor '{}' references '{}', which is not defined before it",
                    motor.name, sub_motor
                )));
            }
        }
        Ok(())
    }
}

fn check_name(what: &str, name: &str) -> Result<(), ConfigError> {
    if RECORD_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "Invalid {} name '{}'",
            what, name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLIT: &str = r#"
        [[motors]]
        name = "s1_neg"
        type = "soft"
        position = -1.0

        [[motors]]
        name = "s1_pos"
        type = "soft"
        axis = { scale = 2.0, negative_limit = -10.0, positive_limit = 10.0 }

        [[motors]]
        name = "s1_width"
        type = "slit"
        negative_motor = "s1_neg"
        positive_motor = "s1_pos"
        slit_type = "width_opposite"
    "#;

    #[test]
    fn test_parse_slit_definition() {
        let config = MotorConfig::from_toml_str(SLIT).unwrap();
        assert_eq!(config.motors.len(), 3);
        assert_eq!(config.scan.poll_interval_ms, 10);
        assert_eq!(config.logging.level, "info");

        match &config.motors[0].kind {
            MotorKind::Soft(soft) => assert_eq!(soft.position, -1.0),
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(config.motors[1].axis.scale, 2.0);
        assert_eq!(config.motors[1].axis.positive_limit, 10.0);
        match &config.motors[2].kind {
            MotorKind::Slit { slit_type, simultaneous_start, .. } => {
                assert_eq!(*slit_type, SlitType::WidthOpposite);
                assert!(!simultaneous_start);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_rejects_forward_reference() {
        let text = r#"
            [[motors]]
            name = "stage"
            type = "translation"
            motors = ["a"]

            [[motors]]
            name = "a"
            type = "soft"
        "#;
        let err = MotorConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("not defined before it"));
    }

    #[test]
    fn test_rejects_same_blade() {
        let text = r#"
            [[motors]]
            name = "a"
            type = "soft"

            [[motors]]
            name = "gap"
            type = "slit"
            negative_motor = "a"
            positive_motor = "a"
            slit_type = "width_same"
        "#;
        assert!(matches!(
            MotorConfig::from_toml_str(text),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_bad_names_and_duplicates() {
        let bad_name = r#"
            [[motors]]
            name = "9lives"
            type = "soft"
        "#;
        assert!(MotorConfig::from_toml_str(bad_name).is_err());

        let duplicate = r#"
            [[motors]]
            name = "a"
            type = "soft"

            [[motors]]
            name = "a"
            type = "soft"
        "#;
        let err = MotorConfig::from_toml_str(duplicate).unwrap_err();
        assert!(err.to_string().contains("Duplicate motor name"));
    }

    #[test]
    fn test_rejects_zero_scale_and_inverted_limits() {
        let zero_scale = r#"
            [[motors]]
            name = "a"
            type = "soft"
            axis = { scale = 0.0 }
        "#;
        assert!(MotorConfig::from_toml_str(zero_scale).is_err());

        let inverted = r#"
            [[motors]]
            name = "a"
            type = "soft"
            axis = { negative_limit = 5.0, positive_limit = -5.0 }
        "#;
        assert!(MotorConfig::from_toml_str(inverted).is_err());
    }

    #[test]
    fn test_rejects_unknown_server_and_empty_translation() {
        let unknown_server = r#"
            [[motors]]
            name = "theta"
            type = "network"
            server = "nowhere"
            remote_record = "theta"
        "#;
        assert!(MotorConfig::from_toml_str(unknown_server).is_err());

        let empty = r#"
            [[motors]]
            name = "stage"
            type = "translation"
            motors = []
        "#;
        assert!(MotorConfig::from_toml_str(empty).is_err());
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let text = r#"
            [scan]
            poll_interval_ms = 0
        "#;
        assert!(MotorConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_mock_server_defaults() {
        let text = r#"
            [[servers]]
            name = "beamline"
            type = "mock"
            records = [{ name = "theta", pseudomotor = true }]
        "#;
        let config = MotorConfig::from_toml_str(text).unwrap();
        let ServerKind::Mock { version, records } = &config.servers[0].kind;
        assert_eq!(*version, 1_005_000);
        assert_eq!(records[0].mx_type, "soft_motor");
        assert!(records[0].pseudomotor);
        assert_eq!(records[0].scale, 1.0);
    }
}
