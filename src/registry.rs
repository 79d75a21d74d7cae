//! Builds motor records from configuration.
//!
//! Servers are created first, then motors in definition order, so a
//! composite can only refer to motors defined above it. Each motor kind is
//! built by a factory looked up by its `type` tag.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::{MotorConfig, MotorDefinition, MotorKind, ServerKind};
use crate::error::{MotorError, MotorResult};
use crate::motor::{MotorDriver, MotorRecord, NetworkMotor, SlitMotor, SoftMotor, TranslationMotor};
use crate::remote::{MockServer, RemoteServer};

/// What a factory may look up while building a driver.
pub struct BuildContext<'a> {
    servers: &'a HashMap<String, Arc<dyn RemoteServer>>,
    records: &'a HashMap<String, Arc<MotorRecord>>,
}

impl BuildContext<'_> {
    fn server(&self, motor: &str, name: &str) -> MotorResult<Arc<dyn RemoteServer>> {
        self.servers.get(name).cloned().ok_or_else(|| {
            MotorError::CorruptState(format!(
                "Motor '{}' references server '{}', which does not exist",
                motor, name
            ))
        })
    }

    fn record(&self, motor: &str, name: &str) -> MotorResult<Arc<MotorRecord>> {
        self.records.get(name).cloned().ok_or_else(|| {
            MotorError::CorruptState(format!(
                "Motor '{}' references motor '{}', which is not defined before it",
                motor, name
            ))
        })
    }
}

type DriverFactory =
    Box<dyn Fn(&MotorDefinition, &BuildContext<'_>) -> MotorResult<Box<dyn MotorDriver>> + Send + Sync>;

fn wrong_kind(definition: &MotorDefinition, expected: &str) -> MotorError {
    MotorError::CorruptState(format!(
        "Motor '{}' of type '{}' was handed to the '{}' factory",
        definition.name,
        definition.kind.type_name(),
        expected
    ))
}

fn default_factories() -> HashMap<&'static str, DriverFactory> {
    let mut factories: HashMap<&'static str, DriverFactory> = HashMap::new();

    factories.insert(
        "soft",
        Box::new(|definition: &MotorDefinition, _: &BuildContext<'_>| match &definition.kind {
            MotorKind::Soft(config) => Ok(Box::new(SoftMotor::new(config)) as Box<dyn MotorDriver>),
            _ => Err(wrong_kind(definition, "soft")),
        }),
    );

    factories.insert(
        "network",
        Box::new(|definition: &MotorDefinition, context: &BuildContext<'_>| match &definition.kind {
            MotorKind::Network {
                server,
                remote_record,
            } => {
                let server = context.server(&definition.name, server)?;
                Ok(Box::new(NetworkMotor::new(
                    definition.name.clone(),
                    server,
                    remote_record.clone(),
                )) as Box<dyn MotorDriver>)
            }
            _ => Err(wrong_kind(definition, "network")),
        }),
    );

    factories.insert(
        "slit",
        Box::new(|definition: &MotorDefinition, context: &BuildContext<'_>| match &definition.kind {
            MotorKind::Slit {
                negative_motor,
                positive_motor,
                slit_type,
                simultaneous_start,
            } => {
                let negative = context.record(&definition.name, negative_motor)?;
                let positive = context.record(&definition.name, positive_motor)?;
                let slit = SlitMotor::new(definition.name.clone(), negative, positive, *slit_type)?
                    .with_simultaneous_start(*simultaneous_start)
                    .with_scale(definition.axis.scale);
                Ok(Box::new(slit) as Box<dyn MotorDriver>)
            }
            _ => Err(wrong_kind(definition, "slit")),
        }),
    );

    factories.insert(
        "translation",
        Box::new(|definition: &MotorDefinition, context: &BuildContext<'_>| match &definition.kind {
            MotorKind::Translation {
                motors,
                simultaneous_start,
            } => {
                let members = motors
                    .iter()
                    .map(|name| context.record(&definition.name, name))
                    .collect::<MotorResult<Vec<_>>>()?;
                let stage = TranslationMotor::new(definition.name.clone(), members)?
                    .with_simultaneous_start(*simultaneous_start);
                Ok(Box::new(stage) as Box<dyn MotorDriver>)
            }
            _ => Err(wrong_kind(definition, "translation")),
        }),
    );

    factories
}

/// The motor records of one configuration, by name.
pub struct MotorRegistry {
    servers: HashMap<String, Arc<dyn RemoteServer>>,
    records: HashMap<String, Arc<MotorRecord>>,
    order: Vec<String>,
}

impl std::fmt::Debug for MotorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorRegistry")
            .field("servers", &self.servers.keys().collect::<Vec<_>>())
            .field("motors", &self.order)
            .finish()
    }
}

impl MotorRegistry {
    /// Builds every server and motor in `config`.
    pub fn open(config: &MotorConfig) -> MotorResult<Self> {
        Self::open_with(config, HashMap::new())
    }

    /// Like [`open`](Self::open), with extra servers supplied by the caller.
    ///
    /// Servers named in `config` must not collide with `servers`.
    pub fn open_with(
        config: &MotorConfig,
        mut servers: HashMap<String, Arc<dyn RemoteServer>>,
    ) -> MotorResult<Self> {
        for definition in &config.servers {
            if servers.contains_key(&definition.name) {
                return Err(MotorError::IllegalArgument(format!(
                    "Server '{}' is defined twice",
                    definition.name
                )));
            }
            let server: Arc<dyn RemoteServer> = match &definition.kind {
                ServerKind::Mock { version, records } => {
                    Arc::new(MockServer::from_records(definition.name.clone(), *version, records))
                }
            };
            servers.insert(definition.name.clone(), server);
        }

        let factories = default_factories();
        let mut records: HashMap<String, Arc<MotorRecord>> = HashMap::new();
        let mut order = Vec::with_capacity(config.motors.len());

        for definition in &config.motors {
            if records.contains_key(&definition.name) {
                return Err(MotorError::IllegalArgument(format!(
                    "Motor '{}' is defined twice",
                    definition.name
                )));
            }
            let type_name = definition.kind.type_name();
            let factory = factories.get(type_name).ok_or_else(|| {
                MotorError::NotFound(format!("No driver factory for motor type '{}'", type_name))
            })?;

            let driver = {
                let context = BuildContext {
                    servers: &servers,
                    records: &records,
                };
                factory(definition, &context)?
            };
            let record = MotorRecord::new(definition.name.clone(), definition.axis.clone(), driver)?;
            info!(motor = %definition.name, driver = %record.driver_name(), "opened motor");

            records.insert(definition.name.clone(), Arc::new(record));
            order.push(definition.name.clone());
        }

        Ok(Self {
            servers,
            records,
            order,
        })
    }

    /// Looks a motor up by name.
    pub fn get(&self, name: &str) -> MotorResult<Arc<MotorRecord>> {
        self.records
            .get(name)
            .cloned()
            .ok_or_else(|| MotorError::NotFound(format!("Motor '{}' not found", name)))
    }

    /// Looks a server up by name.
    pub fn server(&self, name: &str) -> MotorResult<Arc<dyn RemoteServer>> {
        self.servers
            .get(name)
            .cloned()
            .ok_or_else(|| MotorError::NotFound(format!("Server '{}' not found", name)))
    }

    /// Motor names in definition order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Number of motors.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no motors are defined.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::motor::MotorFlags;

    fn config(text: &str) -> MotorConfig {
        MotorConfig::from_toml_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_opens_in_definition_order() {
        let registry = MotorRegistry::open(&config(
            r#"
            [[motors]]
            name = "a"
            type = "soft"
            position = 1.0

            [[motors]]
            name = "b"
            type = "soft"
            position = 3.0

            [[motors]]
            name = "stage"
            type = "translation"
            motors = ["a", "b"]
            "#,
        ))
        .unwrap();

        assert_eq!(registry.names(), vec!["a", "b", "stage"]);
        let stage = registry.get("stage").unwrap();
        assert!(stage.flags().contains(MotorFlags::IS_PSEUDOMOTOR));
        assert_eq!(stage.get_position().await.unwrap(), 2.0);
        assert_eq!(registry.get("nope").unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_unresolved_reference_is_corrupt_state() {
        // Bypasses validation to reach the registry's own check.
        let mut config = MotorConfig::default();
        config.motors.push(MotorDefinition {
            name: "theta".to_string(),
            axis: Default::default(),
            kind: MotorKind::Network {
                server: "missing".to_string(),
                remote_record: "theta".to_string(),
            },
        });
        let err = MotorRegistry::open(&config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptState);
    }

    #[tokio::test]
    async fn test_injected_server() {
        let server = Arc::new(MockServer::new("external", 1_005_000).with_record(
            &crate::config::RemoteRecordConfig {
                name: "theta".to_string(),
                position: 2.0,
                ..Default::default()
            },
        ));
        let mut config = MotorConfig::default();
        config.motors.push(MotorDefinition {
            name: "theta".to_string(),
            axis: Default::default(),
            kind: MotorKind::Network {
                server: "external".to_string(),
                remote_record: "theta".to_string(),
            },
        });
        let servers = HashMap::from([(
            "external".to_string(),
            server as Arc<dyn RemoteServer>,
        )]);

        let registry = MotorRegistry::open_with(&config, servers).unwrap();
        let theta = registry.get("theta").unwrap();
        assert_eq!(theta.driver_name(), "network_motor");
        assert_eq!(theta.get_position().await.unwrap(), 2.0);
    }
}
