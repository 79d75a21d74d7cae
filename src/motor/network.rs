//! Motor served by a record on a remote control server.
//!
//! `NetworkMotor` translates every driver operation into gets and puts of
//! the remote record's fields. Field handles are resolved lazily on first
//! use, together with the remote record's flags, type, acceleration type
//! and scale. Both are kept in one [`BindState`] so a motor is either fully
//! bound or not bound at all.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::driver::{MotorDriver, StartFrame};
use super::parameter::{AccelerationType, Parameter, ParameterQuery, ParameterValue};
use super::status::{ExtendedStatus, MotorFlags, MotorStatus};
use crate::error::{MotorError, MotorResult};
use crate::remote::{FieldHandle, FieldValue, RemoteField, RemoteServer};

/// First remote version that serves the `status` and `extended_status`
/// fields.
pub const MX_VERSION_HAS_MOTOR_GET_STATUS: u64 = 1_005_000;

/// Driver type codes known locally, keyed by remote `mx_type` name.
static LOCAL_DRIVER_TYPES: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    HashMap::from([
        ("soft_motor", 1),
        ("network_motor", 2),
        ("slit_motor", 3),
        ("translation_mtr", 4),
        ("disabled_motor", 5),
        ("e500", 10),
        ("pmac_motor", 11),
        ("compumotor", 12),
        ("newport_esp", 13),
        ("smc24", 14),
    ])
});

/// Local type code for a remote driver name, if known.
pub fn local_driver_type(name: &str) -> Option<i64> {
    LOCAL_DRIVER_TYPES.get(name).copied()
}

/// Facts about the remote record fetched at bind time.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteInfo {
    pub motor_flags: MotorFlags,
    pub driver_name: String,
    /// Local code for `driver_name`, or -1 if unknown here.
    pub driver_type: i64,
    pub acceleration_type: AccelerationType,
    pub scale: f64,
}

#[derive(Debug)]
struct RemoteBinding {
    handles: HashMap<RemoteField, FieldHandle>,
    info: RemoteInfo,
}

impl RemoteBinding {
    fn handle(&self, field: RemoteField) -> MotorResult<&FieldHandle> {
        self.handles.get(&field).ok_or_else(|| {
            MotorError::CorruptState(format!("no handle for field '{}'", field.label()))
        })
    }
}

#[derive(Debug)]
enum BindState {
    Unbound,
    Bound(Arc<RemoteBinding>),
}

/// A motor whose driver runs on a remote server.
pub struct NetworkMotor {
    name: String,
    server: Arc<dyn RemoteServer>,
    remote_record: String,
    state: RwLock<BindState>,
}

impl std::fmt::Debug for NetworkMotor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMotor")
            .field("name", &self.name)
            .field("server", &self.server.name())
            .field("remote_record", &self.remote_record)
            .finish()
    }
}

impl NetworkMotor {
    /// Creates an unbound network motor for `remote_record` on `server`.
    pub fn new(name: impl Into<String>, server: Arc<dyn RemoteServer>, remote_record: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server,
            remote_record: remote_record.into(),
            state: RwLock::new(BindState::Unbound),
        }
    }

    /// Name of the record on the remote server.
    pub fn remote_record(&self) -> &str {
        &self.remote_record
    }

    /// Returns true once field handles have been resolved.
    pub async fn is_bound(&self) -> bool {
        matches!(*self.state.read().await, BindState::Bound(_))
    }

    /// Facts about the remote record, binding first if needed.
    pub async fn remote_info(&self) -> MotorResult<RemoteInfo> {
        Ok(self.ensure_bound().await?.info.clone())
    }

    async fn ensure_bound(&self) -> MotorResult<Arc<RemoteBinding>> {
        if let BindState::Bound(binding) = &*self.state.read().await {
            return Ok(Arc::clone(binding));
        }

        let mut state = self.state.write().await;
        if let BindState::Bound(binding) = &*state {
            return Ok(Arc::clone(binding));
        }

        let handles = self.resolve_fields().await?;
        let info = self.fetch_info(&handles).await?;
        info!(
            motor = %self.name,
            server = %self.server.name(),
            remote_record = %self.remote_record,
            remote_type = %info.driver_name,
            "bound network motor"
        );

        let binding = Arc::new(RemoteBinding { handles, info });
        *state = BindState::Bound(Arc::clone(&binding));
        Ok(binding)
    }

    async fn resolve_fields(&self) -> MotorResult<HashMap<RemoteField, FieldHandle>> {
        let mut handles = HashMap::with_capacity(RemoteField::ALL.len());
        for field in RemoteField::ALL {
            let name = field.qualified(&self.remote_record);
            let handle = self.server.resolve(&name).await.map_err(|e| match e {
                MotorError::NotFound(message) => MotorError::CorruptState(format!(
                    "Network motor '{}' cannot resolve '{}' on server '{}': {}",
                    self.name,
                    name,
                    self.server.name(),
                    message
                )),
                other => other,
            })?;
            handles.insert(field, handle);
        }
        Ok(handles)
    }

    async fn fetch_info(&self, handles: &HashMap<RemoteField, FieldHandle>) -> MotorResult<RemoteInfo> {
        let read = |field: RemoteField| {
            handles.get(&field).ok_or_else(|| {
                MotorError::CorruptState(format!("no handle for field '{}'", field.label()))
            })
        };

        let flag_bits = self.server.get(read(RemoteField::MotorFlags)?).await?.as_hex()?;
        let driver_name = self
            .server
            .get(read(RemoteField::MxType)?)
            .await?
            .as_str()?
            .to_string();
        let acceleration_type = AccelerationType::from_code(
            self.server
                .get(read(RemoteField::AccelerationType)?)
                .await?
                .as_int()?,
        );
        let scale = self.server.get(read(RemoteField::Scale)?).await?.as_f64()?;

        let driver_type = local_driver_type(&driver_name).unwrap_or(-1);
        if driver_type < 0 {
            debug!(motor = %self.name, remote_type = %driver_name, "remote driver type unknown locally");
        }

        Ok(RemoteInfo {
            motor_flags: MotorFlags::from_bits_retain(flag_bits as u32),
            driver_name,
            driver_type,
            acceleration_type,
            scale,
        })
    }

    async fn get_field(&self, field: RemoteField) -> MotorResult<FieldValue> {
        let binding = self.ensure_bound().await?;
        self.server.get(binding.handle(field)?).await
    }

    async fn put_field(&self, field: RemoteField, value: FieldValue) -> MotorResult<()> {
        let binding = self.ensure_bound().await?;
        self.server.put(binding.handle(field)?, value).await
    }

    async fn get_f64(&self, field: RemoteField) -> MotorResult<f64> {
        self.get_field(field).await?.as_f64()
    }

    async fn get_bool(&self, field: RemoteField) -> MotorResult<bool> {
        self.get_field(field).await?.as_bool()
    }

    /// Writes `input` to a compute field and reads back the answer.
    async fn compute(&self, field: RemoteField, input: Vec<f64>) -> MotorResult<Vec<f64>> {
        self.put_field(field, FieldValue::DoubleArray(input)).await?;
        Ok(self.get_field(field).await?.as_array()?.to_vec())
    }

    async fn compute_position(&self, field: RemoteField, input: f64) -> MotorResult<f64> {
        let flags = self.ensure_bound().await?.info.motor_flags;
        if !flags.contains(MotorFlags::IS_PSEUDOMOTOR)
            || flags.contains(MotorFlags::PSEUDOMOTOR_RECURSION_IS_NOT_NECESSARY)
        {
            return Ok(input);
        }

        let answer = self.compute(field, vec![input, 0.0]).await?;
        answer.get(1).copied().ok_or_else(|| {
            MotorError::NetworkIoError(format!(
                "Field '{}' returned {} values for network motor '{}'",
                field.qualified(&self.remote_record),
                answer.len(),
                self.name
            ))
        })
    }

    async fn uses_legacy_status(&self) -> MotorResult<bool> {
        Ok(self.server.remote_version().await? < MX_VERSION_HAS_MOTOR_GET_STATUS)
    }

    async fn legacy_status(&self) -> MotorResult<MotorStatus> {
        Ok(MotorStatus::traditional(
            self.get_bool(RemoteField::Busy).await?,
            self.get_bool(RemoteField::PositiveLimitHit).await?,
            self.get_bool(RemoteField::NegativeLimitHit).await?,
        ))
    }
}

#[async_trait]
impl MotorDriver for NetworkMotor {
    fn driver_name(&self) -> &'static str {
        "network_motor"
    }

    fn flags(&self) -> MotorFlags {
        MotorFlags::IS_REMOTE_MOTOR
    }

    async fn move_absolute(&self, raw_destination: f64) -> MotorResult<()> {
        self.put_field(RemoteField::Destination, FieldValue::Double(raw_destination))
            .await
    }

    async fn get_position(&self) -> MotorResult<f64> {
        self.get_f64(RemoteField::Position).await
    }

    async fn set_position(&self, raw_position: f64) -> MotorResult<()> {
        self.put_field(RemoteField::SetPosition, FieldValue::Double(raw_position))
            .await
    }

    async fn soft_abort(&self) -> MotorResult<()> {
        self.put_field(RemoteField::SoftAbort, FieldValue::Bool(true))
            .await
    }

    async fn immediate_abort(&self) -> MotorResult<()> {
        self.put_field(RemoteField::ImmediateAbort, FieldValue::Bool(true))
            .await
    }

    async fn is_busy(&self) -> MotorResult<bool> {
        self.get_bool(RemoteField::Busy).await
    }

    async fn positive_limit_hit(&self) -> MotorResult<bool> {
        self.get_bool(RemoteField::PositiveLimitHit).await
    }

    async fn negative_limit_hit(&self) -> MotorResult<bool> {
        self.get_bool(RemoteField::NegativeLimitHit).await
    }

    async fn find_home_position(&self, direction: i32) -> MotorResult<()> {
        self.put_field(RemoteField::HomeSearch, FieldValue::Int(i64::from(direction)))
            .await
    }

    async fn constant_velocity_move(&self, direction: i32) -> MotorResult<()> {
        self.put_field(
            RemoteField::ConstantVelocityMove,
            FieldValue::Int(i64::from(direction)),
        )
        .await
    }

    async fn get_parameter(&self, query: ParameterQuery) -> MotorResult<ParameterValue> {
        let value = match query {
            ParameterQuery::Speed => ParameterValue::Double(self.get_f64(RemoteField::Speed).await?),
            ParameterQuery::BaseSpeed => {
                ParameterValue::Double(self.get_f64(RemoteField::BaseSpeed).await?)
            }
            ParameterQuery::MaximumSpeed => {
                ParameterValue::Double(self.get_f64(RemoteField::MaximumSpeed).await?)
            }
            ParameterQuery::SynchronousMotionMode => {
                ParameterValue::Bool(self.get_bool(RemoteField::SynchronousMotionMode).await?)
            }
            ParameterQuery::RawAccelerationParameters => ParameterValue::Array(
                self.get_field(RemoteField::RawAccelerationParameters)
                    .await?
                    .as_array()?
                    .to_vec(),
            ),
            ParameterQuery::AccelerationType => ParameterValue::Int(
                self.ensure_bound().await?.info.acceleration_type.code(),
            ),
            ParameterQuery::AccelerationDistance => {
                ParameterValue::Double(self.get_f64(RemoteField::AccelerationDistance).await?)
            }
            ParameterQuery::AccelerationTime => {
                ParameterValue::Double(self.get_f64(RemoteField::AccelerationTime).await?)
            }
            ParameterQuery::ComputeExtendedScanRange { start, end } => {
                let answer = self
                    .compute(RemoteField::ComputeExtendedScanRange, vec![start, end])
                    .await?;
                match answer.as_slice() {
                    [.., extended_start, extended_end] => {
                        ParameterValue::Array(vec![*extended_start, *extended_end])
                    }
                    _ => {
                        return Err(MotorError::NetworkIoError(format!(
                            "Extended scan range for network motor '{}' returned {} values",
                            self.name,
                            answer.len()
                        )))
                    }
                }
            }
            ParameterQuery::ComputePseudomotorPosition(real) => ParameterValue::Double(
                self.compute_position(RemoteField::ComputePseudomotorPosition, real)
                    .await?,
            ),
            ParameterQuery::ComputeRealPosition(pseudo) => ParameterValue::Double(
                self.compute_position(RemoteField::ComputeRealPosition, pseudo)
                    .await?,
            ),
            ParameterQuery::Gain(gain) => {
                ParameterValue::Double(self.get_f64(RemoteField::for_gain(gain)).await?)
            }
        };
        Ok(value)
    }

    async fn set_parameter(&self, parameter: Parameter) -> MotorResult<()> {
        let (field, value) = match parameter {
            Parameter::Speed(v) => (RemoteField::Speed, FieldValue::Double(v)),
            Parameter::BaseSpeed(v) => (RemoteField::BaseSpeed, FieldValue::Double(v)),
            Parameter::MaximumSpeed(v) => (RemoteField::MaximumSpeed, FieldValue::Double(v)),
            Parameter::RawAccelerationParameters(params) => (
                RemoteField::RawAccelerationParameters,
                FieldValue::DoubleArray(params.to_vec()),
            ),
            Parameter::SpeedChoice { start, end, time } => (
                RemoteField::SpeedChoiceParameters,
                FieldValue::DoubleArray(vec![start, end, time]),
            ),
            Parameter::SaveSpeed => (RemoteField::SaveSpeed, FieldValue::Bool(true)),
            Parameter::RestoreSpeed => (RemoteField::RestoreSpeed, FieldValue::Bool(true)),
            Parameter::SynchronousMotionMode(on) => {
                (RemoteField::SynchronousMotionMode, FieldValue::Bool(on))
            }
            Parameter::AxisEnable(on) => (RemoteField::AxisEnable, FieldValue::Bool(on)),
            Parameter::ClosedLoop(on) => (RemoteField::ClosedLoop, FieldValue::Bool(on)),
            Parameter::FaultReset(on) => (RemoteField::FaultReset, FieldValue::Bool(on)),
            Parameter::Gain(gain, v) => (RemoteField::for_gain(gain), FieldValue::Double(v)),
        };
        debug!(motor = %self.name, field = %field.label(), ?value, "set remote parameter");
        self.put_field(field, value).await
    }

    async fn get_status(&self) -> MotorResult<MotorStatus> {
        if self.uses_legacy_status().await? {
            return self.legacy_status().await;
        }
        let bits = self.get_field(RemoteField::Status).await?.as_hex()?;
        Ok(MotorStatus::from_bits_retain(bits as u32))
    }

    async fn get_extended_status(&self) -> MotorResult<ExtendedStatus> {
        if self.uses_legacy_status().await? {
            let position = self.get_position().await?;
            let status = self.legacy_status().await?;
            return Ok(ExtendedStatus { position, status });
        }
        let text = self.get_field(RemoteField::ExtendedStatus).await?;
        ExtendedStatus::parse(text.as_str()?)
    }

    async fn save_start_positions(&self, raw_start: f64) -> MotorResult<StartFrame> {
        self.put_field(RemoteField::SaveStartPositions, FieldValue::Double(raw_start))
            .await?;
        Ok(StartFrame::Remote { start: raw_start })
    }

    async fn use_start_positions(&self, enabled: bool) -> MotorResult<()> {
        self.put_field(RemoteField::UseStartPositions, FieldValue::Bool(enabled))
            .await
    }

    async fn move_absolute_from(
        &self,
        frame: &StartFrame,
        raw_destination: f64,
    ) -> MotorResult<()> {
        match frame {
            StartFrame::Remote { .. } | StartFrame::Direct { .. } => {
                self.move_absolute(raw_destination).await
            }
            StartFrame::Frozen { .. } => Err(MotorError::CorruptState(format!(
                "Network motor '{}' was handed a pseudomotor start frame",
                self.name
            ))),
        }
    }

    async fn resynchronize(&self) -> MotorResult<()> {
        let binding = self.ensure_bound().await?;
        self.server
            .put(binding.handle(RemoteField::Resynchronize)?, FieldValue::Bool(true))
            .await?;

        let info = self.fetch_info(&binding.handles).await?;
        let refreshed = Arc::new(RemoteBinding {
            handles: binding.handles.clone(),
            info,
        });
        *self.state.write().await = BindState::Bound(refreshed);
        info!(motor = %self.name, "resynchronized network motor");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteRecordConfig;
    use crate::error::ErrorCode;
    use crate::remote::mock::RemoteCall;
    use crate::remote::MockServer;

    const CURRENT: u64 = MX_VERSION_HAS_MOTOR_GET_STATUS;

    fn remote(name: &str) -> RemoteRecordConfig {
        RemoteRecordConfig {
            name: name.to_string(),
            ..RemoteRecordConfig::default()
        }
    }

    fn motor_on(server: &Arc<MockServer>, record: &str) -> NetworkMotor {
        NetworkMotor::new("net", Arc::clone(server) as Arc<dyn RemoteServer>, record)
    }

    #[tokio::test]
    async fn test_move_and_read_back() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        let motor = motor_on(&server, "m1");

        motor.move_absolute(4.25).await.unwrap();
        assert_eq!(motor.get_position().await.unwrap(), 4.25);
        assert_eq!(
            server.writes_to("m1", RemoteField::Destination).await,
            vec![FieldValue::Double(4.25)]
        );
    }

    #[tokio::test]
    async fn test_binds_once() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        let motor = motor_on(&server, "m1");
        assert!(!motor.is_bound().await);

        motor.get_position().await.unwrap();
        motor.is_busy().await.unwrap();
        assert!(motor.is_bound().await);

        let resolves = server
            .calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, RemoteCall::Resolve(_)))
            .count();
        assert_eq!(resolves, RemoteField::ALL.len());
    }

    #[tokio::test]
    async fn test_unknown_remote_type() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&RemoteRecordConfig {
            name: "m1".to_string(),
            mx_type: "mystery_controller".to_string(),
            ..RemoteRecordConfig::default()
        }));
        let info = motor_on(&server, "m1").remote_info().await.unwrap();
        assert_eq!(info.driver_name, "mystery_controller");
        assert_eq!(info.driver_type, -1);

        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        let info = motor_on(&server, "m1").remote_info().await.unwrap();
        assert_eq!(info.driver_type, local_driver_type("soft_motor").unwrap());
    }

    #[tokio::test]
    async fn test_unresolved_record_is_corrupt_state() {
        let server = Arc::new(MockServer::new("srv", CURRENT));
        let motor = motor_on(&server, "missing");
        let err = motor.get_position().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptState);
        assert!(!motor.is_bound().await);
    }

    #[tokio::test]
    async fn test_legacy_server_uses_traditional_fields() {
        let server = Arc::new(MockServer::new("srv", CURRENT - 1).with_record(&remote("m1")));
        server
            .set_field("m1", RemoteField::NegativeLimitHit, FieldValue::Bool(true))
            .await
            .unwrap();
        let motor = motor_on(&server, "m1");

        let status = motor.get_status().await.unwrap();
        assert_eq!(status, MotorStatus::NEGATIVE_LIMIT_HIT);
        let extended = motor.get_extended_status().await.unwrap();
        assert_eq!(extended.status, MotorStatus::NEGATIVE_LIMIT_HIT);

        assert!(server.was_read("m1", RemoteField::Busy).await);
        assert!(!server.was_read("m1", RemoteField::Status).await);
        assert!(!server.was_read("m1", RemoteField::ExtendedStatus).await);
    }

    #[tokio::test]
    async fn test_current_server_reads_status_word() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        server
            .set_field("m1", RemoteField::Status, FieldValue::Hex(0x21))
            .await
            .unwrap();
        let motor = motor_on(&server, "m1");

        let status = motor.get_status().await.unwrap();
        assert_eq!(status, MotorStatus::IS_BUSY | MotorStatus::DRIVE_FAULT);
        assert!(!server.was_read("m1", RemoteField::Busy).await);
    }

    #[tokio::test]
    async fn test_extended_status_parse_failure() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        server
            .set_field(
                "m1",
                RemoteField::ExtendedStatus,
                FieldValue::String("garbage".to_string()),
            )
            .await
            .unwrap();
        let err = motor_on(&server, "m1").get_extended_status().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NetworkIoError);
    }

    #[tokio::test]
    async fn test_compute_skips_round_trip_for_real_motor() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        let motor = motor_on(&server, "m1");

        let value = motor
            .get_parameter(ParameterQuery::ComputePseudomotorPosition(3.0))
            .await
            .unwrap();
        assert_eq!(value, ParameterValue::Double(3.0));
        assert!(server
            .writes_to("m1", RemoteField::ComputePseudomotorPosition)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_compute_skips_round_trip_when_recursion_unneeded() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&RemoteRecordConfig {
            name: "p1".to_string(),
            pseudomotor: true,
            recursion_not_necessary: true,
            scale: 2.0,
            ..RemoteRecordConfig::default()
        }));
        let motor = motor_on(&server, "p1");

        let value = motor
            .get_parameter(ParameterQuery::ComputeRealPosition(3.0))
            .await
            .unwrap();
        assert_eq!(value, ParameterValue::Double(3.0));
        assert!(!server.was_read("p1", RemoteField::ComputeRealPosition).await);
    }

    #[tokio::test]
    async fn test_compute_round_trip_for_remote_pseudomotor() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&RemoteRecordConfig {
            name: "p1".to_string(),
            pseudomotor: true,
            scale: 2.0,
            ..RemoteRecordConfig::default()
        }));
        let motor = motor_on(&server, "p1");

        let pseudo = motor
            .get_parameter(ParameterQuery::ComputePseudomotorPosition(3.0))
            .await
            .unwrap();
        assert_eq!(pseudo, ParameterValue::Double(6.0));
        assert_eq!(
            server
                .writes_to("p1", RemoteField::ComputePseudomotorPosition)
                .await,
            vec![FieldValue::DoubleArray(vec![3.0, 0.0])]
        );
    }

    #[tokio::test]
    async fn test_parameter_fields() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        let motor = motor_on(&server, "m1");

        motor.set_parameter(Parameter::Speed(7.5)).await.unwrap();
        motor.set_parameter(Parameter::SaveSpeed).await.unwrap();
        motor
            .set_parameter(Parameter::SpeedChoice {
                start: 0.0,
                end: 10.0,
                time: 2.0,
            })
            .await
            .unwrap();

        assert_eq!(
            motor.get_parameter(ParameterQuery::Speed).await.unwrap(),
            ParameterValue::Double(7.5)
        );
        assert_eq!(
            server.writes_to("m1", RemoteField::SaveSpeed).await,
            vec![FieldValue::Bool(true)]
        );
        assert_eq!(
            server.writes_to("m1", RemoteField::SpeedChoiceParameters).await,
            vec![FieldValue::DoubleArray(vec![0.0, 10.0, 2.0])]
        );
    }

    #[tokio::test]
    async fn test_start_positions_are_forwarded() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        let motor = motor_on(&server, "m1");

        let frame = motor.save_start_positions(1.5).await.unwrap();
        assert_eq!(frame, StartFrame::Remote { start: 1.5 });
        motor.use_start_positions(true).await.unwrap();
        motor.move_absolute_from(&frame, 2.0).await.unwrap();

        assert_eq!(
            server.writes_to("m1", RemoteField::SaveStartPositions).await,
            vec![FieldValue::Double(1.5)]
        );
        assert_eq!(
            server.writes_to("m1", RemoteField::UseStartPositions).await,
            vec![FieldValue::Bool(true)]
        );
        assert_eq!(motor.get_position().await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_resynchronize_refreshes_info() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        let motor = motor_on(&server, "m1");
        assert_eq!(motor.remote_info().await.unwrap().scale, 1.0);

        server
            .set_field("m1", RemoteField::Scale, FieldValue::Double(0.5))
            .await
            .unwrap();
        motor.resynchronize().await.unwrap();

        assert_eq!(motor.remote_info().await.unwrap().scale, 0.5);
        assert_eq!(
            server.writes_to("m1", RemoteField::Resynchronize).await,
            vec![FieldValue::Bool(true)]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let server = Arc::new(MockServer::new("srv", CURRENT).with_record(&remote("m1")));
        server.fail_field("m1", RemoteField::Busy).await;
        let err = motor_on(&server, "m1").is_busy().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NetworkIoError);
    }
}
