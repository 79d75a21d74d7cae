//! In-memory remote server.
//!
//! Hosts motor records with the full remote field table, applies writes the
//! way a server-side motor would (a destination write moves the record, an
//! abort clears busy), and logs every exchange so tests can assert on what
//! crossed the wire.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

use super::{FieldHandle, FieldValue, RemoteField, RemoteServer};
use crate::config::RemoteRecordConfig;
use crate::error::{MotorError, MotorResult};
use crate::motor::parameter::{divide_safely, extend_scan_range, NUM_ACCELERATION_PARAMS};
use crate::motor::{Gain, MotorFlags, MotorStatus};

/// One exchange seen by a [`MockServer`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Resolve(String),
    Get(String),
    Put(String, FieldValue),
}

#[derive(Debug)]
struct MockRecord {
    values: HashMap<RemoteField, FieldValue>,
}

impl MockRecord {
    fn new(config: &RemoteRecordConfig) -> Self {
        let mut flags = MotorFlags::empty();
        flags.set(MotorFlags::IS_PSEUDOMOTOR, config.pseudomotor);
        flags.set(
            MotorFlags::PSEUDOMOTOR_RECURSION_IS_NOT_NECESSARY,
            config.recursion_not_necessary,
        );

        let mut values = HashMap::new();
        let mut put = |field, value| {
            values.insert(field, value);
        };
        put(RemoteField::Position, FieldValue::Double(config.position));
        put(RemoteField::Destination, FieldValue::Double(config.position));
        put(RemoteField::SetPosition, FieldValue::Double(config.position));
        put(RemoteField::Busy, FieldValue::Bool(false));
        put(RemoteField::PositiveLimitHit, FieldValue::Bool(false));
        put(RemoteField::NegativeLimitHit, FieldValue::Bool(false));
        put(RemoteField::MotorFlags, FieldValue::Hex(u64::from(flags.bits())));
        put(RemoteField::MxType, FieldValue::String(config.mx_type.clone()));
        put(
            RemoteField::AccelerationType,
            FieldValue::Int(config.acceleration_type.code()),
        );
        put(RemoteField::Scale, FieldValue::Double(config.scale));
        put(RemoteField::Speed, FieldValue::Double(config.speed));
        put(RemoteField::BaseSpeed, FieldValue::Double(0.0));
        put(RemoteField::MaximumSpeed, FieldValue::Double(config.speed));
        put(
            RemoteField::RawAccelerationParameters,
            FieldValue::DoubleArray(vec![0.0; NUM_ACCELERATION_PARAMS]),
        );
        put(RemoteField::AccelerationDistance, FieldValue::Double(0.0));
        put(RemoteField::AccelerationTime, FieldValue::Double(0.0));
        put(RemoteField::SynchronousMotionMode, FieldValue::Bool(false));
        put(RemoteField::SpeedChoiceParameters, FieldValue::DoubleArray(vec![0.0; 3]));
        put(RemoteField::SaveSpeed, FieldValue::Bool(false));
        put(RemoteField::RestoreSpeed, FieldValue::Bool(false));
        put(RemoteField::AxisEnable, FieldValue::Bool(true));
        put(RemoteField::ClosedLoop, FieldValue::Bool(true));
        put(RemoteField::FaultReset, FieldValue::Bool(false));
        put(RemoteField::SoftAbort, FieldValue::Bool(false));
        put(RemoteField::ImmediateAbort, FieldValue::Bool(false));
        put(RemoteField::Resynchronize, FieldValue::Bool(false));
        put(RemoteField::HomeSearch, FieldValue::Int(0));
        put(RemoteField::ConstantVelocityMove, FieldValue::Int(0));
        put(RemoteField::SaveStartPositions, FieldValue::Double(0.0));
        put(RemoteField::UseStartPositions, FieldValue::Bool(false));
        for field in [
            RemoteField::ComputeExtendedScanRange,
            RemoteField::ComputePseudomotorPosition,
            RemoteField::ComputeRealPosition,
        ] {
            put(field, FieldValue::DoubleArray(vec![0.0; 2]));
        }
        for gain in Gain::ALL {
            put(RemoteField::for_gain(gain), FieldValue::Double(0.0));
        }

        Self { values }
    }

    fn stored(&self, field: RemoteField) -> MotorResult<&FieldValue> {
        self.values
            .get(&field)
            .ok_or_else(|| MotorError::NotFound(format!("field '{}' has no value", field.label())))
    }

    fn status(&self) -> MotorResult<MotorStatus> {
        if let Some(value) = self.values.get(&RemoteField::Status) {
            return Ok(MotorStatus::from_bits_retain(value.as_hex()? as u32));
        }
        Ok(MotorStatus::traditional(
            self.stored(RemoteField::Busy)?.as_bool()?,
            self.stored(RemoteField::PositiveLimitHit)?.as_bool()?,
            self.stored(RemoteField::NegativeLimitHit)?.as_bool()?,
        ))
    }

    fn read(&self, field: RemoteField) -> MotorResult<FieldValue> {
        match field {
            RemoteField::Status => Ok(FieldValue::Hex(u64::from(self.status()?.bits()))),
            RemoteField::ExtendedStatus => {
                if let Some(value) = self.values.get(&field) {
                    return Ok(value.clone());
                }
                let position = self.stored(RemoteField::Position)?.as_f64()?;
                Ok(FieldValue::String(format!(
                    "{} {:x}",
                    position,
                    self.status()?.bits()
                )))
            }
            RemoteField::ComputePseudomotorPosition | RemoteField::ComputeRealPosition => {
                let scale = self.stored(RemoteField::Scale)?.as_f64()?;
                let input = self.stored(field)?.as_array()?.first().copied().unwrap_or(0.0);
                let output = if field == RemoteField::ComputePseudomotorPosition {
                    input * scale
                } else {
                    divide_safely(input, scale)
                };
                Ok(FieldValue::DoubleArray(vec![input, output]))
            }
            RemoteField::ComputeExtendedScanRange => {
                let range = self.stored(field)?.as_array()?;
                let distance = self.stored(RemoteField::AccelerationDistance)?.as_f64()?;
                match range {
                    [start, end, ..] => Ok(FieldValue::DoubleArray(
                        extend_scan_range(*start, *end, distance).to_vec(),
                    )),
                    _ => Err(MotorError::IllegalArgument(
                        "scan range needs a start and an end".to_string(),
                    )),
                }
            }
            other => self.stored(other).cloned(),
        }
    }

    fn write(&mut self, field: RemoteField, value: FieldValue) -> MotorResult<()> {
        match field {
            RemoteField::Destination | RemoteField::SetPosition => {
                let position = value.as_f64()?;
                self.values.insert(RemoteField::Position, FieldValue::Double(position));
            }
            RemoteField::SoftAbort | RemoteField::ImmediateAbort => {
                if value.as_bool()? {
                    self.values.insert(RemoteField::Busy, FieldValue::Bool(false));
                }
            }
            RemoteField::HomeSearch => {
                self.values.insert(RemoteField::Position, FieldValue::Double(0.0));
            }
            _ => {}
        }
        self.values.insert(field, value);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockInner {
    records: HashMap<String, MockRecord>,
    handles: Vec<(String, RemoteField)>,
    calls: Vec<RemoteCall>,
    failures: HashSet<(String, RemoteField)>,
}

impl MockInner {
    fn lookup(&self, handle: &FieldHandle) -> MotorResult<(String, RemoteField)> {
        usize::try_from(handle.id)
            .ok()
            .and_then(|id| self.handles.get(id))
            .cloned()
            .ok_or_else(|| {
                MotorError::NetworkIoError(format!("stale field handle '{}'", handle.name))
            })
    }

    fn check_failure(&self, record: &str, field: RemoteField) -> MotorResult<()> {
        if self.failures.contains(&(record.to_string(), field)) {
            return Err(MotorError::NetworkIoError(format!(
                "exchange with '{}' failed",
                field.qualified(record)
            )));
        }
        Ok(())
    }

    fn record_mut(&mut self, record: &str) -> MotorResult<&mut MockRecord> {
        self.records
            .get_mut(record)
            .ok_or_else(|| MotorError::NotFound(format!("record '{}' not found", record)))
    }
}

/// A remote server held entirely in memory.
#[derive(Debug)]
pub struct MockServer {
    name: String,
    version: u64,
    inner: Mutex<MockInner>,
}

impl MockServer {
    /// Creates an empty server announcing `version`.
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
            inner: Mutex::new(MockInner::default()),
        }
    }

    /// Creates a server hosting `records`.
    pub fn from_records(name: impl Into<String>, version: u64, records: &[RemoteRecordConfig]) -> Self {
        records
            .iter()
            .fold(Self::new(name, version), |server, record| server.with_record(record))
    }

    /// Adds a motor record.
    pub fn with_record(mut self, config: &RemoteRecordConfig) -> Self {
        self.inner
            .get_mut()
            .records
            .insert(config.name.clone(), MockRecord::new(config));
        self
    }

    /// Every exchange seen so far, oldest first.
    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Forgets the exchange log.
    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    /// Returns true if `record.field` was read.
    pub async fn was_read(&self, record: &str, field: RemoteField) -> bool {
        let name = field.qualified(record);
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .any(|call| matches!(call, RemoteCall::Get(n) if *n == name))
    }

    /// Values written to `record.field`, oldest first.
    pub async fn writes_to(&self, record: &str, field: RemoteField) -> Vec<FieldValue> {
        let name = field.qualified(record);
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Put(n, value) if *n == name => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Reads a field without logging the exchange.
    pub async fn field(&self, record: &str, field: RemoteField) -> MotorResult<FieldValue> {
        let mut inner = self.inner.lock().await;
        inner.record_mut(record)?.read(field)
    }

    /// Overwrites a field without logging or side effects.
    ///
    /// Setting `status` or `extended_status` replaces the computed value.
    pub async fn set_field(&self, record: &str, field: RemoteField, value: FieldValue) -> MotorResult<()> {
        let mut inner = self.inner.lock().await;
        inner.record_mut(record)?.values.insert(field, value);
        Ok(())
    }

    /// Makes every later exchange with `record.field` fail.
    pub async fn fail_field(&self, record: &str, field: RemoteField) {
        self.inner
            .lock()
            .await
            .failures
            .insert((record.to_string(), field));
    }
}

#[async_trait]
impl RemoteServer for MockServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn remote_version(&self) -> MotorResult<u64> {
        Ok(self.version)
    }

    async fn resolve(&self, field_name: &str) -> MotorResult<FieldHandle> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::Resolve(field_name.to_string()));

        let (record, label) = field_name.rsplit_once('.').ok_or_else(|| {
            MotorError::IllegalArgument(format!("'{}' is not a record field name", field_name))
        })?;
        if !inner.records.contains_key(record) {
            return Err(MotorError::NotFound(format!(
                "record '{}' not found on server '{}'",
                record, self.name
            )));
        }
        let field = RemoteField::from_label(label).ok_or_else(|| {
            MotorError::NotFound(format!("record '{}' has no field '{}'", record, label))
        })?;

        let id = inner.handles.len() as u64;
        inner.handles.push((record.to_string(), field));
        Ok(FieldHandle {
            id,
            name: field_name.to_string(),
        })
    }

    async fn get(&self, handle: &FieldHandle) -> MotorResult<FieldValue> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::Get(handle.name.clone()));
        let (record, field) = inner.lookup(handle)?;
        inner.check_failure(&record, field)?;
        inner.record_mut(&record)?.read(field)
    }

    async fn put(&self, handle: &FieldHandle, value: FieldValue) -> MotorResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::Put(handle.name.clone(), value.clone()));
        let (record, field) = inner.lookup(handle)?;
        inner.check_failure(&record, field)?;
        debug!(server = %self.name, field = %handle.name, ?value, "mock put");
        inner.record_mut(&record)?.write(field, value)
    }
}
