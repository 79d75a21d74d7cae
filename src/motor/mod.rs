//! Motor records and coordinated moves.
//!
//! A [`MotorRecord`] pairs a named [`MotorDriver`] with its [`AxisSettings`]
//! and is the unit everything else works with: pseudomotors hold records of
//! their sub-motors, the registry hands out records, and the scan coordinator
//! steps records.
//!
//! # Units
//!
//! Callers of `MotorRecord` use user units. Drivers use raw units:
//!
//! ```text
//! user = raw * scale + offset
//! ```
//!
//! # Example
//!
//! ```no_run
//! use daq_pseudomotor::motor::{AxisSettings, MotorRecord, SoftMotor};
//!
//! # async fn demo() -> daq_pseudomotor::error::MotorResult<()> {
//! let record = MotorRecord::new("theta", AxisSettings::default(), Box::new(SoftMotor::at(0.0)))?;
//! record.move_absolute(2.5).await?;
//! assert_eq!(record.get_position().await?, 2.5);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod driver;
pub mod network;
pub mod parameter;
pub mod slit;
pub mod soft;
pub mod status;
pub mod translation;

pub use driver::{MotorDriver, StartFrame};
pub use network::NetworkMotor;
pub use parameter::{AccelerationType, Gain, Parameter, ParameterQuery, ParameterValue};
pub use slit::{SlitMotor, SlitType};
pub use soft::SoftMotor;
pub use status::{ExtendedStatus, MotorFlags, MotorStatus};
pub use translation::TranslationMotor;

use bitflags::bitflags;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{MotorError, MotorResult};

/// Poll interval used by blocking array moves.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// Axis settings
// =============================================================================

/// User-unit calibration and soft limits of one motor record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSettings {
    /// User units per raw unit.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// User-unit position of raw zero.
    #[serde(default)]
    pub offset: f64,
    /// Lowest allowed user position.
    #[serde(default = "default_negative_limit")]
    pub negative_limit: f64,
    /// Highest allowed user position.
    #[serde(default = "default_positive_limit")]
    pub positive_limit: f64,
    /// Moves shorter than this (user units) are skipped.
    #[serde(default)]
    pub move_deadband: f64,
    /// Unit label, for display only.
    #[serde(default = "default_units")]
    pub units: String,
}

fn default_scale() -> f64 {
    1.0
}

fn default_negative_limit() -> f64 {
    f64::NEG_INFINITY
}

fn default_positive_limit() -> f64 {
    f64::INFINITY
}

fn default_units() -> String {
    "mm".to_string()
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            offset: 0.0,
            negative_limit: default_negative_limit(),
            positive_limit: default_positive_limit(),
            move_deadband: 0.0,
            units: default_units(),
        }
    }
}

impl AxisSettings {
    /// Settings with the given soft limits and unit scale.
    pub fn with_limits(negative_limit: f64, positive_limit: f64) -> Self {
        Self {
            negative_limit,
            positive_limit,
            ..Self::default()
        }
    }

    /// Converts a user position to raw units.
    pub fn to_raw(&self, user: f64) -> f64 {
        (user - self.offset) / self.scale
    }

    /// Converts a raw position to user units.
    pub fn to_user(&self, raw: f64) -> f64 {
        raw * self.scale + self.offset
    }

    /// Converts a raw speed or distance to user units.
    fn magnitude_to_user(&self, raw: f64) -> f64 {
        raw * self.scale.abs()
    }

    /// Converts a user speed or distance to raw units.
    fn magnitude_to_raw(&self, user: f64) -> f64 {
        user / self.scale.abs()
    }
}

// =============================================================================
// Motor record
// =============================================================================

/// A named motor: driver plus calibration.
pub struct MotorRecord {
    name: String,
    axis: AxisSettings,
    driver: Box<dyn MotorDriver>,
}

impl std::fmt::Debug for MotorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorRecord")
            .field("name", &self.name)
            .field("driver", &self.driver.driver_name())
            .field("axis", &self.axis)
            .finish()
    }
}

impl MotorRecord {
    /// Creates a record. Fails on an empty name or a zero scale.
    pub fn new(
        name: impl Into<String>,
        axis: AxisSettings,
        driver: Box<dyn MotorDriver>,
    ) -> MotorResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(MotorError::NullArgument(
                "motor record name is empty".to_string(),
            ));
        }
        if axis.scale == 0.0 || !axis.scale.is_finite() {
            return Err(MotorError::IllegalArgument(format!(
                "motor '{}' has an unusable scale of {}",
                name, axis.scale
            )));
        }
        Ok(Self { name, axis, driver })
    }

    /// Record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calibration and soft limits.
    pub fn axis(&self) -> &AxisSettings {
        &self.axis
    }

    /// Driver type name.
    pub fn driver_name(&self) -> &'static str {
        self.driver.driver_name()
    }

    /// Capability flags reported by the driver.
    pub fn flags(&self) -> MotorFlags {
        self.driver.flags()
    }

    /// Fails with `WouldExceedLimit` if `position` is outside the soft limits.
    pub fn check_position_limits(&self, position: f64) -> MotorResult<()> {
        if position > self.axis.positive_limit || position < self.axis.negative_limit {
            return Err(MotorError::WouldExceedLimit(format!(
                "Requested position {} for motor '{}' is outside the allowed range of {} to {}",
                position, self.name, self.axis.negative_limit, self.axis.positive_limit
            )));
        }
        Ok(())
    }

    /// Starts a move to `position` without waiting for it to finish.
    pub async fn move_absolute(&self, position: f64) -> MotorResult<()> {
        self.check_position_limits(position)?;

        if self.axis.move_deadband > 0.0 {
            let current = self.get_position().await?;
            if (position - current).abs() <= self.axis.move_deadband {
                debug!(motor = %self.name, position, current, "move inside deadband skipped");
                return Ok(());
            }
        }

        debug!(motor = %self.name, position, "move_absolute");
        self.driver.move_absolute(self.axis.to_raw(position)).await
    }

    /// Starts a move to `position` relative to a frozen scan frame.
    pub async fn move_absolute_from(&self, frame: &StartFrame, position: f64) -> MotorResult<()> {
        self.check_position_limits(position)?;
        debug!(motor = %self.name, position, "move_absolute_from saved start");
        self.driver
            .move_absolute_from(frame, self.axis.to_raw(position))
            .await
    }

    /// Reads the current position.
    pub async fn get_position(&self) -> MotorResult<f64> {
        let raw = self.driver.get_position().await?;
        Ok(self.axis.to_user(raw))
    }

    /// Redefines the current position without moving.
    pub async fn set_position(&self, position: f64) -> MotorResult<()> {
        self.driver.set_position(self.axis.to_raw(position)).await
    }

    /// Decelerates to a stop.
    pub async fn soft_abort(&self) -> MotorResult<()> {
        self.driver.soft_abort().await
    }

    /// Stops immediately.
    pub async fn immediate_abort(&self) -> MotorResult<()> {
        self.driver.immediate_abort().await
    }

    /// Returns true while the motor is moving.
    pub async fn is_busy(&self) -> MotorResult<bool> {
        self.driver.is_busy().await
    }

    /// Returns true if the positive limit switch is tripped.
    pub async fn positive_limit_hit(&self) -> MotorResult<bool> {
        self.driver.positive_limit_hit().await
    }

    /// Returns true if the negative limit switch is tripped.
    pub async fn negative_limit_hit(&self) -> MotorResult<bool> {
        self.driver.negative_limit_hit().await
    }

    /// Starts a home search.
    pub async fn find_home_position(&self, direction: i32) -> MotorResult<()> {
        self.driver.find_home_position(direction).await
    }

    /// Starts a constant velocity move.
    pub async fn constant_velocity_move(&self, direction: i32) -> MotorResult<()> {
        self.driver.constant_velocity_move(direction).await
    }

    /// Reads the status word.
    pub async fn get_status(&self) -> MotorResult<MotorStatus> {
        self.driver.get_status().await
    }

    /// Reads position (user units) and status together.
    pub async fn get_extended_status(&self) -> MotorResult<ExtendedStatus> {
        let ext = self.driver.get_extended_status().await?;
        Ok(ExtendedStatus {
            position: self.axis.to_user(ext.position),
            status: ext.status,
        })
    }

    /// Reads a parameter. Speeds and distances come back in user units.
    ///
    /// Scan range bounds are converted both ways. The inputs and answers of
    /// the compute-position queries are driver units and pass through as is.
    pub async fn get_parameter(&self, query: ParameterQuery) -> MotorResult<ParameterValue> {
        let raw_query = match query {
            ParameterQuery::ComputeExtendedScanRange { start, end } => {
                ParameterQuery::ComputeExtendedScanRange {
                    start: self.axis.to_raw(start),
                    end: self.axis.to_raw(end),
                }
            }
            other => other,
        };
        let is_range = matches!(raw_query, ParameterQuery::ComputeExtendedScanRange { .. });
        let is_magnitude = matches!(
            raw_query,
            ParameterQuery::Speed
                | ParameterQuery::BaseSpeed
                | ParameterQuery::MaximumSpeed
                | ParameterQuery::AccelerationDistance
        );

        let value = self.driver.get_parameter(raw_query).await?;

        if is_magnitude {
            return Ok(ParameterValue::Double(
                self.axis.magnitude_to_user(value.as_f64()?),
            ));
        }
        if is_range {
            let range = value.as_array()?;
            return Ok(ParameterValue::Array(
                range.iter().map(|raw| self.axis.to_user(*raw)).collect(),
            ));
        }
        Ok(value)
    }

    /// Writes a parameter. Speeds and positions are taken in user units.
    pub async fn set_parameter(&self, parameter: Parameter) -> MotorResult<()> {
        let raw = match parameter {
            Parameter::Speed(v) => Parameter::Speed(self.axis.magnitude_to_raw(v)),
            Parameter::BaseSpeed(v) => Parameter::BaseSpeed(self.axis.magnitude_to_raw(v)),
            Parameter::MaximumSpeed(v) => Parameter::MaximumSpeed(self.axis.magnitude_to_raw(v)),
            Parameter::SpeedChoice { start, end, time } => Parameter::SpeedChoice {
                start: self.axis.to_raw(start),
                end: self.axis.to_raw(end),
                time,
            },
            other => other,
        };
        self.driver.set_parameter(raw).await
    }

    /// Reads the speed in user units per second.
    pub async fn get_speed(&self) -> MotorResult<f64> {
        self.get_parameter(ParameterQuery::Speed).await?.as_f64()
    }

    /// Sets the speed in user units per second.
    pub async fn set_speed(&self, speed: f64) -> MotorResult<()> {
        self.set_parameter(Parameter::Speed(speed)).await
    }

    /// Reads the base (start/stop) speed.
    pub async fn get_base_speed(&self) -> MotorResult<f64> {
        self.get_parameter(ParameterQuery::BaseSpeed).await?.as_f64()
    }

    /// Reads the distance covered while accelerating.
    pub async fn get_acceleration_distance(&self) -> MotorResult<f64> {
        self.get_parameter(ParameterQuery::AccelerationDistance)
            .await?
            .as_f64()
    }

    /// Reads the time spent accelerating.
    pub async fn get_acceleration_time(&self) -> MotorResult<f64> {
        self.get_parameter(ParameterQuery::AccelerationTime)
            .await?
            .as_f64()
    }

    /// Freezes a scan frame for a scan starting at `start`.
    pub async fn save_start_positions(&self, start: f64) -> MotorResult<StartFrame> {
        debug!(motor = %self.name, start, "save_start_positions");
        self.driver
            .save_start_positions(self.axis.to_raw(start))
            .await
    }

    /// Enables or disables start-position mode.
    pub async fn use_start_positions(&self, enabled: bool) -> MotorResult<()> {
        self.driver.use_start_positions(enabled).await
    }

    /// Re-reads cached remote state.
    pub async fn resynchronize(&self) -> MotorResult<()> {
        self.driver.resynchronize().await
    }
}

// =============================================================================
// Coordinated moves
// =============================================================================

bitflags! {
    /// Flags for [`array_move_absolute`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveFlags: u32 {
        /// Return once every motor has been started.
        const NOWAIT = 0x1;
        /// Issue all starts back to back instead of one after another.
        const SIMULTANEOUS_START = 0x2;
    }
}

/// Moves several motors to absolute positions.
///
/// All targets are checked against soft limits before any motor is started.
/// If a start fails, the motors already started are soft-aborted and the
/// original error is returned.
pub async fn array_move_absolute(
    records: &[Arc<MotorRecord>],
    positions: &[f64],
    flags: MoveFlags,
) -> MotorResult<()> {
    array_move(records, positions, None, flags).await
}

/// Like [`array_move_absolute`], but each motor derives its targets from a
/// frozen scan frame.
pub async fn array_move_from(
    records: &[Arc<MotorRecord>],
    frames: &[StartFrame],
    positions: &[f64],
    flags: MoveFlags,
) -> MotorResult<()> {
    if frames.len() != records.len() {
        return Err(MotorError::IllegalArgument(format!(
            "{} start frames supplied for {} motors",
            frames.len(),
            records.len()
        )));
    }
    array_move(records, positions, Some(frames), flags).await
}

async fn array_move(
    records: &[Arc<MotorRecord>],
    positions: &[f64],
    frames: Option<&[StartFrame]>,
    flags: MoveFlags,
) -> MotorResult<()> {
    if records.len() != positions.len() {
        return Err(MotorError::IllegalArgument(format!(
            "{} positions supplied for {} motors",
            positions.len(),
            records.len()
        )));
    }

    for (record, position) in records.iter().zip(positions) {
        record.check_position_limits(*position)?;
    }

    let start = |index: usize| async move {
        let record = &records[index];
        match frames {
            Some(frames) => record.move_absolute_from(&frames[index], positions[index]).await,
            None => record.move_absolute(positions[index]).await,
        }
    };

    if flags.contains(MoveFlags::SIMULTANEOUS_START) {
        let results = join_all((0..records.len()).map(start)).await;

        let mut started = Vec::with_capacity(records.len());
        let mut failure = None;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(()) => started.push(index),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            abort_started(records, &started).await;
            return Err(e);
        }
    } else {
        for index in 0..records.len() {
            if let Err(e) = start(index).await {
                let started: Vec<usize> = (0..index).collect();
                abort_started(records, &started).await;
                return Err(e);
            }
        }
    }

    if !flags.contains(MoveFlags::NOWAIT) {
        wait_for_all(records, DEFAULT_POLL_INTERVAL, None).await?;
    }
    Ok(())
}

async fn abort_started(records: &[Arc<MotorRecord>], started: &[usize]) {
    for &index in started {
        let record = &records[index];
        if let Err(e) = record.soft_abort().await {
            warn!(motor = %record.name(), error = %e, "soft abort after failed array move also failed");
        }
    }
}

/// Polls `record` until it reports not busy.
pub async fn wait_for_stop(
    record: &MotorRecord,
    poll_interval: Duration,
    timeout: Option<Duration>,
) -> MotorResult<()> {
    let poll = async {
        loop {
            if !record.is_busy().await? {
                return Ok(());
            }
            tokio::time::sleep(poll_interval).await;
        }
    };
    with_timeout(poll, timeout, record.name()).await
}

/// Polls every record until none reports busy.
pub async fn wait_for_all(
    records: &[Arc<MotorRecord>],
    poll_interval: Duration,
    timeout: Option<Duration>,
) -> MotorResult<()> {
    let poll = async {
        loop {
            let mut any_busy = false;
            for record in records {
                if record.is_busy().await? {
                    any_busy = true;
                }
            }
            if !any_busy {
                return Ok(());
            }
            tokio::time::sleep(poll_interval).await;
        }
    };
    let names: Vec<&str> = records.iter().map(|r| r.name()).collect();
    with_timeout(poll, timeout, &names.join(", ")).await
}

async fn with_timeout<F>(poll: F, timeout: Option<Duration>, what: &str) -> MotorResult<()>
where
    F: std::future::Future<Output = MotorResult<()>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, poll).await.map_err(|_| {
            MotorError::TimedOut(format!(
                "motor(s) '{}' still busy after {:?}",
                what, limit
            ))
        })?,
        None => poll.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoftMotorConfig;
    use crate::error::ErrorCode;

    fn soft(name: &str, position: f64) -> Arc<MotorRecord> {
        Arc::new(
            MotorRecord::new(name, AxisSettings::default(), Box::new(SoftMotor::at(position)))
                .unwrap(),
        )
    }

    #[test]
    fn test_rejects_zero_scale() {
        let axis = AxisSettings {
            scale: 0.0,
            ..AxisSettings::default()
        };
        let err = MotorRecord::new("bad", axis, Box::new(SoftMotor::at(0.0))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IllegalArgument);
    }

    #[tokio::test]
    async fn test_user_raw_conversion() {
        let axis = AxisSettings {
            scale: 0.5,
            offset: 10.0,
            ..AxisSettings::default()
        };
        let record = MotorRecord::new("m", axis, Box::new(SoftMotor::at(4.0))).unwrap();
        // raw 4.0 -> user 12.0
        assert_eq!(record.get_position().await.unwrap(), 12.0);
        record.move_absolute(11.0).await.unwrap();
        assert_eq!(record.get_position().await.unwrap(), 11.0);
    }

    #[tokio::test]
    async fn test_compute_queries_use_driver_units() {
        let axis = AxisSettings {
            scale: 0.5,
            offset: 10.0,
            ..AxisSettings::default()
        };
        let record = MotorRecord::new("m", axis, Box::new(SoftMotor::at(0.0))).unwrap();

        assert_eq!(
            record
                .get_parameter(ParameterQuery::ComputeRealPosition(3.0))
                .await
                .unwrap(),
            ParameterValue::Double(3.0)
        );
        assert_eq!(
            record
                .get_parameter(ParameterQuery::ComputePseudomotorPosition(-4.0))
                .await
                .unwrap(),
            ParameterValue::Double(-4.0)
        );
        assert_eq!(
            record
                .get_parameter(ParameterQuery::ComputeExtendedScanRange { start: 1.0, end: 5.0 })
                .await
                .unwrap(),
            ParameterValue::Array(vec![1.0, 5.0])
        );
    }

    #[tokio::test]
    async fn test_soft_limits() {
        let record = MotorRecord::new(
            "m",
            AxisSettings::with_limits(-1.0, 1.0),
            Box::new(SoftMotor::at(0.0)),
        )
        .unwrap();
        let err = record.move_absolute(1.5).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WouldExceedLimit);
        assert_eq!(record.get_position().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_speed_in_user_units() {
        let axis = AxisSettings {
            scale: -2.0,
            ..AxisSettings::default()
        };
        let record = MotorRecord::new("m", axis, Box::new(SoftMotor::at(0.0))).unwrap();
        record.set_speed(8.0).await.unwrap();
        assert_eq!(record.get_speed().await.unwrap(), 8.0);
    }

    #[tokio::test]
    async fn test_array_move_checks_all_limits_first() {
        let a = soft("a", 0.0);
        let b = Arc::new(
            MotorRecord::new(
                "b",
                AxisSettings::with_limits(-1.0, 1.0),
                Box::new(SoftMotor::at(0.0)),
            )
            .unwrap(),
        );
        let err = array_move_absolute(&[a.clone(), b.clone()], &[5.0, 5.0], MoveFlags::NOWAIT)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WouldExceedLimit);
        // Nothing started
        assert_eq!(a.get_position().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_array_move_aborts_started_motors_on_failure() {
        let slow = SoftMotor::new(&SoftMotorConfig {
            move_polls: 5,
            ..SoftMotorConfig::default()
        });
        let a = Arc::new(MotorRecord::new("a", AxisSettings::default(), Box::new(slow)).unwrap());
        let disabled = SoftMotor::at(0.0);
        disabled.set_parameter(Parameter::AxisEnable(false)).await.unwrap();
        let b = Arc::new(
            MotorRecord::new("b", AxisSettings::default(), Box::new(disabled)).unwrap(),
        );

        let err = array_move_absolute(&[a.clone(), b], &[3.0, 3.0], MoveFlags::NOWAIT)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeviceIoError);
        // The first motor was stopped where it stood.
        assert!(!a.is_busy().await.unwrap());
        assert_eq!(a.get_position().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_array_move_waits_unless_nowait() {
        let slow = SoftMotor::new(&SoftMotorConfig {
            move_polls: 3,
            ..SoftMotorConfig::default()
        });
        let a = Arc::new(MotorRecord::new("a", AxisSettings::default(), Box::new(slow)).unwrap());
        let b = soft("b", 0.0);

        array_move_absolute(
            &[a.clone(), b.clone()],
            &[1.0, 2.0],
            MoveFlags::SIMULTANEOUS_START,
        )
        .await
        .unwrap();
        assert_eq!(a.get_position().await.unwrap(), 1.0);
        assert_eq!(b.get_position().await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_wait_for_stop_times_out() {
        let record = soft("jog", 0.0);
        record.constant_velocity_move(1).await.unwrap();
        let err = wait_for_stop(
            &record,
            Duration::from_millis(1),
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TimedOut);
        record.soft_abort().await.unwrap();
        wait_for_stop(&record, Duration::from_millis(1), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deadband_skips_small_moves() {
        let axis = AxisSettings {
            move_deadband: 0.1,
            ..AxisSettings::default()
        };
        let record = MotorRecord::new("m", axis, Box::new(SoftMotor::at(1.0))).unwrap();
        record.move_absolute(1.05).await.unwrap();
        assert_eq!(record.get_position().await.unwrap(), 1.0);
        record.move_absolute(1.5).await.unwrap();
        assert_eq!(record.get_position().await.unwrap(), 1.5);
    }
}
