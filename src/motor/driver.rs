//! The raw-unit driver interface shared by real motors and pseudomotors.
//!
//! A driver only ever sees raw units. Scale, offset and soft limits belong to
//! the [`MotorRecord`](super::MotorRecord) that owns it. Moves are started,
//! not awaited: `move_absolute` returns as soon as the motion is commanded and
//! callers poll `is_busy` (see [`wait_for_stop`](super::wait_for_stop)).

use async_trait::async_trait;

use super::parameter::{Parameter, ParameterQuery, ParameterValue};
use super::status::{ExtendedStatus, MotorFlags, MotorStatus};
use crate::error::{MotorError, MotorResult};

/// Reference frame frozen by `save_start_positions` for one scan.
///
/// Returned by the driver and handed back on every `move_absolute_from`
/// call, so the per-scan state lives with the scan rather than inside the
/// driver.
#[derive(Debug, Clone, PartialEq)]
pub enum StartFrame {
    /// A real motor: targets are absolute, nothing to freeze.
    Direct { start: f64 },
    /// A pseudomotor: sub-motor positions (in their user units) that
    /// correspond to `pseudomotor_start`.
    Frozen {
        pseudomotor_start: f64,
        sub_motor_starts: Vec<f64>,
    },
    /// The frame is held by the remote record that serves this motor.
    Remote { start: f64 },
}

impl StartFrame {
    /// Pseudomotor position the frame was saved for, in raw units.
    pub fn start(&self) -> f64 {
        match self {
            StartFrame::Direct { start } | StartFrame::Remote { start } => *start,
            StartFrame::Frozen {
                pseudomotor_start, ..
            } => *pseudomotor_start,
        }
    }
}

/// Operations every motor driver provides.
///
/// Default implementations reproduce the generic record layer: status is
/// synthesized from the busy and limit queries, and parameters a driver does
/// not understand are reported as `Unsupported`.
#[async_trait]
pub trait MotorDriver: Send + Sync {
    /// Driver type name, as reported in a remote record's `mx_type` field.
    fn driver_name(&self) -> &'static str;

    /// Capability flags for this motor.
    fn flags(&self) -> MotorFlags {
        MotorFlags::empty()
    }

    /// Starts a move to `raw_destination`. Does not wait for completion.
    async fn move_absolute(&self, raw_destination: f64) -> MotorResult<()>;

    /// Reads the current raw position.
    async fn get_position(&self) -> MotorResult<f64>;

    /// Redefines the current position as `raw_position` without moving.
    async fn set_position(&self, raw_position: f64) -> MotorResult<()>;

    /// Decelerates to a stop.
    async fn soft_abort(&self) -> MotorResult<()>;

    /// Stops as fast as the hardware allows.
    async fn immediate_abort(&self) -> MotorResult<()>;

    /// Returns true while the motor is moving.
    async fn is_busy(&self) -> MotorResult<bool>;

    /// Returns true if the positive hardware limit is tripped.
    async fn positive_limit_hit(&self) -> MotorResult<bool>;

    /// Returns true if the negative hardware limit is tripped.
    async fn negative_limit_hit(&self) -> MotorResult<bool>;

    /// Starts a home search; the sign of `direction` selects the side.
    async fn find_home_position(&self, direction: i32) -> MotorResult<()> {
        let _ = direction;
        Err(MotorError::Unsupported(format!(
            "'{}' motors do not support home searches",
            self.driver_name()
        )))
    }

    /// Starts an open-ended move; the sign of `direction` selects the side.
    async fn constant_velocity_move(&self, direction: i32) -> MotorResult<()> {
        let _ = direction;
        Err(MotorError::Unsupported(format!(
            "'{}' motors do not support constant velocity moves",
            self.driver_name()
        )))
    }

    /// Reads a parameter.
    async fn get_parameter(&self, query: ParameterQuery) -> MotorResult<ParameterValue> {
        Err(MotorError::Unsupported(format!(
            "Parameter '{}' is not supported by the '{}' driver",
            query,
            self.driver_name()
        )))
    }

    /// Writes a parameter.
    async fn set_parameter(&self, parameter: Parameter) -> MotorResult<()> {
        Err(MotorError::Unsupported(format!(
            "Parameter '{}' is not supported by the '{}' driver",
            parameter,
            self.driver_name()
        )))
    }

    /// Reads the combined status word.
    async fn get_status(&self) -> MotorResult<MotorStatus> {
        let busy = self.is_busy().await?;
        let positive = self.positive_limit_hit().await?;
        let negative = self.negative_limit_hit().await?;
        Ok(MotorStatus::traditional(busy, positive, negative))
    }

    /// Reads position and status together.
    async fn get_extended_status(&self) -> MotorResult<ExtendedStatus> {
        let position = self.get_position().await?;
        let status = self.get_status().await?;
        Ok(ExtendedStatus { position, status })
    }

    /// Freezes the frame for a scan starting at `raw_start`.
    async fn save_start_positions(&self, raw_start: f64) -> MotorResult<StartFrame> {
        Ok(StartFrame::Direct { start: raw_start })
    }

    /// Tells the motor whether later moves are relative to a saved frame.
    async fn use_start_positions(&self, enabled: bool) -> MotorResult<()> {
        let _ = enabled;
        Ok(())
    }

    /// Starts a move to `raw_destination`, deriving sub-motor targets from
    /// `frame` instead of from a live position read.
    async fn move_absolute_from(
        &self,
        frame: &StartFrame,
        raw_destination: f64,
    ) -> MotorResult<()> {
        let _ = frame;
        self.move_absolute(raw_destination).await
    }

    /// Re-reads any cached remote state.
    async fn resynchronize(&self) -> MotorResult<()> {
        Ok(())
    }
}
