//! N-motor translation pseudomotor.
//!
//! Moves a group of motors together by the same signed distance. The logical
//! position is the mean of the member positions, so a move to `T` shifts
//! every member by `T - mean`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::aggregate::{fold_status, get_composite_parameter, set_composite_parameter};
use super::driver::{MotorDriver, StartFrame};
use super::parameter::{divide_safely, Parameter, ParameterQuery, ParameterValue};
use super::status::{MotorFlags, MotorStatus};
use super::{array_move_absolute, MotorRecord, MoveFlags};
use crate::error::{MotorError, MotorResult};

/// Translation pseudomotor over one or more motors.
pub struct TranslationMotor {
    name: String,
    motors: Vec<Arc<MotorRecord>>,
    simultaneous_start: bool,
}

#[derive(Clone, Copy)]
enum Limit {
    Positive,
    Negative,
}

impl TranslationMotor {
    /// Creates a translation motor. At least one member is required.
    pub fn new(name: impl Into<String>, motors: Vec<Arc<MotorRecord>>) -> MotorResult<Self> {
        let name = name.into();
        if motors.is_empty() {
            return Err(MotorError::IllegalArgument(format!(
                "translation motor '{}' has no motors",
                name
            )));
        }
        Ok(Self {
            name,
            motors,
            simultaneous_start: false,
        })
    }

    /// Requests back-to-back starts of all members.
    pub fn with_simultaneous_start(mut self, enabled: bool) -> Self {
        self.simultaneous_start = enabled;
        self
    }

    /// Member motors, in configuration order.
    pub fn motors(&self) -> &[Arc<MotorRecord>] {
        &self.motors
    }

    async fn member_positions(&self) -> MotorResult<Vec<f64>> {
        let mut positions = Vec::with_capacity(self.motors.len());
        for motor in &self.motors {
            positions.push(motor.get_position().await?);
        }
        Ok(positions)
    }

    fn mean(&self, positions: &[f64]) -> f64 {
        divide_safely(positions.iter().sum(), positions.len() as f64)
    }

    async fn move_members(&self, targets: &[f64]) -> MotorResult<()> {
        let mut flags = MoveFlags::NOWAIT;
        if self.simultaneous_start {
            flags |= MoveFlags::SIMULTANEOUS_START;
        }
        debug!(motor = %self.name, ?targets, "moving translation members");
        array_move_absolute(&self.motors, targets, flags).await
    }

    /// Checks every member, logging the first one at a limit.
    async fn any_limit_hit(&self, which: Limit) -> MotorResult<bool> {
        let mut first_hit: Option<&str> = None;
        for motor in &self.motors {
            let hit = match which {
                Limit::Positive => motor.positive_limit_hit().await?,
                Limit::Negative => motor.negative_limit_hit().await?,
            };
            if hit && first_hit.is_none() {
                first_hit = Some(motor.name());
                let side = match which {
                    Limit::Positive => "positive",
                    Limit::Negative => "negative",
                };
                warn!(
                    motor = %self.name,
                    sub_motor = %motor.name(),
                    "Motor '{}' has hit its {} limit",
                    motor.name(),
                    side
                );
            }
        }
        Ok(first_hit.is_some())
    }

    /// Runs an abort on every member and reports the last failure, if any.
    async fn abort_all(&self, immediate: bool) -> MotorResult<()> {
        let mut result = Ok(());
        for motor in &self.motors {
            let outcome = if immediate {
                motor.immediate_abort().await
            } else {
                motor.soft_abort().await
            };
            if let Err(e) = outcome {
                warn!(motor = %self.name, sub_motor = %motor.name(), error = %e, "abort failed");
                result = Err(e);
            }
        }
        result
    }
}

#[async_trait]
impl MotorDriver for TranslationMotor {
    fn driver_name(&self) -> &'static str {
        "translation_mtr"
    }

    fn flags(&self) -> MotorFlags {
        MotorFlags::IS_PSEUDOMOTOR
    }

    async fn move_absolute(&self, raw_destination: f64) -> MotorResult<()> {
        let positions = self.member_positions().await?;
        let delta = raw_destination - self.mean(&positions);
        let targets: Vec<f64> = positions.iter().map(|p| p + delta).collect();
        self.move_members(&targets).await
    }

    async fn move_absolute_from(
        &self,
        frame: &StartFrame,
        raw_destination: f64,
    ) -> MotorResult<()> {
        let (start, saved) = match frame {
            StartFrame::Frozen {
                pseudomotor_start,
                sub_motor_starts,
            } if sub_motor_starts.len() == self.motors.len() => {
                (*pseudomotor_start, sub_motor_starts)
            }
            other => {
                return Err(MotorError::CorruptState(format!(
                    "translation motor '{}' was handed a start frame it did not save: {:?}",
                    self.name, other
                )))
            }
        };
        let delta = raw_destination - start;
        let targets: Vec<f64> = saved.iter().map(|s| s + delta).collect();
        self.move_members(&targets).await
    }

    async fn get_position(&self) -> MotorResult<f64> {
        let positions = self.member_positions().await?;
        Ok(self.mean(&positions))
    }

    async fn set_position(&self, raw_position: f64) -> MotorResult<()> {
        let positions = self.member_positions().await?;
        let delta = raw_position - self.mean(&positions);
        let targets: Vec<f64> = positions.iter().map(|p| p + delta).collect();

        for (motor, target) in self.motors.iter().zip(&targets) {
            motor.check_position_limits(*target)?;
        }
        for (motor, target) in self.motors.iter().zip(&targets) {
            motor.set_position(*target).await?;
        }
        Ok(())
    }

    async fn soft_abort(&self) -> MotorResult<()> {
        self.abort_all(false).await
    }

    async fn immediate_abort(&self) -> MotorResult<()> {
        self.abort_all(true).await
    }

    async fn is_busy(&self) -> MotorResult<bool> {
        let mut busy = false;
        for motor in &self.motors {
            if motor.is_busy().await? {
                busy = true;
            }
        }
        Ok(busy)
    }

    async fn positive_limit_hit(&self) -> MotorResult<bool> {
        self.any_limit_hit(Limit::Positive).await
    }

    async fn negative_limit_hit(&self) -> MotorResult<bool> {
        self.any_limit_hit(Limit::Negative).await
    }

    async fn constant_velocity_move(&self, direction: i32) -> MotorResult<()> {
        debug!(motor = %self.name, direction, "constant velocity move on every member");
        for motor in &self.motors {
            motor.constant_velocity_move(direction).await?;
        }
        Ok(())
    }

    /// Limit bits pass through from any member.
    async fn get_status(&self) -> MotorResult<MotorStatus> {
        const LIMITS: MotorStatus =
            MotorStatus::POSITIVE_LIMIT_HIT.union(MotorStatus::NEGATIVE_LIMIT_HIT);

        let mut statuses = Vec::with_capacity(self.motors.len());
        for motor in &self.motors {
            statuses.push(motor.get_status().await?);
        }
        let limits = statuses
            .iter()
            .fold(MotorStatus::empty(), |acc, status| acc | (*status & LIMITS));
        Ok(fold_status(&statuses) | limits)
    }

    async fn get_parameter(&self, query: ParameterQuery) -> MotorResult<ParameterValue> {
        get_composite_parameter(&self.name, &self.motors, query).await
    }

    async fn set_parameter(&self, parameter: Parameter) -> MotorResult<()> {
        set_composite_parameter(&self.name, &self.motors, parameter).await
    }

    async fn save_start_positions(&self, raw_start: f64) -> MotorResult<StartFrame> {
        let positions = self.member_positions().await?;
        let difference = raw_start - self.mean(&positions);
        let saved: Vec<f64> = positions.iter().map(|p| p + difference).collect();

        debug!(
            motor = %self.name,
            pseudomotor_start = raw_start,
            difference,
            ?saved,
            "saved translation start positions"
        );

        Ok(StartFrame::Frozen {
            pseudomotor_start: raw_start,
            sub_motor_starts: saved,
        })
    }
}
