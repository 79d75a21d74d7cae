//! Simulated motor
//!
//! `SoftMotor` is a real motor with no hardware behind it. It keeps every
//! parameter a physical controller would, derives acceleration distance and
//! time from them, and lets tests inject limit switches and fault bits.
//!
//! Moves complete either instantly (`move_polls = 0`) or after the given
//! number of `is_busy` polls, which is enough to exercise the caller-driven
//! polling used by pseudomotors and scans.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::driver::MotorDriver;
use super::parameter::{
    acceleration_distance, acceleration_time, extend_scan_range, speed_for_move,
    AccelerationType, Gain, Parameter, ParameterQuery, ParameterValue, NUM_ACCELERATION_PARAMS,
};
use super::status::MotorStatus;
use crate::config::SoftMotorConfig;
use crate::error::{MotorError, MotorResult};

#[derive(Debug)]
struct SoftState {
    position: f64,
    destination: f64,
    busy_polls_remaining: u32,
    jog_direction: Option<i32>,
    speed: f64,
    base_speed: f64,
    maximum_speed: f64,
    saved_speed: Option<f64>,
    acceleration_parameters: [f64; NUM_ACCELERATION_PARAMS],
    synchronous_motion_mode: bool,
    gains: HashMap<Gain, f64>,
    axis_enabled: bool,
    closed_loop: bool,
    positive_limit: bool,
    negative_limit: bool,
    extra_status: MotorStatus,
}

/// Simulated motor axis.
#[derive(Clone)]
pub struct SoftMotor {
    state: Arc<Mutex<SoftState>>,
    acceleration_type: AccelerationType,
    move_polls: u32,
}

impl SoftMotor {
    /// Creates a simulated motor from its configuration.
    pub fn new(config: &SoftMotorConfig) -> Self {
        let state = SoftState {
            position: config.position,
            destination: config.position,
            busy_polls_remaining: 0,
            jog_direction: None,
            speed: config.speed,
            base_speed: config.base_speed,
            maximum_speed: config.maximum_speed,
            saved_speed: None,
            acceleration_parameters: config.acceleration_parameters,
            synchronous_motion_mode: false,
            gains: HashMap::new(),
            axis_enabled: true,
            closed_loop: true,
            positive_limit: false,
            negative_limit: false,
            extra_status: MotorStatus::empty(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            acceleration_type: config.acceleration_type,
            move_polls: config.move_polls,
        }
    }

    /// Instant-move motor at `position` with default parameters.
    pub fn at(position: f64) -> Self {
        Self::new(&SoftMotorConfig {
            position,
            ..SoftMotorConfig::default()
        })
    }

    /// Trips or clears the limit switches.
    pub async fn set_limit_switches(&self, positive: bool, negative: bool) {
        let mut state = self.state.lock().await;
        state.positive_limit = positive;
        state.negative_limit = negative;
    }

    /// Sets status bits beyond busy and the limit switches.
    pub async fn set_extra_status(&self, status: MotorStatus) {
        self.state.lock().await.extra_status = status;
    }

    fn stop(state: &mut SoftState) {
        state.busy_polls_remaining = 0;
        state.jog_direction = None;
        state.destination = state.position;
    }
}

#[async_trait]
impl MotorDriver for SoftMotor {
    fn driver_name(&self) -> &'static str {
        "soft_motor"
    }

    async fn move_absolute(&self, raw_destination: f64) -> MotorResult<()> {
        let mut state = self.state.lock().await;
        if !state.axis_enabled {
            return Err(MotorError::DeviceIoError(
                "cannot move a disabled axis".to_string(),
            ));
        }
        state.destination = raw_destination;
        if self.move_polls == 0 {
            state.position = raw_destination;
        } else {
            state.busy_polls_remaining = self.move_polls;
        }
        debug!(destination = raw_destination, "soft motor move started");
        Ok(())
    }

    async fn get_position(&self) -> MotorResult<f64> {
        Ok(self.state.lock().await.position)
    }

    async fn set_position(&self, raw_position: f64) -> MotorResult<()> {
        let mut state = self.state.lock().await;
        state.position = raw_position;
        state.destination = raw_position;
        Ok(())
    }

    async fn soft_abort(&self) -> MotorResult<()> {
        Self::stop(&mut *self.state.lock().await);
        Ok(())
    }

    async fn immediate_abort(&self) -> MotorResult<()> {
        Self::stop(&mut *self.state.lock().await);
        Ok(())
    }

    async fn is_busy(&self) -> MotorResult<bool> {
        let mut state = self.state.lock().await;
        if state.jog_direction.is_some() {
            return Ok(true);
        }
        if state.busy_polls_remaining > 0 {
            state.busy_polls_remaining -= 1;
            return Ok(true);
        }
        state.position = state.destination;
        Ok(false)
    }

    async fn positive_limit_hit(&self) -> MotorResult<bool> {
        Ok(self.state.lock().await.positive_limit)
    }

    async fn negative_limit_hit(&self) -> MotorResult<bool> {
        Ok(self.state.lock().await.negative_limit)
    }

    async fn find_home_position(&self, direction: i32) -> MotorResult<()> {
        let mut state = self.state.lock().await;
        debug!(direction, "soft motor home search");
        state.position = 0.0;
        state.destination = 0.0;
        state.extra_status |= MotorStatus::HOME_SEARCH_SUCCEEDED;
        Ok(())
    }

    async fn constant_velocity_move(&self, direction: i32) -> MotorResult<()> {
        if direction == 0 {
            return Err(MotorError::IllegalArgument(
                "constant velocity move direction must be non-zero".to_string(),
            ));
        }
        self.state.lock().await.jog_direction = Some(direction.signum());
        Ok(())
    }

    async fn get_status(&self) -> MotorResult<MotorStatus> {
        let busy = self.is_busy().await?;
        let state = self.state.lock().await;
        let mut status =
            MotorStatus::traditional(busy, state.positive_limit, state.negative_limit)
                | state.extra_status;
        status.set(MotorStatus::AXIS_DISABLED, !state.axis_enabled);
        status.set(MotorStatus::OPEN_LOOP, !state.closed_loop);
        Ok(status)
    }

    async fn get_parameter(&self, query: ParameterQuery) -> MotorResult<ParameterValue> {
        let state = self.state.lock().await;
        let accel = || -> MotorResult<f64> {
            acceleration_distance(
                self.acceleration_type,
                state.speed,
                state.base_speed,
                &state.acceleration_parameters,
            )
            .ok_or_else(|| {
                MotorError::Unsupported(
                    "acceleration distance needs an acceleration type".to_string(),
                )
            })
        };

        let value = match query {
            ParameterQuery::Speed => ParameterValue::Double(state.speed),
            ParameterQuery::BaseSpeed => ParameterValue::Double(state.base_speed),
            ParameterQuery::MaximumSpeed => ParameterValue::Double(state.maximum_speed),
            ParameterQuery::RawAccelerationParameters => {
                ParameterValue::Array(state.acceleration_parameters.to_vec())
            }
            ParameterQuery::AccelerationType => {
                ParameterValue::Int(self.acceleration_type.code())
            }
            ParameterQuery::AccelerationDistance => ParameterValue::Double(accel()?),
            ParameterQuery::AccelerationTime => ParameterValue::Double(
                acceleration_time(
                    self.acceleration_type,
                    state.speed,
                    state.base_speed,
                    &state.acceleration_parameters,
                )
                .ok_or_else(|| {
                    MotorError::Unsupported(
                        "acceleration time needs an acceleration type".to_string(),
                    )
                })?,
            ),
            ParameterQuery::SynchronousMotionMode => {
                ParameterValue::Bool(state.synchronous_motion_mode)
            }
            ParameterQuery::ComputeExtendedScanRange { start, end } => {
                let distance = accel().unwrap_or(0.0);
                ParameterValue::Array(extend_scan_range(start, end, distance).to_vec())
            }
            ParameterQuery::ComputePseudomotorPosition(real) => ParameterValue::Double(real),
            ParameterQuery::ComputeRealPosition(pseudo) => ParameterValue::Double(pseudo),
            ParameterQuery::Gain(gain) => {
                ParameterValue::Double(state.gains.get(&gain).copied().unwrap_or(0.0))
            }
        };
        Ok(value)
    }

    async fn set_parameter(&self, parameter: Parameter) -> MotorResult<()> {
        let mut state = self.state.lock().await;
        match parameter {
            Parameter::Speed(speed) => state.speed = speed,
            Parameter::BaseSpeed(speed) => state.base_speed = speed,
            Parameter::MaximumSpeed(speed) => state.maximum_speed = speed,
            Parameter::RawAccelerationParameters(params) => {
                state.acceleration_parameters = params
            }
            Parameter::SpeedChoice { start, end, time } => {
                state.speed = speed_for_move(start, end, time)
            }
            Parameter::SaveSpeed => state.saved_speed = Some(state.speed),
            Parameter::RestoreSpeed => match state.saved_speed {
                Some(speed) => state.speed = speed,
                None => {
                    return Err(MotorError::IllegalArgument(
                        "restore_speed requested before save_speed".to_string(),
                    ))
                }
            },
            Parameter::SynchronousMotionMode(enabled) => state.synchronous_motion_mode = enabled,
            Parameter::AxisEnable(enabled) => {
                state.axis_enabled = enabled;
                if !enabled {
                    Self::stop(&mut state);
                }
            }
            Parameter::ClosedLoop(closed) => state.closed_loop = closed,
            Parameter::FaultReset(reset) => {
                if reset {
                    state
                        .extra_status
                        .remove(MotorStatus::DRIVE_FAULT | MotorStatus::FOLLOWING_ERROR);
                }
            }
            Parameter::Gain(gain, value) => {
                state.gains.insert(gain, value);
            }
        }
        Ok(())
    }
}
