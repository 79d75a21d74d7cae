//! Closed parameter vocabulary for motor get/set dispatch.
//!
//! Reads go through [`ParameterQuery`] and writes through [`Parameter`]. Both
//! are exhaustive enums, so every driver's `match` is checked for coverage by
//! the compiler instead of falling through a numeric switch.
//!
//! Values are in raw (driver) units unless stated otherwise; the
//! [`MotorRecord`](crate::motor::MotorRecord) performs the user/raw
//! conversion for the speed and distance variants.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MotorError, MotorResult};

/// Number of raw acceleration parameters carried by a motor.
pub const NUM_ACCELERATION_PARAMS: usize = 4;

/// How `raw_acceleration_parameters[0]` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelerationType {
    /// The motor does not report acceleration.
    #[default]
    None,
    /// Parameter 0 is an acceleration rate in raw units/s².
    Rate,
    /// Parameter 0 is the time to reach full speed in seconds.
    Time,
}

impl AccelerationType {
    /// Code used on the wire by remote records.
    pub fn code(self) -> i64 {
        match self {
            AccelerationType::None => 0,
            AccelerationType::Rate => 1,
            AccelerationType::Time => 2,
        }
    }

    /// Decodes a wire code, treating unknown codes as `None`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => AccelerationType::Rate,
            2 => AccelerationType::Time,
            _ => AccelerationType::None,
        }
    }
}

/// Servo loop gains exposed by closed-loop controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gain {
    Proportional,
    Integral,
    Derivative,
    VelocityFeedforward,
    AccelerationFeedforward,
    IntegralLimit,
    Extra,
}

impl Gain {
    /// Every gain, in field-table order.
    pub const ALL: [Gain; 7] = [
        Gain::Proportional,
        Gain::Integral,
        Gain::Derivative,
        Gain::VelocityFeedforward,
        Gain::AccelerationFeedforward,
        Gain::IntegralLimit,
        Gain::Extra,
    ];
}

/// A parameter read request.
///
/// The `Compute*` variants carry their input, since the answer is a
/// function of it rather than stored state.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterQuery {
    Speed,
    BaseSpeed,
    MaximumSpeed,
    RawAccelerationParameters,
    AccelerationType,
    AccelerationDistance,
    AccelerationTime,
    SynchronousMotionMode,
    /// `[start, end]` of a scan; answers the range widened by the
    /// acceleration distance on both ends.
    ComputeExtendedScanRange { start: f64, end: f64 },
    /// Converts a real motor position to this motor's position.
    ComputePseudomotorPosition(f64),
    /// Converts this motor's position to the real motor position.
    ComputeRealPosition(f64),
    Gain(Gain),
}

/// A parameter write request.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Speed(f64),
    BaseSpeed(f64),
    MaximumSpeed(f64),
    RawAccelerationParameters([f64; NUM_ACCELERATION_PARAMS]),
    /// Selects the speed needed to cover `start..end` in `time` seconds.
    SpeedChoice { start: f64, end: f64, time: f64 },
    SaveSpeed,
    RestoreSpeed,
    SynchronousMotionMode(bool),
    AxisEnable(bool),
    ClosedLoop(bool),
    FaultReset(bool),
    Gain(Gain, f64),
}

/// Result of a parameter read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Double(f64),
    Bool(bool),
    Int(i64),
    Array(Vec<f64>),
}

impl ParameterValue {
    /// Returns the value as a double.
    pub fn as_f64(&self) -> MotorResult<f64> {
        match self {
            ParameterValue::Double(v) => Ok(*v),
            other => Err(MotorError::TypeMismatch(format!(
                "expected a double parameter value, got {:?}",
                other
            ))),
        }
    }

    /// Returns the value as a bool.
    pub fn as_bool(&self) -> MotorResult<bool> {
        match self {
            ParameterValue::Bool(v) => Ok(*v),
            other => Err(MotorError::TypeMismatch(format!(
                "expected a bool parameter value, got {:?}",
                other
            ))),
        }
    }

    /// Returns the value as an array of doubles.
    pub fn as_array(&self) -> MotorResult<&[f64]> {
        match self {
            ParameterValue::Array(v) => Ok(v),
            other => Err(MotorError::TypeMismatch(format!(
                "expected an array parameter value, got {:?}",
                other
            ))),
        }
    }
}

impl ParameterQuery {
    /// Field label of this parameter on a motor record.
    pub fn label(&self) -> &'static str {
        match self {
            ParameterQuery::Speed => "speed",
            ParameterQuery::BaseSpeed => "base_speed",
            ParameterQuery::MaximumSpeed => "maximum_speed",
            ParameterQuery::RawAccelerationParameters => "raw_acceleration_parameters",
            ParameterQuery::AccelerationType => "acceleration_type",
            ParameterQuery::AccelerationDistance => "acceleration_distance",
            ParameterQuery::AccelerationTime => "acceleration_time",
            ParameterQuery::SynchronousMotionMode => "synchronous_motion_mode",
            ParameterQuery::ComputeExtendedScanRange { .. } => "compute_extended_scan_range",
            ParameterQuery::ComputePseudomotorPosition(_) => "compute_pseudomotor_position",
            ParameterQuery::ComputeRealPosition(_) => "compute_real_position",
            ParameterQuery::Gain(gain) => gain.label(),
        }
    }
}

impl Parameter {
    /// Field label of this parameter on a motor record.
    pub fn label(&self) -> &'static str {
        match self {
            Parameter::Speed(_) => "speed",
            Parameter::BaseSpeed(_) => "base_speed",
            Parameter::MaximumSpeed(_) => "maximum_speed",
            Parameter::RawAccelerationParameters(_) => "raw_acceleration_parameters",
            Parameter::SpeedChoice { .. } => "speed_choice_parameters",
            Parameter::SaveSpeed => "save_speed",
            Parameter::RestoreSpeed => "restore_speed",
            Parameter::SynchronousMotionMode(_) => "synchronous_motion_mode",
            Parameter::AxisEnable(_) => "axis_enable",
            Parameter::ClosedLoop(_) => "closed_loop",
            Parameter::FaultReset(_) => "fault_reset",
            Parameter::Gain(gain, _) => gain.label(),
        }
    }
}

impl Gain {
    /// Field label of this gain on a motor record.
    pub fn label(self) -> &'static str {
        match self {
            Gain::Proportional => "proportional_gain",
            Gain::Integral => "integral_gain",
            Gain::Derivative => "derivative_gain",
            Gain::VelocityFeedforward => "velocity_feedforward_gain",
            Gain::AccelerationFeedforward => "acceleration_feedforward_gain",
            Gain::IntegralLimit => "integral_limit",
            Gain::Extra => "extra_gain",
        }
    }
}

impl fmt::Display for ParameterQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Shared arithmetic
// =============================================================================

/// Division that answers 0.0 instead of inf/NaN for a vanishing divisor.
pub fn divide_safely(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < f64::MIN_POSITIVE {
        0.0
    } else {
        numerator / denominator
    }
}

/// Speed needed to travel `start..end` in `time` seconds.
pub fn speed_for_move(start: f64, end: f64, time: f64) -> f64 {
    divide_safely(end - start, time).abs()
}

/// Time to ramp from `base_speed` to `speed`.
pub fn acceleration_time(
    acceleration_type: AccelerationType,
    speed: f64,
    base_speed: f64,
    params: &[f64; NUM_ACCELERATION_PARAMS],
) -> Option<f64> {
    match acceleration_type {
        AccelerationType::Rate => Some(divide_safely(speed - base_speed, params[0]).abs()),
        AccelerationType::Time => Some(params[0].abs()),
        AccelerationType::None => None,
    }
}

/// Distance covered while ramping from `base_speed` to `speed`.
pub fn acceleration_distance(
    acceleration_type: AccelerationType,
    speed: f64,
    base_speed: f64,
    params: &[f64; NUM_ACCELERATION_PARAMS],
) -> Option<f64> {
    let rate = match acceleration_type {
        AccelerationType::Rate => params[0],
        AccelerationType::Time => divide_safely(speed - base_speed, params[0]),
        AccelerationType::None => return None,
    };
    Some(divide_safely(speed * speed - base_speed * base_speed, 2.0 * rate).abs())
}

/// Widens `start..end` by `distance` at both ends, respecting direction.
pub fn extend_scan_range(start: f64, end: f64, distance: f64) -> [f64; 2] {
    if end >= start {
        [start - distance, end + distance]
    } else {
        [start + distance, end - distance]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divide_safely() {
        assert_eq!(divide_safely(1.0, 0.0), 0.0);
        assert_eq!(divide_safely(6.0, 3.0), 2.0);
    }

    #[test]
    fn test_acceleration_rate() {
        let params = [2.0, 0.0, 0.0, 0.0];
        // 0 -> 4 units/s at 2 units/s²: 2 s, 4 units
        assert_eq!(
            acceleration_time(AccelerationType::Rate, 4.0, 0.0, &params),
            Some(2.0)
        );
        assert_eq!(
            acceleration_distance(AccelerationType::Rate, 4.0, 0.0, &params),
            Some(4.0)
        );
    }

    #[test]
    fn test_acceleration_time_type() {
        let params = [0.5, 0.0, 0.0, 0.0];
        assert_eq!(
            acceleration_time(AccelerationType::Time, 10.0, 2.0, &params),
            Some(0.5)
        );
        // rate = 16 units/s², distance = (100 - 4) / 32
        assert_eq!(
            acceleration_distance(AccelerationType::Time, 10.0, 2.0, &params),
            Some(3.0)
        );
        assert_eq!(
            acceleration_distance(AccelerationType::None, 10.0, 2.0, &params),
            None
        );
    }

    #[test]
    fn test_extend_scan_range_both_directions() {
        assert_eq!(extend_scan_range(0.0, 10.0, 1.5), [-1.5, 11.5]);
        assert_eq!(extend_scan_range(10.0, 0.0, 1.5), [11.5, -1.5]);
    }

    #[test]
    fn test_speed_choice() {
        assert_eq!(speed_for_move(4.0, 1.0, 2.0), 1.5);
        assert_eq!(speed_for_move(4.0, 1.0, 0.0), 0.0);
    }

    #[test]
    fn test_value_type_mismatch() {
        let err = ParameterValue::Bool(true).as_f64().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::TypeMismatch);
    }
}
