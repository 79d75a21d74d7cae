//! Folding sub-motor answers into one pseudomotor answer.
//!
//! Three concerns live here because slit and translation motors share them:
//!
//! - status folding (busy, faults, home search) across sub-motors
//! - the slit limit-switch remapping table, as an explicit lookup
//! - the parameter policy for pseudomotors built from several motors

use std::sync::Arc;
use tracing::debug;

use super::parameter::{extend_scan_range, Parameter, ParameterQuery, ParameterValue};
use super::slit::SlitType;
use super::status::MotorStatus;
use super::MotorRecord;
use crate::error::{MotorError, MotorResult};

// =============================================================================
// Status folding
// =============================================================================

/// Bits that are set on the composite if any sub-motor sets them.
const ANY_OF: MotorStatus = MotorStatus::IS_BUSY
    .union(MotorStatus::FOLLOWING_ERROR)
    .union(MotorStatus::DRIVE_FAULT)
    .union(MotorStatus::AXIS_DISABLED);

/// Bits that are set on the composite only if every sub-motor sets them.
const ALL_OF: MotorStatus = MotorStatus::HOME_SEARCH_SUCCEEDED;

/// Folds sub-motor status words, ignoring the limit bits.
///
/// Limit bits depend on geometry and are handled by [`LimitRemap`].
pub fn fold_status(statuses: &[MotorStatus]) -> MotorStatus {
    let mut any = MotorStatus::empty();
    let mut all = if statuses.is_empty() {
        MotorStatus::empty()
    } else {
        ALL_OF
    };
    for status in statuses {
        any |= *status & ANY_OF;
        all &= *status;
    }
    any | (all & ALL_OF)
}

// =============================================================================
// Slit limit remapping
// =============================================================================

/// Which blade of a slit a bit is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blade {
    Negative,
    Positive,
}

/// Sources of the composite limit bits for one slit type.
///
/// Each composite limit is the OR of two (blade, bit) sources. A negative
/// composite scale swaps the composite's positive and negative limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitRemap {
    pub positive_from: [(Blade, MotorStatus); 2],
    pub negative_from: [(Blade, MotorStatus); 2],
}

impl LimitRemap {
    /// Looks up the remapping for a slit type.
    pub fn for_slit(slit_type: SlitType) -> Self {
        use Blade::{Negative, Positive};
        const POS: MotorStatus = MotorStatus::POSITIVE_LIMIT_HIT;
        const NEG: MotorStatus = MotorStatus::NEGATIVE_LIMIT_HIT;

        match slit_type {
            // Both blades move the same way as the composite.
            SlitType::CenterSame | SlitType::WidthOpposite => LimitRemap {
                positive_from: [(Positive, POS), (Negative, POS)],
                negative_from: [(Positive, NEG), (Negative, NEG)],
            },
            // The negative blade moves against the composite.
            SlitType::WidthSame | SlitType::CenterOpposite => LimitRemap {
                positive_from: [(Positive, POS), (Negative, NEG)],
                negative_from: [(Positive, NEG), (Negative, POS)],
            },
        }
    }

    /// Computes the composite limit bits from the blade status words.
    pub fn apply(&self, negative: MotorStatus, positive: MotorStatus, scale: f64) -> MotorStatus {
        let read = |(blade, bit): (Blade, MotorStatus)| match blade {
            Blade::Negative => negative.contains(bit),
            Blade::Positive => positive.contains(bit),
        };
        let towards_positive = self.positive_from.into_iter().any(read);
        let towards_negative = self.negative_from.into_iter().any(read);

        let (positive_hit, negative_hit) = if scale >= 0.0 {
            (towards_positive, towards_negative)
        } else {
            (towards_negative, towards_positive)
        };

        let mut status = MotorStatus::empty();
        status.set(MotorStatus::POSITIVE_LIMIT_HIT, positive_hit);
        status.set(MotorStatus::NEGATIVE_LIMIT_HIT, negative_hit);
        status
    }
}

// =============================================================================
// Parameter policy for multi-motor pseudomotors
// =============================================================================

fn no_unique_answer(name: &str, query: &ParameterQuery) -> MotorError {
    MotorError::Unsupported(format!(
        "Getting the value of '{}' is unsupported since the pseudomotor '{}' \
         depends on multiple motors and there is no unique answer",
        query, name
    ))
}

async fn mean_of<F, Fut>(motors: &[Arc<MotorRecord>], read: F) -> MotorResult<f64>
where
    F: Fn(Arc<MotorRecord>) -> Fut,
    Fut: std::future::Future<Output = MotorResult<f64>>,
{
    let mut sum = 0.0;
    for motor in motors {
        sum += read(Arc::clone(motor)).await?;
    }
    Ok(super::parameter::divide_safely(sum, motors.len() as f64))
}

async fn max_of<F, Fut>(motors: &[Arc<MotorRecord>], read: F) -> MotorResult<f64>
where
    F: Fn(Arc<MotorRecord>) -> Fut,
    Fut: std::future::Future<Output = MotorResult<f64>>,
{
    let mut max_value: f64 = 0.0;
    for motor in motors {
        max_value = max_value.max(read(Arc::clone(motor)).await?);
    }
    Ok(max_value)
}

/// Answers a parameter read for a pseudomotor over `motors`.
///
/// Speeds are averaged. Acceleration distance and time take the maximum,
/// since the group finishes accelerating with its slowest member. Settings
/// that may differ per motor have no composite value.
pub async fn get_composite_parameter(
    name: &str,
    motors: &[Arc<MotorRecord>],
    query: ParameterQuery,
) -> MotorResult<ParameterValue> {
    let value = match query {
        ParameterQuery::Speed => {
            ParameterValue::Double(mean_of(motors, |m| async move { m.get_speed().await }).await?)
        }
        ParameterQuery::BaseSpeed => ParameterValue::Double(
            mean_of(motors, |m| async move { m.get_base_speed().await }).await?,
        ),
        ParameterQuery::AccelerationDistance => ParameterValue::Double(
            max_of(motors, |m| async move { m.get_acceleration_distance().await }).await?,
        ),
        ParameterQuery::AccelerationTime => ParameterValue::Double(
            max_of(motors, |m| async move { m.get_acceleration_time().await }).await?,
        ),
        ParameterQuery::ComputeExtendedScanRange { start, end } => {
            let distance =
                max_of(motors, |m| async move { m.get_acceleration_distance().await }).await?;
            ParameterValue::Array(extend_scan_range(start, end, distance).to_vec())
        }
        ParameterQuery::ComputePseudomotorPosition(real) => ParameterValue::Double(real),
        ParameterQuery::ComputeRealPosition(pseudo) => ParameterValue::Double(pseudo),
        ParameterQuery::SynchronousMotionMode
        | ParameterQuery::RawAccelerationParameters
        | ParameterQuery::MaximumSpeed
        | ParameterQuery::AccelerationType
        | ParameterQuery::Gain(_) => return Err(no_unique_answer(name, &query)),
    };
    Ok(value)
}

/// Applies a parameter write to every motor of a pseudomotor.
///
/// Fails on the first sub-motor error.
pub async fn set_composite_parameter(
    name: &str,
    motors: &[Arc<MotorRecord>],
    parameter: Parameter,
) -> MotorResult<()> {
    let fan_out = match parameter {
        Parameter::Speed(_)
        | Parameter::BaseSpeed(_)
        | Parameter::RawAccelerationParameters(_)
        | Parameter::SaveSpeed
        | Parameter::RestoreSpeed
        | Parameter::SynchronousMotionMode(_) => parameter,
        Parameter::SpeedChoice { start, end, time } => {
            Parameter::Speed(super::parameter::speed_for_move(start, end, time))
        }
        Parameter::MaximumSpeed(_) => {
            debug!(motor = %name, "maximum speed is not propagated to sub-motors");
            return Ok(());
        }
        Parameter::AxisEnable(_)
        | Parameter::ClosedLoop(_)
        | Parameter::FaultReset(_)
        | Parameter::Gain(..) => {
            return Err(MotorError::unsupported_parameter(name, parameter.label()))
        }
    };

    for motor in motors {
        debug!(motor = %name, sub_motor = %motor.name(), parameter = %fan_out, "fan out parameter");
        motor.set_parameter(fan_out.clone()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POS: MotorStatus = MotorStatus::POSITIVE_LIMIT_HIT;
    const NEG: MotorStatus = MotorStatus::NEGATIVE_LIMIT_HIT;
    const NONE: MotorStatus = MotorStatus::empty();

    #[test]
    fn test_fold_busy_is_or() {
        let folded = fold_status(&[MotorStatus::IS_BUSY, NONE]);
        assert!(folded.is_busy());
        assert!(!fold_status(&[NONE, NONE]).is_busy());
    }

    #[test]
    fn test_fold_home_is_and() {
        let home = MotorStatus::HOME_SEARCH_SUCCEEDED;
        assert!(fold_status(&[home, home]).contains(home));
        assert!(!fold_status(&[home, NONE]).contains(home));
    }

    #[test]
    fn test_fold_faults_are_or_and_limits_ignored() {
        let folded = fold_status(&[MotorStatus::DRIVE_FAULT | POS, MotorStatus::FOLLOWING_ERROR]);
        assert!(folded.contains(MotorStatus::DRIVE_FAULT | MotorStatus::FOLLOWING_ERROR));
        assert!(!folded.contains(POS));
    }

    #[test]
    fn test_remap_center_same() {
        let remap = LimitRemap::for_slit(SlitType::CenterSame);
        assert_eq!(remap.apply(POS, NONE, 1.0), POS);
        assert_eq!(remap.apply(NONE, POS, 1.0), POS);
        assert_eq!(remap.apply(NEG, NONE, 1.0), NEG);
        assert_eq!(remap.apply(NONE, NEG, 1.0), NEG);
        assert_eq!(remap.apply(POS, NONE, -1.0), NEG);
    }

    #[test]
    fn test_remap_width_opposite() {
        let remap = LimitRemap::for_slit(SlitType::WidthOpposite);
        assert_eq!(remap.apply(POS, NONE, 1.0), POS);
        assert_eq!(remap.apply(NONE, NEG, 1.0), NEG);
        assert_eq!(remap.apply(NONE, NEG, -2.0), POS);
    }

    #[test]
    fn test_remap_width_same() {
        let remap = LimitRemap::for_slit(SlitType::WidthSame);
        // Negative blade hitting its negative limit opens the slit further.
        assert_eq!(remap.apply(NEG, NONE, 1.0), POS);
        assert_eq!(remap.apply(POS, NONE, 1.0), NEG);
        assert_eq!(remap.apply(NONE, POS, 1.0), POS);
        assert_eq!(remap.apply(NONE, NEG, 1.0), NEG);
        assert_eq!(remap.apply(NEG, NONE, -1.0), NEG);
    }

    #[test]
    fn test_remap_center_opposite() {
        let remap = LimitRemap::for_slit(SlitType::CenterOpposite);
        assert_eq!(remap.apply(NEG, NONE, 1.0), POS);
        assert_eq!(remap.apply(POS, NONE, 1.0), NEG);
        assert_eq!(remap.apply(POS, POS, 1.0), POS | NEG);
        assert_eq!(remap.apply(NONE, POS, -1.0), NEG);
    }
}
