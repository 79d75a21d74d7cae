//! Field table of a remote motor record.

use crate::motor::Gain;

/// A field of a remote motor record, addressed as `<record>.<label>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteField {
    AccelerationDistance,
    AccelerationFeedforwardGain,
    AccelerationTime,
    AccelerationType,
    AxisEnable,
    BaseSpeed,
    Busy,
    ClosedLoop,
    ComputeExtendedScanRange,
    ComputePseudomotorPosition,
    ComputeRealPosition,
    ConstantVelocityMove,
    DerivativeGain,
    Destination,
    ExtendedStatus,
    ExtraGain,
    FaultReset,
    HomeSearch,
    ImmediateAbort,
    IntegralGain,
    IntegralLimit,
    MaximumSpeed,
    MotorFlags,
    MxType,
    NegativeLimitHit,
    Position,
    PositiveLimitHit,
    ProportionalGain,
    RawAccelerationParameters,
    RestoreSpeed,
    Resynchronize,
    SaveSpeed,
    SaveStartPositions,
    Scale,
    SetPosition,
    SoftAbort,
    Speed,
    SpeedChoiceParameters,
    Status,
    SynchronousMotionMode,
    UseStartPositions,
    VelocityFeedforwardGain,
}

impl RemoteField {
    /// Every field, resolved once when a network motor binds.
    pub const ALL: [RemoteField; 42] = [
        RemoteField::AccelerationDistance,
        RemoteField::AccelerationFeedforwardGain,
        RemoteField::AccelerationTime,
        RemoteField::AccelerationType,
        RemoteField::AxisEnable,
        RemoteField::BaseSpeed,
        RemoteField::Busy,
        RemoteField::ClosedLoop,
        RemoteField::ComputeExtendedScanRange,
        RemoteField::ComputePseudomotorPosition,
        RemoteField::ComputeRealPosition,
        RemoteField::ConstantVelocityMove,
        RemoteField::DerivativeGain,
        RemoteField::Destination,
        RemoteField::ExtendedStatus,
        RemoteField::ExtraGain,
        RemoteField::FaultReset,
        RemoteField::HomeSearch,
        RemoteField::ImmediateAbort,
        RemoteField::IntegralGain,
        RemoteField::IntegralLimit,
        RemoteField::MaximumSpeed,
        RemoteField::MotorFlags,
        RemoteField::MxType,
        RemoteField::NegativeLimitHit,
        RemoteField::Position,
        RemoteField::PositiveLimitHit,
        RemoteField::ProportionalGain,
        RemoteField::RawAccelerationParameters,
        RemoteField::RestoreSpeed,
        RemoteField::Resynchronize,
        RemoteField::SaveSpeed,
        RemoteField::SaveStartPositions,
        RemoteField::Scale,
        RemoteField::SetPosition,
        RemoteField::SoftAbort,
        RemoteField::Speed,
        RemoteField::SpeedChoiceParameters,
        RemoteField::Status,
        RemoteField::SynchronousMotionMode,
        RemoteField::UseStartPositions,
        RemoteField::VelocityFeedforwardGain,
    ];

    /// Field label on the remote record.
    pub fn label(self) -> &'static str {
        match self {
            RemoteField::AccelerationDistance => "acceleration_distance",
            RemoteField::AccelerationFeedforwardGain => "acceleration_feedforward_gain",
            RemoteField::AccelerationTime => "acceleration_time",
            RemoteField::AccelerationType => "acceleration_type",
            RemoteField::AxisEnable => "axis_enable",
            RemoteField::BaseSpeed => "base_speed",
            RemoteField::Busy => "busy",
            RemoteField::ClosedLoop => "closed_loop",
            RemoteField::ComputeExtendedScanRange => "compute_extended_scan_range",
            RemoteField::ComputePseudomotorPosition => "compute_pseudomotor_position",
            RemoteField::ComputeRealPosition => "compute_real_position",
            RemoteField::ConstantVelocityMove => "constant_velocity_move",
            RemoteField::DerivativeGain => "derivative_gain",
            RemoteField::Destination => "destination",
            RemoteField::ExtendedStatus => "extended_status",
            RemoteField::ExtraGain => "extra_gain",
            RemoteField::FaultReset => "fault_reset",
            RemoteField::HomeSearch => "home_search",
            RemoteField::ImmediateAbort => "immediate_abort",
            RemoteField::IntegralGain => "integral_gain",
            RemoteField::IntegralLimit => "integral_limit",
            RemoteField::MaximumSpeed => "maximum_speed",
            RemoteField::MotorFlags => "motor_flags",
            RemoteField::MxType => "mx_type",
            RemoteField::NegativeLimitHit => "negative_limit_hit",
            RemoteField::Position => "position",
            RemoteField::PositiveLimitHit => "positive_limit_hit",
            RemoteField::ProportionalGain => "proportional_gain",
            RemoteField::RawAccelerationParameters => "raw_acceleration_parameters",
            RemoteField::RestoreSpeed => "restore_speed",
            RemoteField::Resynchronize => "resynchronize",
            RemoteField::SaveSpeed => "save_speed",
            RemoteField::SaveStartPositions => "save_start_positions",
            RemoteField::Scale => "scale",
            RemoteField::SetPosition => "set_position",
            RemoteField::SoftAbort => "soft_abort",
            RemoteField::Speed => "speed",
            RemoteField::SpeedChoiceParameters => "speed_choice_parameters",
            RemoteField::Status => "status",
            RemoteField::SynchronousMotionMode => "synchronous_motion_mode",
            RemoteField::UseStartPositions => "use_start_positions",
            RemoteField::VelocityFeedforwardGain => "velocity_feedforward_gain",
        }
    }

    /// Looks a field up by its label.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.label() == label)
    }

    /// Remote field holding a servo gain.
    pub fn for_gain(gain: Gain) -> Self {
        match gain {
            Gain::Proportional => RemoteField::ProportionalGain,
            Gain::Integral => RemoteField::IntegralGain,
            Gain::Derivative => RemoteField::DerivativeGain,
            Gain::VelocityFeedforward => RemoteField::VelocityFeedforwardGain,
            Gain::AccelerationFeedforward => RemoteField::AccelerationFeedforwardGain,
            Gain::IntegralLimit => RemoteField::IntegralLimit,
            Gain::Extra => RemoteField::ExtraGain,
        }
    }

    /// Full remote name of this field on `record`.
    pub fn qualified(self, record: &str) -> String {
        format!("{}.{}", record, self.label())
    }
}
