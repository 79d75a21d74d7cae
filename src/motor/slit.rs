//! Two-blade slit pseudomotor.
//!
//! A slit is driven by a negative and a positive blade motor. The slit type
//! fixes how the logical coordinate (a center or a width) relates to the two
//! blade positions `n` and `p`:
//!
//! | slit type        | logical    | n after Δ | p after Δ |
//! |------------------|------------|-----------|-----------|
//! | `CenterSame`     | (p + n)/2  | n + Δ     | p + Δ     |
//! | `WidthSame`      | p − n      | n − Δ/2   | p + Δ/2   |
//! | `CenterOpposite` | (p − n)/2  | n − Δ     | p + Δ     |
//! | `WidthOpposite`  | p + n      | n + Δ/2   | p + Δ/2   |
//!
//! "Same" and "opposite" refer to whether both blade motors count positive
//! in the same physical direction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::aggregate::{fold_status, get_composite_parameter, set_composite_parameter, LimitRemap};
use super::driver::{MotorDriver, StartFrame};
use super::parameter::{Parameter, ParameterQuery, ParameterValue};
use super::status::{MotorFlags, MotorStatus};
use super::{array_move_absolute, MotorRecord, MoveFlags};
use crate::error::{MotorError, MotorResult};

/// Geometry convention of a slit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlitType {
    CenterSame,
    WidthSame,
    CenterOpposite,
    WidthOpposite,
}

impl SlitType {
    /// Every slit type.
    pub const ALL: [SlitType; 4] = [
        SlitType::CenterSame,
        SlitType::WidthSame,
        SlitType::CenterOpposite,
        SlitType::WidthOpposite,
    ];

    /// Logical slit coordinate for the given blade positions.
    pub fn position(self, negative: f64, positive: f64) -> f64 {
        match self {
            SlitType::CenterSame => 0.5 * (positive + negative),
            SlitType::WidthSame => positive - negative,
            SlitType::CenterOpposite => 0.5 * (positive - negative),
            SlitType::WidthOpposite => positive + negative,
        }
    }

    /// Blade positions after changing the logical coordinate by `delta`.
    pub fn shift(self, negative: f64, positive: f64, delta: f64) -> (f64, f64) {
        match self {
            SlitType::CenterSame => (negative + delta, positive + delta),
            SlitType::WidthSame => (negative - 0.5 * delta, positive + 0.5 * delta),
            SlitType::CenterOpposite => (negative - delta, positive + delta),
            SlitType::WidthOpposite => (negative + 0.5 * delta, positive + 0.5 * delta),
        }
    }
}

/// Slit pseudomotor over a negative and a positive blade motor.
pub struct SlitMotor {
    name: String,
    negative: Arc<MotorRecord>,
    positive: Arc<MotorRecord>,
    slit_type: SlitType,
    simultaneous_start: bool,
    scale: f64,
}

impl SlitMotor {
    /// Creates a slit. The two blades must be distinct records.
    pub fn new(
        name: impl Into<String>,
        negative: Arc<MotorRecord>,
        positive: Arc<MotorRecord>,
        slit_type: SlitType,
    ) -> MotorResult<Self> {
        let name = name.into();
        if Arc::ptr_eq(&negative, &positive) {
            return Err(MotorError::IllegalArgument(format!(
                "slit '{}' uses motor '{}' for both blades",
                name,
                negative.name()
            )));
        }
        Ok(Self {
            name,
            negative,
            positive,
            slit_type,
            simultaneous_start: false,
            scale: 1.0,
        })
    }

    /// Requests back-to-back starts of both blades.
    pub fn with_simultaneous_start(mut self, enabled: bool) -> Self {
        self.simultaneous_start = enabled;
        self
    }

    /// Scale of the slit record, used to orient the limit bits.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Geometry convention.
    pub fn slit_type(&self) -> SlitType {
        self.slit_type
    }

    fn blades(&self) -> [Arc<MotorRecord>; 2] {
        [Arc::clone(&self.negative), Arc::clone(&self.positive)]
    }

    async fn blade_positions(&self) -> MotorResult<(f64, f64)> {
        let negative = self.negative.get_position().await?;
        let positive = self.positive.get_position().await?;
        Ok((negative, positive))
    }

    async fn move_blades(&self, negative: f64, positive: f64) -> MotorResult<()> {
        let mut flags = MoveFlags::NOWAIT;
        if self.simultaneous_start {
            flags |= MoveFlags::SIMULTANEOUS_START;
        }
        debug!(motor = %self.name, negative, positive, "moving slit blades");
        array_move_absolute(&self.blades(), &[negative, positive], flags).await
    }

    /// Positive blade error wins when both aborts fail.
    fn pick_abort_result(
        &self,
        negative: MotorResult<()>,
        positive: MotorResult<()>,
    ) -> MotorResult<()> {
        if let Err(e) = &negative {
            warn!(motor = %self.name, blade = %self.negative.name(), error = %e, "blade abort failed");
        }
        match positive {
            Err(e) => {
                warn!(motor = %self.name, blade = %self.positive.name(), error = %e, "blade abort failed");
                Err(e)
            }
            Ok(()) => negative,
        }
    }
}

#[async_trait]
impl MotorDriver for SlitMotor {
    fn driver_name(&self) -> &'static str {
        "slit_motor"
    }

    fn flags(&self) -> MotorFlags {
        MotorFlags::IS_PSEUDOMOTOR
    }

    async fn move_absolute(&self, raw_destination: f64) -> MotorResult<()> {
        let (negative, positive) = self.blade_positions().await?;
        let delta = raw_destination - self.slit_type.position(negative, positive);
        let (negative, positive) = self.slit_type.shift(negative, positive, delta);
        self.move_blades(negative, positive).await
    }

    async fn move_absolute_from(
        &self,
        frame: &StartFrame,
        raw_destination: f64,
    ) -> MotorResult<()> {
        let (start, negative, positive) = match frame {
            StartFrame::Frozen {
                pseudomotor_start,
                sub_motor_starts,
            } if sub_motor_starts.len() == 2 => {
                (*pseudomotor_start, sub_motor_starts[0], sub_motor_starts[1])
            }
            other => {
                return Err(MotorError::CorruptState(format!(
                    "slit '{}' was handed a start frame it did not save: {:?}",
                    self.name, other
                )))
            }
        };
        let (negative, positive) = self
            .slit_type
            .shift(negative, positive, raw_destination - start);
        self.move_blades(negative, positive).await
    }

    async fn get_position(&self) -> MotorResult<f64> {
        let (negative, positive) = self.blade_positions().await?;
        Ok(self.slit_type.position(negative, positive))
    }

    async fn set_position(&self, raw_position: f64) -> MotorResult<()> {
        let (negative, positive) = self.blade_positions().await?;
        let delta = raw_position - self.slit_type.position(negative, positive);
        let (negative, positive) = self.slit_type.shift(negative, positive, delta);

        self.negative.check_position_limits(negative)?;
        self.positive.check_position_limits(positive)?;

        self.negative.set_position(negative).await?;
        self.positive.set_position(positive).await
    }

    async fn soft_abort(&self) -> MotorResult<()> {
        let negative = self.negative.soft_abort().await;
        let positive = self.positive.soft_abort().await;
        self.pick_abort_result(negative, positive)
    }

    async fn immediate_abort(&self) -> MotorResult<()> {
        let negative = self.negative.immediate_abort().await;
        let positive = self.positive.immediate_abort().await;
        self.pick_abort_result(negative, positive)
    }

    async fn is_busy(&self) -> MotorResult<bool> {
        let negative = self.negative.is_busy().await?;
        let positive = self.positive.is_busy().await?;
        Ok(negative || positive)
    }

    async fn positive_limit_hit(&self) -> MotorResult<bool> {
        Ok(self
            .get_status()
            .await?
            .contains(MotorStatus::POSITIVE_LIMIT_HIT))
    }

    async fn negative_limit_hit(&self) -> MotorResult<bool> {
        Ok(self
            .get_status()
            .await?
            .contains(MotorStatus::NEGATIVE_LIMIT_HIT))
    }

    async fn get_status(&self) -> MotorResult<MotorStatus> {
        let negative = self.negative.get_status().await?;
        let positive = self.positive.get_status().await?;

        let limits = LimitRemap::for_slit(self.slit_type).apply(negative, positive, self.scale);
        Ok(fold_status(&[negative, positive]) | limits)
    }

    async fn get_parameter(&self, query: ParameterQuery) -> MotorResult<ParameterValue> {
        get_composite_parameter(&self.name, &self.blades(), query).await
    }

    async fn set_parameter(&self, parameter: Parameter) -> MotorResult<()> {
        set_composite_parameter(&self.name, &self.blades(), parameter).await
    }

    async fn save_start_positions(&self, raw_start: f64) -> MotorResult<StartFrame> {
        let (negative, positive) = self.blade_positions().await?;
        let difference = raw_start - self.slit_type.position(negative, positive);
        let (negative_start, positive_start) =
            self.slit_type.shift(negative, positive, difference);

        debug!(
            motor = %self.name,
            pseudomotor_start = raw_start,
            difference,
            negative_start,
            positive_start,
            "saved slit start positions"
        );

        Ok(StartFrame::Frozen {
            pseudomotor_start: raw_start,
            sub_motor_starts: vec![negative_start, positive_start],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{AxisSettings, SoftMotor};

    fn blade(name: &str, position: f64) -> (Arc<MotorRecord>, SoftMotor) {
        let motor = SoftMotor::at(position);
        let record = MotorRecord::new(name, AxisSettings::default(), Box::new(motor.clone()))
            .unwrap();
        (Arc::new(record), motor)
    }

    fn make_slit(slit_type: SlitType, n: f64, p: f64) -> (SlitMotor, Arc<MotorRecord>, Arc<MotorRecord>) {
        let (neg, _) = blade("neg", n);
        let (pos, _) = blade("pos", p);
        let slit = SlitMotor::new("slit", neg.clone(), pos.clone(), slit_type).unwrap();
        (slit, neg, pos)
    }

    #[tokio::test]
    async fn test_center_same_scenario() {
        let (slit, neg, pos) = make_slit(SlitType::CenterSame, -2.0, 2.0);
        assert_eq!(slit.get_position().await.unwrap(), 0.0);

        slit.move_absolute(1.0).await.unwrap();
        assert_eq!(neg.get_position().await.unwrap(), -1.0);
        assert_eq!(pos.get_position().await.unwrap(), 3.0);
        assert_eq!(slit.get_position().await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_move_reaches_target_for_every_type() {
        let starts = [(-2.0, 2.0), (0.5, 3.25), (-7.0, -1.0)];
        for slit_type in SlitType::ALL {
            for (n, p) in starts {
                let (slit, neg, pos) = make_slit(slit_type, n, p);
                slit.move_absolute(1.75).await.unwrap();
                let n2 = neg.get_position().await.unwrap();
                let p2 = pos.get_position().await.unwrap();
                let reached = slit_type.position(n2, p2);
                assert!(
                    (reached - 1.75).abs() < 1e-12,
                    "{:?} from ({}, {}) reached {}",
                    slit_type,
                    n,
                    p,
                    reached
                );
            }
        }
    }

    #[tokio::test]
    async fn test_read_is_idempotent() {
        let (slit, _, _) = make_slit(SlitType::WidthSame, -0.3, 0.9);
        let first = slit.get_position().await.unwrap();
        let second = slit.get_position().await.unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[tokio::test]
    async fn test_save_then_move_from_start_reproduces_frame() {
        for slit_type in SlitType::ALL {
            let (slit, neg, pos) = make_slit(slit_type, -1.1, 2.3);
            let frame = slit.save_start_positions(0.7).await.unwrap();
            let StartFrame::Frozen { sub_motor_starts, .. } = frame.clone() else {
                panic!("slit must freeze blade positions");
            };

            slit.move_absolute_from(&frame, 0.7).await.unwrap();
            assert_eq!(
                neg.get_position().await.unwrap().to_bits(),
                sub_motor_starts[0].to_bits()
            );
            assert_eq!(
                pos.get_position().await.unwrap().to_bits(),
                sub_motor_starts[1].to_bits()
            );
        }
    }

    #[tokio::test]
    async fn test_move_from_frame_ignores_live_positions() {
        let (slit, neg, pos) = make_slit(SlitType::WidthSame, -1.0, 1.0);
        let frame = slit.save_start_positions(2.0).await.unwrap();
        // Frame: width 2 -> n = -1, p = 1 (no difference)
        neg.set_position(-5.0).await.unwrap();

        slit.move_absolute_from(&frame, 4.0).await.unwrap();
        assert_eq!(neg.get_position().await.unwrap(), -2.0);
        assert_eq!(pos.get_position().await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_status_fold_and_remap() {
        let (neg, neg_motor) = blade("neg", -1.0);
        let (pos, pos_motor) = blade("pos", 1.0);
        let slit = SlitMotor::new("slit", neg, pos, SlitType::WidthSame).unwrap();

        neg_motor.set_limit_switches(false, true).await;
        pos_motor
            .set_extra_status(MotorStatus::HOME_SEARCH_SUCCEEDED)
            .await;

        let status = slit.get_status().await.unwrap();
        assert!(status.contains(MotorStatus::POSITIVE_LIMIT_HIT));
        assert!(!status.contains(MotorStatus::NEGATIVE_LIMIT_HIT));
        assert!(!status.contains(MotorStatus::HOME_SEARCH_SUCCEEDED));
        assert!(slit.positive_limit_hit().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_same_blade_twice() {
        let (neg, _) = blade("neg", 0.0);
        let err = SlitMotor::new("slit", neg.clone(), neg, SlitType::CenterSame)
            .err()
            .unwrap();
        assert_eq!(err.code(), crate::error::ErrorCode::IllegalArgument);
    }

    #[tokio::test]
    async fn test_speed_is_mean_of_blades() {
        let (slit, neg, pos) = make_slit(SlitType::CenterSame, 0.0, 0.0);
        neg.set_speed(1.0).await.unwrap();
        pos.set_speed(3.0).await.unwrap();
        assert_eq!(
            slit.get_parameter(ParameterQuery::Speed).await.unwrap(),
            ParameterValue::Double(2.0)
        );
        let err = slit
            .get_parameter(ParameterQuery::SynchronousMotionMode)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Unsupported);
    }

    async fn remote_slit(failing: &[&str]) -> (SlitMotor, Arc<crate::remote::MockServer>) {
        use crate::config::RemoteRecordConfig;
        use crate::motor::NetworkMotor;
        use crate::remote::{MockServer, RemoteField, RemoteServer};

        let mut server = MockServer::new("srv", 1_005_000);
        for name in ["bottom", "top"] {
            server = server.with_record(&RemoteRecordConfig {
                name: name.to_string(),
                ..RemoteRecordConfig::default()
            });
        }
        let server = Arc::new(server);
        for name in failing {
            server.fail_field(name, RemoteField::SoftAbort).await;
        }
        let blade = |name: &str| {
            let driver =
                NetworkMotor::new(name, Arc::clone(&server) as Arc<dyn RemoteServer>, name);
            Arc::new(MotorRecord::new(name, AxisSettings::default(), Box::new(driver)).unwrap())
        };
        let slit = SlitMotor::new("slit", blade("bottom"), blade("top"), SlitType::CenterSame)
            .unwrap();
        (slit, server)
    }

    #[tokio::test]
    async fn test_abort_reaches_both_blades() {
        use crate::remote::{FieldValue, RemoteField};

        for failing in [&[][..], &["bottom"][..], &["top"][..], &["bottom", "top"][..]] {
            let (slit, server) = remote_slit(failing).await;
            let result = slit.soft_abort().await;

            for name in ["bottom", "top"] {
                assert_eq!(
                    server.writes_to(name, RemoteField::SoftAbort).await,
                    vec![FieldValue::Bool(true)],
                    "blade '{}' was not aborted when {:?} failed",
                    name,
                    failing
                );
            }
            match failing {
                [] => assert!(result.is_ok()),
                [only] => {
                    let err = result.unwrap_err();
                    assert!(err.to_string().contains(&format!("{}.soft_abort", only)));
                }
                _ => {
                    let err = result.unwrap_err();
                    assert_eq!(err.code(), crate::error::ErrorCode::NetworkIoError);
                    assert!(err.to_string().contains("top.soft_abort"));
                }
            }
        }
    }
}
