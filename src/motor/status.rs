//! Motor status words and capability flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{MotorError, MotorResult};

bitflags! {
    /// Status bits reported by `get_status`.
    ///
    /// The bit layout matches the hex status word served by remote records,
    /// so a remote `status` field can be taken verbatim.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MotorStatus: u32 {
        const IS_BUSY = 0x1;
        const POSITIVE_LIMIT_HIT = 0x2;
        const NEGATIVE_LIMIT_HIT = 0x4;
        const HOME_SEARCH_SUCCEEDED = 0x8;
        const FOLLOWING_ERROR = 0x10;
        const DRIVE_FAULT = 0x20;
        const AXIS_DISABLED = 0x40;
        const OPEN_LOOP = 0x80;
        const SOFT_POSITIVE_LIMIT_HIT = 0x200;
        const SOFT_NEGATIVE_LIMIT_HIT = 0x400;
        const ERROR = 0x8000_0000;
    }
}

bitflags! {
    /// Capability flags describing how a motor relates to real hardware.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MotorFlags: u32 {
        const IS_PSEUDOMOTOR = 0x1000;
        const IS_REMOTE_MOTOR = 0x2000;
        const PSEUDOMOTOR_RECURSION_IS_NOT_NECESSARY = 0x4000;
        const CANNOT_QUICK_SCAN = 0x10000;
    }
}

impl MotorStatus {
    /// Synthesizes a status word from the three traditional queries.
    pub fn traditional(busy: bool, positive_limit: bool, negative_limit: bool) -> Self {
        let mut status = MotorStatus::empty();
        status.set(MotorStatus::IS_BUSY, busy);
        status.set(MotorStatus::POSITIVE_LIMIT_HIT, positive_limit);
        status.set(MotorStatus::NEGATIVE_LIMIT_HIT, negative_limit);
        status
    }

    /// Returns true if the motor is moving.
    pub fn is_busy(self) -> bool {
        self.contains(MotorStatus::IS_BUSY)
    }
}

/// Position and status captured by a single `get_extended_status` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtendedStatus {
    /// Raw position at the time of the query.
    pub position: f64,
    /// Status word at the time of the query.
    pub status: MotorStatus,
}

impl ExtendedStatus {
    /// Parses the two-token `"<double> <hex>"` form served by remote records.
    ///
    /// Anything that does not yield exactly a float followed by a hex word is
    /// reported as `NetworkIoError`.
    pub fn parse(text: &str) -> MotorResult<Self> {
        let mut tokens = text.split_whitespace();

        let parsed = match (tokens.next(), tokens.next()) {
            (Some(position), Some(status)) => {
                let status = status
                    .trim_start_matches("0x")
                    .trim_start_matches("0X");
                match (position.parse::<f64>(), u32::from_str_radix(status, 16)) {
                    (Ok(position), Ok(bits)) => Some(ExtendedStatus {
                        position,
                        status: MotorStatus::from_bits_retain(bits),
                    }),
                    _ => None,
                }
            }
            _ => None,
        };

        parsed.ok_or_else(|| {
            MotorError::NetworkIoError(format!(
                "Returned string '{}' was not parseable as an extended status string",
                text
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traditional_status() {
        let status = MotorStatus::traditional(true, false, true);
        assert!(status.is_busy());
        assert!(status.contains(MotorStatus::NEGATIVE_LIMIT_HIT));
        assert!(!status.contains(MotorStatus::POSITIVE_LIMIT_HIT));
    }

    #[test]
    fn test_parse_extended_status() {
        let ext = ExtendedStatus::parse("12.5 9").unwrap();
        assert_eq!(ext.position, 12.5);
        assert_eq!(
            ext.status,
            MotorStatus::IS_BUSY | MotorStatus::HOME_SEARCH_SUCCEEDED
        );

        let ext = ExtendedStatus::parse("  -3e-2   80000000 ").unwrap();
        assert_eq!(ext.position, -0.03);
        assert!(ext.status.contains(MotorStatus::ERROR));
    }

    #[test]
    fn test_parse_extended_status_rejects_garbage() {
        for text in ["", "1.0", "abc 1", "1.0 xyz"] {
            let err = ExtendedStatus::parse(text).unwrap_err();
            assert_eq!(err.code(), crate::error::ErrorCode::NetworkIoError);
        }
    }
}
