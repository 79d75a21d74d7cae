//! Scan-time start-position protocol.
//!
//! A scan steps logical coordinates, but pseudomotors command real motors.
//! Re-reading the real motors at every step would fold encoder jitter and
//! backlash into the step arithmetic, so the first step of a scan freezes a
//! [`StartFrame`] per motor and every later step is computed from it.
//!
//! The per-scan state lives in a [`ScanSession`] owned by the caller:
//!
//! ```no_run
//! use daq_pseudomotor::config::ScanConfig;
//! use daq_pseudomotor::scan::{ScanCoordinator, ScanMode};
//! # use std::sync::Arc;
//! # async fn demo(stage: Arc<daq_pseudomotor::motor::MotorRecord>) -> daq_pseudomotor::error::MotorResult<()> {
//! let coordinator = ScanCoordinator::new(&ScanConfig::default());
//! let mut session = coordinator.begin(ScanMode::Absolute, vec![stage])?;
//! for position in [0.0, 0.5, 1.0] {
//!     coordinator.step(&mut session, &[position]).await?;
//! }
//! coordinator.finish(session).await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::error::{MotorError, MotorResult};
use crate::motor::{
    array_move_absolute, array_move_from, wait_for_all, MotorRecord, MoveFlags, StartFrame,
};

/// How step values published by a scan are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Step values are absolute coordinates.
    Absolute,
    /// Step values are offsets from where each motor stood at scan start.
    /// Motors are returned there when the scan finishes.
    Relative,
}

/// Per-motor state of one scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanStartState {
    /// True until the start frame has been frozen.
    pub first_step: bool,
    /// Absolute position the frame was frozen for.
    pub requested_start: Option<f64>,
    /// Frame returned by `save_start_positions`.
    pub frame: Option<StartFrame>,
    /// Position before the scan, recorded in relative mode.
    pub absolute_start: Option<f64>,
    /// Whether `use_start_positions(true)` is in effect.
    pub use_start: bool,
}

impl ScanStartState {
    fn new() -> Self {
        Self {
            first_step: true,
            ..Self::default()
        }
    }
}

/// One execution of a scan over a fixed set of motors.
#[derive(Debug)]
pub struct ScanSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    mode: ScanMode,
    motors: Vec<Arc<MotorRecord>>,
    states: Vec<ScanStartState>,
    steps: usize,
}

impl ScanSession {
    /// Unique id of this scan.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Interpretation of step values.
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Motors stepped by this scan.
    pub fn motors(&self) -> &[Arc<MotorRecord>] {
        &self.motors
    }

    /// Per-motor start state, in motor order.
    pub fn states(&self) -> &[ScanStartState] {
        &self.states
    }

    /// Number of completed steps.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Returns true once the start frames have been frozen.
    pub fn is_prepared(&self) -> bool {
        self.states.iter().all(|state| !state.first_step)
    }

    /// Serializable summary of the session.
    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            id: self.id,
            started_at: self.started_at,
            mode: self.mode,
            steps: self.steps,
            motors: self
                .motors
                .iter()
                .zip(&self.states)
                .map(|(motor, state)| MotorSnapshot {
                    name: motor.name().to_string(),
                    requested_start: state.requested_start,
                    absolute_start: state.absolute_start,
                    use_start: state.use_start,
                })
                .collect(),
        }
    }

    fn frames(&self) -> MotorResult<Vec<StartFrame>> {
        self.motors
            .iter()
            .zip(&self.states)
            .map(|(motor, state)| {
                state.frame.clone().ok_or_else(|| {
                    MotorError::CorruptState(format!(
                        "scan {} has no start frame for motor '{}'",
                        self.id,
                        motor.name()
                    ))
                })
            })
            .collect()
    }

    fn check_len(&self, values: &[f64], what: &str) -> MotorResult<()> {
        if values.len() != self.motors.len() {
            return Err(MotorError::IllegalArgument(format!(
                "{} {} supplied for a scan of {} motors",
                values.len(),
                what,
                self.motors.len()
            )));
        }
        Ok(())
    }
}

/// JSON-friendly view of a [`ScanSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: ScanMode,
    pub steps: usize,
    pub motors: Vec<MotorSnapshot>,
}

/// Per-motor part of a [`ScanSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorSnapshot {
    pub name: String,
    pub requested_start: Option<f64>,
    pub absolute_start: Option<f64>,
    pub use_start: bool,
}

/// Drives the start-position protocol for scans.
#[derive(Debug, Clone)]
pub struct ScanCoordinator {
    poll_interval: Duration,
    settle_timeout: Option<Duration>,
}

impl ScanCoordinator {
    /// Creates a coordinator with the configured polling behaviour.
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            settle_timeout: config.settle_timeout(),
        }
    }

    /// Starts a session over `motors`. No motor is touched yet.
    pub fn begin(&self, mode: ScanMode, motors: Vec<Arc<MotorRecord>>) -> MotorResult<ScanSession> {
        if motors.is_empty() {
            return Err(MotorError::IllegalArgument(
                "a scan needs at least one motor".to_string(),
            ));
        }
        let session = ScanSession {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode,
            states: motors.iter().map(|_| ScanStartState::new()).collect(),
            motors,
            steps: 0,
        };
        info!(
            scan_id = %session.id,
            mode = ?mode,
            motors = session.motors.len(),
            "scan started"
        );
        Ok(session)
    }

    /// Freezes start frames for every motor before any motion.
    ///
    /// `start_positions` are step values, so in relative mode they are
    /// offsets. Each motor first saves its start positions, then every motor
    /// switches to start-position mode. If any call fails, start-position
    /// mode is cleared again where it was set and the error is returned; the
    /// session stays unprepared.
    pub async fn prepare(&self, session: &mut ScanSession, start_positions: &[f64]) -> MotorResult<()> {
        session.check_len(start_positions, "start positions")?;

        let mut absolute_starts = Vec::with_capacity(session.motors.len());
        for motor in &session.motors {
            absolute_starts.push(match session.mode {
                ScanMode::Absolute => None,
                ScanMode::Relative => Some(motor.get_position().await?),
            });
        }

        let mut frames = Vec::with_capacity(session.motors.len());
        for ((motor, offset), absolute) in session
            .motors
            .iter()
            .zip(start_positions)
            .zip(&absolute_starts)
        {
            let requested = absolute.unwrap_or(0.0) + offset;
            let frame = motor.save_start_positions(requested).await?;
            debug!(scan_id = %session.id, motor = %motor.name(), requested, "start frame saved");
            frames.push((requested, frame));
        }

        for (index, motor) in session.motors.iter().enumerate() {
            if let Err(e) = motor.use_start_positions(true).await {
                for enabled in &session.motors[..index] {
                    if let Err(clear) = enabled.use_start_positions(false).await {
                        warn!(motor = %enabled.name(), error = %clear, "failed to clear start-position mode");
                    }
                }
                return Err(e);
            }
        }

        for ((state, (requested, frame)), absolute) in session
            .states
            .iter_mut()
            .zip(frames)
            .zip(absolute_starts)
        {
            state.first_step = false;
            state.requested_start = Some(requested);
            state.frame = Some(frame);
            state.absolute_start = absolute;
            state.use_start = true;
        }
        info!(scan_id = %session.id, "scan start frames frozen");
        Ok(())
    }

    /// Moves every motor to the next step and waits for all to stop.
    ///
    /// The first step prepares the session.
    pub async fn step(&self, session: &mut ScanSession, positions: &[f64]) -> MotorResult<()> {
        session.check_len(positions, "positions")?;
        if !session.is_prepared() {
            self.prepare(session, positions).await?;
        }

        let targets: Vec<f64> = positions
            .iter()
            .zip(&session.states)
            .map(|(position, state)| position + state.absolute_start.unwrap_or(0.0))
            .collect();
        let frames = session.frames()?;

        debug!(scan_id = %session.id, step = session.steps, ?targets, "scan step");
        array_move_from(
            &session.motors,
            &frames,
            &targets,
            MoveFlags::SIMULTANEOUS_START | MoveFlags::NOWAIT,
        )
        .await?;
        wait_for_all(&session.motors, self.poll_interval, self.settle_timeout).await?;

        session.steps += 1;
        Ok(())
    }

    /// Ends the scan.
    ///
    /// Clears start-position mode on every motor and, for relative scans,
    /// returns all motors to where they stood before the scan in one batched
    /// move. Every motor is visited even if an earlier one fails; the first
    /// error is returned.
    pub async fn finish(&self, session: ScanSession) -> MotorResult<()> {
        let mut first_error = None;

        for (motor, state) in session.motors.iter().zip(&session.states) {
            if !state.use_start {
                continue;
            }
            if let Err(e) = motor.use_start_positions(false).await {
                error!(scan_id = %session.id, motor = %motor.name(), error = %e, "failed to clear start-position mode");
                first_error.get_or_insert(e);
            }
        }

        if session.mode == ScanMode::Relative && session.is_prepared() {
            let starts: Vec<f64> = session
                .states
                .iter()
                .map(|state| state.absolute_start.unwrap_or(0.0))
                .collect();
            let returned = async {
                array_move_absolute(
                    &session.motors,
                    &starts,
                    MoveFlags::SIMULTANEOUS_START | MoveFlags::NOWAIT,
                )
                .await?;
                wait_for_all(&session.motors, self.poll_interval, self.settle_timeout).await
            }
            .await;
            if let Err(e) = returned {
                error!(scan_id = %session.id, error = %e, "failed to return motors to their start positions");
                first_error.get_or_insert(e);
            }
        }

        info!(
            scan_id = %session.id,
            steps = session.steps,
            elapsed_ms = (Utc::now() - session.started_at).num_milliseconds(),
            "scan finished"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
