//! Virtual motor composition for the DAQ system.
//!
//! This library lets scan software drive mechanical assemblies through the
//! same interface as a single physical axis:
//!
//! - [`motor::SlitMotor`]: a slit built from two blade motors
//! - [`motor::TranslationMotor`]: a stage built from N motors moved together
//! - [`motor::NetworkMotor`]: a motor hosted on a remote control server
//!
//! [`scan::ScanCoordinator`] freezes consistent start positions before a
//! multi-axis scan, and [`registry::MotorRegistry`] builds the records from a
//! [`config::MotorConfig`].

pub mod config;
pub mod error;
pub mod logging;
pub mod motor;
pub mod registry;
pub mod remote;
pub mod scan;

pub use error::{MotorError, MotorResult};
