//! Access to fields of records hosted by a remote control server.
//!
//! The transport itself is not part of this crate. [`RemoteServer`] is the
//! seam a transport implements: resolve a field name once into a handle,
//! then get and put typed values through that handle. [`mock::MockServer`]
//! implements it in memory for tests and simulation.

pub mod fields;
pub mod mock;

pub use fields::RemoteField;
pub use mock::MockServer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MotorError, MotorResult};

/// Resolved address of one remote field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldHandle {
    /// Server-assigned identifier.
    pub id: u64,
    /// Full field name, `<record>.<label>`.
    pub name: String,
}

/// A typed value exchanged with a remote field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Double(f64),
    Bool(bool),
    Int(i64),
    Hex(u64),
    String(String),
    DoubleArray(Vec<f64>),
}

impl FieldValue {
    fn mismatch(&self, expected: &str) -> MotorError {
        MotorError::TypeMismatch(format!("expected {} field value, got {:?}", expected, self))
    }

    /// Returns the value as a double.
    pub fn as_f64(&self) -> MotorResult<f64> {
        match self {
            FieldValue::Double(v) => Ok(*v),
            other => Err(other.mismatch("a double")),
        }
    }

    /// Returns the value as a bool.
    pub fn as_bool(&self) -> MotorResult<bool> {
        match self {
            FieldValue::Bool(v) => Ok(*v),
            other => Err(other.mismatch("a bool")),
        }
    }

    /// Returns the value as a signed integer.
    pub fn as_int(&self) -> MotorResult<i64> {
        match self {
            FieldValue::Int(v) => Ok(*v),
            other => Err(other.mismatch("an integer")),
        }
    }

    /// Returns the value as an unsigned hex word.
    pub fn as_hex(&self) -> MotorResult<u64> {
        match self {
            FieldValue::Hex(v) => Ok(*v),
            other => Err(other.mismatch("a hex")),
        }
    }

    /// Returns the value as a string.
    pub fn as_str(&self) -> MotorResult<&str> {
        match self {
            FieldValue::String(v) => Ok(v),
            other => Err(other.mismatch("a string")),
        }
    }

    /// Returns the value as an array of doubles.
    pub fn as_array(&self) -> MotorResult<&[f64]> {
        match self {
            FieldValue::DoubleArray(v) => Ok(v),
            other => Err(other.mismatch("a double array")),
        }
    }
}

/// A remote control server that hosts records.
///
/// Implementations report a missing record or field as `NotFound` and a
/// failed exchange as `NetworkIoError`. No retries happen at this layer.
#[async_trait]
pub trait RemoteServer: Send + Sync {
    /// Server name, for diagnostics.
    fn name(&self) -> &str;

    /// Protocol version announced by the server.
    async fn remote_version(&self) -> MotorResult<u64>;

    /// Resolves `<record>.<label>` into a handle.
    async fn resolve(&self, field_name: &str) -> MotorResult<FieldHandle>;

    /// Reads a field.
    async fn get(&self, handle: &FieldHandle) -> MotorResult<FieldValue>;

    /// Writes a field.
    async fn put(&self, handle: &FieldHandle, value: FieldValue) -> MotorResult<()>;
}
