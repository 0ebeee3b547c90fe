//! Scalar column types.

use orql_proto::Value;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Scalar data types of mapped columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp (microseconds since Unix epoch).
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float64)
    }

    /// Check if this type can identify an entity.
    pub fn is_identifier_capable(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32
                | ScalarType::Int64
                | ScalarType::String
                | ScalarType::Uuid
                | ScalarType::Bytes
        )
    }

    /// Convert a raw driver value into this type.
    ///
    /// Drivers report values in their storage classes; booleans may come back
    /// as integers and UUIDs as hex text or blobs.
    pub fn read(&self, value: Value) -> Result<Value, Error> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let converted = match (self, &value) {
            (ScalarType::Bool, Value::Bool(_)) => Some(value.clone()),
            (ScalarType::Bool, _) => value.as_i64().map(|i| Value::Bool(i != 0)),
            (ScalarType::Int32, _) => value
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(Value::Int32),
            (ScalarType::Int64, _) => value.as_i64().map(Value::Int64),
            (ScalarType::Float64, _) => value.as_f64().map(Value::Float64),
            (ScalarType::String, Value::String(_)) => Some(value.clone()),
            (ScalarType::Bytes, Value::Bytes(_)) => Some(value.clone()),
            (ScalarType::Timestamp, Value::Timestamp(_)) => Some(value.clone()),
            (ScalarType::Timestamp, _) => value.as_i64().map(Value::Timestamp),
            (ScalarType::Uuid, Value::Uuid(_)) => Some(value.clone()),
            (ScalarType::Uuid, Value::Bytes(bytes)) => {
                <[u8; 16]>::try_from(bytes.as_slice()).ok().map(Value::Uuid)
            }
            (ScalarType::Uuid, Value::String(text)) => hex::decode(text.replace('-', ""))
                .ok()
                .and_then(|bytes| <[u8; 16]>::try_from(bytes.as_slice()).ok())
                .map(Value::Uuid),
            _ => None,
        };
        converted.ok_or_else(|| Error::TypeMismatch {
            expected: format!("{:?}", self),
            found: value.kind().to_string(),
        })
    }
}
