//! Entity and collection identities.

use std::fmt;

use orql_proto::Value;

use crate::error::Error;

/// An identifier value with value equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdValue {
    Int(i64),
    String(String),
    Uuid([u8; 16]),
    Bytes(Vec<u8>),
}

impl IdValue {
    /// Identifier from a row value; `None` for null.
    pub fn from_value(value: &Value) -> Result<Option<Self>, Error> {
        Ok(Some(match value {
            Value::Null => return Ok(None),
            Value::Int32(i) => IdValue::Int(*i as i64),
            Value::Int64(i) => IdValue::Int(*i),
            Value::String(s) => IdValue::String(s.clone()),
            Value::Uuid(u) => IdValue::Uuid(*u),
            Value::Bytes(b) => IdValue::Bytes(b.clone()),
            other => {
                return Err(Error::TypeMismatch {
                    expected: "identifier".to_string(),
                    found: other.kind().to_string(),
                })
            }
        }))
    }

    /// The identifier as a bindable value.
    pub fn to_value(&self) -> Value {
        match self {
            IdValue::Int(i) => Value::Int64(*i),
            IdValue::String(s) => Value::String(s.clone()),
            IdValue::Uuid(u) => Value::Uuid(*u),
            IdValue::Bytes(b) => Value::Bytes(b.clone()),
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Int(i) => write!(f, "{}", i),
            IdValue::String(s) => write!(f, "{}", s),
            IdValue::Uuid(u) => write!(f, "{}", hex::encode(u)),
            IdValue::Bytes(b) => write!(f, "x{}", hex::encode(b)),
        }
    }
}

impl From<i64> for IdValue {
    fn from(v: i64) -> Self {
        IdValue::Int(v)
    }
}

impl From<i32> for IdValue {
    fn from(v: i32) -> Self {
        IdValue::Int(v as i64)
    }
}

impl From<&str> for IdValue {
    fn from(v: &str) -> Self {
        IdValue::String(v.to_string())
    }
}

/// Identity of an entity instance. `entity` is the hierarchy root, so a
/// subclass instance is found under any type of its hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub entity: String,
    pub id: IdValue,
}

impl EntityKey {
    /// Create a key.
    pub fn new(entity: impl Into<String>, id: impl Into<IdValue>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// Identity of a collection: its role plus the owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionKey {
    pub role: String,
    pub owner: EntityKey,
}

impl CollectionKey {
    /// Create a key.
    pub fn new(role: impl Into<String>, owner: EntityKey) -> Self {
        Self {
            role: role.into(),
            owner,
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.role, self.owner)
    }
}

/// Index entry for a unique-key lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueKey {
    pub entity: String,
    pub attribute: String,
    pub value: IdValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_widths_compare_equal() {
        let a = IdValue::from_value(&Value::Int32(5)).unwrap();
        let b = IdValue::from_value(&Value::Int64(5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(IdValue::from_value(&Value::Null).unwrap(), None);
        assert!(IdValue::from_value(&Value::Float64(1.0)).is_err());
    }

    #[test]
    fn test_display() {
        let key = EntityKey::new("Order", 1);
        assert_eq!(key.to_string(), "Order#1");
        assert_eq!(CollectionKey::new("Order.lines", key).to_string(), "Order.lines(Order#1)");
    }
}
