//! Assembled result values and row shapes.

use std::collections::BTreeMap;

use orql_proto::{TupleTransformer, Value};

use crate::context::{EntityRef, PropertyValue};

/// One selected value of an assembled row.
#[derive(Debug, Clone)]
pub enum ResultValue {
    Null,
    Scalar(Value),
    /// Embeddable components, as a [`PropertyValue::Component`].
    Embeddable(PropertyValue),
    Entity(EntityRef),
}

impl ResultValue {
    /// The entity, if this is an entity result.
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            ResultValue::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// The scalar, if this is a basic result.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            ResultValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ResultValue::Null)
    }
}

/// A row as handed to the caller.
#[derive(Debug, Clone)]
pub enum QueryRow {
    /// Queries selecting one value.
    Single(ResultValue),
    Tuple(Vec<ResultValue>),
    /// Values keyed by selection alias.
    Map(BTreeMap<String, ResultValue>),
}

impl QueryRow {
    /// Shape assembled values according to the tuple transformer.
    pub fn from_values(mut values: Vec<ResultValue>, aliases: &[String], transformer: TupleTransformer) -> Self {
        match transformer {
            TupleTransformer::AliasToMap => QueryRow::Map(aliases.iter().cloned().zip(values).collect()),
            TupleTransformer::ToList if values.len() == 1 => match values.pop() {
                Some(value) => QueryRow::Single(value),
                None => QueryRow::Tuple(Vec::new()),
            },
            TupleTransformer::ToList => QueryRow::Tuple(values),
        }
    }

    /// The entity of a single-value row.
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            QueryRow::Single(value) => value.as_entity(),
            _ => None,
        }
    }

    /// The scalar of a single-value row.
    pub fn scalar(&self) -> Option<&Value> {
        match self {
            QueryRow::Single(value) => value.as_scalar(),
            _ => None,
        }
    }

    /// Value at `index`.
    pub fn get(&self, index: usize) -> Option<&ResultValue> {
        match self {
            QueryRow::Single(value) => (index == 0).then_some(value),
            QueryRow::Tuple(values) => values.get(index),
            QueryRow::Map(values) => values.values().nth(index),
        }
    }

    /// Value selected under `alias` in a map row.
    pub fn get_by_alias(&self, alias: &str) -> Option<&ResultValue> {
        match self {
            QueryRow::Map(values) => values.get(alias),
            _ => None,
        }
    }
}
