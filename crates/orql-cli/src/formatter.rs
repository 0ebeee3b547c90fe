//! Output formatting for query results.

use clap::ValueEnum;
use orql_core::metamodel::Metamodel;
use orql_core::{EntityRef, PropertyValue, QueryRow, ResultValue};
use orql_proto::Value;
use serde_json::{json, Map};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per row
    Text,
    /// JSON array of rows
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Render `rows` in `format`.
pub fn format_rows(model: &Metamodel, rows: &[QueryRow], format: OutputFormat) -> String {
    let values: Vec<serde_json::Value> = rows.iter().map(|row| row_to_json(model, row)).collect();
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(&values).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Text => {
            let mut out: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            out.push(format!("({} rows)", rows.len()));
            out.join("\n")
        }
    }
}

fn row_to_json(model: &Metamodel, row: &QueryRow) -> serde_json::Value {
    match row {
        QueryRow::Single(value) => result_to_json(model, value),
        QueryRow::Tuple(values) => values.iter().map(|v| result_to_json(model, v)).collect(),
        QueryRow::Map(values) => values
            .iter()
            .map(|(alias, v)| (alias.clone(), result_to_json(model, v)))
            .collect::<Map<_, _>>()
            .into(),
    }
}

fn result_to_json(model: &Metamodel, value: &ResultValue) -> serde_json::Value {
    match value {
        ResultValue::Null => serde_json::Value::Null,
        ResultValue::Scalar(value) => value_to_json(value),
        ResultValue::Embeddable(property) => property_to_json(property),
        ResultValue::Entity(instance) => entity_to_json(model, instance),
    }
}

/// Attributes of a managed instance keyed by name. Placeholders only show
/// their identity.
fn entity_to_json(model: &Metamodel, instance: &EntityRef) -> serde_json::Value {
    let instance = instance.borrow();
    let mut object = Map::new();
    object.insert("$entity".to_string(), json!(instance.entity));
    object.insert("$id".to_string(), value_to_json(&instance.key.id.to_value()));
    if !instance.initialized {
        object.insert("$initialized".to_string(), json!(false));
        return object.into();
    }
    if let Ok(mapping) = model.entity(&instance.entity) {
        for (attribute, state) in mapping.attributes.iter().zip(&instance.state) {
            object.insert(attribute.name().to_string(), property_to_json(state));
        }
    }
    object.into()
}

fn property_to_json(property: &PropertyValue) -> serde_json::Value {
    match property {
        PropertyValue::Null => serde_json::Value::Null,
        PropertyValue::Basic(value) => value_to_json(value),
        PropertyValue::Component(parts) => parts.iter().map(property_to_json).collect(),
        PropertyValue::Entity(key) => json!(key.to_string()),
        PropertyValue::Collection(key) => json!(key.to_string()),
    }
}

pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int32(i) => serde_json::Value::Number((*i).into()),
        Value::Int64(i) | Value::Timestamp(i) => serde_json::Value::Number((*i).into()),
        Value::Float64(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(hex::encode(b)),
        Value::Uuid(u) => serde_json::Value::String(hex::encode(u)),
    }
}

/// Parameter value from the command line: JSON scalars, anything else as
/// text.
pub fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Null) => Value::Null,
        Ok(serde_json::Value::Bool(b)) => Value::Bool(b),
        Ok(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => n.as_f64().map(Value::Float64).unwrap_or(Value::Null),
        },
        Ok(serde_json::Value::String(s)) => Value::String(s),
        _ => Value::String(raw.to_string()),
    }
}
