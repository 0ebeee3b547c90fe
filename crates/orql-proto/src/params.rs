//! Parameter bindings for a single execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tree::ParameterRef;
use crate::value::Value;

/// Values bound to the named and positional parameters of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParameterBindings {
    pub named: BTreeMap<String, Value>,
    pub positional: BTreeMap<u32, Value>,
}

impl QueryParameterBindings {
    /// No bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a named parameter.
    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Bind a positional parameter (1-based).
    pub fn with_positional(mut self, position: u32, value: impl Into<Value>) -> Self {
        self.positional.insert(position, value.into());
        self
    }

    /// Bind by reference.
    pub fn bind(&mut self, parameter: ParameterRef, value: impl Into<Value>) {
        match parameter {
            ParameterRef::Named(name) => {
                self.named.insert(name, value.into());
            }
            ParameterRef::Positional(position) => {
                self.positional.insert(position, value.into());
            }
        }
    }

    /// Look up the value bound to a parameter.
    pub fn get(&self, parameter: &ParameterRef) -> Option<&Value> {
        match parameter {
            ParameterRef::Named(name) => self.named.get(name),
            ParameterRef::Positional(position) => self.positional.get(position),
        }
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.positional.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_ref() {
        let mut bindings = QueryParameterBindings::new().with_named("name", "Ada");
        bindings.bind(ParameterRef::Positional(1), 42i64);

        assert_eq!(
            bindings.get(&ParameterRef::Named("name".into())),
            Some(&Value::String("Ada".into()))
        );
        assert_eq!(
            bindings.get(&ParameterRef::Positional(1)),
            Some(&Value::Int64(42))
        );
        assert_eq!(bindings.get(&ParameterRef::Positional(2)), None);
    }
}
