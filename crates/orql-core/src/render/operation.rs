//! Driver-ready statements.

use std::collections::BTreeSet;

use orql_proto::{LoadQueryInfluencers, QueryOptions, QueryParameterBindings, Value};

use crate::error::Error;
use crate::metamodel::ScalarType;
use crate::sql::ParameterSource;

/// One `?` placeholder of a rendered statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub source: ParameterSource,
    pub scalar: Option<ScalarType>,
}

/// Everything a single execution resolves parameters from.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub bindings: &'a QueryParameterBindings,
    pub influencers: &'a LoadQueryInfluencers,
    pub options: &'a QueryOptions,
}

impl ParameterSpec {
    /// Resolve the value to bind.
    pub fn resolve(&self, context: &ExecutionContext<'_>) -> Result<Value, Error> {
        match &self.source {
            ParameterSource::Query(parameter) => context
                .bindings
                .get(parameter)
                .cloned()
                .ok_or_else(|| Error::MissingParameter(parameter.to_string())),
            ParameterSource::Filter { filter, parameter } => context
                .influencers
                .enabled_filters
                .get(filter)
                .and_then(|values| values.get(parameter))
                .cloned()
                .ok_or_else(|| Error::MissingParameter(format!("{}.{}", filter, parameter))),
            ParameterSource::FirstResult => context
                .options
                .limit
                .first_result
                .map(|v| Value::Int64(v as i64))
                .ok_or_else(|| Error::MissingParameter("first_result".to_string())),
            ParameterSource::MaxResults => context
                .options
                .limit
                .max_results
                .map(|v| Value::Int64(v as i64))
                .ok_or_else(|| Error::MissingParameter("max_results".to_string())),
            ParameterSource::Bound(value) => Ok(value.clone()),
        }
    }
}

/// A rendered statement: SQL text, ordered parameters and the tables it
/// touches.
#[derive(Debug, Clone, PartialEq)]
pub struct JdbcOperation {
    pub sql: String,
    pub parameters: Vec<ParameterSpec>,
    pub affected_tables: BTreeSet<String>,
}

impl JdbcOperation {
    /// Resolve every parameter in placeholder order.
    pub fn bind_values(&self, context: &ExecutionContext<'_>) -> Result<Vec<Value>, Error> {
        self.parameters.iter().map(|p| p.resolve(context)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orql_proto::ParameterRef;

    #[test]
    fn test_resolve_sources() {
        let bindings = QueryParameterBindings::new().with_named("id", 7i64);
        let mut influencers = LoadQueryInfluencers::new();
        influencers
            .enable_filter("tenant")
            .insert("tenantId".into(), Value::Int64(3));
        let options = QueryOptions::new().with_max_results(10);
        let context = ExecutionContext {
            bindings: &bindings,
            influencers: &influencers,
            options: &options,
        };

        let operation = JdbcOperation {
            sql: "select 1".into(),
            parameters: vec![
                ParameterSpec {
                    source: ParameterSource::Query(ParameterRef::Named("id".into())),
                    scalar: None,
                },
                ParameterSpec {
                    source: ParameterSource::Filter {
                        filter: "tenant".into(),
                        parameter: "tenantId".into(),
                    },
                    scalar: None,
                },
                ParameterSpec {
                    source: ParameterSource::MaxResults,
                    scalar: None,
                },
            ],
            affected_tables: BTreeSet::new(),
        };
        assert_eq!(
            operation.bind_values(&context).unwrap(),
            vec![Value::Int64(7), Value::Int64(3), Value::Int64(10)]
        );
    }

    #[test]
    fn test_missing_parameter() {
        let bindings = QueryParameterBindings::new();
        let influencers = LoadQueryInfluencers::new();
        let options = QueryOptions::new();
        let context = ExecutionContext {
            bindings: &bindings,
            influencers: &influencers,
            options: &options,
        };
        let spec = ParameterSpec {
            source: ParameterSource::Query(ParameterRef::Positional(1)),
            scalar: None,
        };
        assert!(matches!(spec.resolve(&context), Err(Error::MissingParameter(p)) if p == "?1"));
    }
}
