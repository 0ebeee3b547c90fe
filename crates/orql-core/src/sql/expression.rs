//! Relational expressions and predicates.

use orql_proto::{AggregateFunction, ArithmeticOp, ComparisonOp, ParameterRef, Value};

use super::fragment::FilterFragment;
use super::statement::QuerySpec;
use crate::metamodel::ScalarType;

/// A column qualified by its table alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnReference {
    pub qualifier: String,
    pub column: String,
    pub scalar: Option<ScalarType>,
}

impl ColumnReference {
    /// Create a column reference.
    pub fn new(qualifier: impl Into<String>, column: impl Into<String>, scalar: Option<ScalarType>) -> Self {
        Self {
            qualifier: qualifier.into(),
            column: column.into(),
            scalar,
        }
    }
}

/// Where the value of a statement parameter comes from at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSource {
    /// A query parameter.
    Query(ParameterRef),
    /// A parameter of an enabled filter.
    Filter { filter: String, parameter: String },
    /// `QueryOptions::limit.first_result`.
    FirstResult,
    /// `QueryOptions::limit.max_results`.
    MaxResults,
    /// A value fixed at render time.
    Bound(Value),
}

/// A statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct JdbcParameter {
    pub source: ParameterSource,
    pub scalar: Option<ScalarType>,
}

/// A value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Column(ColumnReference),
    Parameter(JdbcParameter),
    Literal(Value),
    Arithmetic {
        op: ArithmeticOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Function {
        name: String,
        arguments: Vec<Expression>,
    },
    Aggregate {
        function: AggregateFunction,
        distinct: bool,
        argument: Option<Box<Expression>>,
    },
    Tuple(Vec<Expression>),
    SubQuery(Box<QuerySpec>),
}

impl Expression {
    /// A column expression.
    pub fn column(qualifier: impl Into<String>, column: impl Into<String>, scalar: Option<ScalarType>) -> Self {
        Expression::Column(ColumnReference::new(qualifier, column, scalar))
    }

    /// A parameter expression.
    pub fn parameter(source: ParameterSource, scalar: Option<ScalarType>) -> Self {
        Expression::Parameter(JdbcParameter { source, scalar })
    }

    /// Best-known scalar type of the expression's value.
    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            Expression::Column(column) => column.scalar,
            Expression::Parameter(parameter) => parameter.scalar,
            Expression::Literal(value) => match value {
                Value::Bool(_) => Some(ScalarType::Bool),
                Value::Int32(_) => Some(ScalarType::Int32),
                Value::Int64(_) => Some(ScalarType::Int64),
                Value::Float64(_) => Some(ScalarType::Float64),
                Value::String(_) => Some(ScalarType::String),
                Value::Bytes(_) => Some(ScalarType::Bytes),
                Value::Timestamp(_) => Some(ScalarType::Timestamp),
                Value::Uuid(_) => Some(ScalarType::Uuid),
                Value::Null => None,
            },
            Expression::Arithmetic { op, lhs, rhs } => {
                match (lhs.scalar(), rhs.scalar()) {
                    (Some(ScalarType::Float64), _) | (_, Some(ScalarType::Float64)) => {
                        Some(ScalarType::Float64)
                    }
                    _ if *op == ArithmeticOp::Divide => Some(ScalarType::Float64),
                    (Some(l), _) => Some(l),
                    (None, r) => r,
                }
            }
            Expression::Function { name, arguments } => match name.as_str() {
                "length" => Some(ScalarType::Int64),
                "lower" | "upper" | "concat" => Some(ScalarType::String),
                _ => arguments.first().and_then(Expression::scalar),
            },
            Expression::Aggregate {
                function,
                argument,
                ..
            } => match function {
                AggregateFunction::Count => Some(ScalarType::Int64),
                AggregateFunction::Avg => Some(ScalarType::Float64),
                _ => argument.as_ref().and_then(|a| a.scalar()),
            },
            Expression::Tuple(_) => None,
            Expression::SubQuery(query) => query
                .select
                .selections
                .first()
                .and_then(|selection| selection.expression.scalar()),
        }
    }

    /// Component expressions of a tuple, or the expression itself.
    pub fn components(&self) -> Vec<&Expression> {
        match self {
            Expression::Tuple(items) => items.iter().collect(),
            other => vec![other],
        }
    }
}

/// Junction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JunctionKind {
    And,
    Or,
}

/// A boolean predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        lhs: Expression,
        op: ComparisonOp,
        rhs: Expression,
    },
    Junction {
        kind: JunctionKind,
        predicates: Vec<Predicate>,
    },
    Negated(Box<Predicate>),
    NullCheck {
        expr: Expression,
        negated: bool,
    },
    InList {
        expr: Expression,
        values: Vec<Expression>,
        negated: bool,
    },
    InSubQuery {
        expr: Expression,
        subquery: Box<QuerySpec>,
        negated: bool,
    },
    Like {
        expr: Expression,
        pattern: Expression,
        negated: bool,
    },
    Between {
        expr: Expression,
        low: Expression,
        high: Expression,
        negated: bool,
    },
    Exists {
        subquery: Box<QuerySpec>,
        negated: bool,
    },
    /// A filter condition applied to a table alias.
    Fragment {
        filter: String,
        alias: String,
        fragment: FilterFragment,
    },
}

impl Predicate {
    /// `lhs = rhs`.
    pub fn eq(lhs: Expression, rhs: Expression) -> Self {
        Predicate::Comparison {
            lhs,
            op: ComparisonOp::Eq,
            rhs,
        }
    }

    /// Conjunction of the given predicates, flattening nested conjunctions.
    /// A single predicate is returned as-is.
    pub fn and(predicates: Vec<Predicate>) -> Self {
        let mut flat = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match predicate {
                Predicate::Junction {
                    kind: JunctionKind::And,
                    predicates,
                } => flat.extend(predicates),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            if let Some(only) = flat.pop() {
                return only;
            }
        }
        Predicate::Junction {
            kind: JunctionKind::And,
            predicates: flat,
        }
    }

    /// Add `extra` to an optional predicate with `and`.
    pub fn conjoin(existing: Option<Predicate>, extra: Predicate) -> Predicate {
        match existing {
            Some(existing) => Predicate::and(vec![existing, extra]),
            None => extra,
        }
    }
}
