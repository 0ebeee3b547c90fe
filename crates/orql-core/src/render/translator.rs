//! Statement tree to SQL text.
//!
//! A single-pass walker: every node appends its fragment to one buffer and
//! every parameter node records its [`ParameterSpec`] at the moment its `?`
//! is written, so placeholder order always matches parameter order.

use std::collections::BTreeSet;

use orql_proto::{AggregateFunction, ArithmeticOp, ComparisonOp, JoinType, SortDirection};

use super::dialect::{Dialect, PagingPiece};
use super::operation::{JdbcOperation, ParameterSpec};
use crate::error::Error;
use crate::sql::{
    DeleteStatement, Expression, FragmentPiece, FromClause, JunctionKind, ParameterSource,
    Predicate, QuerySpec, SelectStatement, SqlAssignment, TableGroup, TableGroupId,
    TableReference, TableSource, UpdateStatement, UNION_CLASS_COLUMN,
};

/// Renders statement trees for one dialect.
pub struct SqlAstTranslator<'d> {
    dialect: &'d dyn Dialect,
    sql: String,
    parameters: Vec<ParameterSpec>,
    qualify_columns: bool,
}

impl<'d> SqlAstTranslator<'d> {
    /// Create a translator with an empty buffer.
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(256),
            parameters: Vec::new(),
            qualify_columns: true,
        }
    }

    /// Render a select statement.
    pub fn render_select(dialect: &'d dyn Dialect, statement: &SelectStatement) -> Result<JdbcOperation, Error> {
        let mut translator = Self::new(dialect);
        translator.visit_query_spec(&statement.query)?;
        if let Some(clause) = dialect.for_update(statement.lock_mode) {
            translator.sql.push_str(clause);
        }
        Ok(translator.finish(statement.affected_tables.clone()))
    }

    /// Render a bare query specification.
    pub fn render_query(dialect: &'d dyn Dialect, query: &QuerySpec) -> Result<JdbcOperation, Error> {
        let mut translator = Self::new(dialect);
        translator.visit_query_spec(query)?;
        let affected = query.from.physical_tables();
        Ok(translator.finish(affected))
    }

    /// Render a single-table update.
    pub fn render_update(dialect: &'d dyn Dialect, update: &UpdateStatement) -> Result<JdbcOperation, Error> {
        let mut translator = Self::new(dialect);
        translator.sql.push_str("update ");
        translator.sql.push_str(&update.table);
        translator.visit_set_clause(&update.assignments, &update.table)?;
        if let Some(predicate) = &update.predicate {
            translator.sql.push_str(" where ");
            translator.visit_predicate(predicate)?;
        }
        Ok(translator.finish([update.table.clone()].into_iter().collect()))
    }

    /// Render a single-table delete.
    pub fn render_delete(dialect: &'d dyn Dialect, delete: &DeleteStatement) -> Result<JdbcOperation, Error> {
        let mut translator = Self::new(dialect);
        translator.sql.push_str("delete from ");
        translator.sql.push_str(&delete.table);
        if let Some(predicate) = &delete.predicate {
            translator.sql.push_str(" where ");
            translator.visit_predicate(predicate)?;
        }
        Ok(translator.finish([delete.table.clone()].into_iter().collect()))
    }

    pub(crate) fn finish(self, affected_tables: BTreeSet<String>) -> JdbcOperation {
        JdbcOperation {
            sql: self.sql,
            parameters: self.parameters,
            affected_tables,
        }
    }

    pub(crate) fn push_str(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    pub(crate) fn push_parameter(&mut self, spec: ParameterSpec) {
        self.sql.push('?');
        self.parameters.push(spec);
    }

    /// `set a = ?, (b, c) = (...)`, columns unqualified. Every column of an
    /// assignment must live in `table`.
    pub(crate) fn visit_set_clause(&mut self, assignments: &[SqlAssignment], table: &str) -> Result<(), Error> {
        self.sql.push_str(" set ");
        let previous = self.qualify_columns;
        self.qualify_columns = false;
        for (i, assignment) in assignments.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            if let Some(column) = assignment.columns.iter().find(|c| c.qualifier != table) {
                return Err(Error::SqlTree(format!(
                    "assignment column {}.{} does not belong to table {}",
                    column.qualifier, column.column, table
                )));
            }
            match assignment.columns.as_slice() {
                [single] => self.sql.push_str(&single.column),
                columns => {
                    self.sql.push('(');
                    let names: Vec<&str> = columns.iter().map(|c| c.column.as_str()).collect();
                    self.sql.push_str(&names.join(", "));
                    self.sql.push(')');
                }
            }
            self.sql.push_str(" = ");
            self.visit_expression(&assignment.value)?;
        }
        self.qualify_columns = previous;
        Ok(())
    }

    fn visit_query_spec(&mut self, query: &QuerySpec) -> Result<(), Error> {
        self.sql.push_str("select ");
        if query.select.distinct {
            self.sql.push_str("distinct ");
        }
        if query.select.selections.is_empty() {
            return Err(Error::SqlTree("select clause is empty".to_string()));
        }
        for (i, selection) in query.select.selections.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.visit_expression(&selection.expression)?;
        }

        self.visit_from_clause(&query.from)?;

        if let Some(predicate) = &query.predicate {
            self.sql.push_str(" where ");
            self.visit_predicate(predicate)?;
        }
        if !query.group_by.is_empty() {
            self.sql.push_str(" group by ");
            for (i, expression) in query.group_by.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.visit_expression(expression)?;
            }
        }
        if let Some(having) = &query.having {
            self.sql.push_str(" having ");
            self.visit_predicate(having)?;
        }
        if !query.order_by.is_empty() {
            self.sql.push_str(" order by ");
            for (i, sort) in query.order_by.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.visit_expression(&sort.expression)?;
                self.sql.push_str(match sort.direction {
                    SortDirection::Asc => " asc",
                    SortDirection::Desc => " desc",
                });
                if let Some(nulls) = sort.nulls.and_then(|n| self.dialect.nulls_precedence(n)) {
                    self.sql.push_str(nulls);
                }
            }
        }

        for piece in self
            .dialect
            .paging(query.offset.is_some(), query.limit.is_some())
        {
            match piece {
                PagingPiece::Text(text) => self.sql.push_str(text),
                PagingPiece::Offset => {
                    if let Some(offset) = &query.offset {
                        self.visit_expression(offset)?;
                    }
                }
                PagingPiece::Limit => {
                    if let Some(limit) = &query.limit {
                        self.visit_expression(limit)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn visit_from_clause(&mut self, from: &FromClause) -> Result<(), Error> {
        if from.roots().is_empty() {
            return Err(Error::SqlTree("from clause has no roots".to_string()));
        }
        self.sql.push_str(" from ");
        for (i, root) in from.roots().iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            let group = group(from, *root)?;
            self.visit_table_reference(&group.primary)?;
            self.visit_group_body(from, group, false)?;
        }
        Ok(())
    }

    /// Reference joins and nested group joins of `group`. Inner reference
    /// joins of an outer-joined group are rendered as left joins.
    fn visit_group_body(&mut self, from: &FromClause, group: &TableGroup, outer: bool) -> Result<(), Error> {
        for join in &group.reference_joins {
            let join_type = if outer && join.join_type == JoinType::Inner {
                JoinType::Left
            } else {
                join.join_type
            };
            self.sql.push_str(join_keyword(join_type));
            self.visit_table_reference(&join.reference)?;
            self.sql.push_str(" on ");
            self.visit_predicate(&join.predicate)?;
        }
        for join in &group.joins {
            let joined = self::group(from, join.group)?;
            self.sql.push_str(join_keyword(join.join_type));
            self.visit_table_reference(&joined.primary)?;
            self.sql.push_str(" on ");
            match &join.predicate {
                Some(predicate) => self.visit_predicate(predicate)?,
                None => self.sql.push_str("1=1"),
            }
            self.visit_group_body(from, joined, outer || join.join_type.is_outer())?;
        }
        Ok(())
    }

    fn visit_table_reference(&mut self, reference: &TableReference) -> Result<(), Error> {
        match &reference.source {
            TableSource::Named(table) => self.sql.push_str(table),
            TableSource::Union(union) => {
                self.sql.push('(');
                for (i, member) in union.members.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(" union all ");
                    }
                    self.sql.push_str("select ");
                    for column in &union.columns {
                        if member.columns.contains(column) {
                            self.sql.push_str(column);
                        } else {
                            self.sql.push_str("null as ");
                            self.sql.push_str(column);
                        }
                        self.sql.push_str(", ");
                    }
                    self.sql.push_str(&member.clazz.to_string());
                    self.sql.push_str(" as ");
                    self.sql.push_str(UNION_CLASS_COLUMN);
                    self.sql.push_str(" from ");
                    self.sql.push_str(&member.table);
                }
                self.sql.push(')');
            }
        }
        self.sql.push(' ');
        self.sql.push_str(&reference.alias);
        Ok(())
    }

    pub(crate) fn visit_expression(&mut self, expression: &Expression) -> Result<(), Error> {
        match expression {
            Expression::Column(column) => {
                if self.qualify_columns {
                    self.sql.push_str(&column.qualifier);
                    self.sql.push('.');
                }
                self.sql.push_str(&column.column);
            }
            Expression::Parameter(parameter) => self.push_parameter(ParameterSpec {
                source: parameter.source.clone(),
                scalar: parameter.scalar,
            }),
            Expression::Literal(value) => {
                let literal = self.dialect.render_literal(value);
                self.sql.push_str(&literal);
            }
            Expression::Arithmetic { op, lhs, rhs } => {
                self.sql.push('(');
                self.visit_expression(lhs)?;
                self.sql.push_str(match op {
                    ArithmeticOp::Add => "+",
                    ArithmeticOp::Subtract => "-",
                    ArithmeticOp::Multiply => "*",
                    ArithmeticOp::Divide => "/",
                });
                self.visit_expression(rhs)?;
                self.sql.push(')');
            }
            Expression::Function { name, arguments } if name == "concat" => {
                self.sql.push('(');
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str("||");
                    }
                    self.visit_expression(argument)?;
                }
                self.sql.push(')');
            }
            Expression::Function { name, arguments } => {
                self.sql.push_str(name);
                self.sql.push('(');
                self.visit_list(arguments)?;
                self.sql.push(')');
            }
            Expression::Aggregate {
                function,
                distinct,
                argument,
            } => {
                self.sql.push_str(match function {
                    AggregateFunction::Count => "count(",
                    AggregateFunction::Sum => "sum(",
                    AggregateFunction::Avg => "avg(",
                    AggregateFunction::Min => "min(",
                    AggregateFunction::Max => "max(",
                });
                if *distinct {
                    self.sql.push_str("distinct ");
                }
                match argument {
                    Some(argument) => self.visit_expression(argument)?,
                    None => self.sql.push('*'),
                }
                self.sql.push(')');
            }
            Expression::Tuple(items) => {
                self.sql.push('(');
                self.visit_list(items)?;
                self.sql.push(')');
            }
            Expression::SubQuery(query) => self.visit_subquery(query)?,
        }
        Ok(())
    }

    fn visit_list(&mut self, expressions: &[Expression]) -> Result<(), Error> {
        for (i, expression) in expressions.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.visit_expression(expression)?;
        }
        Ok(())
    }

    fn visit_subquery(&mut self, query: &QuerySpec) -> Result<(), Error> {
        let previous = self.qualify_columns;
        self.qualify_columns = true;
        self.sql.push('(');
        self.visit_query_spec(query)?;
        self.sql.push(')');
        self.qualify_columns = previous;
        Ok(())
    }

    pub(crate) fn visit_predicate(&mut self, predicate: &Predicate) -> Result<(), Error> {
        match predicate {
            Predicate::Comparison { lhs, op, rhs } => {
                self.visit_expression(lhs)?;
                self.sql.push_str(match op {
                    ComparisonOp::Eq => "=",
                    ComparisonOp::Ne => "<>",
                    ComparisonOp::Lt => "<",
                    ComparisonOp::Le => "<=",
                    ComparisonOp::Gt => ">",
                    ComparisonOp::Ge => ">=",
                });
                self.visit_expression(rhs)?;
            }
            Predicate::Junction { kind, predicates } => {
                if predicates.is_empty() {
                    self.sql.push_str(match kind {
                        JunctionKind::And => "1=1",
                        JunctionKind::Or => "1=0",
                    });
                    return Ok(());
                }
                let separator = match kind {
                    JunctionKind::And => " and ",
                    JunctionKind::Or => " or ",
                };
                self.sql.push('(');
                for (i, predicate) in predicates.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(separator);
                    }
                    self.visit_predicate(predicate)?;
                }
                self.sql.push(')');
            }
            Predicate::Negated(inner) => {
                self.sql.push_str("not (");
                self.visit_predicate(inner)?;
                self.sql.push(')');
            }
            Predicate::NullCheck { expr, negated } => {
                let components = expr.components();
                let suffix = if *negated { " is not null" } else { " is null" };
                let grouped = components.len() > 1;
                if grouped {
                    self.sql.push('(');
                }
                for (i, component) in components.into_iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(" and ");
                    }
                    self.visit_expression(component)?;
                    self.sql.push_str(suffix);
                }
                if grouped {
                    self.sql.push(')');
                }
            }
            Predicate::InList {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    self.sql.push_str(if *negated { "1=1" } else { "1=0" });
                    return Ok(());
                }
                self.visit_expression(expr)?;
                self.sql.push_str(if *negated { " not in (" } else { " in (" });
                self.visit_list(values)?;
                self.sql.push(')');
            }
            Predicate::InSubQuery {
                expr,
                subquery,
                negated,
            } => {
                self.visit_expression(expr)?;
                self.sql.push_str(if *negated { " not in " } else { " in " });
                self.visit_subquery(subquery)?;
            }
            Predicate::Like {
                expr,
                pattern,
                negated,
            } => {
                self.visit_expression(expr)?;
                self.sql.push_str(if *negated { " not like " } else { " like " });
                self.visit_expression(pattern)?;
            }
            Predicate::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.visit_expression(expr)?;
                self.sql.push_str(if *negated { " not between " } else { " between " });
                self.visit_expression(low)?;
                self.sql.push_str(" and ");
                self.visit_expression(high)?;
            }
            Predicate::Exists { subquery, negated } => {
                self.sql.push_str(if *negated { "not exists " } else { "exists " });
                self.visit_subquery(subquery)?;
            }
            Predicate::Fragment {
                filter,
                alias,
                fragment,
            } => {
                self.sql.push('(');
                for piece in fragment.pieces() {
                    match piece {
                        FragmentPiece::Text(text) => self.sql.push_str(text),
                        FragmentPiece::Alias => {
                            if self.qualify_columns {
                                self.sql.push_str(alias);
                            } else {
                                return Err(Error::SqlTree(format!(
                                    "filter '{}' cannot be applied to an unaliased table",
                                    filter
                                )));
                            }
                        }
                        FragmentPiece::Parameter(name) => self.push_parameter(ParameterSpec {
                            source: ParameterSource::Filter {
                                filter: filter.clone(),
                                parameter: name.clone(),
                            },
                            scalar: None,
                        }),
                    }
                }
                self.sql.push(')');
            }
        }
        Ok(())
    }
}

fn group(from: &FromClause, id: TableGroupId) -> Result<&TableGroup, Error> {
    from.group(id)
        .ok_or_else(|| Error::SqlTree(format!("unknown table group {}", id.0)))
}

fn join_keyword(join_type: JoinType) -> &'static str {
    match join_type {
        JoinType::Inner => " join ",
        JoinType::Left => " left join ",
        JoinType::Right => " right join ",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::dialect::{AnsiDialect, SqliteDialect};
    use crate::sql::{
        ColumnReference, NavigablePath, SqlSelection, TableReferenceJoin, UnionMember, UnionTable,
    };
    use orql_proto::{LockMode, ParameterRef, Value};
    use pretty_assertions::assert_eq;

    fn orders_with_customer(join_type: JoinType) -> QuerySpec {
        let mut query = QuerySpec::new();
        let path = NavigablePath::root("Order", None);
        let root = query.from.add_root(TableGroup::new(
            TableGroupId(0),
            path.clone(),
            TableReference::named("orders", "order1_0"),
        ));
        let mut customer = TableGroup::new(
            TableGroupId(0),
            path.append("customer"),
            TableReference::named("customer", "customer1_0"),
        );
        customer.reference_joins.push(TableReferenceJoin {
            join_type: JoinType::Inner,
            reference: TableReference::named("customer_details", "customer1_1"),
            predicate: Predicate::eq(
                Expression::column("customer1_1", "customer_id", None),
                Expression::column("customer1_0", "id", None),
            ),
        });
        query.from.add_join(
            root,
            customer,
            join_type,
            Some(Predicate::eq(
                Expression::column("customer1_0", "id", None),
                Expression::column("order1_0", "customer_id", None),
            )),
        );
        query.resolve_selection(Expression::column("order1_0", "id", None));
        query.resolve_selection(Expression::column("customer1_1", "vip", None));
        query
    }

    #[test]
    fn test_outer_group_join_relaxes_reference_joins() {
        let op = SqlAstTranslator::render_query(&SqliteDialect, &orders_with_customer(JoinType::Left)).unwrap();
        assert_eq!(
            op.sql,
            "select order1_0.id, customer1_1.vip from orders order1_0 \
             left join customer customer1_0 on customer1_0.id=order1_0.customer_id \
             left join customer_details customer1_1 on customer1_1.customer_id=customer1_0.id"
        );

        let op = SqlAstTranslator::render_query(&SqliteDialect, &orders_with_customer(JoinType::Inner)).unwrap();
        assert!(op.sql.contains(" join customer_details customer1_1"));
        assert!(!op.sql.contains("left join"));
        assert_eq!(
            op.affected_tables.into_iter().collect::<Vec<_>>(),
            vec!["customer", "customer_details", "orders"]
        );
    }

    #[test]
    fn test_parameters_follow_placeholder_order() {
        let mut query = orders_with_customer(JoinType::Left);
        query.add_restriction(Predicate::eq(
            Expression::column("order1_0", "status", None),
            Expression::parameter(ParameterSource::Query(ParameterRef::Named("status".into())), None),
        ));
        query.offset = Some(Expression::parameter(ParameterSource::FirstResult, None));
        query.limit = Some(Expression::parameter(ParameterSource::MaxResults, None));

        let sqlite = SqlAstTranslator::render_query(&SqliteDialect, &query).unwrap();
        assert!(sqlite.sql.ends_with(" where order1_0.status=? limit ? offset ?"));
        assert_eq!(sqlite.parameters[1].source, ParameterSource::MaxResults);
        assert_eq!(sqlite.parameters[2].source, ParameterSource::FirstResult);

        let ansi = SqlAstTranslator::render_query(&AnsiDialect, &query).unwrap();
        assert!(ansi.sql.ends_with(" offset ? rows fetch first ? rows only"));
        assert_eq!(ansi.parameters[1].source, ParameterSource::FirstResult);
    }

    #[test]
    fn test_union_derived_table() {
        let mut query = QuerySpec::new();
        let union = UnionTable {
            members: vec![
                UnionMember {
                    table: "dog".into(),
                    clazz: 2,
                    columns: ["id".to_string(), "barks".to_string()].into_iter().collect(),
                },
                UnionMember {
                    table: "cat".into(),
                    clazz: 3,
                    columns: ["id".to_string()].into_iter().collect(),
                },
            ],
            columns: vec!["barks".into(), "id".into()],
            covers: BTreeSet::new(),
        };
        query.from.add_root(TableGroup::new(
            TableGroupId(0),
            NavigablePath::root("Animal", None),
            TableReference {
                source: TableSource::Union(union),
                alias: "animal1_0".into(),
            },
        ));
        query.select.selections.push(SqlSelection {
            position: 0,
            expression: Expression::column("animal1_0", UNION_CLASS_COLUMN, None),
        });
        let op = SqlAstTranslator::render_query(&AnsiDialect, &query).unwrap();
        assert_eq!(
            op.sql,
            "select animal1_0.clazz_ from (select barks, id, 2 as clazz_ from dog \
             union all select null as barks, id, 3 as clazz_ from cat) animal1_0"
        );
    }

    #[test]
    fn test_update_renders_unqualified_set() {
        let update = UpdateStatement {
            table: "orders".into(),
            assignments: vec![SqlAssignment {
                columns: vec![ColumnReference::new("orders", "total", None)],
                value: Expression::Arithmetic {
                    op: ArithmeticOp::Multiply,
                    lhs: Box::new(Expression::column("orders", "total", None)),
                    rhs: Box::new(Expression::Literal(Value::Int64(2))),
                },
            }],
            predicate: Some(Predicate::eq(
                Expression::column("orders", "id", None),
                Expression::Literal(Value::Int64(1)),
            )),
        };
        let op = SqlAstTranslator::render_update(&SqliteDialect, &update).unwrap();
        assert_eq!(op.sql, "update orders set total = (total*2) where orders.id=1");
    }

    #[test]
    fn test_assignment_to_foreign_table_fails() {
        let update = UpdateStatement {
            table: "orders".into(),
            assignments: vec![SqlAssignment {
                columns: vec![
                    ColumnReference::new("orders", "total", None),
                    ColumnReference::new("order_extra", "note", None),
                ],
                value: Expression::Tuple(vec![
                    Expression::Literal(Value::Int64(1)),
                    Expression::Literal(Value::Null),
                ]),
            }],
            predicate: None,
        };
        assert!(matches!(
            SqlAstTranslator::render_update(&SqliteDialect, &update),
            Err(Error::SqlTree(_))
        ));
    }

    #[test]
    fn test_lock_clause() {
        let statement = SelectStatement {
            query: orders_with_customer(JoinType::Left),
            lock_mode: LockMode::PessimisticWrite,
            affected_tables: BTreeSet::new(),
        };
        let ansi = SqlAstTranslator::render_select(&AnsiDialect, &statement).unwrap();
        assert!(ansi.sql.ends_with(" for update"));
        let sqlite = SqlAstTranslator::render_select(&SqliteDialect, &statement).unwrap();
        assert!(!sqlite.sql.contains("for update"));
    }
}
