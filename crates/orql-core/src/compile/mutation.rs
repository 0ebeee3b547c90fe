//! Update and delete statements.
//!
//! A mutation touching exactly one physical table renders as a plain
//! `update`/`delete` with the table name standing in for the alias. Anything
//! spanning several tables (inheritance, secondary tables, collection tables
//! or implicit joins in the predicate) becomes a [`MultiTableMutation`]: the
//! matching identifiers are selected first and every table is then mutated
//! by key.

use orql_proto::{DeleteTree, FromId, TreePredicate, UpdateTree};
use tracing::debug;

use crate::error::Error;
use crate::metamodel::{AttributeKind, EntityKind, EntityMapping, Metamodel};
use crate::sql::{
    ColumnReference, DeleteStatement, Expression, MultiTableMutation, MutationKind, MutationStatement,
    MutationTable, Predicate, QuerySpec, SqlAssignment, TableGroup, TableGroupId, TableSource, UpdateStatement,
};

use super::builder::{infer_scalar, StatementBuilder};

impl<'c> StatementBuilder<'c> {
    pub(crate) fn build_update(&mut self, update: &'c UpdateTree) -> Result<MutationStatement, Error> {
        if update.assignments.is_empty() {
            return Err(Error::Parsing("update requires at least one assignment".to_string()));
        }
        let (gid, mapping) = self.mutation_target(update.target)?;
        let group = self.group(0, gid)?.clone();

        let mut assignments = Vec::new();
        for assignment in &update.assignments {
            let columns = self.assignment_columns(mapping, &group, &assignment.path)?;
            let mut value = self.translate_expr(&assignment.value)?;
            infer_scalar(&mut value, columns.first().and_then(|c| c.scalar));
            for column in columns {
                assignments.push(SqlAssignment {
                    columns: vec![column],
                    value: value.clone(),
                });
            }
        }
        let query = self.mutation_query(update.predicate.as_ref())?;

        if Self::is_single_table(&query, &group) {
            let (alias, table) = single_table(&group)?;
            let mut predicate = query.predicate;
            if let Some(predicate) = predicate.as_mut() {
                requalify_predicate(predicate, &alias, &table);
            }
            for assignment in &mut assignments {
                requalify_expression(&mut assignment.value, &alias, &table);
            }
            return Ok(MutationStatement::Update(UpdateStatement {
                table,
                assignments,
                predicate,
            }));
        }
        self.multi_table(MutationKind::Update, mapping, &group, query, assignments)
    }

    pub(crate) fn build_delete(&mut self, delete: &'c DeleteTree) -> Result<MutationStatement, Error> {
        let (gid, mapping) = self.mutation_target(delete.target)?;
        let group = self.group(0, gid)?.clone();
        let query = self.mutation_query(delete.predicate.as_ref())?;

        if Self::is_single_table(&query, &group) && collection_tables(self.model, mapping)?.is_empty() {
            let (alias, table) = single_table(&group)?;
            let mut predicate = query.predicate;
            if let Some(predicate) = predicate.as_mut() {
                requalify_predicate(predicate, &alias, &table);
            }
            return Ok(MutationStatement::Delete(DeleteStatement { table, predicate }));
        }
        self.multi_table(MutationKind::Delete, mapping, &group, query, Vec::new())
    }

    /// Resolve the mutation root, which must not carry joins.
    fn mutation_target(&mut self, target: FromId) -> Result<(TableGroupId, &'c EntityMapping), Error> {
        let model = self.model;
        self.apply_filters = false;
        if self.tree.joins_of(target).next().is_some() {
            return Err(Error::Parsing("joins are not allowed in update or delete statements".to_string()));
        }
        self.push_scope();
        let gid = self.resolve_root(target)?;
        let entity = self
            .group(0, gid)?
            .entity
            .clone()
            .ok_or_else(|| Error::SqlTree("mutation target reads no entity".to_string()))?;
        Ok((gid, model.entity(&entity)?))
    }

    fn mutation_query(&mut self, predicate: Option<&TreePredicate>) -> Result<QuerySpec, Error> {
        if let Some(predicate) = predicate {
            let predicate = self.translate_predicate(predicate)?;
            self.scope_mut()?.query.add_restriction(predicate);
        }
        Ok(self.pop_scope()?.finish())
    }

    /// Whether the mutation touches the primary table only.
    fn is_single_table(query: &QuerySpec, group: &TableGroup) -> bool {
        matches!(group.primary.source, TableSource::Named(_))
            && group.reference_joins.is_empty()
            && query.from.groups().len() == 1
    }

    /// Columns assigned through `path`. A union hierarchy assigns the column
    /// in every concrete table that has it.
    fn assignment_columns(
        &self,
        mapping: &EntityMapping,
        group: &TableGroup,
        path: &[String],
    ) -> Result<Vec<ColumnReference>, Error> {
        let model = self.model;
        let first = path
            .first()
            .ok_or_else(|| Error::Parsing("empty assignment path".to_string()))?;
        if mapping.is_identifier(first) {
            return Err(Error::IllegalQueryOperation(format!(
                "identifier '{}' of '{}' cannot be updated",
                first, mapping.name
            )));
        }
        let (_, attribute) = model
            .hierarchy_attribute(&mapping.name, first)
            .ok_or_else(|| Error::unresolved(&mapping.name, path.join(".")))?;
        let (column, scalar) = match (attribute.kind(), &path[1..]) {
            (AttributeKind::Basic { column, scalar, .. }, []) => (column.clone(), *scalar),
            (AttributeKind::ToOne { target, column, .. }, []) => (column.clone(), model.root_of(target)?.identifier.scalar),
            (
                AttributeKind::Embedded {
                    embeddable,
                    column_prefix,
                },
                rest,
            ) if !rest.is_empty() => {
                let found = model
                    .embedded_columns(embeddable, column_prefix)?
                    .into_iter()
                    .find(|c| c.path == rest)
                    .ok_or_else(|| {
                        Error::Parsing(format!("assignment to '{}' must name a basic component", path.join(".")))
                    })?;
                (found.column, found.scalar)
            }
            _ => {
                return Err(Error::Parsing(format!(
                    "cannot assign to '{}' of '{}'",
                    path.join("."),
                    mapping.name
                )))
            }
        };

        let tables: Vec<String> = if let TableSource::Union(_) = &group.primary.source {
            model
                .concrete_subtypes(&mapping.name)
                .into_iter()
                .filter_map(|m| match (m.attribute(attribute.name()), &m.table) {
                    (Some(a), Some(_)) => Some(a.table.clone()),
                    _ => None,
                })
                .collect()
        } else {
            vec![attribute.table.clone()]
        };
        Ok(tables
            .into_iter()
            .map(|table| ColumnReference::new(table, column.clone(), Some(scalar)))
            .collect())
    }

    fn multi_table(
        &mut self,
        kind: MutationKind,
        mapping: &EntityMapping,
        group: &TableGroup,
        mut id_select: QuerySpec,
        assignments: Vec<SqlAssignment>,
    ) -> Result<MutationStatement, Error> {
        let model = self.model;
        id_select.resolve_selection(Expression::column(
            group.primary_alias(),
            &mapping.identifier.column,
            Some(mapping.identifier.scalar),
        ));
        let tables = mutation_tables(model, mapping, group);
        let collection_tables = match kind {
            MutationKind::Delete => collection_tables(model, mapping)?,
            MutationKind::Update => Vec::new(),
        };
        debug!(
            entity = %mapping.name,
            tables = tables.len(),
            collection_tables = collection_tables.len(),
            "Multi-table mutation"
        );
        Ok(MutationStatement::MultiTable(MultiTableMutation {
            kind,
            entity: mapping.name.clone(),
            id_select,
            tables,
            collection_tables,
            assignments,
        }))
    }
}

fn single_table(group: &TableGroup) -> Result<(String, String), Error> {
    match &group.primary.source {
        TableSource::Named(table) => Ok((group.primary.alias.clone(), table.clone())),
        TableSource::Union(_) => Err(Error::SqlTree("union group is not a single table".to_string())),
    }
}

/// Tables storing instances of `mapping`, most derived first.
fn mutation_tables(model: &Metamodel, mapping: &EntityMapping, group: &TableGroup) -> Vec<MutationTable> {
    let mut tables: Vec<MutationTable> = Vec::new();
    let mut push = |table: &str, key_column: &str| {
        if !tables.iter().any(|t| t.table == table) {
            tables.push(MutationTable {
                table: table.to_string(),
                key_column: key_column.to_string(),
            });
        }
    };

    if let TableSource::Union(_) = &group.primary.source {
        for member in model.concrete_subtypes(&mapping.name).into_iter().rev() {
            if let Some(table) = &member.table {
                push(table, &member.key_column);
            }
        }
        return tables;
    }

    let mut descendants: Vec<(usize, &EntityMapping)> = model
        .descendants(&mapping.name)
        .into_iter()
        .filter(|d| d.kind == EntityKind::JoinedSubclass)
        .map(|d| (depth(model, d), d))
        .collect();
    descendants.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, descendant) in descendants {
        if let Some(table) = &descendant.table {
            push(table, &descendant.key_column);
        }
    }

    let mut current = Some(mapping);
    while let Some(m) = current {
        if m.kind == EntityKind::JoinedSubclass {
            if let Some(table) = &m.table {
                push(table, &m.key_column);
            }
        }
        for secondary in &m.secondary_tables {
            push(&secondary.name, &secondary.key_column);
        }
        current = m.superclass.as_deref().and_then(|s| model.get_entity(s));
    }
    push(&mapping.root_table, &mapping.identifier.column);
    tables
}

fn depth(model: &Metamodel, mapping: &EntityMapping) -> usize {
    let mut depth = 0;
    let mut current = mapping.superclass.as_deref();
    while let Some(name) = current {
        depth += 1;
        current = model.get_entity(name).and_then(|m| m.superclass.as_deref());
    }
    depth
}

/// Collection tables owned by `mapping` or its subtypes.
fn collection_tables(model: &Metamodel, mapping: &EntityMapping) -> Result<Vec<MutationTable>, Error> {
    let mut tables: Vec<MutationTable> = Vec::new();
    for attribute in model.polymorphic_state(&mapping.name)? {
        if let AttributeKind::Collection { mapping: collection, .. } = attribute.kind() {
            if let Some((table, key_column)) = collection.collection_table() {
                if !tables.iter().any(|t| t.table == table) {
                    tables.push(MutationTable {
                        table: table.to_string(),
                        key_column: key_column.to_string(),
                    });
                }
            }
        }
    }
    Ok(tables)
}

fn requalify_column(column: &mut ColumnReference, from: &str, to: &str) {
    if column.qualifier == from {
        column.qualifier = to.to_string();
    }
}

pub(crate) fn requalify_expression(expression: &mut Expression, from: &str, to: &str) {
    match expression {
        Expression::Column(column) => requalify_column(column, from, to),
        Expression::Parameter(_) | Expression::Literal(_) => {}
        Expression::Arithmetic { lhs, rhs, .. } => {
            requalify_expression(lhs, from, to);
            requalify_expression(rhs, from, to);
        }
        Expression::Function { arguments, .. } => arguments.iter_mut().for_each(|a| requalify_expression(a, from, to)),
        Expression::Aggregate { argument, .. } => {
            if let Some(argument) = argument {
                requalify_expression(argument, from, to);
            }
        }
        Expression::Tuple(items) => items.iter_mut().for_each(|i| requalify_expression(i, from, to)),
        Expression::SubQuery(query) => requalify_query(query, from, to),
    }
}

pub(crate) fn requalify_predicate(predicate: &mut Predicate, from: &str, to: &str) {
    match predicate {
        Predicate::Comparison { lhs, rhs, .. } => {
            requalify_expression(lhs, from, to);
            requalify_expression(rhs, from, to);
        }
        Predicate::Junction { predicates, .. } => predicates.iter_mut().for_each(|p| requalify_predicate(p, from, to)),
        Predicate::Negated(inner) => requalify_predicate(inner, from, to),
        Predicate::NullCheck { expr, .. } => requalify_expression(expr, from, to),
        Predicate::InList { expr, values, .. } => {
            requalify_expression(expr, from, to);
            values.iter_mut().for_each(|v| requalify_expression(v, from, to));
        }
        Predicate::InSubQuery { expr, subquery, .. } => {
            requalify_expression(expr, from, to);
            requalify_query(subquery, from, to);
        }
        Predicate::Like { expr, pattern, .. } => {
            requalify_expression(expr, from, to);
            requalify_expression(pattern, from, to);
        }
        Predicate::Between { expr, low, high, .. } => {
            requalify_expression(expr, from, to);
            requalify_expression(low, from, to);
            requalify_expression(high, from, to);
        }
        Predicate::Exists { subquery, .. } => requalify_query(subquery, from, to),
        Predicate::Fragment { alias, .. } => {
            if alias == from {
                *alias = to.to_string();
            }
        }
    }
}

fn requalify_query(query: &mut QuerySpec, from: &str, to: &str) {
    for selection in &mut query.select.selections {
        requalify_expression(&mut selection.expression, from, to);
    }
    if let Some(predicate) = query.predicate.as_mut() {
        requalify_predicate(predicate, from, to);
    }
    query.group_by.iter_mut().for_each(|e| requalify_expression(e, from, to));
    if let Some(having) = query.having.as_mut() {
        requalify_predicate(having, from, to);
    }
    for sort in &mut query.order_by {
        requalify_expression(&mut sort.expression, from, to);
    }
    for index in 0..query.from.groups().len() {
        if let Some(group) = query.from.group_mut(TableGroupId(index)) {
            for join in &mut group.joins {
                if let Some(predicate) = join.predicate.as_mut() {
                    requalify_predicate(predicate, from, to);
                }
            }
            for join in &mut group.reference_joins {
                requalify_predicate(&mut join.predicate, from, to);
            }
        }
    }
}
