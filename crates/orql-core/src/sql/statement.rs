//! Relational statements.

use std::collections::BTreeSet;

use orql_proto::{LockMode, NullPrecedence, SortDirection};

use super::ast::FromClause;
use super::expression::{ColumnReference, Expression, Predicate};

/// A selected expression bound to a 0-based position in the row array.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlSelection {
    pub position: usize,
    pub expression: Expression,
}

/// The select list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectClause {
    pub distinct: bool,
    pub selections: Vec<SqlSelection>,
}

/// A sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpecification {
    pub expression: Expression,
    pub direction: SortDirection,
    pub nulls: Option<NullPrecedence>,
}

/// One query specification (top level or subquery).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub from: FromClause,
    pub select: SelectClause,
    pub predicate: Option<Predicate>,
    pub group_by: Vec<Expression>,
    pub having: Option<Predicate>,
    pub order_by: Vec<SortSpecification>,
    pub offset: Option<Expression>,
    pub limit: Option<Expression>,
}

impl QuerySpec {
    /// Create an empty query specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select an expression, reusing the slot of an equal expression that is
    /// already selected. Returns the row position.
    pub fn resolve_selection(&mut self, expression: Expression) -> usize {
        if let Some(existing) = self
            .select
            .selections
            .iter()
            .find(|selection| selection.expression == expression)
        {
            return existing.position;
        }
        let position = self.select.selections.len();
        self.select.selections.push(SqlSelection {
            position,
            expression,
        });
        position
    }

    /// Add a restriction to the where clause.
    pub fn add_restriction(&mut self, predicate: Predicate) {
        self.predicate = Some(Predicate::conjoin(self.predicate.take(), predicate));
    }
}

/// A complete select statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub query: QuerySpec,
    pub lock_mode: LockMode,
    pub affected_tables: BTreeSet<String>,
}

/// `set column(s) = value`. Columns are qualified by their physical table
/// name so that multi-table mutations can be bucketed per table.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlAssignment {
    pub columns: Vec<ColumnReference>,
    pub value: Expression,
}

/// Update of a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<SqlAssignment>,
    pub predicate: Option<Predicate>,
}

/// Delete from a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub predicate: Option<Predicate>,
}

/// Whether a multi-table mutation updates or deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Update,
    Delete,
}

/// A physical table touched by a multi-table mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationTable {
    pub table: String,
    pub key_column: String,
}

/// An update or delete spanning several physical tables.
///
/// The identifier select runs once; each table then gets its own statement
/// restricted by `key in (ids)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiTableMutation {
    pub kind: MutationKind,
    pub entity: String,
    /// Selects the identifiers of the affected rows in position 0.
    pub id_select: QuerySpec,
    /// Entity tables in delete order (most derived first).
    pub tables: Vec<MutationTable>,
    /// Collection tables cleared before deleting owners.
    pub collection_tables: Vec<MutationTable>,
    pub assignments: Vec<SqlAssignment>,
}

/// A compiled update or delete.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationStatement {
    Update(UpdateStatement),
    Delete(DeleteStatement),
    MultiTable(MultiTableMutation),
}

impl MutationStatement {
    /// Physical tables written by the statement.
    pub fn affected_tables(&self) -> BTreeSet<String> {
        match self {
            MutationStatement::Update(update) => [update.table.clone()].into_iter().collect(),
            MutationStatement::Delete(delete) => [delete.table.clone()].into_iter().collect(),
            MutationStatement::MultiTable(multi) => multi
                .tables
                .iter()
                .chain(multi.collection_tables.iter())
                .map(|t| t.table.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selections_are_deduplicated() {
        let mut query = QuerySpec::new();
        let id = Expression::column("order1_0", "id", None);
        let total = Expression::column("order1_0", "total", None);

        assert_eq!(query.resolve_selection(id.clone()), 0);
        assert_eq!(query.resolve_selection(total), 1);
        assert_eq!(query.resolve_selection(id), 0);
        assert_eq!(query.select.selections.len(), 2);
    }
}
