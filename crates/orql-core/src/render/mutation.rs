//! Multi-table mutation rendering.
//!
//! The identifier select is rendered once. Each physical table then gets a
//! bucket holding the assignments whose columns live in it; a bucket renders
//! to `update|delete ... where key in (?, ...)` once identifiers are known.

use std::collections::BTreeSet;

use orql_proto::Value;

use super::dialect::Dialect;
use super::operation::{JdbcOperation, ParameterSpec};
use super::translator::SqlAstTranslator;
use crate::error::Error;
use crate::sql::{MultiTableMutation, MutationKind, ParameterSource, SqlAssignment};

/// What a bucket does to its table.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketAction {
    Update(Vec<SqlAssignment>),
    Delete,
}

/// The per-table statement builder of a multi-table mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBucket {
    pub table: String,
    pub key_column: String,
    pub action: BucketAction,
}

/// Rendered id select plus the table buckets in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiTableOperations {
    pub id_select: JdbcOperation,
    pub buckets: Vec<TableBucket>,
}

/// Split a multi-table mutation into its id select and table buckets.
pub fn prepare_multi_table(dialect: &dyn Dialect, mutation: &MultiTableMutation) -> Result<MultiTableOperations, Error> {
    let id_select = SqlAstTranslator::render_query(dialect, &mutation.id_select)?;
    let buckets = match mutation.kind {
        MutationKind::Delete => mutation
            .collection_tables
            .iter()
            .chain(mutation.tables.iter())
            .map(|table| TableBucket {
                table: table.table.clone(),
                key_column: table.key_column.clone(),
                action: BucketAction::Delete,
            })
            .collect(),
        MutationKind::Update => bucket_assignments(mutation)?,
    };
    Ok(MultiTableOperations { id_select, buckets })
}

fn bucket_assignments(mutation: &MultiTableMutation) -> Result<Vec<TableBucket>, Error> {
    let mut buckets: Vec<TableBucket> = mutation
        .tables
        .iter()
        .rev()
        .map(|table| TableBucket {
            table: table.table.clone(),
            key_column: table.key_column.clone(),
            action: BucketAction::Update(Vec::new()),
        })
        .collect();

    for assignment in &mutation.assignments {
        let tables: BTreeSet<&str> = assignment
            .columns
            .iter()
            .map(|c| c.qualifier.as_str())
            .collect();
        let table = match tables.len() {
            1 => tables.into_iter().next().unwrap_or_default(),
            _ => {
                return Err(Error::SqlTree(format!(
                    "assignment to {} spans tables {:?}",
                    column_list(assignment),
                    tables
                )))
            }
        };
        let bucket = buckets
            .iter_mut()
            .find(|b| b.table == table)
            .ok_or_else(|| Error::SqlTree(format!("no table reference for assignment to {}", table)))?;
        if let BucketAction::Update(assignments) = &mut bucket.action {
            assignments.push(assignment.clone());
        }
    }

    buckets.retain(|b| !matches!(&b.action, BucketAction::Update(a) if a.is_empty()));
    Ok(buckets)
}

fn column_list(assignment: &SqlAssignment) -> String {
    assignment
        .columns
        .iter()
        .map(|c| format!("{}.{}", c.qualifier, c.column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render one bucket restricted to the given identifiers.
pub fn render_bucket(dialect: &dyn Dialect, bucket: &TableBucket, ids: &[Value]) -> Result<JdbcOperation, Error> {
    let mut translator = SqlAstTranslator::new(dialect);
    match &bucket.action {
        BucketAction::Update(assignments) => {
            translator.push_str("update ");
            translator.push_str(&bucket.table);
            translator.visit_set_clause(assignments, &bucket.table)?;
        }
        BucketAction::Delete => {
            translator.push_str("delete from ");
            translator.push_str(&bucket.table);
        }
    }
    translator.push_str(" where ");
    translator.push_str(&bucket.key_column);
    translator.push_str(" in (");
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            translator.push_str(", ");
        }
        translator.push_parameter(ParameterSpec {
            source: ParameterSource::Bound(id.clone()),
            scalar: None,
        });
    }
    translator.push_str(")");
    Ok(translator.finish([bucket.table.clone()].into_iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::dialect::SqliteDialect;
    use crate::sql::{
        ColumnReference, Expression, MutationTable, NavigablePath, QuerySpec, TableGroup,
        TableGroupId, TableReference,
    };

    fn mutation(kind: MutationKind, assignments: Vec<SqlAssignment>) -> MultiTableMutation {
        let mut id_select = QuerySpec::new();
        id_select.from.add_root(TableGroup::new(
            TableGroupId(0),
            NavigablePath::root("Dog", None),
            TableReference::named("animal", "dog1_0"),
        ));
        id_select.resolve_selection(Expression::column("dog1_0", "id", None));
        MultiTableMutation {
            kind,
            entity: "Dog".into(),
            id_select,
            tables: vec![
                MutationTable {
                    table: "dog".into(),
                    key_column: "animal_id".into(),
                },
                MutationTable {
                    table: "animal".into(),
                    key_column: "id".into(),
                },
            ],
            collection_tables: vec![MutationTable {
                table: "dog_tricks".into(),
                key_column: "dog_id".into(),
            }],
            assignments,
        }
    }

    fn set(table: &str, column: &str, value: i64) -> SqlAssignment {
        SqlAssignment {
            columns: vec![ColumnReference::new(table, column, None)],
            value: Expression::Literal(Value::Int64(value)),
        }
    }

    #[test]
    fn test_update_buckets_by_table() {
        let prepared = prepare_multi_table(
            &SqliteDialect,
            &mutation(MutationKind::Update, vec![set("dog", "barks", 1), set("animal", "age", 3)]),
        )
        .unwrap();
        assert_eq!(prepared.id_select.sql, "select dog1_0.id from animal dog1_0");
        let tables: Vec<&str> = prepared.buckets.iter().map(|b| b.table.as_str()).collect();
        assert_eq!(tables, vec!["animal", "dog"]);

        let op = render_bucket(&SqliteDialect, &prepared.buckets[1], &[Value::Int64(4), Value::Int64(5)]).unwrap();
        assert_eq!(op.sql, "update dog set barks = 1 where animal_id in (?, ?)");
        assert_eq!(op.parameters.len(), 2);
    }

    #[test]
    fn test_update_skips_untouched_tables() {
        let prepared = prepare_multi_table(
            &SqliteDialect,
            &mutation(MutationKind::Update, vec![set("animal", "age", 3)]),
        )
        .unwrap();
        assert_eq!(prepared.buckets.len(), 1);
    }

    #[test]
    fn test_delete_clears_collections_first() {
        let prepared = prepare_multi_table(&SqliteDialect, &mutation(MutationKind::Delete, vec![])).unwrap();
        let tables: Vec<&str> = prepared.buckets.iter().map(|b| b.table.as_str()).collect();
        assert_eq!(tables, vec!["dog_tricks", "dog", "animal"]);
        let op = render_bucket(&SqliteDialect, &prepared.buckets[0], &[Value::Int64(1)]).unwrap();
        assert_eq!(op.sql, "delete from dog_tricks where dog_id in (?)");
    }

    #[test]
    fn test_assignment_spanning_tables_is_rejected() {
        let spanning = SqlAssignment {
            columns: vec![
                ColumnReference::new("dog", "barks", None),
                ColumnReference::new("animal", "age", None),
            ],
            value: Expression::Tuple(vec![
                Expression::Literal(Value::Int64(1)),
                Expression::Literal(Value::Int64(2)),
            ]),
        };
        assert!(matches!(
            prepare_multi_table(&SqliteDialect, &mutation(MutationKind::Update, vec![spanning])),
            Err(Error::SqlTree(_))
        ));
    }
}
