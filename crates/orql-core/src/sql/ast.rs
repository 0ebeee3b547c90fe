//! Table groups and the from clause.

use std::collections::BTreeSet;

use orql_proto::JoinType;

use super::expression::{ColumnReference, Predicate};
use super::path::NavigablePath;

/// Index of a table group within its [`FromClause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableGroupId(pub usize);

/// One concrete table inside a union derived table.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionMember {
    pub table: String,
    /// Value of the synthetic class column for rows of this member.
    pub clazz: i64,
    /// Columns physically present in the member table.
    pub columns: BTreeSet<String>,
}

/// Derived table over the concrete tables of a union hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionTable {
    pub members: Vec<UnionMember>,
    /// Every column exposed by the derived table, in render order.
    pub columns: Vec<String>,
    /// Every hierarchy table name this derived table stands in for.
    pub covers: BTreeSet<String>,
}

/// Name of the synthetic class column of union derived tables.
pub const UNION_CLASS_COLUMN: &str = "clazz_";

/// Source of a table reference.
#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    Named(String),
    Union(UnionTable),
}

/// A table plus its allocated alias.
#[derive(Debug, Clone, PartialEq)]
pub struct TableReference {
    pub source: TableSource,
    pub alias: String,
}

impl TableReference {
    /// A reference to a named table.
    pub fn named(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            source: TableSource::Named(table.into()),
            alias: alias.into(),
        }
    }

    /// Whether columns of `table` are read through this reference.
    pub fn covers(&self, table: &str) -> bool {
        match &self.source {
            TableSource::Named(name) => name == table,
            TableSource::Union(union) => union.covers.contains(table),
        }
    }

    /// Physical tables read by this reference.
    pub fn physical_tables(&self) -> Vec<&str> {
        match &self.source {
            TableSource::Named(name) => vec![name.as_str()],
            TableSource::Union(union) => union.members.iter().map(|m| m.table.as_str()).collect(),
        }
    }
}

/// A secondary reference inside a table group (secondary table, subclass or
/// superclass table, collection element table).
#[derive(Debug, Clone, PartialEq)]
pub struct TableReferenceJoin {
    pub join_type: JoinType,
    pub reference: TableReference,
    pub predicate: Predicate,
}

/// A join between two table groups.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGroupJoin {
    pub join_type: JoinType,
    pub group: TableGroupId,
    pub predicate: Option<Predicate>,
}

/// The tables backing one navigable within one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGroup {
    pub id: TableGroupId,
    pub path: NavigablePath,
    /// Identification variable from the query, if any.
    pub source_alias: Option<String>,
    /// Entity whose columns this group exposes.
    pub entity: Option<String>,
    /// Collection role when the group backs a plural attribute.
    pub collection_role: Option<String>,
    /// Element column of a basic-valued collection.
    pub element: Option<ColumnReference>,
    pub primary: TableReference,
    pub reference_joins: Vec<TableReferenceJoin>,
    pub joins: Vec<TableGroupJoin>,
}

impl TableGroup {
    /// Create a group with only a primary reference.
    pub fn new(id: TableGroupId, path: NavigablePath, primary: TableReference) -> Self {
        Self {
            id,
            path,
            source_alias: None,
            entity: None,
            collection_role: None,
            element: None,
            primary,
            reference_joins: Vec::new(),
            joins: Vec::new(),
        }
    }

    /// Alias of the primary reference.
    pub fn primary_alias(&self) -> &str {
        &self.primary.alias
    }

    /// The reference reading `table`, searching joined references after the
    /// primary one.
    pub fn reference_for_table(&self, table: &str) -> Option<&TableReference> {
        if self.primary.covers(table) {
            return Some(&self.primary);
        }
        self.reference_joins
            .iter()
            .map(|join| &join.reference)
            .find(|reference| reference.covers(table))
    }

    /// All references of this group in render order.
    pub fn references(&self) -> impl Iterator<Item = &TableReference> {
        std::iter::once(&self.primary).chain(self.reference_joins.iter().map(|j| &j.reference))
    }

    /// Aliases of all references.
    pub fn aliases(&self) -> Vec<&str> {
        self.references().map(|r| r.alias.as_str()).collect()
    }
}

/// Arena of table groups for one query specification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FromClause {
    groups: Vec<TableGroup>,
    roots: Vec<TableGroupId>,
}

impl FromClause {
    /// Create an empty from clause.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next pushed group will get.
    pub fn next_id(&self) -> TableGroupId {
        TableGroupId(self.groups.len())
    }

    /// Add a root group.
    pub fn add_root(&mut self, group: TableGroup) -> TableGroupId {
        let id = self.push(group);
        self.roots.push(id);
        id
    }

    /// Add a group joined to `parent`.
    pub fn add_join(
        &mut self,
        parent: TableGroupId,
        group: TableGroup,
        join_type: JoinType,
        predicate: Option<Predicate>,
    ) -> TableGroupId {
        let id = self.push(group);
        if let Some(parent) = self.groups.get_mut(parent.0) {
            parent.joins.push(TableGroupJoin {
                join_type,
                group: id,
                predicate,
            });
        }
        id
    }

    fn push(&mut self, mut group: TableGroup) -> TableGroupId {
        let id = self.next_id();
        group.id = id;
        self.groups.push(group);
        id
    }

    /// Unhook `id` from the group joining it. The group stays in the arena,
    /// so ids remain stable, but is no longer reachable from a root.
    pub fn detach(&mut self, id: TableGroupId) -> bool {
        for group in &mut self.groups {
            if let Some(position) = group.joins.iter().position(|join| join.group == id) {
                group.joins.remove(position);
                return true;
            }
        }
        false
    }

    /// Groups reachable from the roots through joins.
    fn reachable(&self) -> Vec<&TableGroup> {
        let mut pending: Vec<TableGroupId> = self.roots.iter().rev().copied().collect();
        let mut reached = Vec::new();
        while let Some(id) = pending.pop() {
            if let Some(group) = self.group(id) {
                reached.push(group);
                pending.extend(group.joins.iter().rev().map(|join| join.group));
            }
        }
        reached
    }

    /// Look up a group.
    pub fn group(&self, id: TableGroupId) -> Option<&TableGroup> {
        self.groups.get(id.0)
    }

    /// Look up a group mutably.
    pub fn group_mut(&mut self, id: TableGroupId) -> Option<&mut TableGroup> {
        self.groups.get_mut(id.0)
    }

    /// Root groups in declaration order.
    pub fn roots(&self) -> &[TableGroupId] {
        &self.roots
    }

    /// All groups in creation order.
    pub fn groups(&self) -> &[TableGroup] {
        &self.groups
    }

    /// Every table alias in this from clause.
    pub fn aliases(&self) -> Vec<&str> {
        self.groups.iter().flat_map(|g| g.aliases()).collect()
    }

    /// Every physical table read by this from clause.
    pub fn physical_tables(&self) -> BTreeSet<String> {
        self.reachable()
            .into_iter()
            .flat_map(|g| g.references())
            .flat_map(|r| r.physical_tables())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::expression::Expression;

    #[test]
    fn test_reference_lookup() {
        let path = NavigablePath::root("Dog", None);
        let mut group = TableGroup::new(TableGroupId(0), path, TableReference::named("animal", "dog1_0"));
        group.reference_joins.push(TableReferenceJoin {
            join_type: JoinType::Inner,
            reference: TableReference::named("dog", "dog1_1"),
            predicate: Predicate::eq(
                Expression::column("dog1_1", "id", None),
                Expression::column("dog1_0", "id", None),
            ),
        });

        assert_eq!(group.reference_for_table("dog").map(|r| r.alias.as_str()), Some("dog1_1"));
        assert_eq!(group.reference_for_table("animal").map(|r| r.alias.as_str()), Some("dog1_0"));
        assert!(group.reference_for_table("cat").is_none());
    }

    #[test]
    fn test_union_covers_hierarchy() {
        let union = UnionTable {
            members: vec![UnionMember {
                table: "dog".into(),
                clazz: 1,
                columns: ["id".to_string()].into_iter().collect(),
            }],
            columns: vec!["id".into()],
            covers: ["animal".to_string(), "dog".to_string()].into_iter().collect(),
        };
        let reference = TableReference {
            source: TableSource::Union(union),
            alias: "animal1_0".into(),
        };
        assert!(reference.covers("animal"));
        assert_eq!(reference.physical_tables(), vec!["dog"]);
    }

    #[test]
    fn test_from_clause_joins() {
        let mut from = FromClause::new();
        let root_path = NavigablePath::root("Order", None);
        let root = from.add_root(TableGroup::new(
            TableGroupId(0),
            root_path.clone(),
            TableReference::named("orders", "order1_0"),
        ));
        let customer = from.add_join(
            root,
            TableGroup::new(
                TableGroupId(0),
                root_path.append("customer"),
                TableReference::named("customer", "customer1_0"),
            ),
            JoinType::Left,
            None,
        );
        assert_eq!(customer, TableGroupId(1));
        assert_eq!(from.group(root).map(|g| g.joins.len()), Some(1));
        assert_eq!(from.aliases(), vec!["order1_0", "customer1_0"]);
    }

    #[test]
    fn test_detached_group_leaves_tables() {
        let mut from = FromClause::new();
        let root_path = NavigablePath::root("Order", None);
        let root = from.add_root(TableGroup::new(
            TableGroupId(0),
            root_path.clone(),
            TableReference::named("orders", "order1_0"),
        ));
        let lines = from.add_join(
            root,
            TableGroup::new(
                TableGroupId(0),
                root_path.append("lines"),
                TableReference::named("order_line", "orderline1_0"),
            ),
            JoinType::Left,
            None,
        );
        assert!(from.physical_tables().contains("order_line"));

        assert!(from.detach(lines));
        assert!(!from.detach(lines));
        assert_eq!(from.group(root).map(|g| g.joins.len()), Some(0));
        assert!(from.group(lines).is_some());
        assert_eq!(from.physical_tables().into_iter().collect::<Vec<_>>(), vec!["orders"]);
    }
}
