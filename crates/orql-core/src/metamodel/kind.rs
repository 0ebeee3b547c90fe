//! Entity kinds and their capability table.
//!
//! Behavior that differs by mapping style is dispatched through a static
//! [`EntityCapabilities`] per [`EntityKind`] instead of a type hierarchy.

use std::collections::BTreeSet;

use orql_proto::{JoinType, Value};

use super::attribute::{AttributeKind, CollectionMapping};
use super::entity::InheritanceStrategy;
use super::model::{EntityMapping, Metamodel};
use super::types::ScalarType;
use crate::error::Error;
use crate::sql::{
    AliasGenerator, Expression, NavigablePath, Predicate, TableGroup, TableGroupId, TableReference,
    TableReferenceJoin, TableSource, UnionMember, UnionTable,
};

/// Mapping style of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Hierarchy root (or an entity without inheritance).
    Root,
    /// Subclass sharing the root table, told apart by discriminator.
    SingleTableSubclass,
    /// Subclass with its own table joined to the root table by key.
    JoinedSubclass,
    /// Subclass with a self-contained table, read through a union.
    UnionSubclass,
}

/// Inputs for building a table group.
pub struct TableGroupRequest<'r> {
    pub path: NavigablePath,
    pub source_alias: Option<String>,
    pub aliases: &'r mut AliasGenerator,
}

/// How the concrete type of a loaded row is determined.
#[derive(Debug, Clone, PartialEq)]
pub enum SubtypeResolution {
    /// Rows are always of the queried entity.
    Fixed,
    /// A discriminator column names the type.
    Discriminator {
        table: String,
        column: String,
        scalar: ScalarType,
        values: Vec<(Value, String)>,
    },
    /// The most derived subclass table with a non-null key names the type.
    SubclassKeys { keys: Vec<SubclassKey> },
    /// The synthetic class column of the union names the type.
    UnionClass { values: Vec<(i64, String)> },
}

/// A joined subclass table key used for type resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubclassKey {
    pub table: String,
    pub column: String,
    pub entity: String,
}

pub type CreateTableGroupFn =
    fn(&Metamodel, &EntityMapping, TableGroupRequest<'_>) -> Result<TableGroup, Error>;
pub type ResolveLoaderFn = fn(&Metamodel, &EntityMapping) -> SubtypeResolution;
pub type VisitColumnsFn = fn(&Metamodel, &EntityMapping, &mut dyn FnMut(&str, &str));

/// Per-kind behavior.
pub struct EntityCapabilities {
    /// Build the table group reading an entity and its subtypes.
    pub create_table_group: CreateTableGroupFn,
    /// Decide how loaders tell concrete types apart.
    pub resolve_loader: ResolveLoaderFn,
    /// Visit every `(table, column)` storing an instance's state.
    pub visit_columns: VisitColumnsFn,
}

static ROOT: EntityCapabilities = EntityCapabilities {
    create_table_group: root_table_group,
    resolve_loader: hierarchy_loader,
    visit_columns: root_columns,
};

static SINGLE_TABLE_SUBCLASS: EntityCapabilities = EntityCapabilities {
    create_table_group: single_table_group,
    resolve_loader: hierarchy_loader,
    visit_columns: root_columns,
};

static JOINED_SUBCLASS: EntityCapabilities = EntityCapabilities {
    create_table_group: joined_table_group,
    resolve_loader: hierarchy_loader,
    visit_columns: joined_columns,
};

static UNION_SUBCLASS: EntityCapabilities = EntityCapabilities {
    create_table_group: union_table_group,
    resolve_loader: hierarchy_loader,
    visit_columns: union_columns,
};

impl EntityKind {
    /// Capability table of this kind.
    pub fn capabilities(self) -> &'static EntityCapabilities {
        match self {
            EntityKind::Root => &ROOT,
            EntityKind::SingleTableSubclass => &SINGLE_TABLE_SUBCLASS,
            EntityKind::JoinedSubclass => &JOINED_SUBCLASS,
            EntityKind::UnionSubclass => &UNION_SUBCLASS,
        }
    }
}

/// Discriminator restriction selecting `mapping` and its subtypes from a
/// shared single table, if one is needed.
pub fn discriminator_restriction(model: &Metamodel, mapping: &EntityMapping) -> Option<(String, ScalarType, Vec<Value>)> {
    let InheritanceStrategy::SingleTable {
        discriminator_column,
        discriminator_type,
    } = mapping.strategy.as_ref()?
    else {
        return None;
    };
    if mapping.kind == EntityKind::Root {
        return None;
    }
    let values = std::iter::once(mapping)
        .chain(model.descendants(&mapping.name))
        .filter_map(|m| m.discriminator_value.clone())
        .collect();
    Some((discriminator_column.clone(), *discriminator_type, values))
}

fn new_group(request: &mut TableGroupRequest<'_>, mapping: &EntityMapping, primary: TableSource) -> (TableGroup, crate::sql::AliasBase) {
    let mut base = request.aliases.allocate_base(&mapping.name);
    let primary = TableReference {
        source: primary,
        alias: base.next_alias(),
    };
    let mut group = TableGroup::new(TableGroupId(0), request.path.clone(), primary);
    group.source_alias = request.source_alias.clone();
    group.entity = Some(mapping.name.clone());
    (group, base)
}

fn key_join(
    join_type: JoinType,
    table: &str,
    key_column: &str,
    alias: String,
    target_alias: &str,
    target_key: &str,
) -> TableReferenceJoin {
    TableReferenceJoin {
        join_type,
        predicate: Predicate::eq(
            Expression::column(alias.clone(), key_column, None),
            Expression::column(target_alias, target_key, None),
        ),
        reference: TableReference::named(table, alias),
    }
}

fn add_secondary_tables(group: &mut TableGroup, base: &mut crate::sql::AliasBase, mapping: &EntityMapping) {
    let primary_alias = group.primary.alias.clone();
    let primary_key = root_key_column(mapping);
    for secondary in &mapping.secondary_tables {
        let join_type = if secondary.optional {
            JoinType::Left
        } else {
            JoinType::Inner
        };
        group.reference_joins.push(key_join(
            join_type,
            &secondary.name,
            &secondary.key_column,
            base.next_alias(),
            &primary_alias,
            &primary_key,
        ));
    }
}

fn root_key_column(mapping: &EntityMapping) -> String {
    mapping.identifier.column.clone()
}

fn add_joined_descendants(
    model: &Metamodel,
    group: &mut TableGroup,
    base: &mut crate::sql::AliasBase,
    mapping: &EntityMapping,
) {
    let primary_alias = group.primary.alias.clone();
    let primary_key = root_key_column(mapping);
    for sub in model.descendants(&mapping.name) {
        if let Some(table) = &sub.table {
            group.reference_joins.push(key_join(
                JoinType::Left,
                table,
                &sub.key_column,
                base.next_alias(),
                &primary_alias,
                &primary_key,
            ));
        }
    }
}

fn root_table_group(
    model: &Metamodel,
    mapping: &EntityMapping,
    mut request: TableGroupRequest<'_>,
) -> Result<TableGroup, Error> {
    match mapping.strategy {
        Some(InheritanceStrategy::Union) => union_table_group(model, mapping, request),
        Some(InheritanceStrategy::Joined) => {
            let (mut group, mut base) = new_group(
                &mut request,
                mapping,
                TableSource::Named(mapping.root_table.clone()),
            );
            add_secondary_tables(&mut group, &mut base, mapping);
            add_joined_descendants(model, &mut group, &mut base, mapping);
            Ok(group)
        }
        _ => single_table_group(model, mapping, request),
    }
}

fn single_table_group(
    _model: &Metamodel,
    mapping: &EntityMapping,
    mut request: TableGroupRequest<'_>,
) -> Result<TableGroup, Error> {
    let (mut group, mut base) = new_group(
        &mut request,
        mapping,
        TableSource::Named(mapping.root_table.clone()),
    );
    add_secondary_tables(&mut group, &mut base, mapping);
    Ok(group)
}

fn joined_table_group(
    model: &Metamodel,
    mapping: &EntityMapping,
    mut request: TableGroupRequest<'_>,
) -> Result<TableGroup, Error> {
    let (mut group, mut base) = new_group(
        &mut request,
        mapping,
        TableSource::Named(mapping.root_table.clone()),
    );
    let primary_alias = group.primary.alias.clone();
    let primary_key = root_key_column(mapping);

    // Ancestor tables below the root, then the entity's own table.
    let mut chain = Vec::new();
    let mut current = Some(mapping);
    while let Some(m) = current {
        if m.kind == EntityKind::JoinedSubclass {
            chain.push(m);
        }
        current = m.superclass.as_deref().and_then(|s| model.get_entity(s));
    }
    for m in chain.into_iter().rev() {
        let table = m.table.as_deref().ok_or_else(|| {
            Error::Mapping(format!("joined subclass '{}' has no table", m.name))
        })?;
        group.reference_joins.push(key_join(
            JoinType::Inner,
            table,
            &m.key_column,
            base.next_alias(),
            &primary_alias,
            &primary_key,
        ));
    }
    add_secondary_tables(&mut group, &mut base, mapping);
    add_joined_descendants(model, &mut group, &mut base, mapping);
    Ok(group)
}

fn union_table_group(
    model: &Metamodel,
    mapping: &EntityMapping,
    mut request: TableGroupRequest<'_>,
) -> Result<TableGroup, Error> {
    let descendants = model.descendants(&mapping.name);
    if descendants.is_empty() {
        if let Some(table) = &mapping.table {
            let (group, _) = new_group(&mut request, mapping, TableSource::Named(table.clone()));
            return Ok(group);
        }
    }

    let root = model.entity(&mapping.root)?;
    let mut covers: BTreeSet<String> = BTreeSet::new();
    covers.insert(root.root_table.clone());
    for m in model.descendants(&root.name) {
        if let Some(table) = &m.table {
            covers.insert(table.clone());
        }
    }

    let inverse_keys = inverse_key_columns(model, &mapping.root);
    let mut members = Vec::new();
    let mut all_columns: BTreeSet<String> = BTreeSet::new();
    for member in model.concrete_subtypes(&mapping.name) {
        let Some(table) = &member.table else { continue };
        let mut columns = BTreeSet::new();
        (member.capabilities().visit_columns)(model, member, &mut |_, column| {
            columns.insert(column.to_string());
        });
        columns.extend(inverse_keys.iter().cloned());
        all_columns.extend(columns.iter().cloned());
        members.push(UnionMember {
            table: table.clone(),
            clazz: member.clazz,
            columns,
        });
    }
    if members.is_empty() {
        return Err(Error::Mapping(format!(
            "union hierarchy below '{}' has no concrete tables",
            mapping.name
        )));
    }

    let union = UnionTable {
        members,
        columns: all_columns.into_iter().collect(),
        covers,
    };
    let (group, _) = new_group(&mut request, mapping, TableSource::Union(union));
    Ok(group)
}

/// Key columns of one-to-many collections whose elements live in `root`'s
/// hierarchy. Union members must expose them for collection joins.
fn inverse_key_columns(model: &Metamodel, root: &str) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for owner in model.entities() {
        for attribute in owner.attributes.iter().filter(|a| a.declaring == owner.name) {
            if let AttributeKind::Collection {
                mapping: CollectionMapping::OneToMany { target, key_column },
                ..
            } = attribute.kind()
            {
                if model.get_entity(target).is_some_and(|t| t.root == root) {
                    keys.insert(key_column.clone());
                }
            }
        }
    }
    keys
}

fn hierarchy_loader(model: &Metamodel, mapping: &EntityMapping) -> SubtypeResolution {
    let descendants = model.descendants(&mapping.name);
    if descendants.is_empty() {
        return SubtypeResolution::Fixed;
    }
    match &mapping.strategy {
        None => SubtypeResolution::Fixed,
        Some(InheritanceStrategy::SingleTable {
            discriminator_column,
            discriminator_type,
        }) => SubtypeResolution::Discriminator {
            table: mapping.root_table.clone(),
            column: discriminator_column.clone(),
            scalar: *discriminator_type,
            values: std::iter::once(mapping)
                .chain(descendants)
                .filter_map(|m| m.discriminator_value.clone().map(|v| (v, m.name.clone())))
                .collect(),
        },
        Some(InheritanceStrategy::Joined) => {
            let mut keyed: Vec<(usize, SubclassKey)> = descendants
                .into_iter()
                .filter_map(|m| {
                    let table = m.table.clone()?;
                    Some((
                        depth(model, m),
                        SubclassKey {
                            table,
                            column: m.key_column.clone(),
                            entity: m.name.clone(),
                        },
                    ))
                })
                .collect();
            // Most derived first.
            keyed.sort_by(|a, b| b.0.cmp(&a.0));
            SubtypeResolution::SubclassKeys {
                keys: keyed.into_iter().map(|(_, key)| key).collect(),
            }
        }
        Some(InheritanceStrategy::Union) => SubtypeResolution::UnionClass {
            values: model
                .concrete_subtypes(&mapping.name)
                .into_iter()
                .map(|m| (m.clazz, m.name.clone()))
                .collect(),
        },
    }
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

fn visit_attribute_columns(model: &Metamodel, mapping: &EntityMapping, f: &mut dyn FnMut(&str, &str)) {
    for attribute in &mapping.attributes {
        let table = attribute.table.as_str();
        match attribute.kind() {
            AttributeKind::Basic { column, .. } | AttributeKind::ToOne { column, .. } => f(table, column),
            AttributeKind::Embedded {
                embeddable,
                column_prefix,
            } => {
                if let Ok(columns) = model.embedded_columns(embeddable, column_prefix) {
                    for column in columns {
                        f(table, &column.column);
                    }
                }
            }
            AttributeKind::Any {
                meta_column,
                key_column,
                ..
            } => {
                f(table, meta_column);
                f(table, key_column);
            }
            AttributeKind::Collection { .. } => {}
        }
    }
}

fn root_columns(model: &Metamodel, mapping: &EntityMapping, f: &mut dyn FnMut(&str, &str)) {
    f(&mapping.root_table, &mapping.identifier.column);
    if let Some(InheritanceStrategy::SingleTable {
        discriminator_column,
        ..
    }) = &mapping.strategy
    {
        f(&mapping.root_table, discriminator_column);
    }
    for secondary in &mapping.secondary_tables {
        f(&secondary.name, &secondary.key_column);
    }
    visit_attribute_columns(model, mapping, f);
}

fn joined_columns(model: &Metamodel, mapping: &EntityMapping, f: &mut dyn FnMut(&str, &str)) {
    f(&mapping.root_table, &mapping.identifier.column);
    let mut current = Some(mapping);
    while let Some(m) = current {
        if let (EntityKind::JoinedSubclass, Some(table)) = (m.kind, &m.table) {
            f(table, &m.key_column);
        }
        current = m.superclass.as_deref().and_then(|s| model.get_entity(s));
    }
    for secondary in &mapping.secondary_tables {
        f(&secondary.name, &secondary.key_column);
    }
    visit_attribute_columns(model, mapping, f);
}

fn union_columns(model: &Metamodel, mapping: &EntityMapping, f: &mut dyn FnMut(&str, &str)) {
    let table = mapping.primary_table().to_string();
    f(&table, &mapping.key_column);
    visit_attribute_columns(model, mapping, f);
}
