//! Validated, query-ready metamodel.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use orql_proto::Value;
use tracing::debug;

use super::attribute::{AttributeDef, AttributeKind, CollectionMapping};
use super::definition::{FetchProfileDef, FilterDef, MetamodelDef};
use super::entity::{EmbeddableDef, EntityDef, IdentifierDef, InheritanceStrategy, SecondaryTableDef};
use super::kind::{EntityCapabilities, EntityKind};
use super::types::ScalarType;
use crate::error::Error;
use crate::sql::FilterFragment;

/// An attribute as seen from one entity, with the table holding its columns.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedAttribute {
    pub def: AttributeDef,
    /// Entity that declares the attribute.
    pub declaring: String,
    /// Physical table of the attribute's columns for this entity.
    pub table: String,
}

impl MappedAttribute {
    /// Attribute name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Attribute mapping.
    pub fn kind(&self) -> &AttributeKind {
        &self.def.kind
    }

    /// Collection role of a plural attribute.
    pub fn role(&self) -> String {
        collection_role(&self.declaring, &self.def.name)
    }
}

/// Role name of a collection attribute.
pub fn collection_role(declaring: &str, attribute: &str) -> String {
    format!("{}.{}", declaring, attribute)
}

/// A filter usage with its parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFilter {
    pub name: String,
    pub fragment: FilterFragment,
}

/// A flattened column of an embedded attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedColumn {
    /// Component path below the embedded attribute.
    pub path: Vec<String>,
    pub column: String,
    pub scalar: ScalarType,
}

/// A resolved entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMapping {
    pub name: String,
    pub kind: EntityKind,
    /// Hierarchy root entity.
    pub root: String,
    pub superclass: Option<String>,
    /// Direct subclasses in definition order.
    pub subclasses: Vec<String>,
    /// Own table; `None` for single-table subclasses and table-less abstract
    /// union subclasses.
    pub table: Option<String>,
    /// Table of the hierarchy root.
    pub root_table: String,
    /// Identifier column within the own (or root) table.
    pub key_column: String,
    pub identifier: IdentifierDef,
    pub strategy: Option<InheritanceStrategy>,
    pub discriminator_value: Option<Value>,
    pub is_abstract: bool,
    /// Full state: inherited attributes first, then declared ones.
    pub attributes: Vec<MappedAttribute>,
    /// Secondary tables including inherited ones.
    pub secondary_tables: Vec<SecondaryTableDef>,
    /// Filters including inherited ones.
    pub filters: Vec<EntityFilter>,
    /// Position within the hierarchy (1-based), used as union class id.
    pub clazz: i64,
}

impl EntityMapping {
    /// Get an attribute of the full state by name.
    pub fn attribute(&self, name: &str) -> Option<&MappedAttribute> {
        self.attributes.iter().find(|a| a.def.name == name)
    }

    /// Position of an attribute in the state array.
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.def.name == name)
    }

    /// Whether `name` is the identifier attribute.
    pub fn is_identifier(&self, name: &str) -> bool {
        self.identifier.name == name
    }

    /// Table holding this entity's key row.
    pub fn primary_table(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.root_table)
    }

    /// Capability table of this entity's kind.
    pub fn capabilities(&self) -> &'static EntityCapabilities {
        self.kind.capabilities()
    }

    /// Whether the entity participates in an inheritance hierarchy.
    pub fn is_polymorphic(&self) -> bool {
        self.strategy.is_some()
    }
}

/// The validated metamodel.
///
/// Built once at session factory construction and shared by reference
/// through every compilation.
#[derive(Debug, Clone, Default)]
pub struct Metamodel {
    entities: BTreeMap<String, EntityMapping>,
    order: Vec<String>,
    embeddables: BTreeMap<String, EmbeddableDef>,
    polymorphic: BTreeMap<String, Vec<String>>,
    filters: BTreeMap<String, FilterDef>,
    fetch_profiles: BTreeMap<String, FetchProfileDef>,
}

impl Metamodel {
    /// Validate a definition and build the metamodel.
    pub fn build(def: MetamodelDef) -> Result<Self, Error> {
        let mut defs: HashMap<&str, &EntityDef> = HashMap::new();
        for entity in &def.entities {
            if defs.insert(entity.name.as_str(), entity).is_some() {
                return Err(Error::Mapping(format!("duplicate entity '{}'", entity.name)));
            }
        }

        let mut model = Metamodel {
            embeddables: def
                .embeddables
                .iter()
                .map(|e| (e.name.clone(), e.clone()))
                .collect(),
            filters: def.filters.iter().map(|f| (f.name.clone(), f.clone())).collect(),
            ..Default::default()
        };

        let mut roots: HashMap<&str, &str> = HashMap::new();
        for entity in &def.entities {
            roots.insert(&entity.name, find_root(entity, &defs)?);
        }

        // Position of each entity within its hierarchy.
        let mut clazz_counters: HashMap<&str, i64> = HashMap::new();
        let mut clazz: HashMap<&str, i64> = HashMap::new();
        for entity in &def.entities {
            let counter = clazz_counters.entry(roots[entity.name.as_str()]).or_insert(0);
            *counter += 1;
            clazz.insert(&entity.name, *counter);
        }

        for entity in &def.entities {
            model.resolve_entity(entity, &defs, &clazz)?;
        }
        model.order = def.entities.iter().map(|e| e.name.clone()).collect();

        for entity in &def.entities {
            if let Some(superclass) = &entity.superclass {
                if let Some(parent) = model.entities.get_mut(superclass) {
                    parent.subclasses.push(entity.name.clone());
                }
            }
        }

        model.validate_hierarchies()?;
        for entity in &def.entities {
            model.validate_attributes(&entity.name)?;
        }

        for poly in &def.polymorphic_types {
            if model.entities.contains_key(&poly.name) {
                return Err(Error::Mapping(format!(
                    "polymorphic type '{}' clashes with an entity",
                    poly.name
                )));
            }
            for implementor in &poly.implementors {
                model.entity(implementor)?;
            }
            // Implementors covered by a listed supertype are queried through it.
            let implementors: Vec<String> = poly
                .implementors
                .iter()
                .filter(|candidate| {
                    !poly
                        .implementors
                        .iter()
                        .any(|other| other != *candidate && model.is_subtype_of(candidate, other))
                })
                .cloned()
                .collect();
            model.polymorphic.insert(poly.name.clone(), implementors);
        }

        for profile in &def.fetch_profiles {
            for fetch in &profile.fetches {
                let mapping = model.entity(&fetch.entity)?;
                let attribute = mapping
                    .attribute(&fetch.attribute)
                    .ok_or_else(|| Error::unresolved(&fetch.entity, &fetch.attribute))?;
                if attribute.def.fetch_mode().is_none() {
                    return Err(Error::Mapping(format!(
                        "fetch profile '{}' overrides non-association '{}.{}'",
                        profile.name, fetch.entity, fetch.attribute
                    )));
                }
            }
            model
                .fetch_profiles
                .insert(profile.name.clone(), profile.clone());
        }

        debug!(
            entities = model.entities.len(),
            polymorphic = model.polymorphic.len(),
            "metamodel built"
        );
        Ok(model)
    }

    fn resolve_entity(
        &mut self,
        entity: &EntityDef,
        defs: &HashMap<&str, &EntityDef>,
        clazz: &HashMap<&str, i64>,
    ) -> Result<(), Error> {
        if self.entities.contains_key(&entity.name) {
            return Ok(());
        }
        let parent = match &entity.superclass {
            Some(superclass) => {
                let parent_def = defs.get(superclass.as_str()).ok_or_else(|| {
                    Error::Mapping(format!(
                        "'{}' extends unknown entity '{}'",
                        entity.name, superclass
                    ))
                })?;
                self.resolve_entity(parent_def, defs, clazz)?;
                self.entities.get(superclass.as_str()).cloned()
            }
            None => None,
        };

        let mapping = match parent {
            None => self.resolve_root(entity, clazz[entity.name.as_str()])?,
            Some(parent) => self.resolve_subclass(entity, &parent, clazz[entity.name.as_str()])?,
        };
        self.entities.insert(entity.name.clone(), mapping);
        Ok(())
    }

    fn resolve_root(&self, entity: &EntityDef, clazz: i64) -> Result<EntityMapping, Error> {
        let identifier = entity.identifier.clone().ok_or_else(|| {
            Error::Mapping(format!("root entity '{}' declares no identifier", entity.name))
        })?;
        if !identifier.scalar.is_identifier_capable() {
            return Err(Error::Mapping(format!(
                "identifier of '{}' cannot be {:?}",
                entity.name, identifier.scalar
            )));
        }
        let table = entity.table.clone().ok_or_else(|| {
            Error::Mapping(format!("root entity '{}' declares no table", entity.name))
        })?;
        if matches!(entity.inheritance, Some(InheritanceStrategy::Union)) && !entity.secondary_tables.is_empty() {
            return Err(Error::Mapping(format!(
                "union hierarchy root '{}' cannot use secondary tables",
                entity.name
            )));
        }

        let mut mapping = EntityMapping {
            name: entity.name.clone(),
            kind: EntityKind::Root,
            root: entity.name.clone(),
            superclass: None,
            subclasses: Vec::new(),
            table: Some(table.clone()),
            root_table: table.clone(),
            key_column: identifier.column.clone(),
            identifier,
            strategy: entity.inheritance.clone(),
            discriminator_value: entity.discriminator_value.clone(),
            is_abstract: entity.is_abstract,
            attributes: Vec::new(),
            secondary_tables: entity.secondary_tables.clone(),
            filters: self.resolve_filters(entity)?,
            clazz,
        };
        for attribute in &entity.attributes {
            let attribute_table = self.attribute_table(&mapping, attribute, &table)?;
            mapping.attributes.push(MappedAttribute {
                def: attribute.clone(),
                declaring: entity.name.clone(),
                table: attribute_table,
            });
        }
        Ok(mapping)
    }

    fn resolve_subclass(
        &self,
        entity: &EntityDef,
        parent: &EntityMapping,
        clazz: i64,
    ) -> Result<EntityMapping, Error> {
        if entity.identifier.is_some() {
            return Err(Error::Mapping(format!(
                "subclass '{}' cannot redeclare the identifier",
                entity.name
            )));
        }
        if entity.inheritance.is_some() {
            return Err(Error::Mapping(format!(
                "subclass '{}' cannot declare an inheritance strategy",
                entity.name
            )));
        }
        let strategy = parent.strategy.clone().ok_or_else(|| {
            Error::Mapping(format!(
                "'{}' extends '{}' whose hierarchy declares no inheritance strategy",
                entity.name, parent.name
            ))
        })?;

        let (kind, table, key_column) = match &strategy {
            InheritanceStrategy::SingleTable { .. } => {
                if entity.table.is_some() {
                    return Err(Error::Mapping(format!(
                        "single-table subclass '{}' cannot declare a table",
                        entity.name
                    )));
                }
                (EntityKind::SingleTableSubclass, None, parent.identifier.column.clone())
            }
            InheritanceStrategy::Joined => {
                let table = entity.table.clone().ok_or_else(|| {
                    Error::Mapping(format!("joined subclass '{}' declares no table", entity.name))
                })?;
                let key = entity
                    .key_column
                    .clone()
                    .unwrap_or_else(|| parent.identifier.column.clone());
                (EntityKind::JoinedSubclass, Some(table), key)
            }
            InheritanceStrategy::Union => {
                if entity.table.is_none() && !entity.is_abstract {
                    return Err(Error::Mapping(format!(
                        "concrete union subclass '{}' declares no table",
                        entity.name
                    )));
                }
                if !entity.secondary_tables.is_empty() {
                    return Err(Error::Mapping(format!(
                        "union subclass '{}' cannot use secondary tables",
                        entity.name
                    )));
                }
                (
                    EntityKind::UnionSubclass,
                    entity.table.clone(),
                    parent.identifier.column.clone(),
                )
            }
        };

        let mut mapping = EntityMapping {
            name: entity.name.clone(),
            kind,
            root: parent.root.clone(),
            superclass: Some(parent.name.clone()),
            subclasses: Vec::new(),
            table: table.clone(),
            root_table: parent.root_table.clone(),
            key_column,
            identifier: parent.identifier.clone(),
            strategy: Some(strategy.clone()),
            discriminator_value: entity.discriminator_value.clone(),
            is_abstract: entity.is_abstract,
            attributes: parent.attributes.clone(),
            secondary_tables: parent.secondary_tables.clone(),
            filters: parent.filters.clone(),
            clazz,
        };
        mapping.secondary_tables.extend(entity.secondary_tables.iter().cloned());
        mapping.filters.extend(self.resolve_filters(entity)?);

        // Union subclasses repeat inherited columns in their own table.
        if let (InheritanceStrategy::Union, Some(own)) = (&strategy, &table) {
            for attribute in &mut mapping.attributes {
                attribute.table = own.clone();
            }
        }

        let own_table = table.unwrap_or_else(|| parent.primary_table().to_string());
        for attribute in &entity.attributes {
            let attribute_table = self.attribute_table(&mapping, attribute, &own_table)?;
            mapping.attributes.push(MappedAttribute {
                def: attribute.clone(),
                declaring: entity.name.clone(),
                table: attribute_table,
            });
        }
        Ok(mapping)
    }

    fn attribute_table(
        &self,
        mapping: &EntityMapping,
        attribute: &AttributeDef,
        own_table: &str,
    ) -> Result<String, Error> {
        match &attribute.table {
            Some(secondary) => {
                if !mapping.secondary_tables.iter().any(|t| &t.name == secondary) {
                    return Err(Error::Mapping(format!(
                        "attribute '{}.{}' refers to undeclared secondary table '{}'",
                        mapping.name, attribute.name, secondary
                    )));
                }
                if attribute.is_collection() {
                    return Err(Error::Mapping(format!(
                        "collection '{}.{}' cannot live in a secondary table",
                        mapping.name, attribute.name
                    )));
                }
                Ok(secondary.clone())
            }
            None => Ok(own_table.to_string()),
        }
    }

    fn resolve_filters(&self, entity: &EntityDef) -> Result<Vec<EntityFilter>, Error> {
        entity
            .filters
            .iter()
            .map(|usage| {
                let def = self.filters.get(&usage.name).ok_or_else(|| {
                    Error::Mapping(format!(
                        "'{}' uses undefined filter '{}'",
                        entity.name, usage.name
                    ))
                })?;
                let fragment = FilterFragment::parse(&usage.condition)?;
                for parameter in fragment.parameters() {
                    if def.parameter(parameter).is_none() {
                        return Err(Error::Mapping(format!(
                            "filter '{}' condition uses undeclared parameter '{}'",
                            usage.name, parameter
                        )));
                    }
                }
                Ok(EntityFilter {
                    name: usage.name.clone(),
                    fragment,
                })
            })
            .collect()
    }

    fn validate_hierarchies(&self) -> Result<(), Error> {
        let mut discriminators: HashMap<&str, Vec<(&Value, &str)>> = HashMap::new();
        for mapping in self.entities.values() {
            if let Some(InheritanceStrategy::SingleTable { .. }) = &mapping.strategy {
                match &mapping.discriminator_value {
                    Some(value) => discriminators
                        .entry(&mapping.root)
                        .or_default()
                        .push((value, &mapping.name)),
                    None if !mapping.is_abstract => {
                        return Err(Error::Mapping(format!(
                            "concrete single-table entity '{}' has no discriminator value",
                            mapping.name
                        )))
                    }
                    None => {}
                }
            }
        }
        for (root, values) in discriminators {
            for (i, (value, name)) in values.iter().enumerate() {
                if values[..i].iter().any(|(other, _)| other == value) {
                    return Err(Error::Mapping(format!(
                        "discriminator value {:?} of '{}' is not unique in hierarchy '{}'",
                        value, name, root
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_attributes(&self, name: &str) -> Result<(), Error> {
        let mapping = self.entity(name)?;
        let mut seen = BTreeSet::new();
        seen.insert(mapping.identifier.name.as_str());
        for attribute in &mapping.attributes {
            if !seen.insert(attribute.name()) {
                return Err(Error::Mapping(format!(
                    "attribute '{}' is declared twice in the hierarchy of '{}'",
                    attribute.name(),
                    name
                )));
            }
        }
        // Names must also stay unique across sibling subclasses so that
        // polymorphic state can be addressed by attribute name.
        let root = self.entity(&mapping.root)?;
        for other in self.descendants(&root.name) {
            if other.name == mapping.name || self.is_subtype_of(&other.name, name) || self.is_subtype_of(name, &other.name) {
                continue;
            }
            for attribute in other.attributes.iter().filter(|a| a.declaring == other.name) {
                if let Some(existing) = mapping.attribute(attribute.name()) {
                    if existing.def != attribute.def {
                        return Err(Error::Mapping(format!(
                            "attribute '{}' maps differently in '{}' and '{}'",
                            attribute.name(),
                            name,
                            other.name
                        )));
                    }
                }
            }
        }

        for attribute in mapping.attributes.iter().filter(|a| a.declaring == name) {
            match attribute.kind() {
                AttributeKind::Basic { .. } => {}
                AttributeKind::Embedded { embeddable, column_prefix } => {
                    self.embedded_columns(embeddable, column_prefix)?;
                }
                AttributeKind::ToOne { target, .. } => {
                    self.entity(target)?;
                }
                AttributeKind::Collection { mapping: collection, .. } => {
                    if let Some(target) = collection.element_entity() {
                        self.entity(target)?;
                    }
                    if let CollectionMapping::Elements { element_type, .. } = collection {
                        if *element_type == ScalarType::Bytes {
                            return Err(Error::Mapping(format!(
                                "element collection '{}.{}' cannot hold bytes",
                                name,
                                attribute.name()
                            )));
                        }
                    }
                }
                AttributeKind::Any { meta_values, .. } => {
                    if meta_values.is_empty() {
                        return Err(Error::Mapping(format!(
                            "ANY attribute '{}.{}' declares no meta values",
                            name,
                            attribute.name()
                        )));
                    }
                    for target in meta_values.values() {
                        self.entity(target)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Look up an entity.
    pub fn entity(&self, name: &str) -> Result<&EntityMapping, Error> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Look up an entity, `None` if unknown.
    pub fn get_entity(&self, name: &str) -> Option<&EntityMapping> {
        self.entities.get(name)
    }

    /// Entities in definition order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityMapping> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    /// Look up an embeddable.
    pub fn embeddable(&self, name: &str) -> Result<&EmbeddableDef, Error> {
        self.embeddables
            .get(name)
            .ok_or_else(|| Error::Mapping(format!("unknown embeddable '{}'", name)))
    }

    /// Concrete query roots of an unmapped polymorphic supertype.
    pub fn polymorphic_implementors(&self, name: &str) -> Option<&[String]> {
        self.polymorphic.get(name).map(Vec::as_slice)
    }

    /// Look up a filter definition.
    pub fn filter(&self, name: &str) -> Option<&FilterDef> {
        self.filters.get(name)
    }

    /// Look up a fetch profile.
    pub fn fetch_profile(&self, name: &str) -> Option<&FetchProfileDef> {
        self.fetch_profiles.get(name)
    }

    /// Hierarchy root of an entity.
    pub fn root_of(&self, name: &str) -> Result<&EntityMapping, Error> {
        let mapping = self.entity(name)?;
        self.entity(&mapping.root)
    }

    /// All subtypes below `name` in pre-order, excluding `name` itself.
    pub fn descendants(&self, name: &str) -> Vec<&EntityMapping> {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = match self.entities.get(name) {
            Some(mapping) => mapping.subclasses.iter().rev().map(String::as_str).collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            if let Some(mapping) = self.entities.get(next) {
                out.push(mapping);
                stack.extend(mapping.subclasses.iter().rev().map(String::as_str));
            }
        }
        out
    }

    /// `name` and its subtypes that can be instantiated.
    pub fn concrete_subtypes(&self, name: &str) -> Vec<&EntityMapping> {
        self.entities
            .get(name)
            .into_iter()
            .chain(self.descendants(name))
            .filter(|m| !m.is_abstract)
            .collect()
    }

    /// Whether `sub` is `sup` or one of its subtypes.
    pub fn is_subtype_of(&self, sub: &str, sup: &str) -> bool {
        let mut current = self.entities.get(sub);
        while let Some(mapping) = current {
            if mapping.name == sup {
                return true;
            }
            current = mapping
                .superclass
                .as_deref()
                .and_then(|s| self.entities.get(s));
        }
        false
    }

    /// Attribute of `entity` or, failing that, one declared by a subtype.
    pub fn hierarchy_attribute(&self, entity: &str, attribute: &str) -> Option<(&EntityMapping, &MappedAttribute)> {
        let mapping = self.entities.get(entity)?;
        if let Some(found) = mapping.attribute(attribute) {
            return Some((mapping, found));
        }
        self.descendants(entity)
            .into_iter()
            .find_map(|sub| sub.attribute(attribute).map(|a| (sub, a)))
    }

    /// Attributes readable through a table group of `entity`: its own state
    /// followed by attributes declared by subtypes.
    pub fn polymorphic_state(&self, entity: &str) -> Result<Vec<&MappedAttribute>, Error> {
        let mapping = self.entity(entity)?;
        let mut attributes: Vec<&MappedAttribute> = mapping.attributes.iter().collect();
        for sub in self.descendants(entity) {
            attributes.extend(sub.attributes.iter().filter(|a| a.declaring == sub.name));
        }
        Ok(attributes)
    }

    /// Flatten the columns of an embeddable.
    pub fn embedded_columns(&self, embeddable: &str, prefix: &str) -> Result<Vec<EmbeddedColumn>, Error> {
        let def = self.embeddable(embeddable)?;
        let mut out = Vec::new();
        for component in &def.attributes {
            match &component.kind {
                AttributeKind::Basic { column, scalar, .. } => out.push(EmbeddedColumn {
                    path: vec![component.name.clone()],
                    column: format!("{}{}", prefix, column),
                    scalar: *scalar,
                }),
                AttributeKind::Embedded {
                    embeddable: nested,
                    column_prefix,
                } => {
                    if nested == embeddable {
                        return Err(Error::Mapping(format!(
                            "embeddable '{}' embeds itself",
                            embeddable
                        )));
                    }
                    let nested_prefix = format!("{}{}", prefix, column_prefix);
                    for mut column in self.embedded_columns(nested, &nested_prefix)? {
                        column.path.insert(0, component.name.clone());
                        out.push(column);
                    }
                }
                _ => {
                    return Err(Error::Mapping(format!(
                        "embeddable '{}' component '{}' must be basic or embedded",
                        embeddable, component.name
                    )))
                }
            }
        }
        Ok(out)
    }
}

fn find_root<'a>(entity: &'a EntityDef, defs: &HashMap<&str, &'a EntityDef>) -> Result<&'a str, Error> {
    let mut current = entity;
    let mut steps = 0;
    while let Some(superclass) = &current.superclass {
        current = defs.get(superclass.as_str()).ok_or_else(|| {
            Error::Mapping(format!(
                "'{}' extends unknown entity '{}'",
                current.name, superclass
            ))
        })?;
        steps += 1;
        if steps > defs.len() {
            return Err(Error::Mapping(format!(
                "inheritance cycle through '{}'",
                entity.name
            )));
        }
    }
    Ok(&current.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::attribute::FetchMode;
    use crate::metamodel::definition::FilterDef;

    fn animals(strategy: InheritanceStrategy) -> MetamodelDef {
        let (dog, cat) = match strategy {
            InheritanceStrategy::SingleTable { .. } => (
                EntityDef::subclass("Dog", "Animal").with_discriminator_value("dog"),
                EntityDef::subclass("Cat", "Animal").with_discriminator_value("cat"),
            ),
            _ => (
                EntityDef::subclass("Dog", "Animal").with_table("dog"),
                EntityDef::subclass("Cat", "Animal").with_table("cat"),
            ),
        };
        MetamodelDef::new()
            .with_entity(
                EntityDef::new("Animal", "animal", IdentifierDef::new("id", "id", ScalarType::Int64))
                    .with_inheritance(strategy)
                    .with_discriminator_value("animal")
                    .with_attribute(AttributeDef::basic("name", "name", ScalarType::String)),
            )
            .with_entity(dog.with_attribute(AttributeDef::basic("barks", "barks", ScalarType::Bool)))
            .with_entity(cat.with_attribute(AttributeDef::basic("lives", "lives", ScalarType::Int32)))
    }

    #[test]
    fn test_joined_attribute_tables() {
        let model = Metamodel::build(animals(InheritanceStrategy::Joined)).unwrap();
        let dog = model.entity("Dog").unwrap();
        assert_eq!(dog.kind, EntityKind::JoinedSubclass);
        assert_eq!(dog.attribute("name").unwrap().table, "animal");
        assert_eq!(dog.attribute("barks").unwrap().table, "dog");
        assert_eq!(dog.attribute_index("barks"), Some(1));
        assert_eq!(model.entity("Animal").unwrap().subclasses, vec!["Dog", "Cat"]);
    }

    #[test]
    fn test_union_repeats_inherited_columns() {
        let model = Metamodel::build(animals(InheritanceStrategy::Union)).unwrap();
        let cat = model.entity("Cat").unwrap();
        assert_eq!(cat.kind, EntityKind::UnionSubclass);
        assert_eq!(cat.attribute("name").unwrap().table, "cat");
        assert_eq!(cat.clazz, 3);
    }

    #[test]
    fn test_single_table_discriminators() {
        let model = Metamodel::build(animals(InheritanceStrategy::SingleTable {
            discriminator_column: "kind".into(),
            discriminator_type: ScalarType::String,
        }))
        .unwrap();
        let dog = model.entity("Dog").unwrap();
        assert_eq!(dog.primary_table(), "animal");
        assert_eq!(dog.attribute("barks").unwrap().table, "animal");
        assert!(model.is_subtype_of("Dog", "Animal"));
        assert!(!model.is_subtype_of("Animal", "Dog"));
        assert_eq!(model.concrete_subtypes("Animal").len(), 3);
        assert!(model.hierarchy_attribute("Animal", "lives").is_some());
    }

    #[test]
    fn test_rejects_unknown_target() {
        let def = MetamodelDef::new().with_entity(
            EntityDef::new("Order", "orders", IdentifierDef::new("id", "id", ScalarType::Int64))
                .with_attribute(AttributeDef::to_one("customer", "Customer", "customer_id", FetchMode::LAZY)),
        );
        assert!(matches!(Metamodel::build(def), Err(Error::UnknownEntity(name)) if name == "Customer"));
    }

    #[test]
    fn test_rejects_undeclared_filter_parameter() {
        let def = MetamodelDef::new()
            .with_filter(FilterDef::new("tenant"))
            .with_entity(
                EntityDef::new("Order", "orders", IdentifierDef::new("id", "id", ScalarType::Int64))
                    .with_filter("tenant", "{alias}.tenant_id = :tenantId"),
            );
        assert!(matches!(Metamodel::build(def), Err(Error::Mapping(_))));
    }

    #[test]
    fn test_polymorphic_implementors_are_normalized() {
        let def = animals(InheritanceStrategy::Joined)
            .with_entity(EntityDef::new("Plant", "plant", IdentifierDef::new("id", "id", ScalarType::Int64)))
            .with_polymorphic_type("Living", ["Animal", "Dog", "Plant"]);
        let model = Metamodel::build(def).unwrap();
        assert_eq!(
            model.polymorphic_implementors("Living").unwrap(),
            &["Animal".to_string(), "Plant".to_string()]
        );
    }

    #[test]
    fn test_embedded_columns_are_prefixed() {
        let def = MetamodelDef::new()
            .with_embeddable(
                EmbeddableDef::new("Address")
                    .with_attribute(AttributeDef::basic("city", "city", ScalarType::String))
                    .with_attribute(AttributeDef::basic("zip", "zip", ScalarType::String)),
            )
            .with_entity(
                EntityDef::new("Customer", "customer", IdentifierDef::new("id", "id", ScalarType::Int64))
                    .with_attribute(AttributeDef::embedded("address", "Address", "addr_")),
            );
        let model = Metamodel::build(def).unwrap();
        let columns = model.embedded_columns("Address", "addr_").unwrap();
        assert_eq!(columns[0].column, "addr_city");
        assert_eq!(columns[1].path, vec!["zip".to_string()]);
    }
}
