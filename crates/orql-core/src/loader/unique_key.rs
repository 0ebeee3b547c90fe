//! Entity loading by a unique attribute.

use std::sync::Arc;

use dashmap::DashMap;
use orql_proto::{
    LoadQueryInfluencers, QueryOptions, QueryParameterBindings, QueryTree, SelectTree, TreeExpr, TreePredicate, Value,
};

use super::{cached_statement, LoadKey};
use crate::compile::{PreparedSelect, QueryCompiler};
use crate::context::{IdValue, UniqueKey};
use crate::error::Error;
use crate::metamodel::EntityMapping;

/// Loads one entity by a unique basic attribute:
/// `select e from Entity e where e.attribute = ?1`.
#[derive(Debug)]
pub struct UniqueKeyLoader {
    entity: String,
    /// Hierarchy root, the entity name of unique keys.
    root: String,
    attribute: String,
    tree: QueryTree,
    statements: DashMap<LoadKey, Arc<PreparedSelect>>,
}

impl UniqueKeyLoader {
    /// Create the loader of `attribute` of `mapping`.
    pub fn new(mapping: &EntityMapping, attribute: &str) -> Result<Self, Error> {
        let mapped = mapping
            .attribute(attribute)
            .ok_or_else(|| Error::unresolved(&mapping.name, attribute))?;
        if !mapped.def.is_unique_key() {
            return Err(Error::Mapping(format!(
                "'{}.{}' is not a unique key",
                mapping.name, attribute
            )));
        }
        let mut builder = QueryTree::builder();
        let root = builder.root(mapping.name.clone());
        let tree = builder.select(SelectTree::new(vec![root]).with_predicate(TreePredicate::eq(
            TreeExpr::path(root, [attribute]),
            TreeExpr::positional_param(1),
        )));
        Ok(Self {
            entity: mapping.name.clone(),
            root: mapping.root.clone(),
            attribute: attribute.to_string(),
            tree,
            statements: DashMap::new(),
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Persistence-context index entry for `value`; `None` for null.
    pub fn unique_key(&self, value: &Value) -> Result<Option<UniqueKey>, Error> {
        Ok(IdValue::from_value(value)?.map(|value| UniqueKey {
            entity: self.root.clone(),
            attribute: self.attribute.clone(),
            value,
        }))
    }

    /// Statement loading under `options` and `influencers`.
    pub fn statement(
        &self,
        compiler: &QueryCompiler<'_>,
        options: &QueryOptions,
        influencers: &LoadQueryInfluencers,
    ) -> Result<Arc<PreparedSelect>, Error> {
        cached_statement(
            &self.statements,
            (options.lock_mode, influencers.internal_fetch_profile),
            compiler,
            &self.tree,
            options,
            influencers,
        )
    }

    /// Parameter bindings for looking up `value`.
    pub fn bindings(&self, value: Value) -> QueryParameterBindings {
        QueryParameterBindings::new().with_positional(1, value)
    }
}
