//! Entity loading by identifier.

use std::sync::Arc;

use dashmap::DashMap;
use orql_proto::{LoadQueryInfluencers, QueryOptions, QueryParameterBindings, QueryTree, SelectTree, TreeExpr, TreePredicate};

use super::{cached_statement, LoadKey};
use crate::compile::{PreparedSelect, QueryCompiler};
use crate::context::IdValue;
use crate::error::Error;
use crate::metamodel::EntityMapping;

/// Loads one entity (or subtype instance) by identifier:
/// `select e from Entity e where e.id = ?1`.
#[derive(Debug)]
pub struct SingleIdEntityLoader {
    entity: String,
    tree: QueryTree,
    statements: DashMap<LoadKey, Arc<PreparedSelect>>,
}

impl SingleIdEntityLoader {
    /// Create the loader of `mapping`.
    pub fn new(mapping: &EntityMapping) -> Self {
        let mut builder = QueryTree::builder();
        let root = builder.root(mapping.name.clone());
        let tree = builder.select(SelectTree::new(vec![root]).with_predicate(TreePredicate::eq(
            TreeExpr::path(root, [mapping.identifier.name.clone()]),
            TreeExpr::positional_param(1),
        )));
        Self {
            entity: mapping.name.clone(),
            tree,
            statements: DashMap::new(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn tree(&self) -> &QueryTree {
        &self.tree
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

    /// Parameter bindings for loading `id`.
    pub fn bindings(&self, id: &IdValue) -> QueryParameterBindings {
        QueryParameterBindings::new().with_positional(1, id.to_value())
    }

    /// Number of cached statements.
    pub fn cached_statements(&self) -> usize {
        self.statements.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionFactoryConfig;
    use crate::render::SqliteDialect;
    use crate::testing::shop;
    use orql_proto::{EntityGraph, GraphSemantic, InternalFetchProfile, LockMode};

    #[test]
    fn test_statement_cached_per_lock_mode() {
        let model = shop();
        let config = SessionFactoryConfig::default();
        let compiler = QueryCompiler::new(&model, &config, &SqliteDialect);
        let loader = SingleIdEntityLoader::new(model.entity("Order").unwrap());
        let plain = LoadQueryInfluencers::default();
        let read = QueryOptions::new().with_lock_mode(LockMode::Read);

        let first = loader.statement(&compiler, &read, &plain).unwrap();
        let second = loader.statement(&compiler, &read, &plain).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.operation.sql.contains(" from orders "));
        assert!(first.operation.sql.ends_with(".id=?"));
        assert_eq!(first.operation.parameters.len(), 1);

        let graph = read.clone().with_entity_graph(EntityGraph::new("Order"), GraphSemantic::Load);
        let third = loader.statement(&compiler, &graph, &plain).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(loader.cached_statements(), 1);

        let refresh = LoadQueryInfluencers::default().with_internal_fetch_profile(InternalFetchProfile::Refresh);
        loader.statement(&compiler, &read, &refresh).unwrap();
        loader.statement(&compiler, &QueryOptions::new(), &plain).unwrap();
        assert_eq!(loader.cached_statements(), 3);
    }

    #[test]
    fn test_filters_bypass_cache() {
        let model = shop();
        let config = SessionFactoryConfig::default();
        let compiler = QueryCompiler::new(&model, &config, &SqliteDialect);
        let loader = SingleIdEntityLoader::new(model.entity("Order").unwrap());
        let filtered = LoadQueryInfluencers::default().with_filter("status");

        let statement = loader.statement(&compiler, &QueryOptions::new(), &filtered).unwrap();
        assert!(statement.operation.sql.contains(".status = ?)"));
        assert_eq!(loader.cached_statements(), 0);
    }

    #[test]
    fn test_bindings() {
        let model = shop();
        let loader = SingleIdEntityLoader::new(model.entity("Order").unwrap());
        let bindings = loader.bindings(&IdValue::from(7i64));
        assert_eq!(
            bindings.get(&orql_proto::ParameterRef::Positional(1)),
            Some(&orql_proto::Value::Int64(7))
        );
    }
}
