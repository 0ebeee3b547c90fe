//! Collection initialization.

use std::sync::Arc;

use orql_proto::{JoinType, LoadQueryInfluencers, QueryOptions, QueryTree, SelectTree, TreeExpr, TreePredicate};
use parking_lot::RwLock;

use super::prepare_single;
use crate::compile::{CachingPolicy, PreparedSelect, QueryCompiler};
use crate::error::Error;
use crate::metamodel::{EntityMapping, MappedAttribute};

/// Loads a collection by reading its owner with the collection join
/// fetched: `select o from Owner o left join fetch o.attribute where o.id = ?1`.
#[derive(Debug)]
pub struct CollectionLoader {
    role: String,
    owner: String,
    tree: QueryTree,
    statement: RwLock<Option<Arc<PreparedSelect>>>,
}

impl CollectionLoader {
    /// Create the loader of the plural `attribute` declared by `owner`.
    pub fn new(owner: &EntityMapping, attribute: &MappedAttribute) -> Result<Self, Error> {
        if !attribute.def.is_collection() {
            return Err(Error::Mapping(format!(
                "'{}.{}' is not a collection",
                owner.name,
                attribute.name()
            )));
        }
        let mut builder = QueryTree::builder();
        let root = builder.root(owner.name.clone());
        builder.fetch_join(root, attribute.name(), JoinType::Left);
        let tree = builder.select(SelectTree::new(vec![root]).with_predicate(TreePredicate::eq(
            TreeExpr::path(root, [owner.identifier.name.clone()]),
            TreeExpr::positional_param(1),
        )));
        Ok(Self {
            role: attribute.role(),
            owner: owner.name.clone(),
            tree,
            statement: RwLock::new(None),
        })
    }

    /// Collection role, `Owner.attribute`.
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Statement loading the collection; cached unless filters are enabled.
    pub fn statement(
        &self,
        compiler: &QueryCompiler<'_>,
        influencers: &LoadQueryInfluencers,
    ) -> Result<Arc<PreparedSelect>, Error> {
        let options = QueryOptions::new();
        if CachingPolicy::resolve(&options, influencers) != CachingPolicy::Plain {
            return prepare_single(compiler, &self.tree, &options, influencers).map(Arc::new);
        }
        if let Some(statement) = self.statement.read().as_ref() {
            return Ok(statement.clone());
        }
        let mut slot = self.statement.write();
        if let Some(statement) = slot.as_ref() {
            return Ok(statement.clone());
        }
        let prepared = Arc::new(prepare_single(compiler, &self.tree, &options, influencers)?);
        *slot = Some(prepared.clone());
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionFactoryConfig;
    use crate::render::SqliteDialect;
    use crate::results::{DomainResult, FetchKind};
    use crate::testing::shop;

    #[test]
    fn test_collection_statement_fetches_role() {
        let model = shop();
        let config = SessionFactoryConfig::default();
        let compiler = QueryCompiler::new(&model, &config, &SqliteDialect);
        let order = model.entity("Order").unwrap();
        let loader = CollectionLoader::new(order, order.attribute("lines").unwrap()).unwrap();
        assert_eq!(loader.role(), "Order.lines");

        let plain = LoadQueryInfluencers::default();
        let statement = loader.statement(&compiler, &plain).unwrap();
        assert!(Arc::ptr_eq(&statement, &loader.statement(&compiler, &plain).unwrap()));
        assert!(statement.operation.sql.contains(" left join order_line "));

        let DomainResult::Entity(result) = &statement.mapping.results[0] else {
            panic!("unexpected {:?}", statement.mapping.results);
        };
        assert!(matches!(
            result.fetch("lines").map(|f| &f.kind),
            Some(FetchKind::JoinedCollection { .. })
        ));
    }

    #[test]
    fn test_rejects_singular_attribute() {
        let model = shop();
        let order = model.entity("Order").unwrap();
        let err = CollectionLoader::new(order, order.attribute("customer").unwrap()).unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
    }
}
