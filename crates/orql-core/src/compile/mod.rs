//! Query compilation.
//!
//! [`QueryCompiler::compile`] turns a query tree into statement trees plus
//! the result mappings that assemble their rows; [`QueryCompiler::prepare`]
//! additionally renders them into driver-ready operations. Polymorphic roots
//! are split first, so one tree may compile to several statements whose
//! results are concatenated.

mod builder;
mod expression;
mod fetch;
mod mutation;
pub mod policy;
pub mod split;

use orql_proto::{LoadQueryInfluencers, QueryOptions, QueryTree};
use tracing::{debug, instrument};

use crate::config::SessionFactoryConfig;
use crate::error::Error;
use crate::metamodel::Metamodel;
use crate::render::{prepare_multi_table, Dialect, ExecutionContext, JdbcOperation, MultiTableOperations, ParameterSpec, SqlAstTranslator};
use crate::results::ResultSetMapping;
use crate::sql::{MutationStatement, SelectStatement};

use builder::StatementBuilder;

pub use policy::CachingPolicy;
pub use split::split_polymorphic;

/// Paging that cannot be pushed into SQL because fetched collections make
/// root rows repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryPaging {
    pub offset: Option<ParameterSpec>,
    pub limit: Option<ParameterSpec>,
}

impl InMemoryPaging {
    /// Resolve `(offset, limit)` for one execution.
    pub fn resolve(&self, context: &ExecutionContext<'_>) -> Result<(usize, Option<usize>), Error> {
        let offset = match &self.offset {
            Some(spec) => bound(spec, context)?,
            None => 0,
        };
        let limit = self.limit.as_ref().map(|spec| bound(spec, context)).transpose()?;
        Ok((offset, limit))
    }
}

fn bound(spec: &ParameterSpec, context: &ExecutionContext<'_>) -> Result<usize, Error> {
    let value = spec.resolve(context)?;
    value
        .as_i64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| Error::TypeMismatch {
            expected: "non-negative integer".to_string(),
            found: format!("{:?}", value),
        })
}

/// A select statement tree with its result mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSelect {
    pub statement: SelectStatement,
    pub mapping: ResultSetMapping,
    pub in_memory_paging: Option<InMemoryPaging>,
}

/// Output of compiling one (split) query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledStatement {
    Select(CompiledSelect),
    Mutation(MutationStatement),
}

/// A rendered select.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSelect {
    pub statement: SelectStatement,
    pub operation: JdbcOperation,
    pub mapping: ResultSetMapping,
    pub in_memory_paging: Option<InMemoryPaging>,
}

/// A rendered mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedMutation {
    Single(JdbcOperation),
    MultiTable(MultiTableOperations),
}

impl PreparedMutation {
    /// SQL of every statement this mutation runs; bucket statements are
    /// shown for a single key.
    pub fn sql(&self, dialect: &dyn Dialect) -> Result<Vec<String>, Error> {
        match self {
            PreparedMutation::Single(operation) => Ok(vec![operation.sql.clone()]),
            PreparedMutation::MultiTable(operations) => {
                let mut sql = vec![operations.id_select.sql.clone()];
                for bucket in &operations.buckets {
                    let rendered = crate::render::render_bucket(dialect, bucket, &[orql_proto::Value::Null])?;
                    sql.push(rendered.sql);
                }
                Ok(sql)
            }
        }
    }
}

/// Everything needed to execute a query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledQuery {
    /// One select per polymorphic split, results concatenated.
    Select(Vec<PreparedSelect>),
    /// One mutation per polymorphic split, counts summed.
    Mutation(Vec<PreparedMutation>),
}

impl CompiledQuery {
    pub fn is_select(&self) -> bool {
        matches!(self, CompiledQuery::Select(_))
    }

    /// SQL text of every statement, in execution order.
    pub fn sql(&self, dialect: &dyn Dialect) -> Result<Vec<String>, Error> {
        match self {
            CompiledQuery::Select(selects) => Ok(selects.iter().map(|s| s.operation.sql.clone()).collect()),
            CompiledQuery::Mutation(mutations) => {
                let mut sql = Vec::new();
                for mutation in mutations {
                    sql.extend(mutation.sql(dialect)?);
                }
                Ok(sql)
            }
        }
    }
}

/// Compiles query trees against a metamodel.
pub struct QueryCompiler<'a> {
    model: &'a Metamodel,
    config: &'a SessionFactoryConfig,
    dialect: &'a dyn Dialect,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(model: &'a Metamodel, config: &'a SessionFactoryConfig, dialect: &'a dyn Dialect) -> Self {
        Self { model, config, dialect }
    }

    /// Compile a query tree into statement trees.
    #[instrument(skip_all, fields(statement = tree.statement.kind()))]
    pub fn compile(
        &self,
        tree: &QueryTree,
        options: &QueryOptions,
        influencers: &LoadQueryInfluencers,
    ) -> Result<Vec<CompiledStatement>, Error> {
        tree.validate()?;
        let splits = split_polymorphic(self.model, tree)?;
        if splits.len() > 1 {
            debug!(splits = splits.len(), "Polymorphic query split");
        }
        splits
            .iter()
            .map(|split| StatementBuilder::new(self.model, self.config, options, influencers, split).build())
            .collect()
    }

    /// Compile and render a query tree.
    pub fn prepare(
        &self,
        tree: &QueryTree,
        options: &QueryOptions,
        influencers: &LoadQueryInfluencers,
    ) -> Result<CompiledQuery, Error> {
        let compiled = self.compile(tree, options, influencers)?;
        if tree.statement.kind() == "select" {
            let mut selects = Vec::with_capacity(compiled.len());
            for statement in compiled {
                let CompiledStatement::Select(select) = statement else {
                    return Err(Error::SqlTree("select tree compiled to a mutation".to_string()));
                };
                selects.push(self.prepare_select(select)?);
            }
            return Ok(CompiledQuery::Select(selects));
        }
        let mut mutations = Vec::with_capacity(compiled.len());
        for statement in compiled {
            let CompiledStatement::Mutation(mutation) = statement else {
                return Err(Error::SqlTree("mutation tree compiled to a select".to_string()));
            };
            mutations.push(self.prepare_mutation(&mutation)?);
        }
        Ok(CompiledQuery::Mutation(mutations))
    }

    pub fn prepare_select(&self, select: CompiledSelect) -> Result<PreparedSelect, Error> {
        let operation = SqlAstTranslator::render_select(self.dialect, &select.statement)?;
        Ok(PreparedSelect {
            statement: select.statement,
            operation,
            mapping: select.mapping,
            in_memory_paging: select.in_memory_paging,
        })
    }

    fn prepare_mutation(&self, mutation: &MutationStatement) -> Result<PreparedMutation, Error> {
        Ok(match mutation {
            MutationStatement::Update(update) => {
                PreparedMutation::Single(SqlAstTranslator::render_update(self.dialect, update)?)
            }
            MutationStatement::Delete(delete) => {
                PreparedMutation::Single(SqlAstTranslator::render_delete(self.dialect, delete)?)
            }
            MutationStatement::MultiTable(multi) => {
                PreparedMutation::MultiTable(prepare_multi_table(self.dialect, multi)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SqliteDialect;
    use crate::results::{DomainResult, FetchKind, SubtypeReader};
    use crate::sql::{Predicate, TableSource};
    use crate::testing::shop;
    use orql_proto::{
        EntityGraph, GraphSemantic, JoinType, LockMode, SelectTree, SortSpec, TreeExpr, TreePredicate, UpdateTree,
        DeleteTree, Value,
    };

    fn compile_one(tree: &QueryTree, options: &QueryOptions, influencers: &LoadQueryInfluencers) -> Result<CompiledSelect, Error> {
        let model = shop();
        let config = SessionFactoryConfig::default();
        let compiler = QueryCompiler::new(&model, &config, &SqliteDialect);
        let mut compiled = compiler.compile(tree, options, influencers)?;
        match compiled.pop() {
            Some(CompiledStatement::Select(select)) => Ok(select),
            other => panic!("unexpected {:?}", other),
        }
    }

    fn prepare(tree: &QueryTree) -> Result<CompiledQuery, Error> {
        let model = shop();
        let config = SessionFactoryConfig::default();
        QueryCompiler::new(&model, &config, &SqliteDialect).prepare(tree, &QueryOptions::default(), &LoadQueryInfluencers::default())
    }

    fn entity_result(select: &CompiledSelect) -> &crate::results::EntityResult {
        match &select.mapping.results[0] {
            DomainResult::Entity(result) => result,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_simple_entity_select() {
        let mut builder = QueryTree::builder();
        let o = builder.root_as("Order", "o");
        let tree = builder.select(
            SelectTree::new(vec![o])
                .with_predicate(TreePredicate::eq(TreeExpr::path(o, ["status"]), TreeExpr::named_param("status")))
                .with_order(SortSpec::asc(TreeExpr::path(o, ["number"]))),
        );
        let select = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap();
        let result = entity_result(&select);
        assert_eq!(result.entity, "Order");
        assert_eq!(result.id_position, 0);
        assert!(matches!(result.subtype, SubtypeReader::Fixed(ref e) if e == "Order"));
        assert!(matches!(
            result.fetch("customer").map(|f| &f.kind),
            Some(FetchKind::EntityKey { eager: false, .. })
        ));
        assert!(matches!(
            result.fetch("lines").map(|f| &f.kind),
            Some(FetchKind::DelayedCollection { eager: false, .. })
        ));
        assert!(!select.mapping.collection_fetches);
        assert_eq!(select.statement.affected_tables.iter().collect::<Vec<_>>(), vec!["orders"]);

        let model = shop();
        let config = SessionFactoryConfig::default();
        let prepared = QueryCompiler::new(&model, &config, &SqliteDialect)
            .prepare_select(select)
            .unwrap();
        assert!(prepared.operation.sql.starts_with("select "));
        assert!(prepared.operation.sql.contains(" from orders "));
        assert!(prepared.operation.sql.contains(" order by "));
        assert_eq!(prepared.operation.parameters.len(), 1);
        assert_eq!(prepared.operation.parameters[0].scalar, Some(crate::metamodel::ScalarType::String));
    }

    #[test]
    fn test_fetch_join_collection_pages_in_memory() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        builder.fetch_join(o, "lines", JoinType::Left);
        let tree = builder.select(SelectTree::new(vec![o]));
        let options = QueryOptions::default().with_first_result(1).with_max_results(2);
        let select = compile_one(&tree, &options, &LoadQueryInfluencers::default()).unwrap();

        assert!(select.mapping.collection_fetches);
        assert!(select.statement.query.limit.is_none());
        let paging = select.in_memory_paging.clone().unwrap();
        let bindings = orql_proto::QueryParameterBindings::default();
        let influencers = LoadQueryInfluencers::default();
        let context = ExecutionContext {
            bindings: &bindings,
            influencers: &influencers,
            options: &options,
        };
        assert_eq!(paging.resolve(&context).unwrap(), (1, Some(2)));

        let lines = entity_result(&select).fetch("lines").unwrap();
        let FetchKind::JoinedCollection { element, .. } = &lines.kind else {
            panic!("lines not joined: {:?}", lines.kind);
        };
        let crate::results::CollectionElementResult::Entity(line) = element else {
            panic!("unexpected element {:?}", element);
        };
        // product is eagerly joined by mapping default
        assert!(matches!(line.fetch("product").map(|f| &f.kind), Some(FetchKind::JoinedEntity { .. })));
        assert!(select.statement.affected_tables.contains("product"));
    }

    fn orders_with_lines_twice() -> QueryTree {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        builder.fetch_join(o, "lines", JoinType::Left);
        builder.fetch_join(o, "lines", JoinType::Left);
        builder.select(SelectTree::new(vec![o]))
    }

    #[test]
    fn test_duplicate_fetch_join_dropped() {
        let tree = orders_with_lines_twice();
        let select = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap();
        let result = entity_result(&select);
        assert_eq!(result.fetches.iter().filter(|f| f.attribute == "lines").count(), 1);
        assert!(matches!(
            result.fetch("lines").map(|f| &f.kind),
            Some(FetchKind::JoinedCollection { .. })
        ));

        let sql = prepare(&tree).unwrap().sql(&SqliteDialect).unwrap();
        assert_eq!(sql.len(), 1);
        assert_eq!(sql[0].matches(" order_line ").count(), 1, "{}", sql[0]);
    }

    #[test]
    fn test_duplicate_fetch_join_rejected_when_configured() {
        let model = shop();
        let config = SessionFactoryConfig::default().with_fail_on_duplicate_fetch(true);
        let err = QueryCompiler::new(&model, &config, &SqliteDialect)
            .prepare(&orders_with_lines_twice(), &QueryOptions::default(), &LoadQueryInfluencers::default())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateFetchParent(ref path) if path == "Order.lines"), "{:?}", err);
    }

    #[test]
    fn test_fetch_without_owner_fails() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        builder.fetch_join(o, "customer", JoinType::Inner);
        let tree = builder.select(SelectTree::new(vec![o]).with_selection(TreeExpr::path(o, ["number"])));
        let err = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap_err();
        assert!(matches!(err, Error::Parsing(ref m) if m.contains("owner of the fetched association")));
    }

    #[test]
    fn test_alias_collision() {
        let mut builder = QueryTree::builder();
        let o = builder.root_as("Order", "x");
        let c = builder.join(o, "customer", JoinType::Inner);
        builder.alias(c, "x");
        let tree = builder.select(SelectTree::new(vec![o]));
        let err = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap_err();
        assert!(matches!(err, Error::AliasCollision { ref alias } if alias == "x"));
    }

    #[test]
    fn test_illegal_fetch_of_basic() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        builder.fetch_join(o, "status", JoinType::Left);
        let tree = builder.select(SelectTree::new(vec![o]));
        let err = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap_err();
        assert!(matches!(err, Error::IllegalFetch { ref attribute, .. } if attribute == "status"));
    }

    #[test]
    fn test_implicit_join_reused() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        let tree = builder.select(
            SelectTree::new(vec![o])
                .with_selection(TreeExpr::path(o, ["customer", "name"]))
                .with_predicate(TreePredicate::like(
                    TreeExpr::path(o, ["customer", "email"]),
                    TreeExpr::literal("%@example.com"),
                )),
        );
        let select = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap();
        assert_eq!(select.statement.query.from.groups().len(), 2);
        assert!(matches!(select.mapping.results[0], DomainResult::Basic { position: 0, .. }));
    }

    #[test]
    fn test_fk_shortcut_avoids_join() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        let tree = builder.select(
            SelectTree::new(vec![o]).with_predicate(TreePredicate::eq(
                TreeExpr::path(o, ["customer", "id"]),
                TreeExpr::literal(Value::Int64(1)),
            )),
        );
        let select = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap();
        assert_eq!(select.statement.query.from.groups().len(), 1);
    }

    #[test]
    fn test_plural_path_rejected() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        let tree = builder.select(SelectTree::new(vec![o]).with_selection(TreeExpr::path(o, ["lines", "quantity"])));
        let err = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap_err();
        assert!(matches!(err, Error::Parsing(ref m) if m.contains("plural attribute")));
    }

    #[test]
    fn test_enabled_filter_restricts_root() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        let tree = builder.select(SelectTree::new(vec![o]));
        let influencers = LoadQueryInfluencers::default().with_filter("status");
        let select = compile_one(&tree, &QueryOptions::default(), &influencers).unwrap();
        assert!(matches!(select.statement.query.predicate, Some(Predicate::Fragment { ref filter, .. }) if filter == "status"));
    }

    #[test]
    fn test_fetch_profile_joins_customer() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        let tree = builder.select(SelectTree::new(vec![o]));
        let influencers = LoadQueryInfluencers::default().with_fetch_profile("with-customer");
        let select = compile_one(&tree, &QueryOptions::default(), &influencers).unwrap();
        let customer = entity_result(&select).fetch("customer").unwrap();
        assert!(matches!(customer.kind, FetchKind::JoinedEntity { optional: true, .. }));
    }

    #[test]
    fn test_entity_graph_fetch_semantic() {
        let mut builder = QueryTree::builder();
        let l = builder.root("OrderLine");
        let tree = builder.select(SelectTree::new(vec![l]));
        let options = QueryOptions::default().with_entity_graph(EntityGraph::new("OrderLine").with_attribute("order"), GraphSemantic::Fetch);
        let select = compile_one(&tree, &options, &LoadQueryInfluencers::default()).unwrap();
        let result = entity_result(&select);
        assert!(matches!(result.fetch("order").map(|f| &f.kind), Some(FetchKind::JoinedEntity { .. })));
        // fetch semantic makes the eager product lazy
        assert!(matches!(
            result.fetch("product").map(|f| &f.kind),
            Some(FetchKind::EntityKey { eager: false, .. })
        ));
    }

    #[test]
    fn test_joined_hierarchy_reads_subclass_keys() {
        let mut builder = QueryTree::builder();
        let a = builder.root("Animal");
        let tree = builder.select(SelectTree::new(vec![a]));
        let select = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap();
        let result = entity_result(&select);
        let SubtypeReader::SubclassKeys { keys, default } = &result.subtype else {
            panic!("unexpected {:?}", result.subtype);
        };
        assert_eq!(keys.len(), 2);
        assert_eq!(default, "Animal");
        assert!(result.fetch("barks").is_some() && result.fetch("lives").is_some());
    }

    #[test]
    fn test_treat_requires_subtype() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        builder.treat(o, "Dog");
        let tree = builder.select(SelectTree::new(vec![o]));
        let err = compile_one(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default()).unwrap_err();
        assert!(matches!(err, Error::Parsing(ref m) if m.contains("cannot treat")));
    }

    #[test]
    fn test_polymorphic_query_compiles_per_implementor() {
        let mut builder = QueryTree::builder();
        let n = builder.root("Named");
        let tree = builder.select(SelectTree::new(vec![n]));
        let CompiledQuery::Select(selects) = prepare(&tree).unwrap() else {
            panic!("expected a select");
        };
        assert_eq!(selects.len(), 2);
        assert!(selects[0].operation.sql.contains(" from customer "));
        assert!(selects[1].operation.sql.contains(" from product "));
    }

    #[test]
    fn test_single_table_update() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        let tree = builder.update(
            UpdateTree::new(o)
                .set(["status"], TreeExpr::named_param("status"))
                .with_predicate(TreePredicate::lt(TreeExpr::path(o, ["total"]), TreeExpr::literal(Value::Float64(10.0)))),
        );
        let CompiledQuery::Mutation(mutations) = prepare(&tree).unwrap() else {
            panic!("expected a mutation");
        };
        let [PreparedMutation::Single(operation)] = mutations.as_slice() else {
            panic!("unexpected {:?}", mutations);
        };
        assert_eq!(operation.sql, "update orders set status = ? where orders.total<10.0");
    }

    #[test]
    fn test_identifier_update_rejected() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        let tree = builder.update(UpdateTree::new(o).set(["id"], TreeExpr::literal(Value::Int64(1))));
        assert!(matches!(prepare(&tree), Err(Error::IllegalQueryOperation(_))));
    }

    #[test]
    fn test_joined_delete_is_multi_table() {
        let mut builder = QueryTree::builder();
        let d = builder.root("Dog");
        let tree = builder.delete(
            DeleteTree::new(d).with_predicate(TreePredicate::eq(TreeExpr::path(d, ["barks"]), TreeExpr::literal(true))),
        );
        let model = shop();
        let config = SessionFactoryConfig::default();
        let compiled = QueryCompiler::new(&model, &config, &SqliteDialect)
            .compile(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default())
            .unwrap();
        let [CompiledStatement::Mutation(MutationStatement::MultiTable(multi))] = compiled.as_slice() else {
            panic!("unexpected {:?}", compiled);
        };
        let tables: Vec<_> = multi.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(tables, vec!["dog", "animal"]);
        assert!(multi.collection_tables.is_empty());
    }

    #[test]
    fn test_delete_with_collection_table_is_multi_table() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        let tree = builder.delete(DeleteTree::new(o));
        let model = shop();
        let config = SessionFactoryConfig::default();
        let compiled = QueryCompiler::new(&model, &config, &SqliteDialect)
            .compile(&tree, &QueryOptions::default(), &LoadQueryInfluencers::default())
            .unwrap();
        let [CompiledStatement::Mutation(MutationStatement::MultiTable(multi))] = compiled.as_slice() else {
            panic!("unexpected {:?}", compiled);
        };
        assert_eq!(multi.collection_tables[0].table, "order_tag");
        assert!(matches!(
            multi.id_select.from.groups()[0].primary.source,
            TableSource::Named(ref t) if t == "orders"
        ));
    }

    #[test]
    fn test_lock_mode_carried() {
        let mut builder = QueryTree::builder();
        let o = builder.root("Order");
        let tree = builder.select(SelectTree::new(vec![o]));
        let options = QueryOptions::default().with_lock_mode(LockMode::PessimisticWrite);
        let select = compile_one(&tree, &options, &LoadQueryInfluencers::default()).unwrap();
        assert_eq!(select.statement.lock_mode, LockMode::PessimisticWrite);
    }
}
