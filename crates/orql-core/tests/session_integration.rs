//! Integration tests for sessions over SQLite.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use orql_core::metamodel::{
    AttributeDef, EmbeddableDef, EntityDef, FetchMode, FetchProfileDef, FetchStyle, FilterDef, IdentifierDef,
    InheritanceStrategy, Metamodel, MetamodelDef, ScalarType,
};
use orql_core::proto::{
    DeleteTree, JoinType, QueryOptions, QueryParameterBindings, QueryTree, SelectTree, SortSpec, TreeExpr, TreePredicate,
    UpdateTree, Value,
};
use orql_core::proto::LoadQueryInfluencers;
use orql_core::exec::StatementExecutor;
use orql_core::render::JdbcOperation;
use orql_core::{
    CollectionElement, Error, PropertyValue, Session, SessionFactory, SessionFactoryConfig, SqliteConnection,
    SqliteDialect, StatementOptions,
};

const SCHEMA: &str = "
    create table customer (
        id integer primary key,
        name text not null,
        email text not null unique,
        addr_street text,
        addr_city text
    );
    create table product (id integer primary key, name text not null, price real not null);
    create table orders (
        id integer primary key,
        number text not null unique,
        total real not null,
        status text not null,
        customer_id integer
    );
    create table order_line (
        id integer primary key,
        quantity integer not null,
        product_id integer not null,
        order_id integer not null
    );
    create table order_tag (order_id integer not null, tag text not null);
    create table animal (id integer primary key, name text not null);
    create table dog (id integer primary key, barks integer not null);
    create table cat (id integer primary key, lives integer not null);
    create table door_lock (id integer primary key, label text not null, key_id integer);
    create table door_key (id integer primary key, label text not null, lock_id integer);

    insert into customer values (1, 'Ann', 'ann@example.com', '1 Main St', 'Springfield');
    insert into customer values (2, 'Bob', 'bob@example.com', null, null);
    insert into product values (1, 'Pen', 1.5);
    insert into product values (2, 'Ink', 4.0);
    insert into orders values (1, 'N-1', 12.5, 'open', 1);
    insert into orders values (2, 'N-2', 30.0, 'closed', 1);
    insert into orders values (3, 'N-3', 7.0, 'open', null);
    insert into order_line values (1, 2, 1, 1);
    insert into order_line values (2, 1, 2, 1);
    insert into order_line values (3, 5, 1, 2);
    insert into order_tag values (1, 'gift');
    insert into order_tag values (1, 'rush');
    insert into order_tag values (2, 'gift');
    insert into animal values (1, 'Rex');
    insert into animal values (2, 'Tom');
    insert into animal values (3, 'Fido');
    insert into dog values (1, 1);
    insert into dog values (3, 0);
    insert into cat values (2, 9);
    insert into door_lock values (1, 'front', 1);
    insert into door_key values (1, 'brass', 1);
";

struct TestContext {
    factory: SessionFactory,
    db_path: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_config(SessionFactoryConfig::default())
    }

    fn with_config(config: SessionFactoryConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shop.db");
        SqliteConnection::open(&db_path)
            .unwrap()
            .execute_batch(SCHEMA)
            .unwrap();

        let model = Metamodel::build(shop_model()).unwrap();
        let factory = SessionFactory::builder(model)
            .dialect(Box::new(SqliteDialect))
            .config(config)
            .build()
            .unwrap();

        Self {
            factory,
            db_path,
            _dir: dir,
        }
    }

    fn session(&self) -> Session<'_> {
        let connection = SqliteConnection::open(&self.db_path).unwrap();
        self.factory.open_session(Box::new(connection)).unwrap()
    }

    /// Row count of `table`, read on a separate connection.
    fn count(&self, table: &str) -> i64 {
        let connection = SqliteConnection::open(&self.db_path).unwrap();
        connection
            .inner()
            .query_row(&format!("select count(*) from {}", table), [], |row| row.get(0))
            .unwrap()
    }
}

fn id() -> IdentifierDef {
    IdentifierDef::new("id", "id", ScalarType::Int64)
}

fn shop_model() -> MetamodelDef {
    MetamodelDef::new()
        .with_embeddable(
            EmbeddableDef::new("Address")
                .with_attribute(AttributeDef::basic("street", "street", ScalarType::String))
                .with_attribute(AttributeDef::basic("city", "city", ScalarType::String)),
        )
        .with_entity(
            EntityDef::new("Customer", "customer", id())
                .with_attribute(AttributeDef::basic("name", "name", ScalarType::String))
                .with_attribute(AttributeDef::basic("email", "email", ScalarType::String).unique())
                .with_attribute(AttributeDef::embedded("address", "Address", "addr_").optional())
                .with_attribute(AttributeDef::one_to_many("orders", "Order", "customer_id", FetchMode::LAZY)),
        )
        .with_entity(
            EntityDef::new("Order", "orders", id())
                .with_attribute(AttributeDef::basic("number", "number", ScalarType::String).unique())
                .with_attribute(AttributeDef::basic("total", "total", ScalarType::Float64))
                .with_attribute(AttributeDef::basic("status", "status", ScalarType::String))
                .with_attribute(AttributeDef::to_one("customer", "Customer", "customer_id", FetchMode::LAZY).optional())
                .with_attribute(AttributeDef::one_to_many("lines", "OrderLine", "order_id", FetchMode::LAZY))
                .with_attribute(AttributeDef::elements(
                    "tags",
                    "order_tag",
                    "order_id",
                    "tag",
                    ScalarType::String,
                    FetchMode::LAZY,
                ))
                .with_filter("status", "{alias}.status = :status"),
        )
        .with_entity(
            EntityDef::new("OrderLine", "order_line", id())
                .with_attribute(AttributeDef::basic("quantity", "quantity", ScalarType::Int32))
                .with_attribute(AttributeDef::to_one("product", "Product", "product_id", FetchMode::EAGER_JOIN))
                .with_attribute(AttributeDef::to_one("order", "Order", "order_id", FetchMode::LAZY)),
        )
        .with_entity(
            EntityDef::new("Product", "product", id())
                .with_attribute(AttributeDef::basic("name", "name", ScalarType::String))
                .with_attribute(AttributeDef::basic("price", "price", ScalarType::Float64)),
        )
        .with_entity(
            EntityDef::new("Animal", "animal", id())
                .with_inheritance(InheritanceStrategy::Joined)
                .abstract_type()
                .with_attribute(AttributeDef::basic("name", "name", ScalarType::String)),
        )
        .with_entity(
            EntityDef::subclass("Dog", "Animal")
                .with_table("dog")
                .with_attribute(AttributeDef::basic("barks", "barks", ScalarType::Bool)),
        )
        .with_entity(
            EntityDef::subclass("Cat", "Animal")
                .with_table("cat")
                .with_attribute(AttributeDef::basic("lives", "lives", ScalarType::Int32)),
        )
        .with_entity(
            EntityDef::new("Lock", "door_lock", id())
                .with_attribute(AttributeDef::basic("label", "label", ScalarType::String))
                .with_attribute(AttributeDef::to_one("key", "Key", "key_id", FetchMode::EAGER_JOIN).optional()),
        )
        .with_entity(
            EntityDef::new("Key", "door_key", id())
                .with_attribute(AttributeDef::basic("label", "label", ScalarType::String))
                .with_attribute(AttributeDef::to_one("lock", "Lock", "lock_id", FetchMode::EAGER_JOIN).optional()),
        )
        .with_polymorphic_type("Named", ["Customer", "Product"])
        .with_filter(FilterDef::new("status").with_parameter("status", ScalarType::String))
        .with_fetch_profile(FetchProfileDef::new("with-customer").with_fetch("Order", "customer", FetchStyle::Join))
}

/// `select o from Order o order by o.number`
fn orders_by_number() -> QueryTree {
    let mut builder = QueryTree::builder();
    let o = builder.root("Order");
    builder.select(SelectTree::new(vec![o]).with_order(SortSpec::asc(TreeExpr::path(o, ["number"]))))
}

fn basic(value: impl Into<Value>) -> PropertyValue {
    PropertyValue::Basic(value.into())
}

fn no_bindings() -> QueryParameterBindings {
    QueryParameterBindings::new()
}

#[test]
fn test_list_returns_managed_instances() {
    let ctx = TestContext::new();
    let mut session = ctx.session();

    let rows = session.list(&orders_by_number(), &no_bindings(), &QueryOptions::new()).unwrap();
    assert_eq!(rows.len(), 3);
    let first = rows[0].entity().unwrap();
    assert_eq!(first.borrow().entity, "Order");
    assert_eq!(session.attribute(first, "number").unwrap(), basic("N-1"));
    assert_eq!(session.attribute(first, "total").unwrap(), basic(12.5));

    let again = session.list(&orders_by_number(), &no_bindings(), &QueryOptions::new()).unwrap();
    for (a, b) in rows.iter().zip(&again) {
        assert!(Rc::ptr_eq(a.entity().unwrap(), b.entity().unwrap()));
    }
}

#[test]
fn test_statement_cache_shared_across_sessions() {
    let ctx = TestContext::new();
    {
        let mut session = ctx.session();
        session.list(&orders_by_number(), &no_bindings(), &QueryOptions::new()).unwrap();
    }
    let mut session = ctx.session();
    session.list(&orders_by_number(), &no_bindings(), &QueryOptions::new()).unwrap();

    let cache = ctx.factory.statement_cache();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().hits(), 1);
    assert_eq!(cache.stats().misses(), 1);
}

#[test]
fn test_concurrent_compiles_share_one_statement() {
    let ctx = TestContext::new();
    let tree = orders_by_number();
    let barrier = Barrier::new(8);
    let compiled: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    ctx.factory
                        .compile(&tree, &QueryOptions::new(), &LoadQueryInfluencers::new())
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(ctx.factory.statement_cache().len(), 1);
    for statement in &compiled[1..] {
        assert!(Arc::ptr_eq(&compiled[0], statement));
    }
}

#[test]
fn test_find_uses_identity_map() {
    let ctx = TestContext::new();
    let mut session = ctx.session();

    let order = session.find("Order", 1i64).unwrap().unwrap();
    let same = session.find("Order", 1i64).unwrap().unwrap();
    assert!(Rc::ptr_eq(&order, &same));
    assert!(session.find("Order", 99i64).unwrap().is_none());

    let mut other = ctx.session();
    let separate = other.find("Order", 1i64).unwrap().unwrap();
    assert!(!Rc::ptr_eq(&order, &separate));

    let loader = ctx.factory.single_id_loader("Order").unwrap();
    assert_eq!(loader.cached_statements(), 1);
}

#[test]
fn test_lazy_association_initializes_on_access() {
    let ctx = TestContext::new();
    let mut session = ctx.session();

    let order = session.find("Order", 1i64).unwrap().unwrap();
    let customer = session.association(&order, "customer").unwrap().unwrap();
    assert!(!customer.borrow().initialized);

    assert_eq!(session.attribute(&customer, "name").unwrap(), basic("Ann"));
    assert!(customer.borrow().initialized);

    let orphan = session.find("Order", 3i64).unwrap().unwrap();
    assert!(session.association(&orphan, "customer").unwrap().is_none());
}

#[test]
fn test_fetch_profile_joins_customer() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    session.enable_fetch_profile("with-customer").unwrap();

    let rows = session.list(&orders_by_number(), &no_bindings(), &QueryOptions::new()).unwrap();
    let first = rows[0].entity().unwrap().clone();
    let customer = session.association(&first, "customer").unwrap().unwrap();
    assert!(customer.borrow().initialized);

    let third = rows[2].entity().unwrap().clone();
    assert!(session.association(&third, "customer").unwrap().is_none());
}

#[test]
fn test_outer_fetch_keeps_orders_without_customer() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let mut builder = QueryTree::builder();
    let o = builder.root("Order");
    builder.fetch_join(o, "customer", JoinType::Left);
    let tree = builder.select(SelectTree::new(vec![o]).with_order(SortSpec::asc(TreeExpr::path(o, ["number"]))));

    let rows = session.list(&tree, &no_bindings(), &QueryOptions::new()).unwrap();
    assert_eq!(rows.len(), 3);
    let first = rows[0].entity().unwrap().clone();
    let customer = session.association(&first, "customer").unwrap().unwrap();
    assert!(customer.borrow().initialized);

    let third = rows[2].entity().unwrap().clone();
    assert_eq!(session.attribute(&third, "number").unwrap(), basic("N-3"));
    assert!(session.association(&third, "customer").unwrap().is_none());
}

#[test]
fn test_collections_initialize_on_access() {
    let ctx = TestContext::new();
    let mut session = ctx.session();

    let order = session.find("Order", 1i64).unwrap().unwrap();
    let lines = session.collection_entities(&order, "lines").unwrap();
    assert_eq!(lines.len(), 2);
    let mut quantities = Vec::new();
    for line in &lines {
        quantities.push(session.attribute(line, "quantity").unwrap());
        let product = session.association(line, "product").unwrap().unwrap();
        assert_eq!(product.borrow().entity, "Product");
    }
    quantities.sort_by_key(|q| format!("{:?}", q));
    assert_eq!(quantities, vec![basic(1), basic(2)]);

    let mut tags: Vec<_> = session
        .collection(&order, "tags")
        .unwrap()
        .into_iter()
        .map(|element| match element {
            CollectionElement::Value(Value::String(tag)) => tag,
            other => panic!("unexpected element {:?}", other),
        })
        .collect();
    tags.sort();
    assert_eq!(tags, vec!["gift".to_string(), "rush".to_string()]);
}

#[test]
fn test_inner_fetch_drops_orders_without_customer() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let mut builder = QueryTree::builder();
    let o = builder.root("Order");
    builder.fetch_join(o, "customer", JoinType::Inner);
    let tree = builder.select(SelectTree::new(vec![o]).with_order(SortSpec::asc(TreeExpr::path(o, ["number"]))));

    let rows = session.list(&tree, &no_bindings(), &QueryOptions::new()).unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let customer = session.association(row.entity().unwrap(), "customer").unwrap().unwrap();
        assert!(customer.borrow().initialized);
    }
    assert!(Rc::ptr_eq(
        &session.association(rows[0].entity().unwrap(), "customer").unwrap().unwrap(),
        &session.association(rows[1].entity().unwrap(), "customer").unwrap().unwrap(),
    ));
}

#[test]
fn test_mutual_fetch_cycle_terminates() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let mut builder = QueryTree::builder();
    let l = builder.root("Lock");
    let k = builder.fetch_join(l, "key", JoinType::Left);
    builder.fetch_join(k, "lock", JoinType::Left);
    let tree = builder.select(SelectTree::new(vec![l]));

    let rows = session.list(&tree, &no_bindings(), &QueryOptions::new()).unwrap();
    assert_eq!(rows.len(), 1);
    let lock = rows[0].entity().unwrap().clone();
    let key = session.association(&lock, "key").unwrap().unwrap();
    let back = session.association(&key, "lock").unwrap().unwrap();
    assert!(Rc::ptr_eq(&lock, &back));
    assert!(lock.borrow().initialized && key.borrow().initialized);
    assert_eq!(session.persistence_context().entity_count(), 2);

    let found = session.find("Key", 1i64).unwrap().unwrap();
    assert!(Rc::ptr_eq(&found, &key));
}

#[test]
fn test_find_by_unique_key_registers_instance() {
    let ctx = TestContext::new();
    let mut session = ctx.session();

    let customer = session
        .find_by_unique_key("Customer", "email", "bob@example.com")
        .unwrap()
        .unwrap();
    assert_eq!(session.attribute(&customer, "name").unwrap(), basic("Bob"));

    let by_id = session.find("Customer", 2i64).unwrap().unwrap();
    assert!(Rc::ptr_eq(&customer, &by_id));
    let again = session
        .find_by_unique_key("Customer", "email", "bob@example.com")
        .unwrap()
        .unwrap();
    assert!(Rc::ptr_eq(&customer, &again));

    assert!(session
        .find_by_unique_key("Customer", "email", "nobody@example.com")
        .unwrap()
        .is_none());
    assert!(matches!(
        session.find_by_unique_key("Customer", "name", "Bob"),
        Err(Error::Mapping(_))
    ));
}

#[test]
fn test_filter_restricts_queries_and_loads() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    session
        .enable_filter("status")
        .unwrap()
        .insert("status".to_string(), Value::from("open"));

    let rows = session.list(&orders_by_number(), &no_bindings(), &QueryOptions::new()).unwrap();
    let numbers: Vec<_> = rows
        .iter()
        .map(|row| session.attribute(row.entity().unwrap(), "number").unwrap())
        .collect();
    assert_eq!(numbers, vec![basic("N-1"), basic("N-3")]);
    assert!(session.find("Order", 2i64).unwrap().is_none());
    assert!(ctx.factory.statement_cache().is_empty());

    session.disable_filter("status");
    assert!(session.find("Order", 2i64).unwrap().is_some());
    assert!(matches!(session.enable_filter("missing"), Err(Error::UnknownFilter(_))));
}

#[test]
fn test_polymorphic_query_pages_concatenation() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let mut builder = QueryTree::builder();
    let n = builder.root("Named");
    let tree = builder.select(SelectTree::new(vec![n]));

    let all = session.list(&tree, &no_bindings(), &QueryOptions::new()).unwrap();
    let entities: Vec<_> = all.iter().map(|row| row.entity().unwrap().borrow().entity.clone()).collect();
    assert_eq!(entities, vec!["Customer", "Customer", "Product", "Product"]);

    let page = session
        .list(&tree, &no_bindings(), &QueryOptions::new().with_first_result(1).with_max_results(2))
        .unwrap();
    assert_eq!(page.len(), 2);
    assert!(Rc::ptr_eq(page[0].entity().unwrap(), all[1].entity().unwrap()));
    assert!(Rc::ptr_eq(page[1].entity().unwrap(), all[2].entity().unwrap()));
}

#[test]
fn test_joined_hierarchy_resolves_subtype() {
    let ctx = TestContext::new();
    let mut session = ctx.session();

    let rex = session.find("Animal", 1i64).unwrap().unwrap();
    assert_eq!(rex.borrow().entity, "Dog");
    assert_eq!(session.attribute(&rex, "barks").unwrap(), basic(true));

    let tom = session.find("Animal", 2i64).unwrap().unwrap();
    assert_eq!(tom.borrow().entity, "Cat");
    assert!(session.find("Dog", 2i64).unwrap().is_none());
}

#[test]
fn test_scalar_projection() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let mut builder = QueryTree::builder();
    let o = builder.root("Order");
    let tree = builder.select(
        SelectTree::new(vec![o])
            .with_selection(TreeExpr::path(o, ["number"]))
            .with_predicate(TreePredicate::eq(TreeExpr::path(o, ["status"]), TreeExpr::named_param("status")))
            .with_order(SortSpec::desc(TreeExpr::path(o, ["number"]))),
    );

    let bindings = QueryParameterBindings::new().with_named("status", "open");
    let rows = session.list(&tree, &bindings, &QueryOptions::new()).unwrap();
    let numbers: Vec<_> = rows.iter().map(|row| row.scalar().cloned().unwrap()).collect();
    assert_eq!(numbers, vec![Value::from("N-3"), Value::from("N-1")]);
    assert_eq!(session.persistence_context().entity_count(), 0);
}

#[test]
fn test_missing_parameter_is_rejected() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let mut builder = QueryTree::builder();
    let o = builder.root("Order");
    let tree = builder.select(
        SelectTree::new(vec![o])
            .with_predicate(TreePredicate::eq(TreeExpr::path(o, ["status"]), TreeExpr::named_param("status"))),
    );
    assert!(matches!(
        session.list(&tree, &no_bindings(), &QueryOptions::new()),
        Err(Error::MissingParameter(_))
    ));
}

#[test]
fn test_update_counts_rows() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let mut builder = QueryTree::builder();
    let o = builder.root("Order");
    let tree = builder.update(
        UpdateTree::new(o)
            .set(["status"], TreeExpr::literal("closed"))
            .with_predicate(TreePredicate::eq(TreeExpr::path(o, ["status"]), TreeExpr::named_param("status"))),
    );

    let open = QueryParameterBindings::new().with_named("status", "open");
    assert_eq!(session.execute_update(&tree, &open, &QueryOptions::new()).unwrap(), 2);
    assert_eq!(session.execute_update(&tree, &open, &QueryOptions::new()).unwrap(), 0);
}

#[test]
fn test_delete_spans_collection_and_subclass_tables() {
    let ctx = TestContext::new();
    let mut session = ctx.session();

    let mut builder = QueryTree::builder();
    let o = builder.root("Order");
    let delete_order = builder.delete(
        DeleteTree::new(o).with_predicate(TreePredicate::eq(TreeExpr::path(o, ["number"]), TreeExpr::literal("N-1"))),
    );
    assert_eq!(session.execute_update(&delete_order, &no_bindings(), &QueryOptions::new()).unwrap(), 1);
    assert_eq!(ctx.count("orders"), 2);
    assert_eq!(ctx.count("order_tag"), 1);

    let mut builder = QueryTree::builder();
    let d = builder.root("Dog");
    let delete_dogs = builder.delete(DeleteTree::new(d));
    assert_eq!(session.execute_update(&delete_dogs, &no_bindings(), &QueryOptions::new()).unwrap(), 2);
    assert_eq!(ctx.count("dog"), 0);
    assert_eq!(ctx.count("animal"), 1);
    assert_eq!(ctx.count("cat"), 1);
}

#[test]
fn test_constraint_violation_is_translated() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let mut builder = QueryTree::builder();
    let c = builder.root("Customer");
    let tree = builder.update(UpdateTree::new(c).set(["email"], TreeExpr::literal("same@example.com")));

    match session.execute_update(&tree, &no_bindings(), &QueryOptions::new()) {
        Err(Error::ConstraintViolation { sql, .. }) => assert!(sql.unwrap().starts_with("update customer")),
        other => panic!("expected constraint violation, got {:?}", other),
    }
}

#[test]
fn test_timeout_is_translated() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let options = QueryOptions::new().with_timeout(Duration::ZERO);
    assert!(matches!(
        session.list(&orders_by_number(), &no_bindings(), &options),
        Err(Error::QueryTimeout { .. })
    ));
}

#[test]
fn test_mutation_timeout_leaves_rows_untouched() {
    let ctx = TestContext::with_config(SessionFactoryConfig::default().with_default_timeout(Duration::ZERO));
    let mut session = ctx.session();
    let mut builder = QueryTree::builder();
    let o = builder.root("Order");
    let tree = builder.update(UpdateTree::new(o).set(["status"], TreeExpr::literal("closed")));

    assert!(matches!(
        session.execute_update(&tree, &no_bindings(), &QueryOptions::new()),
        Err(Error::QueryTimeout { .. })
    ));
    let relaxed = QueryOptions::new().with_timeout(Duration::from_secs(30));
    assert_eq!(session.execute_update(&tree, &no_bindings(), &relaxed).unwrap(), 3);
}

#[test]
fn test_long_running_statement_is_interrupted() {
    let ctx = TestContext::new();
    let connection = SqliteConnection::open(&ctx.db_path).unwrap();
    let executor = StatementExecutor::new(&connection, ctx.factory.dialect());
    let operation = JdbcOperation {
        sql: "with recursive n(i) as (select 1 union all select i + 1 from n where i < 1000000000) select sum(i) from n"
            .to_string(),
        parameters: Vec::new(),
        affected_tables: Default::default(),
    };
    let options = StatementOptions {
        timeout: Some(Duration::from_millis(20)),
        fetch_size: None,
    };

    match executor.query_rows(&operation, &[], &options) {
        Err(Error::QueryTimeout { sql, .. }) => assert!(sql.unwrap().starts_with("with recursive")),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[test]
fn test_dirty_tracking() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let order = session.find("Order", 1i64).unwrap().unwrap();
    assert!(!session.is_dirty(&order));
    session.set_attribute(&order, "status", basic("shipped")).unwrap();
    assert!(session.is_dirty(&order));
}

#[test]
fn test_closed_factory_rejects_sessions() {
    let ctx = TestContext::new();
    ctx.factory.close();
    let connection = SqliteConnection::open(&ctx.db_path).unwrap();
    assert!(matches!(ctx.factory.open_session(Box::new(connection)), Err(Error::Closed)));
}
