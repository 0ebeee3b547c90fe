//! Session factory and sessions.
//!
//! A [`SessionFactory`] is built once from a metamodel and owns everything
//! shared across sessions: the dialect, the statement cache and the key
//! loaders. A [`Session`] wraps one connection and one persistence context
//! and is confined to a single thread.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use orql_proto::{
    InternalFetchProfile, LoadQueryInfluencers, QueryOptions, QueryParameterBindings, QueryTree, Value,
};
use tracing::{debug, info, instrument};

use crate::cache::{StatementCache, StatementKey};
use crate::compile::{CachingPolicy, CompiledQuery, PreparedMutation, PreparedSelect, QueryCompiler};
use crate::config::SessionFactoryConfig;
use crate::context::{
    CollectionElement, CollectionKey, EntityKey, EntityRef, IdValue, LoadEventListener, NoopLoadListener,
    PersistenceContext, PropertyValue,
};
use crate::error::Error;
use crate::exec::{Connection, StatementExecutor, StatementOptions};
use crate::loader::{load_options, CollectionLoader, SingleIdEntityLoader, UniqueKeyLoader};
use crate::metamodel::Metamodel;
use crate::render::{render_bucket, AnsiDialect, Dialect, ExecutionContext, MultiTableOperations};
use crate::results::{page, PendingLoads, QueryRow, ResultAssembler, ResultValue};

/// Identifiers bound per `key in (...)` statement of a multi-table mutation.
const MAX_IDS_PER_STATEMENT: usize = 500;

/// Builder for [`SessionFactory`].
pub struct SessionFactoryBuilder {
    model: Metamodel,
    dialect: Box<dyn Dialect>,
    config: SessionFactoryConfig,
    listener: Arc<dyn LoadEventListener>,
}

impl SessionFactoryBuilder {
    /// Set the SQL dialect. Defaults to [`AnsiDialect`].
    pub fn dialect(mut self, dialect: Box<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn config(mut self, config: SessionFactoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the listener notified around every entity load.
    pub fn listener(mut self, listener: Arc<dyn LoadEventListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Build the factory and its loaders.
    pub fn build(self) -> Result<SessionFactory, Error> {
        let mut single_id = HashMap::new();
        let mut unique_keys = HashMap::new();
        let mut collections = HashMap::new();
        for mapping in self.model.entities() {
            single_id.insert(mapping.name.clone(), SingleIdEntityLoader::new(mapping));
            for attribute in &mapping.attributes {
                if attribute.def.is_unique_key() {
                    unique_keys.insert(
                        (mapping.name.clone(), attribute.name().to_string()),
                        UniqueKeyLoader::new(mapping, attribute.name())?,
                    );
                }
                if attribute.def.is_collection() && attribute.declaring == mapping.name {
                    collections.insert(attribute.role(), CollectionLoader::new(mapping, attribute)?);
                }
            }
        }

        info!(
            entities = single_id.len(),
            collections = collections.len(),
            dialect = self.dialect.name(),
            statement_cache_size = self.config.statement_cache_size,
            "Session factory built"
        );
        Ok(SessionFactory {
            cache: StatementCache::new(self.config.statement_cache_size),
            model: self.model,
            dialect: self.dialect,
            config: self.config,
            listener: self.listener,
            single_id,
            unique_keys,
            collections,
            closed: AtomicBool::new(false),
        })
    }
}

/// Process-wide entry point: metamodel, dialect, statement cache and loaders.
///
/// Shared by reference between threads; sessions borrow it.
pub struct SessionFactory {
    model: Metamodel,
    dialect: Box<dyn Dialect>,
    config: SessionFactoryConfig,
    listener: Arc<dyn LoadEventListener>,
    cache: StatementCache,
    single_id: HashMap<String, SingleIdEntityLoader>,
    unique_keys: HashMap<(String, String), UniqueKeyLoader>,
    collections: HashMap<String, CollectionLoader>,
    closed: AtomicBool,
}

impl SessionFactory {
    /// Start building a factory over `model`.
    pub fn builder(model: Metamodel) -> SessionFactoryBuilder {
        SessionFactoryBuilder {
            model,
            dialect: Box::new(AnsiDialect),
            config: SessionFactoryConfig::default(),
            listener: Arc::new(NoopLoadListener),
        }
    }

    pub fn model(&self) -> &Metamodel {
        &self.model
    }

    pub fn config(&self) -> &SessionFactoryConfig {
        &self.config
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn statement_cache(&self) -> &StatementCache {
        &self.cache
    }

    /// A compiler over this factory's model and dialect.
    pub fn compiler(&self) -> QueryCompiler<'_> {
        QueryCompiler::new(&self.model, &self.config, self.dialect.as_ref())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the factory. Cached statements are dropped and every further
    /// operation fails with [`Error::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let stats = self.cache.stats();
        info!(
            cached = self.cache.len(),
            hits = stats.hits(),
            misses = stats.misses(),
            "Session factory closed"
        );
        self.cache.clear();
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Open a session over `connection`.
    pub fn open_session(&self, connection: Box<dyn Connection>) -> Result<Session<'_>, Error> {
        self.ensure_open()?;
        Ok(Session {
            factory: self,
            connection,
            context: PersistenceContext::new(),
            influencers: LoadQueryInfluencers::new(),
        })
    }

    /// Compile and render `tree`, sharing the result through the statement
    /// cache when the execution allows it.
    #[instrument(skip_all, fields(statement = tree.statement.kind()))]
    pub fn compile(
        &self,
        tree: &QueryTree,
        options: &QueryOptions,
        influencers: &LoadQueryInfluencers,
    ) -> Result<Arc<CompiledQuery>, Error> {
        self.ensure_open()?;
        let compiler = self.compiler();
        let policy = CachingPolicy::resolve(options, influencers);
        if !policy.is_cacheable() {
            debug!(?policy, "Statement cache bypassed");
            return compiler.prepare(tree, options, influencers).map(Arc::new);
        }
        let key = StatementKey::new(tree, options, influencers)?;
        self.cache
            .get_or_insert_with(key, || compiler.prepare(tree, options, influencers))
    }

    /// Rendered SQL of every statement `tree` executes.
    pub fn explain(
        &self,
        tree: &QueryTree,
        options: &QueryOptions,
        influencers: &LoadQueryInfluencers,
    ) -> Result<Vec<String>, Error> {
        self.compile(tree, options, influencers)?.sql(self.dialect())
    }

    pub fn single_id_loader(&self, entity: &str) -> Result<&SingleIdEntityLoader, Error> {
        self.single_id
            .get(entity)
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))
    }

    pub fn unique_key_loader(&self, entity: &str, attribute: &str) -> Result<&UniqueKeyLoader, Error> {
        self.unique_keys
            .get(&(entity.to_string(), attribute.to_string()))
            .ok_or_else(|| Error::Mapping(format!("'{}.{}' is not a unique key", entity, attribute)))
    }

    pub fn collection_loader(&self, role: &str) -> Result<&CollectionLoader, Error> {
        self.collections
            .get(role)
            .ok_or_else(|| Error::Mapping(format!("unknown collection role '{}'", role)))
    }

    fn statement_options(&self, options: &QueryOptions) -> StatementOptions {
        StatementOptions {
            timeout: options.timeout.or(self.config.default_timeout),
            fetch_size: options.fetch_size.or(self.config.default_fetch_size),
        }
    }

    fn executor<'c>(&'c self, connection: &'c dyn Connection) -> StatementExecutor<'c> {
        StatementExecutor::new(connection, self.dialect.as_ref()).with_log_sql(self.config.log_sql)
    }
}

/// A unit of work: one connection, one persistence context and the
/// session's enabled filters and fetch profiles.
pub struct Session<'f> {
    factory: &'f SessionFactory,
    connection: Box<dyn Connection>,
    context: PersistenceContext,
    influencers: LoadQueryInfluencers,
}

impl<'f> Session<'f> {
    pub fn factory(&self) -> &'f SessionFactory {
        self.factory
    }

    pub fn persistence_context(&self) -> &PersistenceContext {
        &self.context
    }

    pub fn influencers(&self) -> &LoadQueryInfluencers {
        &self.influencers
    }

    /// Whether an instance is managed for `key`.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.context.contains(key)
    }

    /// Detach every managed instance.
    pub fn clear(&mut self) {
        self.context.clear();
    }

    /// Enable a filter; parameter values go into the returned map.
    pub fn enable_filter(&mut self, name: &str) -> Result<&mut BTreeMap<String, Value>, Error> {
        if self.factory.model.filter(name).is_none() {
            return Err(Error::UnknownFilter(name.to_string()));
        }
        Ok(self.influencers.enable_filter(name))
    }

    pub fn disable_filter(&mut self, name: &str) {
        self.influencers.disable_filter(name);
    }

    pub fn enable_fetch_profile(&mut self, name: &str) -> Result<(), Error> {
        if self.factory.model.fetch_profile(name).is_none() {
            return Err(Error::UnknownFetchProfile(name.to_string()));
        }
        self.influencers.enabled_fetch_profiles.insert(name.to_string());
        Ok(())
    }

    pub fn disable_fetch_profile(&mut self, name: &str) {
        self.influencers.enabled_fetch_profiles.remove(name);
    }

    pub fn set_internal_fetch_profile(&mut self, profile: Option<InternalFetchProfile>) {
        self.influencers.internal_fetch_profile = profile;
    }

    /// Compile `tree` under this session's influencers.
    pub fn compile(&self, tree: &QueryTree, options: &QueryOptions) -> Result<Arc<CompiledQuery>, Error> {
        self.factory.compile(tree, options, &self.influencers)
    }

    /// Run a select, returning one row per result.
    ///
    /// Polymorphic queries run one statement per implementor and concatenate
    /// the results; paging then applies to the concatenation.
    #[instrument(skip_all, fields(statement = tree.statement.kind()))]
    pub fn list(
        &mut self,
        tree: &QueryTree,
        bindings: &QueryParameterBindings,
        options: &QueryOptions,
    ) -> Result<Vec<QueryRow>, Error> {
        let compiled = self.compile(tree, options)?;
        let CompiledQuery::Select(selects) = compiled.as_ref() else {
            return Err(Error::IllegalQueryOperation(format!(
                "cannot list a {} statement",
                tree.statement.kind()
            )));
        };

        let window = options.limit;
        let split_paging = selects.len() > 1 && !window.is_empty();
        let statement_options = if split_paging {
            let mut widened = options.clone();
            widened.limit.first_result = Some(0);
            widened.limit.max_results = window
                .max_results
                .map(|max| max.saturating_add(window.first_result.unwrap_or(0)));
            widened
        } else {
            options.clone()
        };

        let mut rows = Vec::new();
        for select in selects {
            for values in self.execute_select(select, bindings, &statement_options)? {
                rows.push(QueryRow::from_values(values, &select.mapping.aliases, options.tuple_transformer));
            }
        }
        if split_paging {
            rows = page(
                rows,
                window.first_result.unwrap_or(0) as usize,
                window.max_results.map(|max| max as usize),
            );
        }
        Ok(rows)
    }

    /// Run an update or delete, returning the number of affected rows.
    pub fn execute_update(
        &mut self,
        tree: &QueryTree,
        bindings: &QueryParameterBindings,
        options: &QueryOptions,
    ) -> Result<u64, Error> {
        self.execute_update_batch(tree, std::slice::from_ref(bindings), options)
    }

    /// Run an update or delete once per parameter set, summing affected
    /// rows. Every statement runs under the options' timeout, or the
    /// factory default.
    ///
    /// A mutation spanning several tables counts the identifiers its
    /// selection matched, not the rows touched in each table.
    #[instrument(skip_all, fields(statement = tree.statement.kind(), batch = batch.len()))]
    pub fn execute_update_batch(
        &mut self,
        tree: &QueryTree,
        batch: &[QueryParameterBindings],
        options: &QueryOptions,
    ) -> Result<u64, Error> {
        let factory = self.factory;
        let compiled = self.compile(tree, options)?;
        let CompiledQuery::Mutation(mutations) = compiled.as_ref() else {
            return Err(Error::IllegalQueryOperation(
                "cannot execute a select statement as an update".to_string(),
            ));
        };

        let executor = factory.executor(self.connection.as_ref());
        let statement_options = factory.statement_options(options);
        let mut total = 0;
        for mutation in mutations {
            match mutation {
                PreparedMutation::Single(operation) => {
                    let values = batch
                        .iter()
                        .map(|bindings| {
                            operation.bind_values(&ExecutionContext {
                                bindings,
                                influencers: &self.influencers,
                                options,
                            })
                        })
                        .collect::<Result<Vec<_>, Error>>()?;
                    total += executor.execute_batch(operation, &values, &statement_options)?;
                }
                PreparedMutation::MultiTable(operations) => {
                    for bindings in batch {
                        let context = ExecutionContext {
                            bindings,
                            influencers: &self.influencers,
                            options,
                        };
                        total += execute_multi_table(
                            &executor,
                            factory.dialect(),
                            operations,
                            &context,
                            &statement_options,
                        )?;
                    }
                }
            }
        }
        Ok(total)
    }

    /// Load an entity by identifier.
    pub fn find(&mut self, entity: &str, id: impl Into<IdValue>) -> Result<Option<EntityRef>, Error> {
        self.find_with(entity, id, &QueryOptions::new())
    }

    /// Load an entity by identifier under a lock mode or entity graph.
    ///
    /// A managed, initialized instance is returned without a statement
    /// unless a stronger lock or an entity graph is requested. Instances of
    /// a type outside `entity`'s hierarchy branch come back as `None`.
    #[instrument(skip(self, id, options))]
    pub fn find_with(
        &mut self,
        entity: &str,
        id: impl Into<IdValue>,
        options: &QueryOptions,
    ) -> Result<Option<EntityRef>, Error> {
        let factory = self.factory;
        factory.ensure_open()?;
        let model = &factory.model;
        let id = id.into();
        let key = EntityKey::new(model.root_of(entity)?.name.clone(), id.clone());

        if let Some(entry) = self.context.entry(&key) {
            let (initialized, concrete) = {
                let instance = entry.instance.borrow();
                (instance.initialized, instance.entity.clone())
            };
            if initialized && options.lock_mode <= entry.lock_mode && options.entity_graph.is_none() {
                debug!(key = %key, "Entity found in persistence context");
                return Ok(model.is_subtype_of(&concrete, entity).then(|| entry.instance.clone()));
            }
        }

        let found = self.load_by_id(entity, &id, &load_options(options))?;
        Ok(found.filter(|instance| model.is_subtype_of(&instance.borrow().entity, entity)))
    }

    /// Load an entity by a unique attribute value.
    #[instrument(skip(self, value))]
    pub fn find_by_unique_key(
        &mut self,
        entity: &str,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<Option<EntityRef>, Error> {
        let factory = self.factory;
        factory.ensure_open()?;
        let loader = factory.unique_key_loader(entity, attribute)?;
        let value = value.into();
        let Some(unique) = loader.unique_key(&value)? else {
            return Ok(None);
        };
        if let Some(existing) = self.context.get_by_unique_key(&unique) {
            if existing.borrow().initialized {
                return Ok(Some(existing));
            }
        }

        let options = QueryOptions::new();
        let statement = loader.statement(&factory.compiler(), &options, &self.influencers)?;
        let rows = self.execute_select(&statement, &loader.bindings(value), &options)?;
        let found = first_entity(rows);
        if let Some(instance) = &found {
            let key = instance.borrow().key.clone();
            self.context.register_unique_key(unique, key);
        }
        Ok(found)
    }

    /// Initialize an uninitialized placeholder.
    pub fn initialize(&mut self, instance: &EntityRef) -> Result<(), Error> {
        let (initialized, entity, key) = {
            let instance = instance.borrow();
            (instance.initialized, instance.entity.clone(), instance.key.clone())
        };
        if initialized {
            return Ok(());
        }
        match self.load_by_id(&entity, &key.id, &QueryOptions::new())? {
            Some(_) => Ok(()),
            None => Err(Error::ObjectNotFound(key.to_string())),
        }
    }

    /// Read an uninitialized collection.
    pub fn initialize_collection(&mut self, key: &CollectionKey) -> Result<(), Error> {
        if self.context.collection(key).is_some_and(|c| c.initialized) {
            return Ok(());
        }
        let factory = self.factory;
        let loader = factory.collection_loader(&key.role)?;
        let statement = loader.statement(&factory.compiler(), &self.influencers)?;
        let bindings = QueryParameterBindings::new().with_positional(1, key.owner.id.to_value());
        self.execute_select(&statement, &bindings, &QueryOptions::new())?;
        if self.context.collection(key).is_some_and(|c| c.initialized) {
            Ok(())
        } else {
            Err(Error::ObjectNotFound(key.owner.to_string()))
        }
    }

    /// State slot `name` of `instance`, initializing it first.
    pub fn attribute(&mut self, instance: &EntityRef, name: &str) -> Result<PropertyValue, Error> {
        self.initialize(instance)?;
        let index = self.attribute_index(instance, name)?;
        let value = instance.borrow().state.get(index).cloned();
        value.ok_or_else(|| Error::unresolved(instance.borrow().entity.clone(), name))
    }

    /// Target of a to-one association; lazy targets come back uninitialized.
    pub fn association(&mut self, instance: &EntityRef, name: &str) -> Result<Option<EntityRef>, Error> {
        match self.attribute(instance, name)? {
            PropertyValue::Entity(key) => Ok(self.context.get(&key)),
            PropertyValue::Null => Ok(None),
            other => Err(Error::TypeMismatch {
                expected: "to-one association".to_string(),
                found: format!("{:?}", other),
            }),
        }
    }

    /// Elements of a collection, initializing it if needed.
    pub fn collection(&mut self, instance: &EntityRef, name: &str) -> Result<Vec<CollectionElement>, Error> {
        let key = match self.attribute(instance, name)? {
            PropertyValue::Collection(key) => key,
            other => {
                return Err(Error::TypeMismatch {
                    expected: "collection".to_string(),
                    found: format!("{:?}", other),
                })
            }
        };
        self.initialize_collection(&key)?;
        Ok(self
            .context
            .collection(&key)
            .map(|collection| collection.elements.clone())
            .unwrap_or_default())
    }

    /// Entity elements of a collection as managed instances.
    pub fn collection_entities(&mut self, instance: &EntityRef, name: &str) -> Result<Vec<EntityRef>, Error> {
        let elements = self.collection(instance, name)?;
        Ok(elements
            .iter()
            .filter_map(|element| match element {
                CollectionElement::Entity(key) => self.context.get(key),
                CollectionElement::Value(_) => None,
            })
            .collect())
    }

    /// Change state slot `name` of `instance`.
    pub fn set_attribute(&mut self, instance: &EntityRef, name: &str, value: PropertyValue) -> Result<(), Error> {
        self.initialize(instance)?;
        let index = self.attribute_index(instance, name)?;
        let mut instance = instance.borrow_mut();
        match instance.state.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::unresolved(instance.entity.clone(), name)),
        }
    }

    /// Whether `instance` differs from the state it was loaded with.
    pub fn is_dirty(&self, instance: &EntityRef) -> bool {
        self.context.is_dirty(&instance.borrow().key)
    }

    fn attribute_index(&self, instance: &EntityRef, name: &str) -> Result<usize, Error> {
        let entity = instance.borrow().entity.clone();
        self.factory
            .model
            .entity(&entity)?
            .attribute_index(name)
            .ok_or_else(|| Error::unresolved(entity, name))
    }

    fn load_by_id(&mut self, entity: &str, id: &IdValue, options: &QueryOptions) -> Result<Option<EntityRef>, Error> {
        let factory = self.factory;
        let loader = factory.single_id_loader(entity)?;
        let statement = loader.statement(&factory.compiler(), options, &self.influencers)?;
        let rows = self.execute_select(&statement, &loader.bindings(id), options)?;
        Ok(first_entity(rows))
    }

    /// Execute one select and assemble its rows, then run the subsequent
    /// loads its eager select fetches require.
    fn execute_select(
        &mut self,
        prepared: &PreparedSelect,
        bindings: &QueryParameterBindings,
        options: &QueryOptions,
    ) -> Result<Vec<Vec<ResultValue>>, Error> {
        let factory = self.factory;
        let context = ExecutionContext {
            bindings,
            influencers: &self.influencers,
            options,
        };
        let values = prepared.operation.bind_values(&context)?;
        let window = prepared
            .in_memory_paging
            .as_ref()
            .map(|paging| paging.resolve(&context))
            .transpose()?;

        let executor = factory.executor(self.connection.as_ref());
        let mut assembler = ResultAssembler::new(
            &factory.model,
            &prepared.mapping,
            &mut self.context,
            factory.listener.as_ref(),
        )
        .with_lock_mode(options.lock_mode)
        .with_read_only(options.read_only);
        executor.execute_query(
            &prepared.operation,
            &values,
            &factory.statement_options(options),
            &mut |row| assembler.process_row(row),
        )?;
        let assembled = assembler.finish()?;

        let rows = match window {
            Some((offset, limit)) => page(assembled.rows, offset, limit),
            None => assembled.rows,
        };
        self.load_pending(assembled.pending, options)?;
        Ok(rows)
    }

    fn load_pending(&mut self, pending: PendingLoads, options: &QueryOptions) -> Result<(), Error> {
        if pending.is_empty() {
            return Ok(());
        }
        debug!(
            entities = pending.entities.len(),
            collections = pending.collections.len(),
            "Running subsequent loads"
        );
        let subsequent = QueryOptions {
            timeout: options.timeout,
            fetch_size: options.fetch_size,
            read_only: options.read_only,
            ..QueryOptions::default()
        };
        for (entity, key) in pending.entities {
            if self.context.get(&key).is_some_and(|i| i.borrow().initialized) {
                continue;
            }
            if self.load_by_id(&entity, &key.id, &subsequent)?.is_none() {
                debug!(key = %key, "Eager association target not found");
            }
        }
        for key in pending.collections {
            self.initialize_collection(&key)?;
        }
        Ok(())
    }
}

fn first_entity(rows: Vec<Vec<ResultValue>>) -> Option<EntityRef> {
    rows.into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .and_then(|value| value.as_entity().cloned())
}

/// Select the identifiers once, then run every table bucket restricted to
/// them. Returns the number of identifiers.
fn execute_multi_table(
    executor: &StatementExecutor<'_>,
    dialect: &dyn Dialect,
    operations: &MultiTableOperations,
    context: &ExecutionContext<'_>,
    options: &StatementOptions,
) -> Result<u64, Error> {
    let values = operations.id_select.bind_values(context)?;
    let ids: Vec<Value> = executor
        .query_rows(&operations.id_select, &values, options)?
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .collect();
    if ids.is_empty() {
        return Ok(0);
    }
    debug!(ids = ids.len(), tables = operations.buckets.len(), "Multi-table mutation");
    for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
        for bucket in &operations.buckets {
            let operation = render_bucket(dialect, bucket, chunk)?;
            let values = operation.bind_values(context)?;
            executor.execute_update(&operation, &values, options)?;
        }
    }
    Ok(ids.len() as u64)
}
