//! Row-to-object-graph assembly.
//!
//! Each row is processed top-down: an entity is registered as loading before
//! its state is hydrated, hydration reads plain state before resolving
//! associations, and nothing becomes visible in the persistence context until
//! [`ResultAssembler::finish`] runs after the last row.

use std::collections::HashSet;
use std::rc::Rc;

use orql_proto::{LockMode, Value};
use tracing::debug;

use super::mapping::{
    CollectionElementResult, ComponentFetch, DomainResult, EmbeddableFetch, EntityResult, Fetch,
    FetchKind, ResultSetMapping, SubtypeReader,
};
use super::row::ResultValue;
use crate::context::{
    CollectionElement, CollectionKey, EntityKey, EntityRef, IdValue, LoadContexts,
    LoadEventListener, PersistenceContext, PropertyValue,
};
use crate::error::Error;
use crate::metamodel::{Metamodel, ScalarType};

/// Loads that have to run as subsequent selects once the row set is read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingLoads {
    /// Declared entity type and key of eager associations.
    pub entities: Vec<(String, EntityKey)>,
    pub collections: Vec<CollectionKey>,
}

impl PendingLoads {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.collections.is_empty()
    }

    fn push_entity(&mut self, entity: &str, key: &EntityKey) {
        if !self.entities.iter().any(|(_, k)| k == key) {
            self.entities.push((entity.to_string(), key.clone()));
        }
    }

    fn push_collection(&mut self, key: &CollectionKey) {
        if !self.collections.contains(key) {
            self.collections.push(key.clone());
        }
    }
}

/// Output of one assembled row set.
#[derive(Debug)]
pub struct AssembledRows {
    pub rows: Vec<Vec<ResultValue>>,
    pub pending: PendingLoads,
}

/// Turns raw rows into managed instances.
pub struct ResultAssembler<'a> {
    model: &'a Metamodel,
    mapping: &'a ResultSetMapping,
    context: &'a mut PersistenceContext,
    listener: &'a dyn LoadEventListener,
    lock_mode: LockMode,
    read_only: bool,
    loading: LoadContexts,
    existing: Vec<EntityKey>,
    rows: Vec<Vec<ResultValue>>,
    pending: PendingLoads,
}

impl<'a> ResultAssembler<'a> {
    /// Create an assembler writing into `context`.
    pub fn new(
        model: &'a Metamodel,
        mapping: &'a ResultSetMapping,
        context: &'a mut PersistenceContext,
        listener: &'a dyn LoadEventListener,
    ) -> Self {
        Self {
            model,
            mapping,
            context,
            listener,
            lock_mode: LockMode::None,
            read_only: false,
            loading: LoadContexts::new(),
            existing: Vec::new(),
            rows: Vec::new(),
            pending: PendingLoads::default(),
        }
    }

    /// Lock mode recorded on every loaded instance.
    pub fn with_lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }

    /// Load instances read-only, without dirty-check snapshots.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Process one row.
    pub fn process_row(&mut self, row: Vec<Value>) -> Result<(), Error> {
        let mapping = self.mapping;
        let mut values = Vec::with_capacity(mapping.results.len());
        for result in &mapping.results {
            let value = match result {
                DomainResult::Basic { position, scalar } => {
                    let raw = column(&row, *position)?.clone();
                    let value = match scalar {
                        Some(scalar) => scalar.read(raw)?,
                        None => raw,
                    };
                    if value.is_null() {
                        ResultValue::Null
                    } else {
                        ResultValue::Scalar(value)
                    }
                }
                DomainResult::Embeddable(fetch) => match read_embeddable(fetch, &row)? {
                    PropertyValue::Null => ResultValue::Null,
                    component => ResultValue::Embeddable(component),
                },
                DomainResult::Entity(result) => match self.resolve_entity(result, &row)? {
                    Some((_, instance)) => ResultValue::Entity(instance),
                    // Outer-joined root without a row.
                    None if mapping.results.len() == 1 => return Ok(()),
                    None => ResultValue::Null,
                },
            };
            values.push(value);
        }
        self.rows.push(values);
        Ok(())
    }

    fn resolve_entity(&mut self, result: &EntityResult, row: &[Value]) -> Result<Option<(EntityKey, EntityRef)>, Error> {
        let raw = column(row, result.id_position)?.clone();
        let Some(id) = IdValue::from_value(&result.id_scalar.read(raw)?)? else {
            return Ok(None);
        };
        let key = EntityKey::new(result.root.clone(), id);

        if let Some(entry) = self.loading.loading_entity(&key) {
            let instance = entry.instance.clone();
            let concrete = entry.entity.clone();
            self.process_repeated_row(result, &concrete, &key, row)?;
            return Ok(Some((key, instance)));
        }
        if let Some(existing) = self.context.get(&key) {
            let (initialized, concrete) = {
                let instance = existing.borrow();
                (instance.initialized, instance.entity.clone())
            };
            if initialized {
                if !self.existing.contains(&key) {
                    self.existing.push(key.clone());
                }
                self.process_repeated_row(result, &concrete, &key, row)?;
                return Ok(Some((key, existing)));
            }
        }

        let concrete = self.concrete_type(result, row)?;
        let (instance, _) = self
            .loading
            .register_loading_entity(&key, &concrete, &*self.context);
        self.listener.pre_load(&concrete, &key);
        let state = self.hydrate(result, &concrete, &key, row)?;
        self.loading.set_state(&key, state);
        Ok(Some((key, instance)))
    }

    fn hydrate(
        &mut self,
        result: &EntityResult,
        concrete: &str,
        key: &EntityKey,
        row: &[Value],
    ) -> Result<Vec<PropertyValue>, Error> {
        let model = self.model;
        let mapping = model.entity(concrete)?;
        let mut state = vec![PropertyValue::Null; mapping.attributes.len()];

        let mut associations = Vec::new();
        for (index, attribute) in mapping.attributes.iter().enumerate() {
            let Some(fetch) = result.fetch(attribute.name()) else {
                continue;
            };
            match &fetch.kind {
                FetchKind::Basic { position, scalar } => {
                    state[index] = read_basic(row, *position, *scalar)?;
                }
                FetchKind::Embedded(embeddable) => {
                    state[index] = read_embeddable(embeddable, row)?;
                }
                _ => associations.push((index, fetch)),
            }
        }
        for (index, fetch) in associations {
            state[index] = self.resolve_association(fetch, key, row)?;
        }
        Ok(state)
    }

    fn resolve_association(&mut self, fetch: &Fetch, owner: &EntityKey, row: &[Value]) -> Result<PropertyValue, Error> {
        match &fetch.kind {
            FetchKind::Basic { position, scalar } => read_basic(row, *position, *scalar),
            FetchKind::Embedded(embeddable) => read_embeddable(embeddable, row),
            FetchKind::JoinedEntity {
                fk_position,
                optional,
                result,
            } => {
                let fk_is_null = column(row, *fk_position)?.is_null();
                match self.resolve_entity(result, row)? {
                    Some((key, _)) => Ok(PropertyValue::Entity(key)),
                    None if fk_is_null || *optional => Ok(PropertyValue::Null),
                    None => Err(Error::UnresolvableReference {
                        entity: result.entity.clone(),
                        attribute: fetch.attribute.clone(),
                        owner: owner.to_string(),
                    }),
                }
            }
            FetchKind::EntityKey {
                position,
                target,
                eager,
            } => {
                let root = self.model.root_of(target)?;
                let raw = root.identifier.scalar.read(column(row, *position)?.clone())?;
                let Some(id) = IdValue::from_value(&raw)? else {
                    return Ok(PropertyValue::Null);
                };
                let key = EntityKey::new(root.name.clone(), id);
                self.reference(&key, target, *eager);
                Ok(PropertyValue::Entity(key))
            }
            FetchKind::JoinedCollection { role, element } => {
                let key = CollectionKey::new(role.clone(), owner.clone());
                self.collect_element(&key, element, row)?;
                Ok(PropertyValue::Collection(key))
            }
            FetchKind::DelayedCollection { role, eager } => {
                let key = CollectionKey::new(role.clone(), owner.clone());
                if !self.loading.is_loading_collection(&key) {
                    let collection = self.context.collection_or_uninitialized(&key);
                    if *eager && !collection.initialized {
                        self.pending.push_collection(&key);
                    }
                }
                Ok(PropertyValue::Collection(key))
            }
            FetchKind::Any {
                meta_position,
                key_position,
                key_scalar,
                meta_values,
            } => {
                let meta = meta_text(column(row, *meta_position)?);
                let raw = key_scalar.read(column(row, *key_position)?.clone())?;
                let (Some(meta), Some(id)) = (meta, IdValue::from_value(&raw)?) else {
                    return Ok(PropertyValue::Null);
                };
                let entity = meta_values.get(&meta).ok_or_else(|| {
                    Error::Mapping(format!(
                        "unknown type '{}' in any-valued attribute '{}'",
                        meta, fetch.attribute
                    ))
                })?;
                let key = EntityKey::new(self.model.root_of(entity)?.name.clone(), id);
                self.reference(&key, entity, false);
                Ok(PropertyValue::Entity(key))
            }
        }
    }

    /// Resolve a key-only reference through the identity map, falling back
    /// to an uninitialized placeholder.
    fn reference(&mut self, key: &EntityKey, entity: &str, eager: bool) {
        if self.loading.loading_entity(key).is_some() {
            return;
        }
        let instance = self.context.add_uninitialized(key, entity);
        if eager && !instance.borrow().initialized {
            self.pending.push_entity(entity, key);
        }
    }

    fn collect_element(
        &mut self,
        key: &CollectionKey,
        element: &CollectionElementResult,
        row: &[Value],
    ) -> Result<(), Error> {
        let value = match element {
            CollectionElementResult::Entity(result) => self
                .resolve_entity(result, row)?
                .map(|(key, _)| CollectionElement::Entity(key)),
            CollectionElementResult::Value { position, scalar } => {
                let value = scalar.read(column(row, *position)?.clone())?;
                (!value.is_null()).then_some(CollectionElement::Value(value))
            }
        };
        if let Some(collection) = self.loading.register_loading_collection(key, &*self.context) {
            if let Some(value) = value {
                collection.add(value);
            }
        }
        Ok(())
    }

    /// A row repeating an entity already read: only joined collections and
    /// the entities below them can contribute anything new.
    fn process_repeated_row(
        &mut self,
        result: &EntityResult,
        concrete: &str,
        owner: &EntityKey,
        row: &[Value],
    ) -> Result<(), Error> {
        let model = self.model;
        let mapping = model.entity(concrete)?;
        for fetch in &result.fetches {
            if mapping.attribute(&fetch.attribute).is_none() {
                continue;
            }
            match &fetch.kind {
                FetchKind::JoinedCollection { role, element } => {
                    let key = CollectionKey::new(role.clone(), owner.clone());
                    self.collect_element(&key, element, row)?;
                }
                FetchKind::JoinedEntity { result, .. } => {
                    self.resolve_entity(result, row)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn concrete_type(&self, result: &EntityResult, row: &[Value]) -> Result<String, Error> {
        match &result.subtype {
            SubtypeReader::Fixed(entity) => Ok(entity.clone()),
            SubtypeReader::Discriminator {
                position,
                scalar,
                values,
            } => {
                let value = scalar.read(column(row, *position)?.clone())?;
                values
                    .iter()
                    .find(|(candidate, _)| scalar.read(candidate.clone()).ok().as_ref() == Some(&value))
                    .map(|(_, entity)| entity.clone())
                    .ok_or_else(|| {
                        Error::Mapping(format!(
                            "unknown discriminator value {:?} for '{}'",
                            value, result.entity
                        ))
                    })
            }
            SubtypeReader::SubclassKeys { keys, default } => {
                for (position, entity) in keys {
                    if !column(row, *position)?.is_null() {
                        return Ok(entity.clone());
                    }
                }
                Ok(default.clone())
            }
            SubtypeReader::UnionClass { position, values } => {
                let clazz = column(row, *position)?.as_i64();
                values
                    .iter()
                    .find(|(candidate, _)| Some(*candidate) == clazz)
                    .map(|(_, entity)| entity.clone())
                    .ok_or_else(|| {
                        Error::Mapping(format!("unknown union class {:?} for '{}'", clazz, result.entity))
                    })
            }
        }
    }

    /// Finish loading every entity and collection read, in registration
    /// order, and return the assembled rows.
    pub fn finish(self) -> Result<AssembledRows, Error> {
        let ResultAssembler {
            mapping,
            context,
            listener,
            lock_mode,
            read_only,
            loading,
            existing,
            rows,
            mut pending,
            ..
        } = self;

        let (entities, collections) = loading.drain();
        let collection_count = collections.len();
        for mut collection in collections {
            collection.initialized = true;
            context.add_collection(collection);
        }

        let entity_count = entities.len();
        for entry in entities {
            {
                let mut instance = entry.instance.borrow_mut();
                instance.entity = entry.entity;
                instance.state = entry.state;
                instance.initialized = true;
                instance.lock_mode = lock_mode;
                instance.read_only = read_only;
            }
            context.add_entity(entry.instance.clone())?;
            if read_only {
                context.upgrade_lock(&entry.key, lock_mode);
            } else {
                context.mark_loaded(&entry.key, lock_mode);
            }
            listener.post_load(&entry.instance.borrow());
        }
        for key in &existing {
            context.upgrade_lock(key, lock_mode);
        }

        pending
            .entities
            .retain(|(_, key)| !context.get(key).is_some_and(|i| i.borrow().initialized));
        pending
            .collections
            .retain(|key| !context.collection(key).is_some_and(|c| c.initialized));

        let rows = if mapping.collection_fetches && mapping.is_single_entity() {
            distinct_roots(rows)
        } else {
            rows
        };
        debug!(
            rows = rows.len(),
            entities = entity_count,
            collections = collection_count,
            "Result set assembled"
        );
        Ok(AssembledRows { rows, pending })
    }
}

fn distinct_roots(rows: Vec<Vec<ResultValue>>) -> Vec<Vec<ResultValue>> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| match row.first().and_then(ResultValue::as_entity) {
            Some(entity) => seen.insert(Rc::as_ptr(entity)),
            None => true,
        })
        .collect()
}

/// Skip `offset` rows and keep at most `limit`.
pub fn page<T>(rows: Vec<T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    let rows = rows.into_iter().skip(offset);
    match limit {
        Some(limit) => rows.take(limit).collect(),
        None => rows.collect(),
    }
}

fn column(row: &[Value], position: usize) -> Result<&Value, Error> {
    row.get(position).ok_or_else(|| {
        Error::SqlTree(format!(
            "row has {} columns, position {} requested",
            row.len(),
            position
        ))
    })
}

fn read_basic(row: &[Value], position: usize, scalar: ScalarType) -> Result<PropertyValue, Error> {
    let value = scalar.read(column(row, position)?.clone())?;
    Ok(if value.is_null() {
        PropertyValue::Null
    } else {
        PropertyValue::Basic(value)
    })
}

/// All-null embeddables read as null.
fn read_embeddable(fetch: &EmbeddableFetch, row: &[Value]) -> Result<PropertyValue, Error> {
    let mut components = Vec::with_capacity(fetch.components.len());
    for component in &fetch.components {
        components.push(match component {
            ComponentFetch::Basic { position, scalar } => read_basic(row, *position, *scalar)?,
            ComponentFetch::Embedded(nested) => read_embeddable(nested, row)?,
        });
    }
    if components.iter().all(PropertyValue::is_null) {
        return Ok(PropertyValue::Null);
    }
    Ok(PropertyValue::Component(components))
}

fn meta_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => other.as_i64().map(|i| i.to_string()),
    }
}
