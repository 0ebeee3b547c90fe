//! The identity map.

use std::collections::HashMap;
use std::rc::Rc;

use orql_proto::LockMode;
use tracing::debug;

use super::instance::{EntityInstance, EntityRef, PersistentCollection, PropertyValue};
use super::key::{CollectionKey, EntityKey, UniqueKey};
use crate::error::Error;

/// Registration of a managed entity.
#[derive(Debug, Clone)]
pub struct EntityEntry {
    pub instance: EntityRef,
    /// State as last read from the database; `None` until loaded.
    pub loaded_state: Option<Vec<PropertyValue>>,
    pub lock_mode: LockMode,
}

/// Session-scoped registry holding the single canonical instance of every
/// loaded entity and collection.
///
/// Not thread safe; owned by one session.
#[derive(Debug, Default)]
pub struct PersistenceContext {
    entities: HashMap<EntityKey, EntityEntry>,
    collections: HashMap<CollectionKey, PersistentCollection>,
    unique_keys: HashMap<UniqueKey, EntityKey>,
}

impl PersistenceContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical instance for `key`.
    pub fn get(&self, key: &EntityKey) -> Option<EntityRef> {
        self.entities.get(key).map(|entry| entry.instance.clone())
    }

    /// Entry for `key`.
    pub fn entry(&self, key: &EntityKey) -> Option<&EntityEntry> {
        self.entities.get(key)
    }

    /// Whether an instance is registered for `key`.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Register an instance. Registering the canonical instance again is a
    /// no-op; registering a different instance for a known key fails.
    pub fn add_entity(&mut self, instance: EntityRef) -> Result<(), Error> {
        let key = instance.borrow().key.clone();
        if let Some(existing) = self.entities.get(&key) {
            if Rc::ptr_eq(&existing.instance, &instance) {
                return Ok(());
            }
            return Err(Error::NonUniqueObject(key.to_string()));
        }
        let lock_mode = instance.borrow().lock_mode;
        self.entities.insert(
            key,
            EntityEntry {
                instance,
                loaded_state: None,
                lock_mode,
            },
        );
        Ok(())
    }

    /// The instance for `key`, creating an uninitialized placeholder of
    /// `entity` when none is registered.
    pub fn add_uninitialized(&mut self, key: &EntityKey, entity: &str) -> EntityRef {
        if let Some(entry) = self.entities.get(key) {
            return entry.instance.clone();
        }
        let placeholder = EntityInstance::placeholder(entity, key.clone()).into_ref();
        self.entities.insert(
            key.clone(),
            EntityEntry {
                instance: placeholder.clone(),
                loaded_state: None,
                lock_mode: LockMode::None,
            },
        );
        placeholder
    }

    /// Record the freshly read state of `key` as its dirty-check snapshot.
    pub fn mark_loaded(&mut self, key: &EntityKey, lock_mode: LockMode) {
        if let Some(entry) = self.entities.get_mut(key) {
            let state = entry.instance.borrow().state.clone();
            entry.loaded_state = Some(state);
            entry.lock_mode = lock_mode;
        }
    }

    /// Raise the recorded lock mode of `key` to `lock_mode` if it is
    /// stronger.
    pub fn upgrade_lock(&mut self, key: &EntityKey, lock_mode: LockMode) {
        if let Some(entry) = self.entities.get_mut(key) {
            if lock_mode > entry.lock_mode {
                entry.lock_mode = lock_mode;
                entry.instance.borrow_mut().lock_mode = lock_mode;
            }
        }
    }

    /// Whether the instance differs from its loaded snapshot.
    pub fn is_dirty(&self, key: &EntityKey) -> bool {
        match self.entities.get(key) {
            Some(EntityEntry {
                instance,
                loaded_state: Some(snapshot),
                ..
            }) => instance.borrow().state != *snapshot,
            _ => false,
        }
    }

    /// Number of managed entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Managed collection.
    pub fn collection(&self, key: &CollectionKey) -> Option<&PersistentCollection> {
        self.collections.get(key)
    }

    /// Managed collection, mutable.
    pub fn collection_mut(&mut self, key: &CollectionKey) -> Option<&mut PersistentCollection> {
        self.collections.get_mut(key)
    }

    /// The collection for `key`, registering an uninitialized one if absent.
    pub fn collection_or_uninitialized(&mut self, key: &CollectionKey) -> &mut PersistentCollection {
        self.collections
            .entry(key.clone())
            .or_insert_with(|| PersistentCollection::uninitialized(key.clone()))
    }

    /// Replace a collection with a fully read one.
    pub fn add_collection(&mut self, collection: PersistentCollection) {
        self.collections.insert(collection.key.clone(), collection);
    }

    /// Number of managed collections.
    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    /// Index an entity by a unique key.
    pub fn register_unique_key(&mut self, unique: UniqueKey, key: EntityKey) {
        self.unique_keys.insert(unique, key);
    }

    /// Entity indexed under a unique key.
    pub fn get_by_unique_key(&self, unique: &UniqueKey) -> Option<EntityRef> {
        self.unique_keys.get(unique).and_then(|key| self.get(key))
    }

    /// Drop every managed instance.
    pub fn clear(&mut self) {
        debug!(
            entities = self.entities.len(),
            collections = self.collections.len(),
            "Persistence context cleared"
        );
        self.entities.clear();
        self.collections.clear();
        self.unique_keys.clear();
    }
}
