//! Entities and collections being read by one row-processing pass.

use std::collections::HashMap;

use super::instance::{EntityInstance, EntityRef, PersistentCollection, PropertyValue};
use super::key::{CollectionKey, EntityKey};
use super::persistence_context::PersistenceContext;

/// An entity whose state is being read in the current pass.
#[derive(Debug, Clone)]
pub struct LoadingEntityEntry {
    pub key: EntityKey,
    pub instance: EntityRef,
    /// Concrete entity name.
    pub entity: String,
    /// Hydrated state, written to the instance when loading finishes.
    pub state: Vec<PropertyValue>,
}

/// Registry of in-flight loads for one row set.
///
/// Registration is idempotent, which is what stops circular fetch graphs
/// from recursing: the second encounter of a key gets the in-flight
/// instance back instead of starting another load.
#[derive(Debug, Default)]
pub struct LoadContexts {
    entities: HashMap<EntityKey, LoadingEntityEntry>,
    entity_order: Vec<EntityKey>,
    collections: HashMap<CollectionKey, PersistentCollection>,
    collection_order: Vec<CollectionKey>,
}

impl LoadContexts {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` as loading. Returns the in-flight instance and whether
    /// this call registered it. An uninitialized instance already known to
    /// the persistence context is reused so that existing references stay
    /// valid.
    pub fn register_loading_entity(
        &mut self,
        key: &EntityKey,
        entity: &str,
        context: &PersistenceContext,
    ) -> (EntityRef, bool) {
        if let Some(entry) = self.entities.get(key) {
            return (entry.instance.clone(), false);
        }
        let instance = context
            .get(key)
            .unwrap_or_else(|| EntityInstance::placeholder(entity, key.clone()).into_ref());
        self.entities.insert(
            key.clone(),
            LoadingEntityEntry {
                key: key.clone(),
                instance: instance.clone(),
                entity: entity.to_string(),
                state: Vec::new(),
            },
        );
        self.entity_order.push(key.clone());
        (instance, true)
    }

    /// In-flight entry for `key`.
    pub fn loading_entity(&self, key: &EntityKey) -> Option<&LoadingEntityEntry> {
        self.entities.get(key)
    }

    /// Store the hydrated state of a loading entity.
    pub fn set_state(&mut self, key: &EntityKey, state: Vec<PropertyValue>) {
        if let Some(entry) = self.entities.get_mut(key) {
            entry.state = state;
        }
    }

    /// Register `key` as loading and return it for element accumulation.
    /// Returns `None` when the persistence context already holds the
    /// collection fully initialized.
    pub fn register_loading_collection(
        &mut self,
        key: &CollectionKey,
        context: &PersistenceContext,
    ) -> Option<&mut PersistentCollection> {
        if !self.collections.contains_key(key) {
            if context.collection(key).is_some_and(|c| c.initialized) {
                return None;
            }
            self.collections
                .insert(key.clone(), PersistentCollection::uninitialized(key.clone()));
            self.collection_order.push(key.clone());
        }
        self.collections.get_mut(key)
    }

    /// Whether `key` is being read in this pass.
    pub fn is_loading_collection(&self, key: &CollectionKey) -> bool {
        self.collections.contains_key(key)
    }

    /// Number of loading entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of loading collections.
    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    /// Take every entry in registration order.
    pub fn drain(mut self) -> (Vec<LoadingEntityEntry>, Vec<PersistentCollection>) {
        let entities = self
            .entity_order
            .iter()
            .filter_map(|key| self.entities.remove(key))
            .collect();
        let collections = self
            .collection_order
            .iter()
            .filter_map(|key| self.collections.remove(key))
            .collect();
        (entities, collections)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::context::instance::CollectionElement;

    #[test]
    fn test_register_loading_entity_is_idempotent() {
        let context = PersistenceContext::new();
        let mut loading = LoadContexts::new();
        let key = EntityKey::new("Order", 1);

        let (first, created) = loading.register_loading_entity(&key, "Order", &context);
        assert!(created);
        let (second, created) = loading.register_loading_entity(&key, "Order", &context);
        assert!(!created);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(loading.entity_count(), 1);
        assert_eq!(context.entity_count(), 0);
    }

    #[test]
    fn test_reuses_known_placeholder() {
        let mut context = PersistenceContext::new();
        let key = EntityKey::new("Customer", 3);
        let placeholder = context.add_uninitialized(&key, "Customer");

        let mut loading = LoadContexts::new();
        let (instance, _) = loading.register_loading_entity(&key, "VipCustomer", &context);
        assert!(Rc::ptr_eq(&placeholder, &instance));
        assert_eq!(loading.loading_entity(&key).unwrap().entity, "VipCustomer");
    }

    #[test]
    fn test_initialized_collection_is_not_reloaded() {
        let mut context = PersistenceContext::new();
        let key = CollectionKey::new("Order.lines", EntityKey::new("Order", 1));
        let mut loaded = PersistentCollection::uninitialized(key.clone());
        loaded.initialized = true;
        context.add_collection(loaded);

        let mut loading = LoadContexts::new();
        assert!(loading.register_loading_collection(&key, &context).is_none());

        let other = CollectionKey::new("Order.lines", EntityKey::new("Order", 2));
        loading
            .register_loading_collection(&other, &context)
            .unwrap()
            .add(CollectionElement::Entity(EntityKey::new("Line", 1)));
        loading
            .register_loading_collection(&other, &context)
            .unwrap()
            .add(CollectionElement::Entity(EntityKey::new("Line", 1)));
        let (_, collections) = loading.drain();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].elements.len(), 1);
    }
}
