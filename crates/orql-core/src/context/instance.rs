//! In-memory entity and collection state.

use std::cell::RefCell;
use std::rc::Rc;

use orql_proto::{LockMode, Value};

use super::key::{CollectionKey, EntityKey};

/// One slot of an entity's state array.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Basic(Value),
    /// Embeddable components in declaration order.
    Component(Vec<PropertyValue>),
    /// Reference to another entity, resolved through the persistence context.
    Entity(EntityKey),
    Collection(CollectionKey),
}

impl PropertyValue {
    /// Basic value, if this slot holds one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            PropertyValue::Basic(value) => Some(value),
            _ => None,
        }
    }

    /// Referenced entity, if any.
    pub fn as_entity(&self) -> Option<&EntityKey> {
        match self {
            PropertyValue::Entity(key) => Some(key),
            _ => None,
        }
    }

    /// Whether the slot is null.
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }
}

/// A managed entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInstance {
    /// Concrete entity name.
    pub entity: String,
    pub key: EntityKey,
    /// Values in the order of the entity's mapped attributes.
    pub state: Vec<PropertyValue>,
    /// `false` for placeholders whose state has not been read yet.
    pub initialized: bool,
    pub lock_mode: LockMode,
    pub read_only: bool,
}

/// Shared handle to a managed entity.
///
/// Associations refer to entities by key, so handles never form cycles.
pub type EntityRef = Rc<RefCell<EntityInstance>>;

impl EntityInstance {
    /// An uninitialized placeholder.
    pub fn placeholder(entity: impl Into<String>, key: EntityKey) -> Self {
        Self {
            entity: entity.into(),
            key,
            state: Vec::new(),
            initialized: false,
            lock_mode: LockMode::None,
            read_only: false,
        }
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> EntityRef {
        Rc::new(RefCell::new(self))
    }
}

/// An element of a managed collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionElement {
    Entity(EntityKey),
    Value(Value),
}

/// A managed collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentCollection {
    pub key: CollectionKey,
    pub elements: Vec<CollectionElement>,
    pub initialized: bool,
}

impl PersistentCollection {
    /// An uninitialized, empty collection.
    pub fn uninitialized(key: CollectionKey) -> Self {
        Self {
            key,
            elements: Vec::new(),
            initialized: false,
        }
    }

    /// Add an element unless an equal one is present. Returns whether it was
    /// added.
    pub fn add(&mut self, element: CollectionElement) -> bool {
        if self.elements.contains(&element) {
            return false;
        }
        self.elements.push(element);
        true
    }

    /// Entity keys of the elements.
    pub fn entity_keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.elements.iter().filter_map(|e| match e {
            CollectionElement::Entity(key) => Some(key),
            CollectionElement::Value(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_has_set_semantics() {
        let owner = EntityKey::new("Order", 1);
        let mut lines = PersistentCollection::uninitialized(CollectionKey::new("Order.lines", owner));
        assert!(lines.add(CollectionElement::Entity(EntityKey::new("Line", 10))));
        assert!(!lines.add(CollectionElement::Entity(EntityKey::new("Line", 10))));
        assert!(lines.add(CollectionElement::Entity(EntityKey::new("Line", 11))));
        assert_eq!(lines.entity_keys().count(), 2);
    }
}
