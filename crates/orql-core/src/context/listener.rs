//! Load event hooks.

use super::instance::EntityInstance;
use super::key::EntityKey;

/// Notified around the initialization of every entity read from a row set.
pub trait LoadEventListener: Send + Sync {
    /// Called before the state of `key` is hydrated.
    fn pre_load(&self, _entity: &str, _key: &EntityKey) {}

    /// Called once the instance is fully initialized and registered.
    fn post_load(&self, _instance: &EntityInstance) {}
}

/// Listener that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLoadListener;

impl LoadEventListener for NoopLoadListener {}
