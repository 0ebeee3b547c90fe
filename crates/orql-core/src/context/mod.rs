//! Session-scoped identity map and managed state.

pub mod instance;
pub mod key;
pub mod listener;
pub mod loading;
pub mod persistence_context;

pub use instance::{CollectionElement, EntityInstance, EntityRef, PersistentCollection, PropertyValue};
pub use key::{CollectionKey, EntityKey, IdValue, UniqueKey};
pub use listener::{LoadEventListener, NoopLoadListener};
pub use loading::{LoadContexts, LoadingEntityEntry};
pub use persistence_context::{EntityEntry, PersistenceContext};
