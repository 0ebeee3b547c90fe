//! orql core - query compilation, SQL rendering, execution and result
//! assembly.
//!
//! A typed [`QueryTree`](orql_proto::QueryTree) flows through the pipeline:
//!
//! - [`compile`] - splits polymorphic roots and builds one relational
//!   statement tree plus result mapping per concrete root
//! - [`render`] - renders statement trees into driver statements for a
//!   [`Dialect`]
//! - [`exec`] - binds parameters, runs statements and streams rows through
//!   the [`Connection`] seam
//! - [`results`] - assembles rows into managed instances, consulting the
//!   [`PersistenceContext`] identity map
//!
//! [`SessionFactory`] ties them together with the shared statement cache and
//! the key-based loaders; a [`Session`] runs queries and loads on one
//! connection.

pub mod cache;
pub mod compile;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod loader;
pub mod metamodel;
pub mod render;
pub mod results;
pub mod session;
pub mod sql;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, StatementCache, StatementKey};
pub use compile::{CachingPolicy, CompiledQuery, PreparedMutation, PreparedSelect, QueryCompiler};
pub use config::SessionFactoryConfig;
pub use context::{
    CollectionElement, CollectionKey, EntityInstance, EntityKey, EntityRef, IdValue, LoadEventListener,
    NoopLoadListener, PersistenceContext, PropertyValue,
};
pub use error::Error;
pub use exec::{Connection, SqliteConnection, StatementOptions};
pub use loader::{CollectionLoader, SingleIdEntityLoader, UniqueKeyLoader};
pub use metamodel::{Metamodel, MetamodelDef};
pub use render::{AnsiDialect, Dialect, SqliteDialect};
pub use results::{QueryRow, ResultValue};
pub use session::{Session, SessionFactory, SessionFactoryBuilder};

/// Re-export protocol types.
pub use orql_proto as proto;
