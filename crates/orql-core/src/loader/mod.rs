//! Key-based loaders.
//!
//! A loader owns the query tree of one lookup (entity by identifier, entity
//! by unique key, collection by owner) and keeps its rendered statement per
//! lock mode and internal fetch profile. Lookups under enabled filters, an
//! entity graph or fetch profiles get a freshly compiled statement, since
//! those change the statement shape per session.

mod collection;
mod single_id;
mod unique_key;

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use orql_proto::{InternalFetchProfile, LoadQueryInfluencers, LockMode, QueryOptions, QueryTree};
use tracing::trace;

use crate::compile::{CachingPolicy, CompiledQuery, PreparedSelect, QueryCompiler};
use crate::error::Error;

pub use collection::CollectionLoader;
pub use single_id::SingleIdEntityLoader;
pub use unique_key::UniqueKeyLoader;

/// Cache key of a loader statement.
pub type LoadKey = (LockMode, Option<InternalFetchProfile>);

/// Rendered statement for `tree`, cached under `key` when the execution
/// has no per-session shape.
pub(crate) fn cached_statement<K>(
    statements: &DashMap<K, Arc<PreparedSelect>>,
    key: K,
    compiler: &QueryCompiler<'_>,
    tree: &QueryTree,
    options: &QueryOptions,
    influencers: &LoadQueryInfluencers,
) -> Result<Arc<PreparedSelect>, Error>
where
    K: Eq + Hash,
{
    let policy = CachingPolicy::resolve(options, influencers);
    if policy != CachingPolicy::Plain {
        trace!(?policy, "Loader statement compiled uncached");
        return prepare_single(compiler, tree, options, influencers).map(Arc::new);
    }
    if let Some(statement) = statements.get(&key) {
        return Ok(statement.value().clone());
    }
    let prepared = Arc::new(prepare_single(compiler, tree, options, influencers)?);
    Ok(statements.entry(key).or_insert(prepared).value().clone())
}

/// Compile a loader tree, which always yields exactly one select.
pub(crate) fn prepare_single(
    compiler: &QueryCompiler<'_>,
    tree: &QueryTree,
    options: &QueryOptions,
    influencers: &LoadQueryInfluencers,
) -> Result<PreparedSelect, Error> {
    match compiler.prepare(tree, options, influencers)? {
        CompiledQuery::Select(mut selects) if selects.len() == 1 => selects
            .pop()
            .ok_or_else(|| Error::SqlTree("loader compiled to no statement".to_string())),
        CompiledQuery::Select(selects) => Err(Error::SqlTree(format!(
            "loader compiled to {} statements",
            selects.len()
        ))),
        CompiledQuery::Mutation(_) => Err(Error::SqlTree("loader compiled to a mutation".to_string())),
    }
}

/// Options a loader statement is compiled and executed with: lock mode,
/// entity graph and execution settings of `options`, without paging.
pub fn load_options(options: &QueryOptions) -> QueryOptions {
    QueryOptions {
        lock_mode: options.lock_mode,
        timeout: options.timeout,
        fetch_size: options.fetch_size,
        entity_graph: options.entity_graph.clone(),
        read_only: options.read_only,
        ..QueryOptions::default()
    }
}
