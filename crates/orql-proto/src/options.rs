//! Per-execution query options and load influencers.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Lock mode requested for loaded rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockMode {
    /// No lock.
    #[default]
    None,
    /// Read with version check where available.
    Read,
    /// Optimistic version check at flush.
    Optimistic,
    /// Shared database lock.
    PessimisticRead,
    /// Exclusive database lock (`for update`).
    PessimisticWrite,
}

impl LockMode {
    /// Whether this mode takes a database lock.
    pub fn is_pessimistic(self) -> bool {
        matches!(self, LockMode::PessimisticRead | LockMode::PessimisticWrite)
    }

    /// Stable name used in cache keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            LockMode::None => "none",
            LockMode::Read => "read",
            LockMode::Optimistic => "optimistic",
            LockMode::PessimisticRead => "pessimistic_read",
            LockMode::PessimisticWrite => "pessimistic_write",
        }
    }
}

/// How an entity graph hint is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphSemantic {
    /// Attributes in the graph are fetched, everything else is lazy.
    Fetch,
    /// Attributes in the graph are fetched, everything else follows its
    /// mapping default.
    Load,
}

/// An attribute in an entity graph, optionally with a nested subgraph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeNode {
    pub attribute: String,
    #[serde(default)]
    pub subgraph: Vec<AttributeNode>,
}

impl AttributeNode {
    /// A leaf attribute node.
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            subgraph: vec![],
        }
    }

    /// Add a nested attribute node.
    pub fn with_subnode(mut self, node: AttributeNode) -> Self {
        self.subgraph.push(node);
        self
    }
}

/// A fetch plan rooted at an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityGraph {
    pub root: String,
    pub attribute_nodes: Vec<AttributeNode>,
}

impl EntityGraph {
    /// Create an empty graph for an entity.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            attribute_nodes: vec![],
        }
    }

    /// Add an attribute node.
    pub fn with_node(mut self, node: AttributeNode) -> Self {
        self.attribute_nodes.push(node);
        self
    }

    /// Add a leaf attribute.
    pub fn with_attribute(self, attribute: impl Into<String>) -> Self {
        self.with_node(AttributeNode::new(attribute))
    }
}

/// An entity graph applied to one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityGraphHint {
    pub graph: EntityGraph,
    pub semantic: GraphSemantic,
}

/// Shape of tuple results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TupleTransformer {
    /// Rows stay positional.
    #[default]
    ToList,
    /// Rows become maps keyed by selection alias.
    AliasToMap,
}

/// Row window applied to a select.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Limit {
    pub first_result: Option<u32>,
    pub max_results: Option<u32>,
}

impl Limit {
    /// Whether no window is set.
    pub fn is_empty(&self) -> bool {
        self.first_result.is_none() && self.max_results.is_none()
    }
}

/// Options for a single query execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub lock_mode: LockMode,
    pub timeout: Option<Duration>,
    pub fetch_size: Option<u32>,
    pub entity_graph: Option<EntityGraphHint>,
    pub tuple_transformer: TupleTransformer,
    pub limit: Limit,
    pub read_only: bool,
}

impl QueryOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lock mode.
    pub fn with_lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }

    /// Set the statement timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the driver fetch size hint.
    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    /// Apply an entity graph.
    pub fn with_entity_graph(mut self, graph: EntityGraph, semantic: GraphSemantic) -> Self {
        self.entity_graph = Some(EntityGraphHint { graph, semantic });
        self
    }

    /// Set the tuple transformer.
    pub fn with_tuple_transformer(mut self, transformer: TupleTransformer) -> Self {
        self.tuple_transformer = transformer;
        self
    }

    /// Set the first result offset.
    pub fn with_first_result(mut self, first_result: u32) -> Self {
        self.limit.first_result = Some(first_result);
        self
    }

    /// Set the maximum number of results.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.limit.max_results = Some(max_results);
        self
    }

    /// Load entities without snapshots.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Internal fetch profile used by merge and refresh cascades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InternalFetchProfile {
    Merge,
    Refresh,
}

impl InternalFetchProfile {
    /// Stable name used in cache keys.
    pub fn as_str(self) -> &'static str {
        match self {
            InternalFetchProfile::Merge => "merge",
            InternalFetchProfile::Refresh => "refresh",
        }
    }
}

/// Session-level state that changes the shape of load statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadQueryInfluencers {
    /// Enabled filters with their parameter values.
    pub enabled_filters: BTreeMap<String, BTreeMap<String, Value>>,
    pub enabled_fetch_profiles: BTreeSet<String>,
    pub internal_fetch_profile: Option<InternalFetchProfile>,
}

impl LoadQueryInfluencers {
    /// No influencers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable a filter without parameters.
    pub fn with_filter(mut self, name: impl Into<String>) -> Self {
        self.enable_filter(name);
        self
    }

    /// Enable a fetch profile.
    pub fn with_fetch_profile(mut self, name: impl Into<String>) -> Self {
        self.enabled_fetch_profiles.insert(name.into());
        self
    }

    /// Set the internal fetch profile.
    pub fn with_internal_fetch_profile(mut self, profile: InternalFetchProfile) -> Self {
        self.internal_fetch_profile = Some(profile);
        self
    }

    /// Enable a filter, returning its parameter map for binding.
    pub fn enable_filter(&mut self, name: impl Into<String>) -> &mut BTreeMap<String, Value> {
        self.enabled_filters.entry(name.into()).or_default()
    }

    /// Disable a filter.
    pub fn disable_filter(&mut self, name: &str) {
        self.enabled_filters.remove(name);
    }

    /// Names of the enabled filters.
    pub fn enabled_filter_names(&self) -> BTreeSet<&str> {
        self.enabled_filters.keys().map(String::as_str).collect()
    }

    /// Whether any filter is enabled.
    pub fn has_enabled_filters(&self) -> bool {
        !self.enabled_filters.is_empty()
    }

    /// Whether any fetch profile is enabled.
    pub fn has_enabled_fetch_profiles(&self) -> bool {
        !self.enabled_fetch_profiles.is_empty()
    }
}
