//! Whether a compiled statement may be shared through the statement cache.

use orql_proto::{LoadQueryInfluencers, QueryOptions};

/// What shapes a compiled statement beyond its query tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachingPolicy {
    /// Enabled filters add per-session restrictions.
    EnabledFilters,
    /// An entity graph rewrites the fetch plan per call.
    EntityGraph,
    /// Fetch profiles are part of the cache key.
    FetchProfiles,
    Plain,
}

impl CachingPolicy {
    /// Classify an execution; filters win over graphs, graphs over profiles.
    pub fn resolve(options: &QueryOptions, influencers: &LoadQueryInfluencers) -> Self {
        if influencers.has_enabled_filters() {
            CachingPolicy::EnabledFilters
        } else if options.entity_graph.is_some() {
            CachingPolicy::EntityGraph
        } else if influencers.has_enabled_fetch_profiles() {
            CachingPolicy::FetchProfiles
        } else {
            CachingPolicy::Plain
        }
    }

    pub fn is_cacheable(self) -> bool {
        matches!(self, CachingPolicy::FetchProfiles | CachingPolicy::Plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orql_proto::{EntityGraph, GraphSemantic};

    #[test]
    fn test_policy_resolution() {
        let options = QueryOptions::default();
        let plain = LoadQueryInfluencers::default();
        assert_eq!(CachingPolicy::resolve(&options, &plain), CachingPolicy::Plain);

        let profiles = LoadQueryInfluencers::default().with_fetch_profile("with-customer");
        assert_eq!(CachingPolicy::resolve(&options, &profiles), CachingPolicy::FetchProfiles);
        assert!(CachingPolicy::FetchProfiles.is_cacheable());

        let filtered = profiles.with_filter("status");
        assert_eq!(CachingPolicy::resolve(&options, &filtered), CachingPolicy::EnabledFilters);
        assert!(!CachingPolicy::EnabledFilters.is_cacheable());

        let graph = QueryOptions::default().with_entity_graph(EntityGraph::new("Order"), GraphSemantic::Fetch);
        assert_eq!(CachingPolicy::resolve(&graph, &plain), CachingPolicy::EntityGraph);
        assert!(!CachingPolicy::EntityGraph.is_cacheable());
    }
}
