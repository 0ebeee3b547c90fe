//! Session factory configuration.

use std::time::Duration;

/// Default number of compiled statements kept in the statement cache.
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 512;

/// Default maximum length of a generated alias stem.
pub const DEFAULT_ALIAS_STEM_MAX_LENGTH: usize = 10;

/// Default depth limit for following eager join associations.
pub const DEFAULT_MAX_FETCH_DEPTH: u32 = 5;

/// Configuration for a [`SessionFactory`](crate::SessionFactory).
#[derive(Debug, Clone)]
pub struct SessionFactoryConfig {
    /// Maximum number of compiled statements kept in the statement cache.
    pub statement_cache_size: usize,

    /// Maximum length of an alias stem before it is shortened with a hash.
    pub alias_stem_max_length: usize,

    /// How many levels of eager join fetches are followed from a root.
    /// Deeper eager associations fall back to subsequent selects.
    pub max_fetch_depth: u32,

    /// Statement timeout applied when query options set none.
    pub default_timeout: Option<Duration>,

    /// Driver fetch size applied when query options set none.
    pub default_fetch_size: Option<u32>,

    /// Log rendered SQL at debug level.
    pub log_sql: bool,

    /// Fail compilation on duplicate fetches instead of dropping them.
    pub fail_on_duplicate_fetch: bool,
}

impl Default for SessionFactoryConfig {
    fn default() -> Self {
        Self {
            statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
            alias_stem_max_length: DEFAULT_ALIAS_STEM_MAX_LENGTH,
            max_fetch_depth: DEFAULT_MAX_FETCH_DEPTH,
            default_timeout: None,
            default_fetch_size: None,
            log_sql: true,
            fail_on_duplicate_fetch: false,
        }
    }
}

impl SessionFactoryConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the statement cache capacity.
    pub fn with_statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Set the alias stem length limit.
    pub fn with_alias_stem_max_length(mut self, length: usize) -> Self {
        self.alias_stem_max_length = length;
        self
    }

    /// Set the eager fetch depth limit.
    pub fn with_max_fetch_depth(mut self, depth: u32) -> Self {
        self.max_fetch_depth = depth;
        self
    }

    /// Set the default statement timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the default fetch size.
    pub fn with_default_fetch_size(mut self, fetch_size: u32) -> Self {
        self.default_fetch_size = Some(fetch_size);
        self
    }

    /// Enable or disable SQL logging.
    pub fn with_log_sql(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    /// Treat duplicate fetches as errors.
    pub fn with_fail_on_duplicate_fetch(mut self, fail: bool) -> Self {
        self.fail_on_duplicate_fetch = fail;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionFactoryConfig::default();
        assert_eq!(config.statement_cache_size, DEFAULT_STATEMENT_CACHE_SIZE);
        assert_eq!(config.max_fetch_depth, DEFAULT_MAX_FETCH_DEPTH);
        assert!(!config.fail_on_duplicate_fetch);
    }

    #[test]
    fn test_builder() {
        let config = SessionFactoryConfig::new()
            .with_statement_cache_size(8)
            .with_max_fetch_depth(2)
            .with_default_timeout(Duration::from_secs(3));
        assert_eq!(config.statement_cache_size, 8);
        assert_eq!(config.max_fetch_depth, 2);
        assert_eq!(config.default_timeout, Some(Duration::from_secs(3)));
    }
}
