//! Engine configuration.

use std::path::PathBuf;

/// Default page size for list operations when the caller gives no limit.
pub const DEFAULT_API_LIST_LIMIT: u64 = 100;

/// Default bound on cascading delete recursion.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 100;

/// Where the relational store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database, discarded when the engine is dropped.
    InMemory,
    /// Database file on disk.
    Path(PathBuf),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Storage location.
    pub database: DatabaseLocation,

    /// Limit applied by [`FilterContextBuilder`](crate::filter::FilterContextBuilder)
    /// when the request carries none.
    pub api_list_limit: u64,

    /// Maximum depth of cascading deletes.
    pub max_cascade_depth: usize,
}

impl EngineConfig {
    /// Create a configuration for the given storage location.
    pub fn new(database: DatabaseLocation) -> Self {
        Self {
            database,
            api_list_limit: DEFAULT_API_LIST_LIMIT,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }

    /// Configuration backed by an in-memory database.
    pub fn in_memory() -> Self {
        Self::new(DatabaseLocation::InMemory)
    }

    /// Use a database file.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = DatabaseLocation::Path(path.into());
        self
    }

    /// Set the default list limit. Zero means unbounded.
    pub fn with_api_list_limit(mut self, limit: u64) -> Self {
        self.api_list_limit = limit;
        self
    }

    /// Set the cascading delete depth bound.
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.database, DatabaseLocation::InMemory);
        assert_eq!(config.api_list_limit, 100);
        assert_eq!(config.max_cascade_depth, 100);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::in_memory()
            .with_database_path("/tmp/strata.db")
            .with_api_list_limit(20)
            .with_max_cascade_depth(0);
        assert_eq!(
            config.database,
            DatabaseLocation::Path(PathBuf::from("/tmp/strata.db"))
        );
        assert_eq!(config.api_list_limit, 20);
        assert_eq!(config.max_cascade_depth, 1);
    }
}
