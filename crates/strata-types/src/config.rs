//! Configuration for the memory substrate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default dimensionality of every stored embedding vector.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1024;

/// Memory store configuration, loadable from TOML.
///
/// Every field has a default so a partial (or empty) file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// SQLite database file. `None` opens an in-memory database.
    pub db_path: Option<PathBuf>,
    /// Required length of every embedding vector written to the store.
    pub embedding_dimensions: usize,
    /// Per-layer result limit used when a search does not specify one.
    pub search_limit: i64,
    /// Page size used by `query_memories` when none is given.
    pub default_page_size: i64,
    /// Upper bound for `query_memories` page sizes.
    pub max_page_size: i64,
    /// Page size used by tag and role aggregations when none is given.
    pub tag_page_size: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            search_limit: 5,
            default_page_size: 20,
            max_page_size: 100,
            tag_page_size: 10,
        }
    }
}

impl MemoryConfig {
    /// A config backed by an in-memory database with a custom vector size.
    pub fn in_memory(embedding_dimensions: usize) -> Self {
        Self {
            embedding_dimensions,
            ..Default::default()
        }
    }
}
