//! Boundary to the collaborator that resolves where a memory came from.

use crate::error::StrataResult;
use crate::memory::TopicSource;
use async_trait::async_trait;

/// Looks up the record a memory was extracted from (e.g. a chat topic).
///
/// Only consulted by detail resolution, and only when a memory's metadata
/// carries a `sourceId`.
#[async_trait]
pub trait SourceLookup: Send + Sync {
    /// Find a source by id. `Ok(None)` when it does not exist.
    async fn find_by_id(&self, id: &str) -> StrataResult<Option<TopicSource>>;
}
