//! Single-record lookups: base records by id and layer details with their origin.

use crate::access::touch;
use crate::codec::from_json;
use crate::rows::{
    context_from_row, experience_from_row, identity_from_row, memory_from_row,
    preference_from_row, CONTEXT_COLUMNS, EXPERIENCE_COLUMNS, IDENTITY_COLUMNS, MEMORY_COLUMNS,
    PREFERENCE_COLUMNS,
};
use crate::substrate::UserMemoryStore;
use rusqlite::Connection;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::{
    DetailedMemory, Layer, LayerDetail, SourceType, UserMemory, SOURCE_ID_KEY, SOURCE_TYPE_KEY,
};
use tracing::warn;

/// Load a base record owned by `user_id`.
pub(crate) fn load_memory(
    conn: &Connection,
    user_id: &str,
    id: &str,
) -> StrataResult<Option<UserMemory>> {
    let sql = format!("SELECT {MEMORY_COLUMNS} FROM user_memories m WHERE m.id = ?1 AND m.user_id = ?2");
    match conn.query_row(&sql, [id, user_id], |row| memory_from_row(row, 0)) {
        Ok(memory) => Ok(Some(memory)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StrataError::Memory(e.to_string())),
    }
}

/// Load a layer detail row owned by `user_id`.
pub(crate) fn load_detail(
    conn: &Connection,
    user_id: &str,
    layer: Layer,
    id: &str,
) -> StrataResult<Option<LayerDetail>> {
    let (columns, table, alias) = match layer {
        Layer::Context => (CONTEXT_COLUMNS, "user_memories_contexts", "c"),
        Layer::Experience => (EXPERIENCE_COLUMNS, "user_memories_experiences", "e"),
        Layer::Identity => (IDENTITY_COLUMNS, "user_memories_identities", "i"),
        Layer::Preference => (PREFERENCE_COLUMNS, "user_memories_preferences", "p"),
    };
    let sql = format!(
        "SELECT {columns} FROM {table} {alias} WHERE {alias}.id = ?1 AND {alias}.user_id = ?2"
    );
    let result = conn.query_row(&sql, [id, user_id], |row| {
        Ok(match layer {
            Layer::Context => LayerDetail::Context(context_from_row(row, 0)?),
            Layer::Experience => LayerDetail::Experience(experience_from_row(row, 0)?),
            Layer::Identity => LayerDetail::Identity(identity_from_row(row, 0)?),
            Layer::Preference => LayerDetail::Preference(preference_from_row(row, 0)?),
        })
    });
    match result {
        Ok(detail) => Ok(Some(detail)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StrataError::Memory(e.to_string())),
    }
}

/// Base record ids a detail row owned by `user_id` links to, `None` when the
/// row does not exist.
pub(crate) fn linked_ids(
    conn: &Connection,
    user_id: &str,
    layer: Layer,
    id: &str,
) -> StrataResult<Option<Vec<String>>> {
    let result = match layer {
        Layer::Context => conn
            .query_row(
                "SELECT user_memory_ids FROM user_memories_contexts WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .map(|ids| from_json::<Vec<String>>(ids).unwrap_or_default()),
        _ => {
            let table = match layer {
                Layer::Experience => "user_memories_experiences",
                Layer::Identity => "user_memories_identities",
                _ => "user_memories_preferences",
            };
            conn.query_row(
                &format!("SELECT user_memory_id FROM {table} WHERE id = ?1 AND user_id = ?2"),
                [id, user_id],
                |row| row.get::<_, String>(0),
            )
            .map(|id| vec![id])
        }
    };
    match result {
        Ok(ids) => Ok(Some(ids)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StrataError::Memory(e.to_string())),
    }
}

/// Base record id a detail row hangs off. Contexts use their first member.
fn linked_memory_id(detail: &LayerDetail) -> Option<&str> {
    match detail {
        LayerDetail::Context(c) => c.user_memory_ids.first().map(String::as_str),
        LayerDetail::Experience(e) => Some(&e.user_memory_id),
        LayerDetail::Identity(i) => Some(&i.user_memory_id),
        LayerDetail::Preference(p) => Some(&p.user_memory_id),
    }
}

impl UserMemoryStore {
    /// Fetch a base record and count the read.
    ///
    /// The returned record reflects the state before this access was recorded.
    pub fn find_by_id(&self, id: &str) -> StrataResult<Option<UserMemory>> {
        let mut conn = self.lock()?;
        let memory = load_memory(&conn, &self.user_id, id)?;
        if memory.is_some() {
            touch(&mut conn, &self.user_id, &[id.to_string()], &[])?;
        }
        Ok(memory)
    }

    /// Resolve a detail row of `layer` together with its base record and origin.
    ///
    /// Returns `None` when the row is missing, owned by someone else, has no
    /// linked base record, or its base record belongs to a different layer.
    pub async fn get_memory_detail(
        &self,
        id: &str,
        layer: Layer,
    ) -> StrataResult<Option<DetailedMemory>> {
        let id = id.to_string();
        let found = self
            .blocking(move |store| {
                let conn = store.lock()?;
                let Some(detail) = load_detail(&conn, &store.user_id, layer, &id)? else {
                    return Ok(None);
                };
                let Some(memory_id) = linked_memory_id(&detail) else {
                    return Ok(None);
                };
                let Some(memory) = load_memory(&conn, &store.user_id, memory_id)? else {
                    return Ok(None);
                };
                if memory.memory_layer != layer {
                    return Ok(None);
                }
                Ok(Some((memory, detail)))
            })
            .await?;
        let Some((memory, detail)) = found else {
            return Ok(None);
        };

        let metadata = memory.metadata.as_ref().or_else(|| detail.metadata());
        let source_id = metadata
            .and_then(|m| m.get(SOURCE_ID_KEY))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let source_type = source_id.as_ref().map(|_| {
            metadata
                .and_then(|m| m.get(SOURCE_TYPE_KEY))
                .and_then(|v| v.as_str())
                .and_then(SourceType::parse)
                .unwrap_or_default()
        });

        let source = match (&source_id, &self.sources) {
            (Some(source_id), Some(sources)) => match sources.find_by_id(source_id).await {
                Ok(source) => source,
                Err(e) => {
                    warn!(source_id = %source_id, error = %e, "Source lookup failed");
                    None
                }
            },
            _ => None,
        };

        Ok(Some(DetailedMemory {
            memory,
            detail,
            source,
            source_type,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{new_memory, sibling, store};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use strata_types::error::StrataResult;
    use strata_types::memory::{Layer, LayerDetail, Metadata, SourceType, TopicSource};
    use strata_types::params::{NewContext, NewPreference};
    use strata_types::source::SourceLookup;

    struct Topics;

    #[async_trait]
    impl SourceLookup for Topics {
        async fn find_by_id(&self, id: &str) -> StrataResult<Option<TopicSource>> {
            Ok((id == "topic-1").then(|| TopicSource {
                id: id.to_string(),
                title: Some("Weekly sync".into()),
                session_id: Some("session-9".into()),
                agent_id: None,
            }))
        }
    }

    fn with_source(id: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("sourceId".into(), json!(id));
        metadata
    }

    #[test]
    fn test_find_by_id_counts_access() {
        let store = store("u1");
        let created = store
            .create_preference_memory(new_memory("p"), NewPreference::default())
            .unwrap();
        let first = store.find_by_id(&created.memory.id).unwrap().unwrap();
        assert_eq!(first.accessed_count, 0);
        let second = store.find_by_id(&created.memory.id).unwrap().unwrap();
        assert_eq!(second.accessed_count, 1);
        assert!(store.find_by_id("missing").unwrap().is_none());
        assert!(sibling(&store, "u2")
            .find_by_id(&created.memory.id)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_detail_resolves_source() {
        let store = store("u1").with_source_lookup(Arc::new(Topics));
        let created = store
            .create_context_memory(
                new_memory("ctx"),
                NewContext {
                    metadata: Some(with_source("topic-1")),
                    ..Default::default()
                },
            )
            .unwrap();

        let detailed = store
            .get_memory_detail(&created.detail.id, Layer::Context)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(detailed.detail, LayerDetail::Context(_)));
        assert_eq!(detailed.source_type, Some(SourceType::ChatTopic));
        assert_eq!(
            detailed.source.unwrap().title.as_deref(),
            Some("Weekly sync")
        );
    }

    #[tokio::test]
    async fn test_detail_without_lookup_or_source() {
        let store = store("u1");
        let created = store
            .create_preference_memory(new_memory("p"), NewPreference::default())
            .unwrap();
        let detailed = store
            .get_memory_detail(&created.detail.id, Layer::Preference)
            .await
            .unwrap()
            .unwrap();
        assert!(detailed.source.is_none());
        assert!(detailed.source_type.is_none());
    }

    #[test]
    fn test_cross_layer_and_foreign_ids_are_not_found() {
        let store = store("u1");
        let created = store
            .create_preference_memory(new_memory("p"), NewPreference::default())
            .unwrap();

        let rt = tokio_test::block_on(store.get_memory_detail(&created.detail.id, Layer::Experience));
        assert!(rt.unwrap().is_none());

        // A preference row whose base record claims another layer.
        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE user_memories SET memory_layer = 'identity' WHERE id = ?1",
                [&created.memory.id],
            )
            .unwrap();
        let mismatched =
            tokio_test::block_on(store.get_memory_detail(&created.detail.id, Layer::Preference));
        assert!(mismatched.unwrap().is_none());

        let other = sibling(&store, "u2");
        let foreign =
            tokio_test::block_on(other.get_memory_detail(&created.detail.id, Layer::Preference));
        assert!(foreign.unwrap().is_none());
    }
}
