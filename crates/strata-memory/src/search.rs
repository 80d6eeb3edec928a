//! Similarity and recency search over the layer detail tables.
//!
//! With a query embedding, every candidate row of the user (optionally
//! narrowed by detail `type`) is scored by cosine similarity against the
//! layer's vector column and the best `limit` rows are kept. Rows without a
//! stored vector report -1 and rank after every scored row. Without an
//! embedding, rows come back newest first.

use crate::codec::{cosine_similarity, embedding_from_bytes};
use crate::rows::{
    context_from_row, experience_from_row, identity_from_row, preference_from_row,
    CONTEXT_COLUMNS, CONTEXT_WIDTH, EXPERIENCE_COLUMNS, EXPERIENCE_WIDTH, IDENTITY_COLUMNS,
    PREFERENCE_COLUMNS, PREFERENCE_WIDTH,
};
use crate::substrate::UserMemoryStore;
use rusqlite::Row;
use std::collections::HashSet;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::{
    ContextMemory, ExperienceMemory, IdentityMemory, PreferenceMemory, Scored, SearchResults,
};
use strata_types::params::{LayerSearch, SearchParams};
use tracing::debug;

/// Where one layer's searchable rows live.
struct SearchTarget {
    table: &'static str,
    alias: &'static str,
    columns: &'static str,
    width: usize,
    vector: &'static str,
}

const CONTEXTS: SearchTarget = SearchTarget {
    table: "user_memories_contexts",
    alias: "c",
    columns: CONTEXT_COLUMNS,
    width: CONTEXT_WIDTH,
    vector: "description_vector",
};

const EXPERIENCES: SearchTarget = SearchTarget {
    table: "user_memories_experiences",
    alias: "e",
    columns: EXPERIENCE_COLUMNS,
    width: EXPERIENCE_WIDTH,
    vector: "situation_vector",
};

const PREFERENCES: SearchTarget = SearchTarget {
    table: "user_memories_preferences",
    alias: "p",
    columns: PREFERENCE_COLUMNS,
    width: PREFERENCE_WIDTH,
    vector: "conclusion_directives_vector",
};

/// Reported score for rows that have no stored vector; they still rank last.
const UNSCORED: f32 = -1.0;

impl UserMemoryStore {
    fn search_layer<T>(
        &self,
        target: &SearchTarget,
        params: &LayerSearch,
        map: fn(&Row<'_>, usize) -> rusqlite::Result<T>,
    ) -> StrataResult<Vec<Scored<T>>> {
        let limit = params.limit.unwrap_or(self.config.search_limit);
        if limit <= 0 {
            return Ok(Vec::new());
        }
        self.check_vector("embedding", params.embedding.as_deref())?;

        let SearchTarget {
            table,
            alias,
            columns,
            width,
            vector,
        } = target;
        let mut sql = format!(
            "SELECT {columns}, {alias}.{vector} FROM {table} {alias} WHERE {alias}.user_id = ?1"
        );
        if params.detail_type.is_some() {
            sql.push_str(&format!(" AND {alias}.type = ?2"));
        }
        sql.push_str(&format!(" ORDER BY {alias}.created_at DESC, {alias}.id DESC"));
        if params.embedding.is_none() {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        let mut bind: Vec<&dyn rusqlite::ToSql> = vec![&self.user_id];
        if let Some(ref detail_type) = params.detail_type {
            bind.push(detail_type);
        }
        let rows = stmt
            .query_map(bind.as_slice(), |row| {
                let item = map(row, 0)?;
                let blob: Option<Vec<u8>> = row.get(*width)?;
                Ok((item, blob))
            })
            .map_err(|e| StrataError::Memory(e.to_string()))?;

        let mut scored = Vec::new();
        for row in rows {
            let (item, blob) = row.map_err(|e| StrataError::Memory(e.to_string()))?;
            let rank = params.embedding.as_deref().and_then(|query| {
                blob.map(|bytes| cosine_similarity(query, &embedding_from_bytes(&bytes)))
            });
            let similarity = params
                .embedding
                .as_ref()
                .map(|_| rank.unwrap_or(UNSCORED));
            scored.push((rank, Scored { item, similarity }));
        }

        if params.embedding.is_some() {
            // Rows without a vector rank below every scored row. Stable sort
            // keeps recency order among equal scores.
            scored.sort_by(|(a, _), (b, _)| match (a, b) {
                (Some(a), Some(b)) => b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
            scored.truncate(limit as usize);
        }
        let hits = scored.into_iter().map(|(_, hit)| hit).collect();
        Ok(hits)
    }

    /// Search context rows by `description_vector`.
    pub fn search_contexts(&self, params: LayerSearch) -> StrataResult<Vec<Scored<ContextMemory>>> {
        self.search_layer(&CONTEXTS, &params, context_from_row)
    }

    /// Search experience rows by `situation_vector`.
    pub fn search_experiences(
        &self,
        params: LayerSearch,
    ) -> StrataResult<Vec<Scored<ExperienceMemory>>> {
        self.search_layer(&EXPERIENCES, &params, experience_from_row)
    }

    /// Search preference rows by `conclusion_directives_vector`.
    pub fn search_preferences(
        &self,
        params: LayerSearch,
    ) -> StrataResult<Vec<Scored<PreferenceMemory>>> {
        self.search_layer(&PREFERENCES, &params, preference_from_row)
    }

    /// Search contexts, experiences and preferences concurrently, then record
    /// one access for every base record and context row the results reach.
    ///
    /// Fails as a whole if any branch fails.
    pub async fn search(&self, params: SearchParams) -> StrataResult<SearchResults> {
        let layer = |limit: Option<i64>| LayerSearch {
            embedding: params.embedding.clone(),
            limit,
            detail_type: None,
        };
        let experience_params = layer(params.limits.experiences);
        let context_params = layer(params.limits.contexts);
        let preference_params = layer(params.limits.preferences);

        let (experiences, contexts, preferences) = tokio::try_join!(
            self.blocking(move |store| store.search_experiences(experience_params)),
            self.blocking(move |store| store.search_contexts(context_params)),
            self.blocking(move |store| store.search_preferences(preference_params)),
        )?;

        let mut seen = HashSet::new();
        let mut memory_ids = Vec::new();
        let reached = experiences
            .iter()
            .map(|hit| &hit.item.user_memory_id)
            .chain(preferences.iter().map(|hit| &hit.item.user_memory_id))
            .chain(contexts.iter().flat_map(|hit| hit.item.user_memory_ids.iter()));
        for id in reached {
            if seen.insert(id.as_str()) {
                memory_ids.push(id.clone());
            }
        }
        let context_ids: Vec<String> = contexts.iter().map(|hit| hit.item.id.clone()).collect();

        debug!(
            user_id = %self.user_id,
            contexts = contexts.len(),
            experiences = experiences.len(),
            preferences = preferences.len(),
            memories = memory_ids.len(),
            "Search fan-in"
        );

        if !memory_ids.is_empty() || !context_ids.is_empty() {
            self.blocking(move |store| store.update_access_metrics(&memory_ids, &context_ids))
                .await?;
        }

        Ok(SearchResults {
            contexts,
            experiences,
            preferences,
        })
    }

    /// Same as [`search`](Self::search).
    pub async fn search_with_embedding(&self, params: SearchParams) -> StrataResult<SearchResults> {
        self.search(params).await
    }

    /// Every identity entry of the user, newest first.
    pub fn get_all_identities(&self) -> StrataResult<Vec<IdentityMemory>> {
        self.list_identities(None)
    }

    /// Identity entries of one type, newest first.
    pub fn get_identities_by_type(&self, identity_type: &str) -> StrataResult<Vec<IdentityMemory>> {
        self.list_identities(Some(identity_type.trim().to_ascii_lowercase()))
    }

    fn list_identities(&self, identity_type: Option<String>) -> StrataResult<Vec<IdentityMemory>> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM user_memories_identities i
              WHERE i.user_id = ?1 AND (?2 IS NULL OR i.type = ?2)
              ORDER BY i.created_at DESC, i.id DESC"
        );
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![self.user_id, identity_type], |row| {
                identity_from_row(row, 0)
            })
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StrataError::Memory(e.to_string()))
    }
}
