//! Partial updates of base records and layer entries.
//!
//! Patches are turned into column assignments. Entry updates append a
//! null-safe `IS NOT` comparison for every assigned column, so a row is only
//! written (and `updated_at` only bumped) when some value actually differs.

use crate::codec::{embedding_to_bytes, id_list, now, to_json, ts};
use crate::detail::linked_ids;
use crate::normalize::{coerce_date, normalize_identity_type, normalize_relationship};
use crate::substrate::UserMemoryStore;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;
use serde::Serialize;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::{Layer, MergeStrategy};
use strata_types::params::{
    BasePatch, ContextPatch, ContextVectors, DateLike, EntryUpdate, ExperiencePatch,
    ExperienceVectors, IdentityPatch, IdentityVectors, MemoryVectors, PreferencePatch,
    PreferenceVectors,
};
use tracing::debug;

fn text(v: Option<&String>) -> StrataResult<Value> {
    Ok(v.map_or(Value::Null, |s| Value::Text(s.clone())))
}

fn real(v: Option<&f64>) -> StrataResult<Value> {
    Ok(v.map_or(Value::Null, |f| Value::Real(*f)))
}

fn blob(v: Option<&Vec<f32>>) -> StrataResult<Value> {
    Ok(v.map_or(Value::Null, |e| Value::Blob(embedding_to_bytes(e))))
}

fn json<T: Serialize>(v: Option<&T>) -> StrataResult<Value> {
    Ok(match v {
        Some(v) => Value::Text(to_json(v)?),
        None => Value::Null,
    })
}

fn date(v: Option<&DateLike>) -> StrataResult<Value> {
    Ok(coerce_date(v).map_or(Value::Null, |d| Value::Text(ts(&d.trunc_subsecs(6)))))
}

fn relationship(v: Option<&String>) -> StrataResult<Value> {
    Ok(normalize_relationship(v.map(String::as_str))
        .map_or(Value::Null, |r| Value::Text(r.as_str().to_string())))
}

fn identity_type(v: Option<&String>) -> StrataResult<Value> {
    Ok(normalize_identity_type(v.map(String::as_str))
        .map_or(Value::Null, |t| Value::Text(t.as_str().to_string())))
}

/// Column assignments collected from a patch.
struct Sets {
    strategy: MergeStrategy,
    columns: Vec<(&'static str, Value)>,
}

impl Sets {
    fn new(strategy: MergeStrategy) -> Self {
        Self {
            strategy,
            columns: Vec::new(),
        }
    }

    /// Assign a tri-state field. Under replace, an absent field is nulled.
    fn field<T>(
        &mut self,
        column: &'static str,
        value: &Option<Option<T>>,
        encode: fn(Option<&T>) -> StrataResult<Value>,
    ) -> StrataResult<()> {
        match (value, self.strategy) {
            (Some(inner), _) => self.columns.push((column, encode(inner.as_ref())?)),
            (None, MergeStrategy::Replace) => self.columns.push((column, encode(None)?)),
            (None, MergeStrategy::Merge) => {}
        }
        Ok(())
    }

    /// `captured_at` is never null; it is only written when supplied.
    fn captured_at(&mut self, value: Option<DateTime<Utc>>) {
        if let Some(at) = value {
            self.columns
                .push(("captured_at", Value::Text(ts(&at.trunc_subsecs(6)))));
        }
    }
}

fn base_sets(patch: &BasePatch) -> StrataResult<Vec<(&'static str, Value)>> {
    let mut sets = Sets::new(MergeStrategy::Merge);
    sets.captured_at(patch.captured_at);
    sets.field("title", &patch.title, text)?;
    sets.field("summary", &patch.summary, text)?;
    sets.field("details", &patch.details, text)?;
    sets.field("title_vector", &patch.title_vector, blob)?;
    sets.field("summary_vector", &patch.summary_vector, blob)?;
    sets.field("details_vector", &patch.details_vector, blob)?;
    sets.field("memory_category", &patch.memory_category, text)?;
    sets.field("memory_type", &patch.memory_type, text)?;
    sets.field("status", &patch.status, text)?;
    sets.field("tags", &patch.tags, json)?;
    sets.field("metadata", &patch.metadata, json)?;
    if let Some(value) = &patch.last_accessed_at {
        let at = value
            .as_ref()
            .and_then(DateLike::coerce)
            .map(|d| d.trunc_subsecs(6))
            .unwrap_or_else(now);
        sets.columns.push(("last_accessed_at", Value::Text(ts(&at))));
    }
    Ok(sets.columns)
}

fn context_sets(patch: &ContextPatch, strategy: MergeStrategy) -> StrataResult<Vec<(&'static str, Value)>> {
    let mut sets = Sets::new(strategy);
    sets.captured_at(patch.captured_at);
    sets.field("title", &patch.title, text)?;
    sets.field("description", &patch.description, text)?;
    sets.field("description_vector", &patch.description_vector, blob)?;
    sets.field("associated_subjects", &patch.associated_subjects, json)?;
    sets.field("associated_objects", &patch.associated_objects, json)?;
    sets.field("current_status", &patch.current_status, text)?;
    sets.field("score_impact", &patch.score_impact, real)?;
    sets.field("score_urgency", &patch.score_urgency, real)?;
    sets.field("type", &patch.context_type, text)?;
    sets.field("tags", &patch.tags, json)?;
    sets.field("metadata", &patch.metadata, json)?;
    Ok(sets.columns)
}

fn experience_sets(
    patch: &ExperiencePatch,
    strategy: MergeStrategy,
) -> StrataResult<Vec<(&'static str, Value)>> {
    let mut sets = Sets::new(strategy);
    sets.captured_at(patch.captured_at);
    sets.field("situation", &patch.situation, text)?;
    sets.field("situation_vector", &patch.situation_vector, blob)?;
    sets.field("action", &patch.action, text)?;
    sets.field("action_vector", &patch.action_vector, blob)?;
    sets.field("key_learning", &patch.key_learning, text)?;
    sets.field("key_learning_vector", &patch.key_learning_vector, blob)?;
    sets.field("reasoning", &patch.reasoning, text)?;
    sets.field("possible_outcome", &patch.possible_outcome, text)?;
    sets.field("score_confidence", &patch.score_confidence, real)?;
    sets.field("type", &patch.experience_type, text)?;
    sets.field("tags", &patch.tags, json)?;
    sets.field("metadata", &patch.metadata, json)?;
    Ok(sets.columns)
}

fn identity_sets(
    patch: &IdentityPatch,
    strategy: MergeStrategy,
) -> StrataResult<Vec<(&'static str, Value)>> {
    let mut sets = Sets::new(strategy);
    sets.captured_at(patch.captured_at);
    sets.field("description", &patch.description, text)?;
    sets.field("description_vector", &patch.description_vector, blob)?;
    sets.field("role", &patch.role, text)?;
    sets.field("relationship", &patch.relationship, relationship)?;
    sets.field("type", &patch.identity_type, identity_type)?;
    sets.field("episodic_date", &patch.episodic_date, date)?;
    sets.field("tags", &patch.tags, json)?;
    sets.field("metadata", &patch.metadata, json)?;
    Ok(sets.columns)
}

fn preference_sets(
    patch: &PreferencePatch,
    strategy: MergeStrategy,
) -> StrataResult<Vec<(&'static str, Value)>> {
    let mut sets = Sets::new(strategy);
    sets.captured_at(patch.captured_at);
    sets.field("conclusion_directives", &patch.conclusion_directives, text)?;
    sets.field(
        "conclusion_directives_vector",
        &patch.conclusion_directives_vector,
        blob,
    )?;
    sets.field("suggestions", &patch.suggestions, text)?;
    sets.field("score_priority", &patch.score_priority, real)?;
    sets.field("type", &patch.preference_type, text)?;
    sets.field("tags", &patch.tags, json)?;
    sets.field("metadata", &patch.metadata, json)?;
    Ok(sets.columns)
}

/// Apply `columns` to the rows of `table` with the given ids, bumping
/// `updated_at`. With `only_if_changed`, rows already holding every value are
/// left alone. Returns the number of rows written.
fn write(
    conn: &Connection,
    table: &str,
    columns: &[(&'static str, Value)],
    user_id: &str,
    ids: &[String],
    only_if_changed: bool,
) -> StrataResult<usize> {
    if columns.is_empty() || ids.is_empty() {
        return Ok(0);
    }
    let assignments: Vec<String> = columns.iter().map(|(c, _)| format!("{c} = ?")).collect();
    let mut sql = format!(
        "UPDATE {table} SET {}, updated_at = ? WHERE user_id = ? AND id IN (SELECT value FROM json_each(?))",
        assignments.join(", ")
    );
    let mut values: Vec<Value> = columns.iter().map(|(_, v)| v.clone()).collect();
    values.push(Value::Text(ts(&now())));
    values.push(Value::Text(user_id.to_string()));
    values.push(Value::Text(id_list(ids)?));

    if only_if_changed {
        let changed: Vec<String> = columns.iter().map(|(c, _)| format!("{c} IS NOT ?")).collect();
        sql.push_str(&format!(" AND ({})", changed.join(" OR ")));
        values.extend(columns.iter().map(|(_, v)| v.clone()));
    }

    conn.execute(&sql, rusqlite::params_from_iter(values.iter()))
        .map_err(|e| StrataError::Memory(e.to_string()))
}

fn layer_table(layer: Layer) -> &'static str {
    match layer {
        Layer::Context => "user_memories_contexts",
        Layer::Experience => "user_memories_experiences",
        Layer::Identity => "user_memories_identities",
        Layer::Preference => "user_memories_preferences",
    }
}

impl UserMemoryStore {
    /// Set fields of a base record (last write wins) and bump `updated_at`.
    ///
    /// Returns `false` when the record does not exist for this user.
    pub fn update(&self, id: &str, patch: BasePatch) -> StrataResult<bool> {
        self.check_base_patch(&patch)?;
        let columns = base_sets(&patch)?;
        let conn = self.lock()?;
        let written = if columns.is_empty() {
            conn.execute(
                "UPDATE user_memories SET updated_at = ?1 WHERE id = ?2 AND user_id = ?3",
                rusqlite::params![ts(&now()), id, self.user_id],
            )
            .map_err(|e| StrataError::Memory(e.to_string()))?
        } else {
            write(&conn, "user_memories", &columns, &self.user_id, &[id.to_string()], false)?
        };
        Ok(written > 0)
    }

    fn check_base_patch(&self, patch: &BasePatch) -> StrataResult<()> {
        self.check_vector("titleVector", patch.title_vector.as_ref().and_then(|v| v.as_deref()))?;
        self.check_vector(
            "summaryVector",
            patch.summary_vector.as_ref().and_then(|v| v.as_deref()),
        )?;
        self.check_vector(
            "detailsVector",
            patch.details_vector.as_ref().and_then(|v| v.as_deref()),
        )
    }

    /// Shared body of the entry updates: locate the row, patch its base
    /// record(s), patch the row itself.
    fn update_entry(
        &self,
        layer: Layer,
        id: &str,
        base: Option<&BasePatch>,
        detail: Vec<(&'static str, Value)>,
    ) -> StrataResult<bool> {
        if let Some(base) = base {
            self.check_base_patch(base)?;
        }
        let base_columns = base.map(base_sets).transpose()?.unwrap_or_default();

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        let Some(memory_ids) = linked_ids(&tx, &self.user_id, layer, id)? else {
            return Ok(false);
        };
        let base_written = write(&tx, "user_memories", &base_columns, &self.user_id, &memory_ids, true)?;
        let detail_written = write(
            &tx,
            layer_table(layer),
            &detail,
            &self.user_id,
            &[id.to_string()],
            true,
        )?;
        tx.commit()
            .map_err(|e| StrataError::Memory(e.to_string()))?;

        debug!(
            user_id = %self.user_id,
            layer = %layer,
            id,
            base_written,
            detail_written,
            "Updated memory entry"
        );
        Ok(true)
    }

    /// Update an identity entry and optionally its base record.
    ///
    /// Relationship and type are normalized after merging; unknown values
    /// become null. Unparsable episodic dates become null.
    pub fn update_identity_entry(&self, update: EntryUpdate<IdentityPatch>) -> StrataResult<bool> {
        let detail = match &update.detail {
            Some(patch) => {
                self.check_vector(
                    "descriptionVector",
                    patch.description_vector.as_ref().and_then(|v| v.as_deref()),
                )?;
                identity_sets(patch, update.merge_strategy)?
            }
            None => Vec::new(),
        };
        self.update_entry(Layer::Identity, &update.id, update.base.as_ref(), detail)
    }

    /// Update a context entry. A base patch applies to every linked base record.
    pub fn update_context_entry(&self, update: EntryUpdate<ContextPatch>) -> StrataResult<bool> {
        let detail = match &update.detail {
            Some(patch) => {
                self.check_vector(
                    "descriptionVector",
                    patch.description_vector.as_ref().and_then(|v| v.as_deref()),
                )?;
                context_sets(patch, update.merge_strategy)?
            }
            None => Vec::new(),
        };
        self.update_entry(Layer::Context, &update.id, update.base.as_ref(), detail)
    }

    /// Update an experience entry and optionally its base record.
    pub fn update_experience_entry(
        &self,
        update: EntryUpdate<ExperiencePatch>,
    ) -> StrataResult<bool> {
        let detail = match &update.detail {
            Some(patch) => {
                for (field, vector) in [
                    ("situationVector", &patch.situation_vector),
                    ("actionVector", &patch.action_vector),
                    ("keyLearningVector", &patch.key_learning_vector),
                ] {
                    self.check_vector(field, vector.as_ref().and_then(|v| v.as_deref()))?;
                }
                experience_sets(patch, update.merge_strategy)?
            }
            None => Vec::new(),
        };
        self.update_entry(Layer::Experience, &update.id, update.base.as_ref(), detail)
    }

    /// Update a preference entry and optionally its base record.
    pub fn update_preference_entry(
        &self,
        update: EntryUpdate<PreferencePatch>,
    ) -> StrataResult<bool> {
        let detail = match &update.detail {
            Some(patch) => {
                self.check_vector(
                    "conclusionDirectivesVector",
                    patch
                        .conclusion_directives_vector
                        .as_ref()
                        .and_then(|v| v.as_deref()),
                )?;
                preference_sets(patch, update.merge_strategy)?
            }
            None => Vec::new(),
        };
        self.update_entry(Layer::Preference, &update.id, update.base.as_ref(), detail)
    }

    fn update_vectors(
        &self,
        table: &str,
        id: &str,
        vectors: &[(&'static str, &Option<Option<Vec<f32>>>)],
    ) -> StrataResult<bool> {
        let mut sets = Sets::new(MergeStrategy::Merge);
        for &(column, vector) in vectors {
            self.check_vector(column, vector.as_ref().and_then(|v| v.as_deref()))?;
            sets.field(column, vector, blob)?;
        }
        if sets.columns.is_empty() {
            return Ok(false);
        }
        let conn = self.lock()?;
        let written = write(&conn, table, &sets.columns, &self.user_id, &[id.to_string()], false)?;
        Ok(written > 0)
    }

    /// Replace the embedding vectors of a base record.
    ///
    /// Fields left out are untouched. Returns `false` if nothing was written.
    pub fn update_user_memory_vectors(&self, id: &str, vectors: MemoryVectors) -> StrataResult<bool> {
        self.update_vectors(
            "user_memories",
            id,
            &[
                ("title_vector", &vectors.title_vector),
                ("summary_vector", &vectors.summary_vector),
                ("details_vector", &vectors.details_vector),
            ],
        )
    }

    /// Replace the embedding vector of a context row.
    pub fn update_context_vectors(&self, id: &str, vectors: ContextVectors) -> StrataResult<bool> {
        self.update_vectors(
            "user_memories_contexts",
            id,
            &[("description_vector", &vectors.description_vector)],
        )
    }

    /// Replace the embedding vectors of an experience row.
    pub fn update_experience_vectors(
        &self,
        id: &str,
        vectors: ExperienceVectors,
    ) -> StrataResult<bool> {
        self.update_vectors(
            "user_memories_experiences",
            id,
            &[
                ("situation_vector", &vectors.situation_vector),
                ("action_vector", &vectors.action_vector),
                ("key_learning_vector", &vectors.key_learning_vector),
            ],
        )
    }

    /// Replace the embedding vector of an identity row.
    pub fn update_identity_vectors(&self, id: &str, vectors: IdentityVectors) -> StrataResult<bool> {
        self.update_vectors(
            "user_memories_identities",
            id,
            &[("description_vector", &vectors.description_vector)],
        )
    }

    /// Replace the embedding vector of a preference row.
    pub fn update_preference_vectors(
        &self,
        id: &str,
        vectors: PreferenceVectors,
    ) -> StrataResult<bool> {
        self.update_vectors(
            "user_memories_preferences",
            id,
            &[(
                "conclusion_directives_vector",
                &vectors.conclusion_directives_vector,
            )],
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{new_memory, sibling, store};
    use crate::UserMemoryStore;
    use strata_types::memory::{IdentityType, Relationship};
    use strata_types::params::{
        BasePatch, ContextPatch, EntryUpdate, IdentityPatch, MemoryVectors, NewContext,
        NewIdentity, NewPreference, PreferencePatch, PreferenceVectors,
    };

    fn identity(store: &UserMemoryStore) -> (String, String) {
        let created = store
            .create_identity_memory(
                new_memory("Sam"),
                NewIdentity {
                    description: Some("Old friend from school".into()),
                    role: Some("classmate".into()),
                    relationship: Some("friend".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        (created.detail.id, created.memory.id)
    }

    fn stored_identity(store: &UserMemoryStore, id: &str) -> strata_types::memory::IdentityMemory {
        store
            .get_all_identities()
            .unwrap()
            .into_iter()
            .find(|i| i.id == id)
            .unwrap()
    }

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let store = store("u1");
        let (id, _) = identity(&store);
        let patch = IdentityPatch {
            role: Some(Some("friend".into())),
            ..Default::default()
        };
        assert!(store.update_identity_entry(EntryUpdate::merge(&id, patch)).unwrap());
        let row = stored_identity(&store, &id);
        assert_eq!(row.role.as_deref(), Some("friend"));
        assert_eq!(row.description.as_deref(), Some("Old friend from school"));
        assert_eq!(row.relationship, Some(Relationship::Friend));
    }

    #[test]
    fn test_replace_nulls_missing_fields() {
        let store = store("u1");
        let (id, _) = identity(&store);
        let patch = IdentityPatch {
            role: Some(Some("friend".into())),
            ..Default::default()
        };
        assert!(store
            .update_identity_entry(EntryUpdate::replace(&id, patch))
            .unwrap());
        let row = stored_identity(&store, &id);
        assert_eq!(row.role.as_deref(), Some("friend"));
        assert!(row.description.is_none());
        assert!(row.relationship.is_none());
    }

    #[test]
    fn test_enum_and_date_coercion_on_merge() {
        let store = store("u1");
        let (id, _) = identity(&store);
        let patch = IdentityPatch {
            relationship: Some(Some("archenemy".into())),
            identity_type: Some(Some(" Personal ".into())),
            episodic_date: Some(Some("nope".into())),
            ..Default::default()
        };
        store
            .update_identity_entry(EntryUpdate::merge(&id, patch))
            .unwrap();
        let row = stored_identity(&store, &id);
        assert!(row.relationship.is_none());
        assert_eq!(row.identity_type, Some(IdentityType::Personal));
        assert!(row.episodic_date.is_none());
    }

    #[test]
    fn test_unchanged_values_do_not_bump_updated_at() {
        let store = store("u1");
        let (id, _) = identity(&store);
        let before = stored_identity(&store, &id).updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        let patch = IdentityPatch {
            role: Some(Some("classmate".into())),
            ..Default::default()
        };
        assert!(store.update_identity_entry(EntryUpdate::merge(&id, patch)).unwrap());
        assert_eq!(stored_identity(&store, &id).updated_at, before);

        let empty = EntryUpdate::merge(&id, IdentityPatch::default());
        assert!(store.update_identity_entry(empty).unwrap());
        assert_eq!(stored_identity(&store, &id).updated_at, before);
    }

    #[test]
    fn test_missing_or_foreign_entry_returns_false() {
        let store = store("u1");
        let (id, _) = identity(&store);
        assert!(!store
            .update_identity_entry(EntryUpdate::merge("missing", IdentityPatch::default()))
            .unwrap());
        let other = sibling(&store, "u2");
        let patch = IdentityPatch {
            role: Some(Some("spy".into())),
            ..Default::default()
        };
        assert!(!other.update_identity_entry(EntryUpdate::merge(&id, patch)).unwrap());
        assert_eq!(stored_identity(&store, &id).role.as_deref(), Some("classmate"));
    }

    #[test]
    fn test_base_patch_through_entry_update() {
        let store = store("u1");
        let (id, memory_id) = identity(&store);
        let update = EntryUpdate {
            id: id.clone(),
            base: Some(BasePatch {
                summary: Some(Some("Updated summary".into())),
                last_accessed_at: Some(Some("invalid".into())),
                ..Default::default()
            }),
            detail: None,
            merge_strategy: Default::default(),
        };
        assert!(store.update_identity_entry(update).unwrap());
        let memory = store.find_by_id(&memory_id).unwrap().unwrap();
        assert_eq!(memory.summary.as_deref(), Some("Updated summary"));
    }

    #[test]
    fn test_context_base_patch_applies_to_all_members() {
        let store = store("u1");
        let created = store
            .create_context_memory(new_memory("ctx"), NewContext::default())
            .unwrap();
        let update = EntryUpdate::merge(
            &created.detail.id,
            ContextPatch {
                current_status: Some(Some("ongoing".into())),
                ..Default::default()
            },
        )
        .with_base(BasePatch {
            status: Some(Some("archived".into())),
            ..Default::default()
        });
        assert!(store.update_context_entry(update).unwrap());
        let memory = store.find_by_id(&created.memory.id).unwrap().unwrap();
        assert_eq!(memory.status.as_deref(), Some("archived"));
    }

    #[test]
    fn test_preference_replace_and_plain_update() {
        let store = store("u1");
        let created = store
            .create_preference_memory(
                new_memory("tabs"),
                NewPreference {
                    conclusion_directives: Some("Use tabs".into()),
                    suggestions: Some("Configure editor".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let patch = PreferencePatch {
            conclusion_directives: Some(Some("Use spaces".into())),
            ..Default::default()
        };
        assert!(store
            .update_preference_entry(EntryUpdate::replace(&created.detail.id, patch))
            .unwrap());

        assert!(store
            .update(
                &created.memory.id,
                BasePatch {
                    title: Some(Some("spaces".into())),
                    ..Default::default()
                },
            )
            .unwrap());
        assert!(!store.update("missing", BasePatch::default()).unwrap());
        let memory = store.find_by_id(&created.memory.id).unwrap().unwrap();
        assert_eq!(memory.title.as_deref(), Some("spaces"));
    }

    #[test]
    fn test_vector_updates() {
        let store = store("u1");
        let created = store
            .create_preference_memory(new_memory("p"), NewPreference::default())
            .unwrap();
        assert!(!store
            .update_user_memory_vectors(&created.memory.id, MemoryVectors::default())
            .unwrap());
        assert!(store
            .update_user_memory_vectors(
                &created.memory.id,
                MemoryVectors {
                    summary_vector: Some(Some(vec![1.0, 0.0, 0.0])),
                    ..Default::default()
                },
            )
            .unwrap());
        assert!(store
            .update_preference_vectors(
                &created.detail.id,
                PreferenceVectors {
                    conclusion_directives_vector: Some(None),
                },
            )
            .unwrap());
        assert!(store
            .update_preference_vectors(
                &created.detail.id,
                PreferenceVectors {
                    conclusion_directives_vector: Some(Some(vec![1.0])),
                },
            )
            .is_err());
    }
}
