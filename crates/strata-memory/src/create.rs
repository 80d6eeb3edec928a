//! Creation transactions: a base record plus its layer detail row.

use crate::codec::{id_list, now, opt_embedding, opt_json, ts};
use crate::normalize::{coerce_date, normalize_identity_type, normalize_relationship};
use crate::substrate::UserMemoryStore;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Connection;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::{
    ContextMemory, Created, ExperienceMemory, IdentityEntryIds, IdentityMemory, Layer, Metadata,
    PreferenceMemory, UserMemory,
};
use strata_types::params::{
    BasePatch, DateLike, IdentityPatch, NewContext, NewExperience, NewIdentity, NewMemory,
    NewPreference,
};
use tracing::debug;
use uuid::Uuid;

/// Vectors written alongside a base record.
#[derive(Default)]
pub(crate) struct BaseVectors<'a> {
    pub title: Option<&'a [f32]>,
    pub summary: Option<&'a [f32]>,
    pub details: Option<&'a [f32]>,
}

fn failed(what: &str) -> impl Fn(rusqlite::Error) -> StrataError + '_ {
    move |e| StrataError::CreationFailed(format!("{what}: {e}"))
}

fn captured(at: Option<DateTime<Utc>>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    at.map(|t| t.trunc_subsecs(6)).unwrap_or(fallback)
}

impl UserMemoryStore {
    fn new_memory(
        &self,
        layer: Layer,
        base: &NewMemory,
        tags: Option<Vec<String>>,
        metadata: Option<Metadata>,
        status: Option<String>,
    ) -> UserMemory {
        let now = now();
        UserMemory {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            memory_layer: layer,
            memory_category: base.memory_category.clone(),
            memory_type: base.memory_type.clone(),
            title: Some(base.title.clone()),
            summary: Some(base.summary.clone()),
            details: Some(base.details.clone()),
            tags,
            status,
            metadata,
            captured_at: captured(base.captured_at, now),
            created_at: now,
            updated_at: now,
            accessed_at: now,
            last_accessed_at: now,
            accessed_count: 0,
        }
    }

    fn check_base_vectors(&self, base: &NewMemory) -> StrataResult<()> {
        self.check_vector("titleVector", base.title_vector.as_deref())?;
        self.check_vector("summaryVector", base.summary_vector.as_deref())?;
        self.check_vector("detailsVector", base.details_vector.as_deref())
    }

    /// Insert a base record with no detail row.
    pub fn create(&self, layer: Layer, params: NewMemory) -> StrataResult<UserMemory> {
        self.check_base_vectors(&params)?;
        let memory = self.new_memory(layer, &params, None, None, None);
        let conn = self.lock()?;
        insert_memory(&conn, &memory, &base_vectors(&params)).map_err(failed("user memory"))?;
        debug!(user_id = %self.user_id, layer = %layer, id = %memory.id, "Created base memory");
        Ok(memory)
    }

    /// Insert a context memory: base record plus a context row aggregating it.
    pub fn create_context_memory(
        &self,
        base: NewMemory,
        context: NewContext,
    ) -> StrataResult<Created<ContextMemory>> {
        self.check_base_vectors(&base)?;
        self.check_vector("descriptionVector", context.description_vector.as_deref())?;

        let memory = self.new_memory(
            Layer::Context,
            &base,
            Some(context.tags.clone()),
            context.metadata.clone(),
            None,
        );
        let detail = ContextMemory {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            user_memory_ids: vec![memory.id.clone()],
            title: context.title,
            description: context.description,
            associated_subjects: context.associated_subjects,
            associated_objects: context.associated_objects,
            current_status: context.current_status,
            score_impact: context.score_impact,
            score_urgency: context.score_urgency,
            context_type: context.context_type,
            tags: Some(context.tags),
            metadata: context.metadata,
            captured_at: captured(context.captured_at, memory.created_at),
            created_at: memory.created_at,
            updated_at: memory.created_at,
            accessed_at: memory.created_at,
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(failed("context memory"))?;
        insert_memory(&tx, &memory, &base_vectors(&base)).map_err(failed("context memory"))?;
        tx.execute(
            "INSERT INTO user_memories_contexts (id, user_id, user_memory_ids, title, description, description_vector,
                 associated_subjects, associated_objects, current_status, score_impact, score_urgency, type, tags, metadata,
                 captured_at, created_at, updated_at, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16, ?16)",
            rusqlite::params![
                detail.id,
                detail.user_id,
                id_list(&detail.user_memory_ids)?,
                detail.title,
                detail.description,
                opt_embedding(context.description_vector.as_deref()),
                opt_json(Some(&detail.associated_subjects))?,
                opt_json(Some(&detail.associated_objects))?,
                detail.current_status,
                detail.score_impact,
                detail.score_urgency,
                detail.context_type,
                opt_json(detail.tags.as_ref())?,
                opt_json(detail.metadata.as_ref())?,
                ts(&detail.captured_at),
                ts(&detail.created_at),
            ],
        )
        .map_err(failed("context memory"))?;
        tx.commit().map_err(failed("context memory"))?;

        debug!(user_id = %self.user_id, layer = "context", id = %detail.id, "Created layered memory");
        Ok(Created { memory, detail })
    }

    /// Insert an experience memory.
    pub fn create_experience_memory(
        &self,
        base: NewMemory,
        experience: NewExperience,
    ) -> StrataResult<Created<ExperienceMemory>> {
        self.check_base_vectors(&base)?;
        self.check_vector("situationVector", experience.situation_vector.as_deref())?;
        self.check_vector("actionVector", experience.action_vector.as_deref())?;
        self.check_vector("keyLearningVector", experience.key_learning_vector.as_deref())?;

        let memory = self.new_memory(
            Layer::Experience,
            &base,
            Some(experience.tags.clone()),
            experience.metadata.clone(),
            None,
        );
        let detail = ExperienceMemory {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            user_memory_id: memory.id.clone(),
            situation: experience.situation,
            action: experience.action,
            key_learning: experience.key_learning,
            reasoning: experience.reasoning,
            possible_outcome: experience.possible_outcome,
            score_confidence: experience.score_confidence,
            experience_type: experience
                .experience_type
                .or_else(|| base.memory_type.clone()),
            tags: Some(experience.tags),
            metadata: experience.metadata,
            captured_at: captured(experience.captured_at, memory.created_at),
            created_at: memory.created_at,
            updated_at: memory.created_at,
            accessed_at: memory.created_at,
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(failed("experience memory"))?;
        insert_memory(&tx, &memory, &base_vectors(&base)).map_err(failed("experience memory"))?;
        tx.execute(
            "INSERT INTO user_memories_experiences (id, user_id, user_memory_id, situation, situation_vector,
                 action, action_vector, key_learning, key_learning_vector, reasoning, possible_outcome,
                 score_confidence, type, tags, metadata, captured_at, created_at, updated_at, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17, ?17)",
            rusqlite::params![
                detail.id,
                detail.user_id,
                detail.user_memory_id,
                detail.situation,
                opt_embedding(experience.situation_vector.as_deref()),
                detail.action,
                opt_embedding(experience.action_vector.as_deref()),
                detail.key_learning,
                opt_embedding(experience.key_learning_vector.as_deref()),
                detail.reasoning,
                detail.possible_outcome,
                detail.score_confidence,
                detail.experience_type,
                opt_json(detail.tags.as_ref())?,
                opt_json(detail.metadata.as_ref())?,
                ts(&detail.captured_at),
                ts(&detail.created_at),
            ],
        )
        .map_err(failed("experience memory"))?;
        tx.commit().map_err(failed("experience memory"))?;

        debug!(user_id = %self.user_id, layer = "experience", id = %detail.id, "Created layered memory");
        Ok(Created { memory, detail })
    }

    /// Insert an identity memory. Relationship and type are normalized.
    pub fn create_identity_memory(
        &self,
        base: NewMemory,
        identity: NewIdentity,
    ) -> StrataResult<Created<IdentityMemory>> {
        self.check_base_vectors(&base)?;
        self.check_vector("descriptionVector", identity.description_vector.as_deref())?;

        let memory = self.new_memory(
            Layer::Identity,
            &base,
            Some(identity.tags.clone()),
            identity.metadata.clone(),
            None,
        );
        let detail = IdentityMemory {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            user_memory_id: memory.id.clone(),
            description: identity.description,
            role: identity.role,
            relationship: normalize_relationship(identity.relationship.as_deref()),
            identity_type: normalize_identity_type(identity.identity_type.as_deref()),
            episodic_date: coerce_date(identity.episodic_date.as_ref()).map(|d| d.trunc_subsecs(6)),
            tags: Some(identity.tags),
            metadata: identity.metadata,
            captured_at: captured(identity.captured_at, memory.created_at),
            created_at: memory.created_at,
            updated_at: memory.created_at,
            accessed_at: memory.created_at,
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(failed("identity memory"))?;
        insert_memory(&tx, &memory, &base_vectors(&base)).map_err(failed("identity memory"))?;
        insert_identity(&tx, &detail, identity.description_vector.as_deref())?;
        tx.commit().map_err(failed("identity memory"))?;

        debug!(user_id = %self.user_id, layer = "identity", id = %detail.id, "Created layered memory");
        Ok(Created { memory, detail })
    }

    /// Insert a preference memory.
    pub fn create_preference_memory(
        &self,
        base: NewMemory,
        preference: NewPreference,
    ) -> StrataResult<Created<PreferenceMemory>> {
        self.check_base_vectors(&base)?;
        self.check_vector(
            "conclusionDirectivesVector",
            preference.conclusion_directives_vector.as_deref(),
        )?;

        let memory = self.new_memory(
            Layer::Preference,
            &base,
            Some(preference.tags.clone()),
            preference.metadata.clone(),
            None,
        );
        let detail = PreferenceMemory {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            user_memory_id: memory.id.clone(),
            conclusion_directives: preference.conclusion_directives,
            suggestions: preference.suggestions,
            score_priority: preference.score_priority,
            preference_type: preference
                .preference_type
                .or_else(|| base.memory_type.clone()),
            tags: Some(preference.tags),
            metadata: preference.metadata,
            captured_at: captured(preference.captured_at, memory.created_at),
            created_at: memory.created_at,
            updated_at: memory.created_at,
            accessed_at: memory.created_at,
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(failed("preference memory"))?;
        insert_memory(&tx, &memory, &base_vectors(&base)).map_err(failed("preference memory"))?;
        tx.execute(
            "INSERT INTO user_memories_preferences (id, user_id, user_memory_id, conclusion_directives,
                 conclusion_directives_vector, suggestions, score_priority, type, tags, metadata,
                 captured_at, created_at, updated_at, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12, ?12)",
            rusqlite::params![
                detail.id,
                detail.user_id,
                detail.user_memory_id,
                detail.conclusion_directives,
                opt_embedding(preference.conclusion_directives_vector.as_deref()),
                detail.suggestions,
                detail.score_priority,
                detail.preference_type,
                opt_json(detail.tags.as_ref())?,
                opt_json(detail.metadata.as_ref())?,
                ts(&detail.captured_at),
                ts(&detail.created_at),
            ],
        )
        .map_err(failed("preference memory"))?;
        tx.commit().map_err(failed("preference memory"))?;

        debug!(user_id = %self.user_id, layer = "preference", id = %detail.id, "Created layered memory");
        Ok(Created { memory, detail })
    }

    /// Insert an identity entry from loosely typed payloads.
    ///
    /// `status` defaults to `"active"` unless explicitly nulled, and an
    /// unparsable `lastAccessedAt` resolves to now.
    pub fn add_identity_entry(
        &self,
        base: BasePatch,
        identity: IdentityPatch,
    ) -> StrataResult<IdentityEntryIds> {
        let title_vector = base.title_vector.clone().flatten();
        let summary_vector = base.summary_vector.clone().flatten();
        let details_vector = base.details_vector.clone().flatten();
        let description_vector = identity.description_vector.clone().flatten();
        self.check_vector("titleVector", title_vector.as_deref())?;
        self.check_vector("summaryVector", summary_vector.as_deref())?;
        self.check_vector("detailsVector", details_vector.as_deref())?;
        self.check_vector("descriptionVector", description_vector.as_deref())?;

        let now = now();
        let last_accessed_at = base
            .last_accessed_at
            .clone()
            .flatten()
            .as_ref()
            .and_then(DateLike::coerce)
            .map(|d| d.trunc_subsecs(6))
            .unwrap_or(now);
        let memory = UserMemory {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            memory_layer: Layer::Identity,
            memory_category: base.memory_category.flatten(),
            memory_type: base.memory_type.flatten(),
            title: base.title.flatten(),
            summary: base.summary.flatten(),
            details: base.details.flatten(),
            tags: base.tags.flatten(),
            status: match base.status {
                None => Some("active".to_string()),
                Some(status) => status,
            },
            metadata: base.metadata.flatten(),
            captured_at: captured(base.captured_at, now),
            created_at: now,
            updated_at: now,
            accessed_at: now,
            last_accessed_at,
            accessed_count: 0,
        };
        let episodic_date = identity.episodic_date.flatten();
        let relationship = identity.relationship.flatten();
        let identity_type = identity.identity_type.flatten();
        let detail = IdentityMemory {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            user_memory_id: memory.id.clone(),
            description: identity.description.flatten(),
            role: identity.role.flatten(),
            relationship: normalize_relationship(relationship.as_deref()),
            identity_type: normalize_identity_type(identity_type.as_deref()),
            episodic_date: coerce_date(episodic_date.as_ref()).map(|d| d.trunc_subsecs(6)),
            tags: identity.tags.flatten(),
            metadata: identity.metadata.flatten(),
            captured_at: captured(identity.captured_at, now),
            created_at: now,
            updated_at: now,
            accessed_at: now,
        };

        let vectors = BaseVectors {
            title: title_vector.as_deref(),
            summary: summary_vector.as_deref(),
            details: details_vector.as_deref(),
        };
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(failed("identity entry"))?;
        insert_memory(&tx, &memory, &vectors).map_err(failed("identity entry"))?;
        insert_identity(&tx, &detail, description_vector.as_deref())?;
        tx.commit().map_err(failed("identity entry"))?;

        debug!(user_id = %self.user_id, id = %detail.id, "Added identity entry");
        Ok(IdentityEntryIds {
            identity_id: detail.id,
            user_memory_id: memory.id,
        })
    }
}

fn base_vectors(base: &NewMemory) -> BaseVectors<'_> {
    BaseVectors {
        title: base.title_vector.as_deref(),
        summary: base.summary_vector.as_deref(),
        details: base.details_vector.as_deref(),
    }
}

pub(crate) fn insert_memory(
    conn: &Connection,
    memory: &UserMemory,
    vectors: &BaseVectors<'_>,
) -> rusqlite::Result<()> {
    let tags = opt_json(memory.tags.as_ref())
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let metadata = opt_json(memory.metadata.as_ref())
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO user_memories (id, user_id, memory_layer, memory_category, memory_type,
             title, title_vector, summary, summary_vector, details, details_vector, tags, status, metadata,
             captured_at, created_at, updated_at, accessed_at, last_accessed_at, accessed_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16, ?16, ?17, 0)",
        rusqlite::params![
            memory.id,
            memory.user_id,
            memory.memory_layer.as_str(),
            memory.memory_category,
            memory.memory_type,
            memory.title,
            opt_embedding(vectors.title),
            memory.summary,
            opt_embedding(vectors.summary),
            memory.details,
            opt_embedding(vectors.details),
            tags,
            memory.status,
            metadata,
            ts(&memory.captured_at),
            ts(&memory.created_at),
            ts(&memory.last_accessed_at),
        ],
    )?;
    Ok(())
}

fn insert_identity(
    conn: &Connection,
    detail: &IdentityMemory,
    description_vector: Option<&[f32]>,
) -> StrataResult<()> {
    conn.execute(
        "INSERT INTO user_memories_identities (id, user_id, user_memory_id, description, description_vector,
             role, relationship, type, episodic_date, tags, metadata, captured_at, created_at, updated_at, accessed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13, ?13)",
        rusqlite::params![
            detail.id,
            detail.user_id,
            detail.user_memory_id,
            detail.description,
            opt_embedding(description_vector),
            detail.role,
            detail.relationship.map(|r| r.as_str()),
            detail.identity_type.map(|t| t.as_str()),
            detail.episodic_date.as_ref().map(ts),
            opt_json(detail.tags.as_ref())?,
            opt_json(detail.metadata.as_ref())?,
            ts(&detail.captured_at),
            ts(&detail.created_at),
        ],
    )
    .map_err(failed("identity memory"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::substrate::MemorySubstrate;
    use crate::test_support::{new_memory, store};
    use strata_types::config::MemoryConfig;
    use strata_types::error::StrataError;
    use strata_types::memory::{IdentityType, Layer, Relationship};
    use strata_types::params::{BasePatch, IdentityPatch, NewContext, NewExperience, NewIdentity};

    #[test]
    fn test_create_base_only() {
        let store = store("u1");
        let memory = store.create(Layer::Experience, new_memory("plain")).unwrap();
        assert_eq!(memory.memory_layer, Layer::Experience);
        assert_eq!(memory.title.as_deref(), Some("plain"));
        assert!(memory.tags.is_none());

        let fetched = store.find_by_id(&memory.id).unwrap().unwrap();
        assert_eq!(fetched.created_at, memory.created_at);
    }

    #[test]
    fn test_create_context_links_base() {
        let store = store("u1");
        let created = store
            .create_context_memory(
                new_memory("Project Atlas"),
                NewContext {
                    title: Some("Atlas launch".into()),
                    tags: vec!["work".into()],
                    score_impact: Some(0.8),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(created.detail.user_memory_ids, vec![created.memory.id.clone()]);
        assert_eq!(created.memory.tags, Some(vec!["work".to_string()]));
        assert_eq!(created.memory.memory_layer, Layer::Context);
    }

    #[test]
    fn test_experience_type_falls_back_to_memory_type() {
        let store = store("u1");
        let mut base = new_memory("Debugging");
        base.memory_type = Some("lesson".into());
        let created = store
            .create_experience_memory(base, NewExperience::default())
            .unwrap();
        assert_eq!(created.detail.experience_type.as_deref(), Some("lesson"));
    }

    #[test]
    fn test_identity_normalizes_enums() {
        let store = store("u1");
        let created = store
            .create_identity_memory(
                new_memory("Sam"),
                NewIdentity {
                    relationship: Some(" Friend ".into()),
                    identity_type: Some("bogus".into()),
                    episodic_date: Some("not a date".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(created.detail.relationship, Some(Relationship::Friend));
        assert_eq!(created.detail.identity_type, None);
        assert_eq!(created.detail.episodic_date, None);
    }

    #[test]
    fn test_wrong_vector_length_rejected() {
        let substrate = MemorySubstrate::open(MemoryConfig::in_memory(4)).unwrap();
        let store = substrate.for_user("u1");
        let mut base = new_memory("bad");
        base.title_vector = Some(vec![1.0, 2.0]);
        let err = store
            .create_context_memory(base, NewContext::default())
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidInput(_)));
    }

    #[test]
    fn test_add_identity_entry_defaults() {
        let store = store("u1");
        let ids = store
            .add_identity_entry(
                BasePatch {
                    title: Some(Some("Works at Acme".into())),
                    last_accessed_at: Some(Some("garbage".into())),
                    ..Default::default()
                },
                IdentityPatch {
                    role: Some(Some("engineer".into())),
                    identity_type: Some(Some("PROFESSIONAL".into())),
                    ..Default::default()
                },
            )
            .unwrap();

        let memory = store.find_by_id(&ids.user_memory_id).unwrap().unwrap();
        assert_eq!(memory.status.as_deref(), Some("active"));
        assert_eq!(memory.memory_layer, Layer::Identity);

        let identities = store.get_all_identities().unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].id, ids.identity_id);
        assert_eq!(identities[0].identity_type, Some(IdentityType::Professional));
    }

    #[test]
    fn test_add_identity_entry_explicit_null_status() {
        let store = store("u1");
        let ids = store
            .add_identity_entry(
                BasePatch {
                    status: Some(None),
                    ..Default::default()
                },
                IdentityPatch::default(),
            )
            .unwrap();
        let memory = store.find_by_id(&ids.user_memory_id).unwrap().unwrap();
        assert!(memory.status.is_none());
    }
}
