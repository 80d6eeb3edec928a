//! Column lists and row mappers for the base and detail tables.
//!
//! Every query aliases its tables the same way (`m` base, `c` context,
//! `e` experience, `i` identity, `p` preference) so the column lists can be
//! spliced into joins. Mappers take the index of the first column so a
//! joined row can be decoded in two passes.

use crate::codec::{from_json, parse_opt_ts, parse_ts};
use rusqlite::types::Type;
use rusqlite::Row;
use strata_types::memory::{
    ContextMemory, ExperienceMemory, IdentityMemory, IdentityType, Layer, PreferenceMemory,
    Relationship, UserMemory,
};

pub(crate) const MEMORY_COLUMNS: &str = "m.id, m.user_id, m.memory_layer, m.memory_category, m.memory_type, \
     m.title, m.summary, m.details, m.tags, m.status, m.metadata, \
     m.captured_at, m.created_at, m.updated_at, m.accessed_at, m.last_accessed_at, m.accessed_count";
pub(crate) const MEMORY_WIDTH: usize = 17;

pub(crate) const CONTEXT_COLUMNS: &str = "c.id, c.user_id, c.user_memory_ids, c.title, c.description, \
     c.associated_subjects, c.associated_objects, c.current_status, c.score_impact, c.score_urgency, \
     c.type, c.tags, c.metadata, c.captured_at, c.created_at, c.updated_at, c.accessed_at";
pub(crate) const CONTEXT_WIDTH: usize = 17;

pub(crate) const EXPERIENCE_COLUMNS: &str = "e.id, e.user_id, e.user_memory_id, e.situation, e.action, \
     e.key_learning, e.reasoning, e.possible_outcome, e.score_confidence, e.type, e.tags, e.metadata, \
     e.captured_at, e.created_at, e.updated_at, e.accessed_at";
pub(crate) const EXPERIENCE_WIDTH: usize = 16;

pub(crate) const IDENTITY_COLUMNS: &str = "i.id, i.user_id, i.user_memory_id, i.description, i.role, \
     i.relationship, i.type, i.episodic_date, i.tags, i.metadata, \
     i.captured_at, i.created_at, i.updated_at, i.accessed_at";

pub(crate) const PREFERENCE_COLUMNS: &str = "p.id, p.user_id, p.user_memory_id, p.conclusion_directives, \
     p.suggestions, p.score_priority, p.type, p.tags, p.metadata, \
     p.captured_at, p.created_at, p.updated_at, p.accessed_at";
pub(crate) const PREFERENCE_WIDTH: usize = 13;

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row.get(idx)?;
    Ok(parse_ts(&s))
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    Ok(from_json(row.get::<_, Option<String>>(idx)?))
}

pub(crate) fn memory_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<UserMemory> {
    let layer: String = row.get(at + 2)?;
    let memory_layer = layer
        .parse::<Layer>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(at + 2, Type::Text, Box::new(e)))?;
    let accessed_count: i64 = row.get(at + 16)?;
    Ok(UserMemory {
        id: row.get(at)?,
        user_id: row.get(at + 1)?,
        memory_layer,
        memory_category: row.get(at + 3)?,
        memory_type: row.get(at + 4)?,
        title: row.get(at + 5)?,
        summary: row.get(at + 6)?,
        details: row.get(at + 7)?,
        tags: json_at(row, at + 8)?,
        status: row.get(at + 9)?,
        metadata: json_at(row, at + 10)?,
        captured_at: ts_at(row, at + 11)?,
        created_at: ts_at(row, at + 12)?,
        updated_at: ts_at(row, at + 13)?,
        accessed_at: ts_at(row, at + 14)?,
        last_accessed_at: ts_at(row, at + 15)?,
        accessed_count: accessed_count.max(0) as u64,
    })
}

pub(crate) fn context_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<ContextMemory> {
    Ok(ContextMemory {
        id: row.get(at)?,
        user_id: row.get(at + 1)?,
        user_memory_ids: json_at(row, at + 2)?.unwrap_or_default(),
        title: row.get(at + 3)?,
        description: row.get(at + 4)?,
        associated_subjects: json_at(row, at + 5)?.unwrap_or_default(),
        associated_objects: json_at(row, at + 6)?.unwrap_or_default(),
        current_status: row.get(at + 7)?,
        score_impact: row.get(at + 8)?,
        score_urgency: row.get(at + 9)?,
        context_type: row.get(at + 10)?,
        tags: json_at(row, at + 11)?,
        metadata: json_at(row, at + 12)?,
        captured_at: ts_at(row, at + 13)?,
        created_at: ts_at(row, at + 14)?,
        updated_at: ts_at(row, at + 15)?,
        accessed_at: ts_at(row, at + 16)?,
    })
}

pub(crate) fn experience_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<ExperienceMemory> {
    Ok(ExperienceMemory {
        id: row.get(at)?,
        user_id: row.get(at + 1)?,
        user_memory_id: row.get(at + 2)?,
        situation: row.get(at + 3)?,
        action: row.get(at + 4)?,
        key_learning: row.get(at + 5)?,
        reasoning: row.get(at + 6)?,
        possible_outcome: row.get(at + 7)?,
        score_confidence: row.get(at + 8)?,
        experience_type: row.get(at + 9)?,
        tags: json_at(row, at + 10)?,
        metadata: json_at(row, at + 11)?,
        captured_at: ts_at(row, at + 12)?,
        created_at: ts_at(row, at + 13)?,
        updated_at: ts_at(row, at + 14)?,
        accessed_at: ts_at(row, at + 15)?,
    })
}

pub(crate) fn identity_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<IdentityMemory> {
    let relationship: Option<String> = row.get(at + 5)?;
    let identity_type: Option<String> = row.get(at + 6)?;
    Ok(IdentityMemory {
        id: row.get(at)?,
        user_id: row.get(at + 1)?,
        user_memory_id: row.get(at + 2)?,
        description: row.get(at + 3)?,
        role: row.get(at + 4)?,
        relationship: relationship.as_deref().and_then(Relationship::normalize),
        identity_type: identity_type.as_deref().and_then(IdentityType::normalize),
        episodic_date: parse_opt_ts(row.get(at + 7)?),
        tags: json_at(row, at + 8)?,
        metadata: json_at(row, at + 9)?,
        captured_at: ts_at(row, at + 10)?,
        created_at: ts_at(row, at + 11)?,
        updated_at: ts_at(row, at + 12)?,
        accessed_at: ts_at(row, at + 13)?,
    })
}

pub(crate) fn preference_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<PreferenceMemory> {
    Ok(PreferenceMemory {
        id: row.get(at)?,
        user_id: row.get(at + 1)?,
        user_memory_id: row.get(at + 2)?,
        conclusion_directives: row.get(at + 3)?,
        suggestions: row.get(at + 4)?,
        score_priority: row.get(at + 5)?,
        preference_type: row.get(at + 6)?,
        tags: json_at(row, at + 7)?,
        metadata: json_at(row, at + 8)?,
        captured_at: ts_at(row, at + 9)?,
        created_at: ts_at(row, at + 10)?,
        updated_at: ts_at(row, at + 11)?,
        accessed_at: ts_at(row, at + 12)?,
    })
}
