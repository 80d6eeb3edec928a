//! Inputs to the memory store: creation payloads, partial-update patches,
//! search and listing parameters.
//!
//! Patches use `Option<Option<T>>`: `None` leaves a field out of the update,
//! `Some(None)` writes null, `Some(Some(v))` writes `v`.

use crate::memory::{AssociatedEntity, Layer, MergeStrategy, Metadata};
use crate::serde_compat::double_option;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A loosely typed date: an actual timestamp, epoch milliseconds, or text.
///
/// Coercion never fails loudly; unparsable input yields `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateLike {
    At(DateTime<Utc>),
    Millis(i64),
    Text(String),
}

impl DateLike {
    /// Resolve to a UTC timestamp, `None` when the value cannot be parsed.
    pub fn coerce(&self) -> Option<DateTime<Utc>> {
        match self {
            DateLike::At(dt) => Some(*dt),
            DateLike::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            DateLike::Text(text) => parse_date_text(text),
        }
    }
}

impl From<DateTime<Utc>> for DateLike {
    fn from(dt: DateTime<Utc>) -> Self {
        DateLike::At(dt)
    }
}

impl From<&str> for DateLike {
    fn from(s: &str) -> Self {
        DateLike::Text(s.to_string())
    }
}

fn parse_date_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Shared fields of every new base record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewMemory {
    pub title: String,
    pub summary: String,
    pub details: String,
    pub title_vector: Option<Vec<f32>>,
    pub summary_vector: Option<Vec<f32>>,
    pub details_vector: Option<Vec<f32>>,
    pub memory_category: Option<String>,
    pub memory_type: Option<String>,
    /// When the fact was observed. Defaults to now.
    pub captured_at: Option<DateTime<Utc>>,
}

/// Context-specific fields for `create_context_memory`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewContext {
    pub title: Option<String>,
    pub description: Option<String>,
    pub description_vector: Option<Vec<f32>>,
    pub associated_subjects: Vec<AssociatedEntity>,
    pub associated_objects: Vec<AssociatedEntity>,
    pub current_status: Option<String>,
    pub score_impact: Option<f64>,
    pub score_urgency: Option<f64>,
    #[serde(rename = "type")]
    pub context_type: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Option<Metadata>,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Experience-specific fields for `create_experience_memory`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewExperience {
    pub situation: Option<String>,
    pub situation_vector: Option<Vec<f32>>,
    pub action: Option<String>,
    pub action_vector: Option<Vec<f32>>,
    pub key_learning: Option<String>,
    pub key_learning_vector: Option<Vec<f32>>,
    pub reasoning: Option<String>,
    pub possible_outcome: Option<String>,
    pub score_confidence: Option<f64>,
    /// Falls back to the base record's `memory_type` when absent.
    #[serde(rename = "type")]
    pub experience_type: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Option<Metadata>,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Identity-specific fields for `create_identity_memory`.
///
/// `relationship` and `identity_type` are normalized; unknown values are
/// stored as null.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewIdentity {
    pub description: Option<String>,
    pub description_vector: Option<Vec<f32>>,
    pub role: Option<String>,
    pub relationship: Option<String>,
    #[serde(rename = "type")]
    pub identity_type: Option<String>,
    pub episodic_date: Option<DateLike>,
    pub tags: Vec<String>,
    pub metadata: Option<Metadata>,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Preference-specific fields for `create_preference_memory`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewPreference {
    pub conclusion_directives: Option<String>,
    pub conclusion_directives_vector: Option<Vec<f32>>,
    pub suggestions: Option<String>,
    pub score_priority: Option<f64>,
    /// Falls back to the base record's `memory_type` when absent.
    #[serde(rename = "type")]
    pub preference_type: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Option<Metadata>,
    pub captured_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Partial update of a base record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BasePatch {
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "double_option")]
    pub title: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub summary: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub details: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub title_vector: Option<Option<Vec<f32>>>,
    #[serde(deserialize_with = "double_option")]
    pub summary_vector: Option<Option<Vec<f32>>>,
    #[serde(deserialize_with = "double_option")]
    pub details_vector: Option<Option<Vec<f32>>>,
    #[serde(deserialize_with = "double_option")]
    pub memory_category: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub memory_type: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub status: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub tags: Option<Option<Vec<String>>>,
    #[serde(deserialize_with = "double_option")]
    pub metadata: Option<Option<Metadata>>,
    /// Coerced; an unparsable or null value resolves to now.
    #[serde(deserialize_with = "double_option")]
    pub last_accessed_at: Option<Option<DateLike>>,
}

impl BasePatch {
    /// True when no field is supplied.
    pub fn is_empty(&self) -> bool {
        *self == BasePatch::default()
    }
}

/// Partial update of a context row.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextPatch {
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "double_option")]
    pub title: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub description_vector: Option<Option<Vec<f32>>>,
    #[serde(deserialize_with = "double_option")]
    pub associated_subjects: Option<Option<Vec<AssociatedEntity>>>,
    #[serde(deserialize_with = "double_option")]
    pub associated_objects: Option<Option<Vec<AssociatedEntity>>>,
    #[serde(deserialize_with = "double_option")]
    pub current_status: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub score_impact: Option<Option<f64>>,
    #[serde(deserialize_with = "double_option")]
    pub score_urgency: Option<Option<f64>>,
    #[serde(rename = "type", deserialize_with = "double_option")]
    pub context_type: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub tags: Option<Option<Vec<String>>>,
    #[serde(deserialize_with = "double_option")]
    pub metadata: Option<Option<Metadata>>,
}

/// Partial update of an experience row.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperiencePatch {
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "double_option")]
    pub situation: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub situation_vector: Option<Option<Vec<f32>>>,
    #[serde(deserialize_with = "double_option")]
    pub action: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub action_vector: Option<Option<Vec<f32>>>,
    #[serde(deserialize_with = "double_option")]
    pub key_learning: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub key_learning_vector: Option<Option<Vec<f32>>>,
    #[serde(deserialize_with = "double_option")]
    pub reasoning: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub possible_outcome: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub score_confidence: Option<Option<f64>>,
    #[serde(rename = "type", deserialize_with = "double_option")]
    pub experience_type: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub tags: Option<Option<Vec<String>>>,
    #[serde(deserialize_with = "double_option")]
    pub metadata: Option<Option<Metadata>>,
}

/// Partial update of an identity row. Also the payload of `add_identity_entry`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityPatch {
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub description_vector: Option<Option<Vec<f32>>>,
    #[serde(deserialize_with = "double_option")]
    pub role: Option<Option<String>>,
    /// Normalized after merge; unknown values become null.
    #[serde(deserialize_with = "double_option")]
    pub relationship: Option<Option<String>>,
    /// Normalized after merge; unknown values become null.
    #[serde(rename = "type", deserialize_with = "double_option")]
    pub identity_type: Option<Option<String>>,
    /// Coerced; unparsable dates become null.
    #[serde(deserialize_with = "double_option")]
    pub episodic_date: Option<Option<DateLike>>,
    #[serde(deserialize_with = "double_option")]
    pub tags: Option<Option<Vec<String>>>,
    #[serde(deserialize_with = "double_option")]
    pub metadata: Option<Option<Metadata>>,
}

/// Partial update of a preference row.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencePatch {
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "double_option")]
    pub conclusion_directives: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub conclusion_directives_vector: Option<Option<Vec<f32>>>,
    #[serde(deserialize_with = "double_option")]
    pub suggestions: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub score_priority: Option<Option<f64>>,
    #[serde(rename = "type", deserialize_with = "double_option")]
    pub preference_type: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub tags: Option<Option<Vec<String>>>,
    #[serde(deserialize_with = "double_option")]
    pub metadata: Option<Option<Metadata>>,
}

/// An entry update: an optional base patch, an optional detail patch, and
/// how the detail patch combines with the stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryUpdate<P> {
    /// Id of the detail row.
    pub id: String,
    pub base: Option<BasePatch>,
    pub detail: Option<P>,
    pub merge_strategy: MergeStrategy,
}

impl<P> EntryUpdate<P> {
    /// A merge update of the detail row only.
    pub fn merge(id: impl Into<String>, detail: P) -> Self {
        Self {
            id: id.into(),
            base: None,
            detail: Some(detail),
            merge_strategy: MergeStrategy::Merge,
        }
    }

    /// A replace update of the detail row only.
    pub fn replace(id: impl Into<String>, detail: P) -> Self {
        Self {
            id: id.into(),
            base: None,
            detail: Some(detail),
            merge_strategy: MergeStrategy::Replace,
        }
    }

    /// Attach a base-record patch.
    pub fn with_base(mut self, base: BasePatch) -> Self {
        self.base = Some(base);
        self
    }
}

// ---------------------------------------------------------------------------
// Vector maintenance
// ---------------------------------------------------------------------------

/// Replacement vectors for a base record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryVectors {
    pub title_vector: Option<Option<Vec<f32>>>,
    pub summary_vector: Option<Option<Vec<f32>>>,
    pub details_vector: Option<Option<Vec<f32>>>,
}

/// Replacement vectors for a context row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextVectors {
    pub description_vector: Option<Option<Vec<f32>>>,
}

/// Replacement vectors for an experience row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperienceVectors {
    pub situation_vector: Option<Option<Vec<f32>>>,
    pub action_vector: Option<Option<Vec<f32>>>,
    pub key_learning_vector: Option<Option<Vec<f32>>>,
}

/// Replacement vectors for an identity row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityVectors {
    pub description_vector: Option<Option<Vec<f32>>>,
}

/// Replacement vectors for a preference row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceVectors {
    pub conclusion_directives_vector: Option<Option<Vec<f32>>>,
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Per-layer similarity (or recency) search.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LayerSearch {
    /// Query vector. Without one, rows come back newest first.
    pub embedding: Option<Vec<f32>>,
    /// Result limit; non-positive returns nothing. Defaults to the configured search limit.
    pub limit: Option<i64>,
    /// Restrict to rows of this detail `type`.
    #[serde(rename = "type")]
    pub detail_type: Option<String>,
}

/// Per-layer limits of the aggregate search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchLimits {
    pub contexts: Option<i64>,
    pub experiences: Option<i64>,
    pub preferences: Option<i64>,
}

/// Aggregate search over the context, experience and preference layers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchParams {
    pub embedding: Option<Vec<f32>>,
    pub limits: SearchLimits,
    /// Accepted for callers that send it; not applied as a filter.
    pub memory_category: Option<String>,
    /// Accepted for callers that send it; not applied as a filter.
    pub memory_type: Option<String>,
}

/// Score column a listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    ScoreConfidence,
    ScoreImpact,
    ScorePriority,
    ScoreUrgency,
}

/// Listing direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// SQL keyword.
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Paginated, filtered listing of one layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParams {
    /// Defaults to `Layer::Context`.
    pub layer: Option<Layer>,
    /// 1-based; floored at 1.
    pub page: Option<i64>,
    /// Clamped to `1..=max_page_size`.
    pub page_size: Option<i64>,
    /// Free-text match against title, summary and details.
    pub q: Option<String>,
    /// Any-of match against detail tags or base tags.
    pub tags: Vec<String>,
    /// Any-of match against the detail `type`.
    pub types: Vec<String>,
    /// Any-of match against the base `memory_category`.
    pub categories: Vec<String>,
    pub sort: Option<SortField>,
    pub order: Option<SortOrder>,
}

/// Tag cloud over base records.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TagQuery {
    /// Restrict to these layers; empty means all.
    pub layers: Vec<Layer>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

/// Tag and role clouds over identity entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RoleQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}
