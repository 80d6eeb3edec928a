//! Layered user-memory records: the shared base record, the four per-layer
//! detail records, and the result shapes returned by the store.

use crate::error::StrataError;
use crate::serde_compat::vec_lenient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Open key/value map stored alongside a record.
///
/// Carries `sourceId` / `sourceType` when a memory was extracted from an
/// external origin record.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Metadata key holding the id of the record a memory was extracted from.
pub const SOURCE_ID_KEY: &str = "sourceId";
/// Metadata key holding the kind of record `sourceId` points at.
pub const SOURCE_TYPE_KEY: &str = "sourceType";

/// Semantic layer a memory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Ongoing situations involving people, projects or objects.
    Context,
    /// Situations the user went through and what they learned.
    Experience,
    /// Who the user is and who they relate to.
    Identity,
    /// Standing directives about how the user wants things done.
    Preference,
}

impl Layer {
    /// Every layer, in declaration order.
    pub const ALL: [Layer; 4] = [
        Layer::Context,
        Layer::Experience,
        Layer::Identity,
        Layer::Preference,
    ];

    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Context => "context",
            Layer::Experience => "experience",
            Layer::Identity => "identity",
            Layer::Preference => "preference",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "context" => Ok(Layer::Context),
            "experience" => Ok(Layer::Experience),
            "identity" => Ok(Layer::Identity),
            "preference" => Ok(Layer::Preference),
            other => Err(StrataError::InvalidInput(format!("unknown layer: {other}"))),
        }
    }
}

/// Kind of identity fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityType {
    /// Age, location, language and similar attributes.
    Demographic,
    /// Personal life facts.
    Personal,
    /// Work and career facts.
    Professional,
}

impl IdentityType {
    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityType::Demographic => "demographic",
            IdentityType::Personal => "personal",
            IdentityType::Professional => "professional",
        }
    }

    /// Trim and lower-case `input`; `None` if it is not a known identity type.
    pub fn normalize(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "demographic" => Some(IdentityType::Demographic),
            "personal" => Some(IdentityType::Personal),
            "professional" => Some(IdentityType::Professional),
            _ => None,
        }
    }
}

/// How the person an identity entry describes relates to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    /// The user themself.
    #[serde(rename = "self")]
    Myself,
    Partner,
    Parent,
    Child,
    Sibling,
    Family,
    Friend,
    Mentor,
    Colleague,
    Acquaintance,
    Other,
}

impl Relationship {
    const ALL: [Relationship; 11] = [
        Relationship::Myself,
        Relationship::Partner,
        Relationship::Parent,
        Relationship::Child,
        Relationship::Sibling,
        Relationship::Family,
        Relationship::Friend,
        Relationship::Mentor,
        Relationship::Colleague,
        Relationship::Acquaintance,
        Relationship::Other,
    ];

    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Relationship::Myself => "self",
            Relationship::Partner => "partner",
            Relationship::Parent => "parent",
            Relationship::Child => "child",
            Relationship::Sibling => "sibling",
            Relationship::Family => "family",
            Relationship::Friend => "friend",
            Relationship::Mentor => "mentor",
            Relationship::Colleague => "colleague",
            Relationship::Acquaintance => "acquaintance",
            Relationship::Other => "other",
        }
    }

    /// Trim and lower-case `input`; `None` if it is not a known relationship.
    pub fn normalize(input: &str) -> Option<Self> {
        let normalized = input.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized.as_str())
    }
}

/// How an entry update combines the payload with the stored row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Supplied fields overwrite, absent fields are left untouched.
    #[default]
    Merge,
    /// Supplied fields overwrite, absent fields become null.
    Replace,
}

/// Kind of external record a memory was extracted from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A chat topic (conversation thread).
    #[default]
    ChatTopic,
}

impl SourceType {
    /// Parse a stored source type, `None` when unrecognized.
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "chat_topic" => Some(SourceType::ChatTopic),
            _ => None,
        }
    }
}

/// A subject or object a context is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociatedEntity {
    /// Display name.
    pub name: String,
    /// Free-form kind (person, project, item...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Extra structured attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl AssociatedEntity {
    /// An entity carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: None,
            extra: None,
        }
    }
}

/// Base memory record, without embedding vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMemory {
    pub id: String,
    pub user_id: String,
    pub memory_layer: Layer,
    pub memory_category: Option<String>,
    pub memory_type: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
    pub tags: Option<Vec<String>>,
    pub status: Option<String>,
    pub metadata: Option<Metadata>,
    /// When the fact was observed.
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Number of reads (searches, lookups) that returned this memory.
    pub accessed_count: u64,
}

/// Context detail record. Aggregates one or more base records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMemory {
    pub id: String,
    pub user_id: String,
    /// Base records this context aggregates, in insertion order.
    pub user_memory_ids: Vec<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "vec_lenient")]
    pub associated_subjects: Vec<AssociatedEntity>,
    #[serde(default, deserialize_with = "vec_lenient")]
    pub associated_objects: Vec<AssociatedEntity>,
    pub current_status: Option<String>,
    pub score_impact: Option<f64>,
    pub score_urgency: Option<f64>,
    #[serde(rename = "type")]
    pub context_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// Experience detail record. Exactly one base record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceMemory {
    pub id: String,
    pub user_id: String,
    pub user_memory_id: String,
    pub situation: Option<String>,
    pub action: Option<String>,
    pub key_learning: Option<String>,
    pub reasoning: Option<String>,
    pub possible_outcome: Option<String>,
    pub score_confidence: Option<f64>,
    #[serde(rename = "type")]
    pub experience_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// Identity detail record. Exactly one base record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMemory {
    pub id: String,
    pub user_id: String,
    pub user_memory_id: String,
    pub description: Option<String>,
    pub role: Option<String>,
    pub relationship: Option<Relationship>,
    #[serde(rename = "type")]
    pub identity_type: Option<IdentityType>,
    pub episodic_date: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// Preference detail record. Exactly one base record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceMemory {
    pub id: String,
    pub user_id: String,
    pub user_memory_id: String,
    pub conclusion_directives: Option<String>,
    pub suggestions: Option<String>,
    pub score_priority: Option<f64>,
    #[serde(rename = "type")]
    pub preference_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// A layer-specific detail record, tagged by its layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum LayerDetail {
    Context(ContextMemory),
    Experience(ExperienceMemory),
    Identity(IdentityMemory),
    Preference(PreferenceMemory),
}

impl LayerDetail {
    /// The layer this detail belongs to.
    pub fn layer(&self) -> Layer {
        match self {
            LayerDetail::Context(_) => Layer::Context,
            LayerDetail::Experience(_) => Layer::Experience,
            LayerDetail::Identity(_) => Layer::Identity,
            LayerDetail::Preference(_) => Layer::Preference,
        }
    }

    /// Id of the detail row.
    pub fn id(&self) -> &str {
        match self {
            LayerDetail::Context(c) => &c.id,
            LayerDetail::Experience(e) => &e.id,
            LayerDetail::Identity(i) => &i.id,
            LayerDetail::Preference(p) => &p.id,
        }
    }

    /// Metadata stored on the detail row.
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            LayerDetail::Context(c) => c.metadata.as_ref(),
            LayerDetail::Experience(e) => e.metadata.as_ref(),
            LayerDetail::Identity(i) => i.metadata.as_ref(),
            LayerDetail::Preference(p) => p.metadata.as_ref(),
        }
    }
}

/// A base record paired with its freshly inserted detail row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Created<T> {
    pub memory: UserMemory,
    pub detail: T,
}

/// A search hit together with its cosine similarity to the query vector.
///
/// `similarity` is `None` when the search ran without an embedding
/// (recency order) and `Some(-1.0)` for rows that have no stored vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scored<T> {
    #[serde(flatten)]
    pub item: T,
    pub similarity: Option<f32>,
}

/// Aggregated result of a multi-layer search.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub contexts: Vec<Scored<ContextMemory>>,
    pub experiences: Vec<Scored<ExperienceMemory>>,
    pub preferences: Vec<Scored<PreferenceMemory>>,
}

/// One row of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryItem {
    pub memory: UserMemory,
    pub detail: LayerDetail,
}

/// A page of listing results plus the total number of matching base records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPage {
    pub items: Vec<MemoryItem>,
    pub page: i64,
    pub page_size: i64,
    pub total: u64,
}

/// Human-readable origin of a memory, resolved through the source lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSource {
    pub id: String,
    pub title: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
}

/// A single memory resolved by id, with its origin when known.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedMemory {
    pub memory: UserMemory,
    pub detail: LayerDetail,
    pub source: Option<TopicSource>,
    pub source_type: Option<SourceType>,
}

/// Result of `add_identity_entry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityEntryIds {
    pub identity_id: String,
    pub user_memory_id: String,
}

/// A tag and how many records carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

/// An identity role and how many identity entries carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCount {
    pub role: String,
    pub count: u64,
}

/// Tag and role clouds over the identity layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityRoles {
    pub tags: Vec<TagCount>,
    pub roles: Vec<RoleCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_round_trip_strings() {
        for layer in Layer::ALL {
            assert_eq!(layer.as_str().parse::<Layer>().unwrap(), layer);
        }
        assert_eq!(" Identity ".parse::<Layer>().unwrap(), Layer::Identity);
        assert!("episodic".parse::<Layer>().is_err());
    }

    #[test]
    fn test_relationship_normalize() {
        assert_eq!(Relationship::normalize("  FRIEND  "), Some(Relationship::Friend));
        assert_eq!(Relationship::normalize("self"), Some(Relationship::Myself));
        assert_eq!(Relationship::normalize("bestie"), None);
        assert_eq!(
            serde_json::to_string(&Relationship::Myself).unwrap(),
            "\"self\""
        );
    }

    #[test]
    fn test_identity_type_normalize() {
        assert_eq!(
            IdentityType::normalize(" PROFESSIONAL "),
            Some(IdentityType::Professional)
        );
        assert_eq!(IdentityType::normalize("unknown"), None);
    }

    #[test]
    fn test_layer_detail_tagged_by_layer() {
        let now = Utc::now();
        let detail = LayerDetail::Preference(PreferenceMemory {
            id: "p1".into(),
            user_id: "u1".into(),
            user_memory_id: "m1".into(),
            conclusion_directives: Some("Prefer tabs".into()),
            suggestions: None,
            score_priority: Some(0.5),
            preference_type: Some("choice".into()),
            tags: None,
            metadata: None,
            captured_at: now,
            created_at: now,
            updated_at: now,
            accessed_at: now,
        });
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["layer"], "preference");
        assert_eq!(json["type"], "choice");
        assert_eq!(detail.layer(), Layer::Preference);
    }

    #[test]
    fn test_associated_entity_serde() {
        let e: AssociatedEntity =
            serde_json::from_str(r#"{"name": "Alice", "type": "person"}"#).unwrap();
        assert_eq!(e.entity_type.as_deref(), Some("person"));
        assert!(e.extra.is_none());
    }
}
