//! Lenient normalization of caller-supplied values.
//!
//! Nothing here rejects input: unknown enum values and unparsable dates
//! degrade to `None`, malformed association entries are dropped.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use strata_types::memory::{AssociatedEntity, IdentityType, Relationship};
use strata_types::params::DateLike;
use tracing::debug;

/// Normalize a relationship label. Unknown labels become `None`.
pub fn normalize_relationship(value: Option<&str>) -> Option<Relationship> {
    let raw = value?;
    let normalized = Relationship::normalize(raw);
    if normalized.is_none() {
        debug!(value = raw, "Dropping unknown relationship");
    }
    normalized
}

/// Normalize an identity type. Unknown types become `None`.
pub fn normalize_identity_type(value: Option<&str>) -> Option<IdentityType> {
    let raw = value?;
    let normalized = IdentityType::normalize(raw);
    if normalized.is_none() {
        debug!(value = raw, "Dropping unknown identity type");
    }
    normalized
}

/// Coerce a date-ish value; unparsable input becomes `None`.
pub fn coerce_date(value: Option<&DateLike>) -> Option<DateTime<Utc>> {
    value.and_then(DateLike::coerce)
}

/// Parse a list of associated objects.
///
/// Well-formed entries are kept with their `extra` JSON text decoded into an
/// object. Other objects that still carry a string `name` are kept as a bare
/// name.
pub fn parse_associated_objects(value: &Value) -> Vec<AssociatedEntity> {
    parse_associations(value, true)
}

/// Parse a list of associated subjects. Only well-formed entries are kept.
pub fn parse_associated_subjects(value: &Value) -> Vec<AssociatedEntity> {
    parse_associations(value, false)
}

fn parse_associations(value: &Value, keep_named: bool) -> Vec<AssociatedEntity> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            match well_formed(obj) {
                Some(entity) => Some(entity),
                None if keep_named => obj
                    .get("name")
                    .and_then(Value::as_str)
                    .map(AssociatedEntity::named),
                None => None,
            }
        })
        .collect()
}

/// `{ name: string, type?: string, extra?: string }`, with `extra` holding JSON text.
fn well_formed(obj: &Map<String, Value>) -> Option<AssociatedEntity> {
    let name = obj.get("name")?.as_str()?;
    let entity_type = match obj.get("type") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return None,
    };
    let extra = match obj.get("extra") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(decode_extra(text)),
        Some(_) => return None,
    };
    Some(AssociatedEntity {
        name: name.to_string(),
        entity_type,
        extra,
    })
}

fn decode_extra(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(v @ Value::Object(_)) => v,
        _ => Value::Object(Map::new()),
    }
}
