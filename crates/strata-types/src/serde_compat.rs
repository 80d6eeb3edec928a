//! Serde helpers for partial-update payloads and loosely typed stored values.
//!
//! Patch payloads need to tell "field absent" apart from "field explicitly
//! null". `double_option` maps those onto `None` and `Some(None)`.
//! `vec_lenient` reads stored lists without failing on stray values.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// Deserialize a present field into `Some(value)`, where `value` may be null.
///
/// Pair with `#[serde(default)]` so a missing field stays `None`.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Deserialize a stored list leniently.
///
/// Anything that is not an array reads as empty, and array entries that do
/// not fit `T` are skipped, so one malformed associated entity never hides
/// the rest.
pub fn vec_lenient<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        role: Option<Option<String>>,
    }

    #[derive(Debug, Deserialize)]
    struct Tagged {
        #[serde(default, deserialize_with = "vec_lenient")]
        tags: Vec<String>,
    }

    #[test]
    fn test_double_option_absent() {
        let p: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(p.role, None);
    }

    #[test]
    fn test_double_option_null() {
        let p: Patch = serde_json::from_str(r#"{"role": null}"#).unwrap();
        assert_eq!(p.role, Some(None));
    }

    #[test]
    fn test_double_option_value() {
        let p: Patch = serde_json::from_str(r#"{"role": "friend"}"#).unwrap();
        assert_eq!(p.role, Some(Some("friend".to_string())));
    }

    #[test]
    fn test_vec_lenient_sequence() {
        let t: Tagged = serde_json::from_str(r#"{"tags": ["a", "b"]}"#).unwrap();
        assert_eq!(t.tags, vec!["a", "b"]);
    }

    #[test]
    fn test_vec_lenient_null_and_scalar() {
        let t: Tagged = serde_json::from_str(r#"{"tags": null}"#).unwrap();
        assert!(t.tags.is_empty());
        let t: Tagged = serde_json::from_str(r#"{"tags": "oops"}"#).unwrap();
        assert!(t.tags.is_empty());
        let t: Tagged = serde_json::from_str(r#"{"tags": {"a": 1}}"#).unwrap();
        assert!(t.tags.is_empty());
    }

    #[test]
    fn test_vec_lenient_skips_bad_entries() {
        let t: Tagged = serde_json::from_str(r#"{"tags": ["a", 7, null, "b"]}"#).unwrap();
        assert_eq!(t.tags, vec!["a", "b"]);
    }
}
