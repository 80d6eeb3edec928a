//! Column encodings shared by every table.
//!
//! Embeddings are stored as little-endian `f32` BLOBs, timestamps as
//! fixed-precision RFC 3339 text (so that text order equals time order),
//! and tag lists / metadata / associations as JSON text.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use strata_types::error::{StrataError, StrataResult};

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Serialize embedding to bytes for SQLite BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Deserialize embedding from bytes.
pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Optional embedding to an optional BLOB.
pub fn opt_embedding(embedding: Option<&[f32]>) -> Option<Vec<u8>> {
    embedding.map(embedding_to_bytes)
}

/// Current time at the precision the timestamp columns keep.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamp column encoding.
pub fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a timestamp column; unreadable values fall back to the epoch.
pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Decode a nullable timestamp column.
pub fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Encode a value as JSON text with object keys in sorted order, so equal
/// values always encode to equal text.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> StrataResult<String> {
    serde_json::to_value(value)
        .map(|v| v.to_string())
        .map_err(|e| StrataError::Serialization(e.to_string()))
}

/// Encode an optional value as nullable JSON text.
pub fn opt_json<T: Serialize>(value: Option<&T>) -> StrataResult<Option<String>> {
    value.map(to_json).transpose()
}

/// Decode nullable JSON text. Malformed JSON reads as null.
pub fn from_json<T: DeserializeOwned>(text: Option<String>) -> Option<T> {
    text.and_then(|t| serde_json::from_str(&t).ok())
}

/// JSON array of ids, bound as one parameter and expanded with `json_each`.
pub fn id_list(ids: &[String]) -> StrataResult<String> {
    to_json(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_bytes_round_trip() {
        let v = vec![0.1f32, -2.5, 3.0, 0.0];
        assert_eq!(embedding_from_bytes(&embedding_to_bytes(&v)), v);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let earlier = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2024-01-01T00:00:01Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(ts(&earlier) < ts(&later));
        assert_eq!(parse_ts(&ts(&earlier)), earlier);
    }

    #[test]
    fn test_to_json_is_canonical() {
        let mut a = std::collections::HashMap::new();
        let mut b = std::collections::HashMap::new();
        for (k, v) in [("z", 1), ("a", 2), ("m", 3)] {
            a.insert(k, v);
        }
        for (k, v) in [("m", 3), ("z", 1), ("a", 2)] {
            b.insert(k, v);
        }
        assert_eq!(to_json(&a).unwrap(), to_json(&b).unwrap());
        assert_eq!(to_json(&a).unwrap(), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_from_json_lenient() {
        let tags: Option<Vec<String>> = from_json(Some("[\"a\"]".into()));
        assert_eq!(tags, Some(vec!["a".to_string()]));
        let bad: Option<Vec<String>> = from_json(Some("{oops".into()));
        assert!(bad.is_none());
        let none: Option<Vec<String>> = from_json(None);
        assert!(none.is_none());
    }
}
