//! Linked-data wire format and canonical hashing
//!
//! Entities cross every interface as a JSON object carrying `@context`,
//! `@type` and `@id` next to their fields. Object keys are emitted in sorted
//! order at every depth, so the serialized bytes of two equal entities are
//! identical and so is their digest.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Context URI stamped on every framed entity
pub const CONTEXT: &str = "https://schema.org";

/// Keys reserved for framing; never part of an entity's own fields
pub const FRAME_KEYS: [&str; 3] = ["@context", "@type", "@id"];

/// Rebuild `value` with object keys in sorted order at every depth.
///
/// serde_json's map type may preserve insertion order depending on enabled
/// features, so ordering is established explicitly rather than assumed.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Deterministic serialization of `value`
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    // Serializing a Value cannot fail: keys are strings and numbers are finite
    serde_json::to_vec(&canonicalize(value)).unwrap_or_default()
}

/// Hex SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Canonical hash of a payload: digest of its deterministic serialization
pub fn fingerprint(value: &Value) -> String {
    sha256_hex(&canonical_bytes(value))
}

/// Lowercase and collapse runs of whitespace to single spaces
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Key shared by every submission describing the same event occurrence,
/// independent of which producer sent it.
pub fn dedup_key(name: &str, venue: &str, start: &DateTime<Utc>) -> String {
    let material = format!(
        "{}|{}|{}",
        collapse_whitespace(name),
        collapse_whitespace(venue),
        start.to_rfc3339()
    );
    sha256_hex(material.as_bytes())
}

/// Frame entity fields for the wire
pub fn frame(type_name: &str, id: &str, fields: &Map<String, Value>) -> Value {
    let mut framed = Map::with_capacity(fields.len() + 3);
    for (key, value) in fields {
        if !FRAME_KEYS.contains(&key.as_str()) {
            framed.insert(key.clone(), value.clone());
        }
    }
    framed.insert("@context".to_string(), Value::String(CONTEXT.to_string()));
    framed.insert("@type".to_string(), Value::String(type_name.to_string()));
    framed.insert("@id".to_string(), Value::String(id.to_string()));
    canonicalize(&Value::Object(framed))
}

/// A framed entity split back into its parts
#[derive(Debug, Clone, PartialEq)]
pub struct Unframed {
    pub type_name: String,
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Split a framed entity. `@type` and `@id` are required; `@context` is
/// required but any value is accepted.
pub fn unframe(value: &Value) -> Result<Unframed> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::validation("@id", "entity must be a JSON object"))?;

    if !obj.contains_key("@context") {
        return Err(Error::validation("@context", "is required"));
    }
    let type_name = obj
        .get("@type")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::validation("@type", "is required"))?;
    let id = obj
        .get("@id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::validation("@id", "is required"))?;

    let fields = obj
        .iter()
        .filter(|(k, _)| !FRAME_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(Unframed {
        type_name: type_name.to_string(),
        id: id.to_string(),
        fields,
    })
}

/// `{base_url}/{collection}/{id}` with a single slash at the join
pub fn entity_uri(base_url: &str, collection: &str, id: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), collection, id)
}

/// Split an entity URI minted under `base_url` into `(collection, id)`.
///
/// Returns `None` for URIs belonging to another node.
pub fn parse_local_uri<'a>(base_url: &str, uri: &'a str) -> Option<(&'a str, &'a str)> {
    let base = base_url.trim_end_matches('/');
    let rest = uri.strip_prefix(base)?.strip_prefix('/')?;
    let (collection, id) = rest.split_once('/')?;
    if collection.is_empty() || id.is_empty() || id.contains('/') {
        return None;
    }
    Some((collection, id))
}
