//! The normalised request/response data model.
//!
//! The engine is wire-independent: any socket adaptor that can produce a
//! [`Request`] can drive it. Methods are lower-cased strings, headers are a
//! case-insensitive string map, bodies are a tagged union and URIs are
//! pre-split path segments. Everything converts to and from
//! [`serde_json::Value`] so handler chains and templates can treat requests
//! and responses as plain data.

mod body;
mod error;
mod request;
mod response;
mod uri;

pub use body::{Body, BodyStream};
pub use error::HttpError;
pub use request::{parse_query, Headers, Request};
pub use response::Response;
pub use uri::{PathPattern, PatternSegment, Uri};

use serde_json::Value;

/// Renders a value as canonical JSON text: object keys are emitted in sorted
/// order at every level, so two structurally equal values always produce the
/// same string. Used for predicate comparison and content-addressed caches.
pub(crate) fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Stable 64-bit hash of a value's canonical form.
pub(crate) fn canonical_hash(value: &Value) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    canonical_string(value).hash(&mut hasher);
    hasher.finish()
}
