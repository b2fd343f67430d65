//! The normalised request record.
//!
//! A request carries a structured [`Uri`], a lower-cased method, a
//! case-insensitive header map, query and path-parameter maps and a [`Body`].
//! Requests convert to and from model values so handler chains can build
//! sub-requests from templates.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::{Body, HttpError, Uri};

/// A case-insensitive string → string header map. Keys are normalised to
/// lowercase on insert and lookup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    data: BTreeMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.data.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn set<V: ToString>(&mut self, name: &str, value: V) {
        self.data.insert(name.to_ascii_lowercase(), value.to_string());
    }

    /// Sets a header only when it is not present yet.
    pub fn set_default<V: ToString>(&mut self, name: &str, value: V) {
        self.data.entry(name.to_ascii_lowercase()).or_insert_with(|| value.to_string());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.data.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(&name.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn from_value(value: &Value) -> Self {
        let mut headers = Self::new();
        if let Value::Object(map) = value {
            for (key, val) in map {
                match val {
                    Value::String(s) => headers.set(key, s),
                    Value::Null => {}
                    other => headers.set(key, other),
                }
            }
        }
        headers
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.data {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Value::Object(map)
    }
}

/// Parses a raw query string into a map. Repeated keys collect into an array.
pub fn parse_query(raw: &str) -> Map<String, Value> {
    let mut data = Map::new();
    if raw.is_empty() {
        return data;
    }

    for kv in raw.split('&') {
        let (key, value) = kv.split_once('=').unwrap_or((kv, ""));
        let value = Value::String(value.to_string());
        match data.get_mut(key) {
            None => {
                data.insert(key.to_string(), value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }

    data
}

/// A mutable, normalised HTTP request.
#[derive(Clone, Debug, Default)]
pub struct Request {
    pub uri: Uri,
    /// Lower-cased verb.
    pub method: String,
    pub headers: Headers,
    pub query: Map<String, Value>,
    pub params: Map<String, Value>,
    pub body: Body,
}

impl Request {
    /// Builds a request from a method and URI reference; any query string on
    /// the URI is parsed into the query map.
    pub fn new(method: &str, uri: &str) -> Self {
        let (uri, query) = Uri::parse(uri);
        Self {
            uri,
            method: method.to_ascii_lowercase(),
            query: query.as_deref().map(parse_query).unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new("get", uri)
    }

    /// Builds a request from a model value, accepting `uri` or `url` for the
    /// target. The method defaults to empty and is filled in by the caller.
    pub fn from_value(value: Value) -> Result<Request, HttpError> {
        let Value::Object(map) = value else {
            return Err(HttpError::internal("request template did not expand to an object"));
        };

        let uri_value = map.get("uri").or_else(|| map.get("url"));
        let Some(Value::String(uri_str)) = uri_value else {
            return Err(HttpError::internal("request template has no uri"));
        };
        let (uri, raw_query) = Uri::parse(uri_str);

        let mut query = raw_query.as_deref().map(parse_query).unwrap_or_default();
        if let Some(Value::Object(extra)) = map.get("query") {
            for (key, val) in extra {
                query.insert(key.clone(), val.clone());
            }
        }

        let method = map
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let headers =
            map.get("headers").map(Headers::from_value).unwrap_or_default();

        let params = match map.get("params") {
            Some(Value::Object(params)) => params.clone(),
            _ => Map::new(),
        };

        let body = map.get("body").cloned().map(Body::from_value).unwrap_or_default();

        Ok(Request { uri, method, headers, query, params, body })
    }

    /// Renders the request as a model value for templates and handler chains.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("uri".to_string(), Value::String(self.uri.to_string()));
        map.insert("method".to_string(), Value::String(self.method.clone()));
        map.insert("headers".to_string(), self.headers.to_value());
        map.insert("query".to_string(), Value::Object(self.query.clone()));
        map.insert("params".to_string(), Value::Object(self.params.clone()));
        map.insert("body".to_string(), self.body.to_value());
        Value::Object(map)
    }

    /// A compact `method uri` capture for diagnostics.
    pub fn summary(&self) -> Value {
        Value::String(format!("{} {}", self.method, self.uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));

        headers.set_default("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("application/json"));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn test_parse_query_multi() {
        let query = parse_query("a=&b=2&c&a=42");
        assert_eq!(query.len(), 3);
        assert_eq!(query["a"], json!(["", "42"]));
        assert_eq!(query["b"], json!("2"));
        assert_eq!(query["c"], json!(""));
    }

    #[test]
    fn test_new_lowercases_and_splits_query() {
        let req = Request::new("GET", "/a/b?x=1");
        assert_eq!(req.method, "get");
        assert_eq!(req.uri.path, vec!["a", "b"]);
        assert_eq!(req.query["x"], json!("1"));
    }

    #[test]
    fn test_from_value_accepts_url_alias() {
        let req = Request::from_value(json!({
            "url": "/x/y",
            "method": "POST",
            "headers": {"X-Token": "t"},
            "body": {"k": "v"}
        }))
        .unwrap();
        assert_eq!(req.method, "post");
        assert_eq!(req.uri.to_string(), "/x/y");
        assert_eq!(req.headers.get("x-token"), Some("t"));
        assert_eq!(req.body.as_json(), Some(&json!({"k": "v"})));
    }

    #[test]
    fn test_from_value_requires_uri() {
        assert!(Request::from_value(json!({"method": "get"})).is_err());
    }
}
