//! The runtime error value produced by routing, filters and handlers.
//!
//! An [`HttpError`] is an error-shaped response: a status of 400 or above and
//! a problem body `{type, title, detail, method, uri, ...}`. Errors carry an
//! optional cause chain for diagnostics and convert losslessly into a
//! [`Response`] at the dispatch boundary.

use std::fmt;

use serde_json::{Map, Value};

use super::{Body, Headers, Request, Response};

/// An error-shaped HTTP response with an attached cause chain.
#[derive(Debug)]
pub struct HttpError {
    pub status: u16,
    pub headers: Headers,
    pub body: Value,
    cause: Option<Box<HttpError>>,
}

impl HttpError {
    /// Creates an error with the given status, `type` and `title`.
    pub fn new(status: u16, error_type: &str, title: &str) -> Self {
        let mut body = Map::new();
        body.insert("type".to_string(), Value::String(error_type.to_string()));
        body.insert("title".to_string(), Value::String(title.to_string()));
        Self { status, headers: Headers::new(), body: Value::Object(body), cause: None }
    }

    /// Attaches a `detail` field to the problem body.
    pub fn with_detail<S: ToString>(mut self, detail: S) -> Self {
        self.set_field("detail", Value::String(detail.to_string()));
        self
    }

    /// Records the request the error was raised for (`method` and `uri`).
    pub fn with_request(mut self, req: &Request) -> Self {
        self.set_field("method", Value::String(req.method.clone()));
        self.set_field("uri", Value::String(req.uri.to_string()));
        self
    }

    /// Chains an underlying cause.
    pub fn with_cause(mut self, cause: HttpError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Sets an arbitrary field on the problem body.
    pub fn set_field(&mut self, key: &str, value: Value) {
        if let Value::Object(map) = &mut self.body {
            map.insert(key.to_string(), value);
        }
    }

    /// The `type` field of the problem body, if present.
    pub fn error_type(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    /// The innermost cause, if any.
    pub fn cause(&self) -> Option<&HttpError> {
        self.cause.as_deref()
    }

    /// Wraps an error-shaped [`Response`]. Bodies without a `type` field get
    /// one derived from the status class.
    pub fn from_response(resp: Response) -> Self {
        let status = resp.status;
        let mut body = match resp.body {
            Body::Json(v @ Value::Object(_)) => v,
            Body::Json(other) => {
                let mut map = Map::new();
                map.insert("detail".to_string(), other);
                Value::Object(map)
            }
            Body::Text(text) => {
                let mut map = Map::new();
                map.insert("detail".to_string(), Value::String(text));
                Value::Object(map)
            }
            _ => Value::Object(Map::new()),
        };
        if body.get("type").is_none() {
            let error_type = if status >= 500 { "internal_error" } else { "invalid_request" };
            if let Value::Object(map) = &mut body {
                map.insert("type".to_string(), Value::String(error_type.to_string()));
            }
        }
        Self { status, headers: resp.headers, body, cause: None }
    }

    /// Converts the error into a plain response.
    pub fn into_response(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Body::Json(self.body) }
    }

    /// Renders the error as a model value `{status, headers, body}`.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("status".to_string(), Value::Number(self.status.into()));
        map.insert("headers".to_string(), self.headers.to_value());
        map.insert("body".to_string(), self.body.clone());
        Value::Object(map)
    }

    // Stock engine errors.

    pub fn not_found_route(req: &Request) -> Self {
        Self::new(404, "not_found#route", "Not found.").with_request(req)
    }

    pub fn forbidden_sys(req: &Request) -> Self {
        Self::new(403, "forbidden#sys", "Direct access to /sys is forbidden.").with_request(req)
    }

    pub fn empty_response(req: &Request) -> Self {
        Self::new(500, "server_error#empty_response", "Empty response received.")
            .with_request(req)
    }

    pub fn recursion_exceeded(depth: usize, parents: Vec<Value>, req: &Request) -> Self {
        let mut err = Self::new(
            500,
            "server_error#request_recursion_depth_exceeded",
            "Request recursion depth exceeded.",
        )
        .with_request(req);
        err.set_field("depth", Value::Number(depth.into()));
        err.set_field("requests", Value::Array(parents));
        err
    }

    pub fn internal<S: ToString>(detail: S) -> Self {
        Self::new(500, "internal_error", "Internal error in HyperSwitch.").with_detail(detail)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.error_type().unwrap_or("error"))?;
        if let Some(detail) = self.body.get("detail").and_then(Value::as_str) {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_is_error_shaped() {
        let err = HttpError::new(404, "not_found", "Not found.").with_detail("no such page");
        assert_eq!(err.status, 404);
        assert_eq!(err.error_type(), Some("not_found"));
        assert_eq!(err.body["detail"], json!("no such page"));
    }

    #[test]
    fn test_from_response_adds_type() {
        let resp = Response::json(502, json!({"message": "upstream died"}));
        let err = HttpError::from_response(resp);
        assert_eq!(err.error_type(), Some("internal_error"));

        let resp = Response::json(404, json!({"type": "not_found", "title": "gone"}));
        let err = HttpError::from_response(resp);
        assert_eq!(err.error_type(), Some("not_found"));
    }

    #[test]
    fn test_cause_chain() {
        let inner = HttpError::new(500, "internal_error", "boom");
        let outer = HttpError::new(500, "internal_error", "outer").with_cause(inner);
        assert_eq!(outer.cause().unwrap().error_type(), Some("internal_error"));
    }
}
