//! The response record and its model-value conversions.

use serde_json::{Map, Value};

use super::{Body, Headers};

/// A normalised HTTP response. Statuses below 400 are success-shaped; 400 and
/// above are errors. The default value (status 0) is the "no response"
/// sentinel the dispatcher normalises into `server_error#empty_response`.
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self { status, ..Self::default() }
    }

    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = Headers::new();
        headers.set("content-type", "application/json");
        Self { status, headers, body: Body::Json(body) }
    }

    pub fn html(status: u16, body: String) -> Self {
        let mut headers = Headers::new();
        headers.set("content-type", "text/html");
        Self { status, headers, body: Body::Text(body) }
    }

    /// True for the "handler produced nothing" sentinel.
    pub fn is_empty_sentinel(&self) -> bool {
        self.status == 0
    }

    /// True when the body already carries a problem `type` field.
    pub fn is_error_shaped(&self) -> bool {
        matches!(self.body.as_json(), Some(Value::Object(map)) if map.contains_key("type"))
    }

    /// Interprets a model value as a response. `null` yields the empty
    /// sentinel; an object without a `status` defaults to 200.
    pub fn from_value(value: Value) -> Response {
        match value {
            Value::Null => Response::default(),
            Value::Object(mut map) => {
                let status = map
                    .get("status")
                    .and_then(Value::as_u64)
                    .map(|s| s as u16)
                    .unwrap_or(200);
                let headers =
                    map.get("headers").map(Headers::from_value).unwrap_or_default();
                let body = map.remove("body").map(Body::from_value).unwrap_or_default();
                Response { status, headers, body }
            }
            other => Response { status: 200, headers: Headers::new(), body: Body::from_value(other) },
        }
    }

    /// Renders the response as a model value `{status, headers, body}`.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("status".to_string(), Value::Number(self.status.into()));
        map.insert("headers".to_string(), self.headers.to_value());
        map.insert("body".to_string(), self.body.to_value());
        Value::Object(map)
    }
}

impl From<Value> for Response {
    fn from(value: Value) -> Self {
        Response::from_value(value)
    }
}
