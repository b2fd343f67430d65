//! Request and response bodies.
//!
//! A body is one of: nothing, raw bytes, text, a parsed JSON value, or a lazy
//! byte stream. Streams are one-shot and shared behind a handle, so the
//! dispatcher's shallow request clone does not duplicate or lose them.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;

/// A tagged request/response body.
#[derive(Clone, Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    Json(Value),
    Stream(BodyStream),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Interprets a model value as a body: `null` is empty, strings are text,
    /// everything else is carried as JSON.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Body::Empty,
            Value::String(text) => Body::Text(text),
            other => Body::Json(other),
        }
    }

    /// Renders the body as a model value. Binary data is carried as a lossy
    /// string; an unconsumed stream renders as `null`.
    pub fn to_value(&self) -> Value {
        match self {
            Body::Empty | Body::Stream(_) => Value::Null,
            Body::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            Body::Text(text) => Value::String(text.clone()),
            Body::Json(value) => value.clone(),
        }
    }

    /// The parsed JSON value, if this body carries one.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_json_mut(&mut self) -> Option<&mut Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Body::Empty
        } else {
            Body::Text(value.to_string())
        }
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Bytes(value)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::from_value(value)
    }
}

/// A one-shot lazy byte stream shared behind a handle. Cloning the handle
/// shares the stream; the first consumer takes it.
#[derive(Clone)]
pub struct BodyStream {
    inner: Arc<Mutex<Option<BoxStream<'static, Result<Bytes, io::Error>>>>>,
}

impl BodyStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        Self { inner: Arc::new(Mutex::new(Some(stream.boxed()))) }
    }

    /// Takes the underlying stream, if it has not been consumed yet.
    pub async fn take(&self) -> Option<BoxStream<'static, Result<Bytes, io::Error>>> {
        self.inner.lock().await.take()
    }

    pub async fn is_consumed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyStream")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check_send<T: Send>() {}

    #[test]
    fn is_send() {
        check_send::<Body>();
    }

    #[test]
    fn test_from_value() {
        assert!(Body::from_value(Value::Null).is_empty());
        assert!(matches!(Body::from_value(json!("hi")), Body::Text(_)));
        assert!(matches!(Body::from_value(json!({"a": 1})), Body::Json(_)));
    }

    #[test]
    fn test_to_value_roundtrip() {
        let body = Body::Json(json!({"a": 1}));
        assert_eq!(body.to_value(), json!({"a": 1}));
        assert_eq!(Body::from("").to_value(), Value::Null);
    }

    #[tokio::test]
    async fn test_stream_is_shared_and_one_shot() {
        let chunks: Vec<Result<Bytes, io::Error>> =
            vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))];
        let stream = BodyStream::new(futures::stream::iter(chunks));
        let clone = stream.clone();

        let mut taken = clone.take().await.unwrap();
        assert_eq!(taken.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));

        // Both handles observe consumption.
        assert!(stream.is_consumed().await);
        assert!(stream.take().await.is_none());
    }
}
