//! The outbound HTTP client interface.
//!
//! The engine never opens sockets itself; absolute-URI requests are handed to
//! an [`OutboundClient`]. The default implementation wraps `reqwest`; tests
//! inject their own.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::handler::HandlerResult;
use crate::protocol::{Body, Headers, HttpError, Request, Response};

/// Sends requests to absolute `http(s)://` URIs.
#[async_trait]
pub trait OutboundClient: Send + Sync {
    async fn send(&self, req: Request) -> HandlerResult;
}

/// The default client, backed by a shared `reqwest::Client`.
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self { inner: reqwest::Client::new() }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundClient for ReqwestClient {
    async fn send(&self, req: Request) -> HandlerResult {
        let method = reqwest::Method::from_bytes(req.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| HttpError::internal(format!("invalid outbound method '{}'", req.method)))?;

        let url = req.uri.to_string();
        let mut builder = self.inner.request(method, &url);

        for (name, value) in req.headers.iter() {
            builder = builder.header(name, value);
        }
        let query: Vec<(String, String)> = req
            .query
            .iter()
            .flat_map(|(key, value)| match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| (key.clone(), render_query_value(item)))
                    .collect::<Vec<_>>(),
                single => vec![(key.clone(), render_query_value(single))],
            })
            .collect();
        if !query.is_empty() {
            builder = builder.query(&query);
        }

        builder = match req.body {
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(bytes),
            Body::Text(text) => builder.body(text),
            Body::Json(value) => builder.json(&value),
            Body::Stream(stream) => match stream.take().await {
                Some(inner) => builder.body(reqwest::Body::wrap_stream(inner)),
                None => builder,
            },
        };

        let resp = builder.send().await.map_err(|e| {
            HttpError::new(502, "internal_error", "Outbound request failed.")
                .with_detail(format!("{url}: {e}"))
        })?;

        let status = resp.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in resp.headers() {
            if let Ok(text) = value.to_str() {
                headers.set(name.as_str(), text);
            }
        }

        let is_json = headers
            .get("content-type")
            .is_some_and(|ct| ct.starts_with(mime::APPLICATION_JSON.essence_str()));
        let bytes: Bytes = resp.bytes().await.map_err(|e| {
            HttpError::new(502, "internal_error", "Outbound response read failed.")
                .with_detail(e.to_string())
        })?;
        let body = if bytes.is_empty() {
            Body::Empty
        } else if is_json {
            match serde_json::from_slice(&bytes) {
                Ok(value) => Body::Json(value),
                Err(_) => Body::Bytes(bytes),
            }
        } else {
            Body::Bytes(bytes)
        };

        Ok(Response { status, headers, body })
    }
}

fn render_query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
