//! Outbound HTTP.
//!
//! Requests whose URI is absolute (`http(s)://...`) bypass local routing and
//! go to the injected [`OutboundClient`](crate::client::OutboundClient).
//! Header forwarding is allow-listed per host; the request id is always
//! propagated, and the configured user agent is applied when none is set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Filter, Next};
use crate::dispatch::Context;
use crate::handler::HandlerResult;
use crate::protocol::{Headers, Request};
use crate::spec::error::SpecError;

pub struct OutboundFilter {
    /// host → header names allowed to be forwarded.
    forward_headers: HashMap<String, Vec<String>>,
}

impl OutboundFilter {
    pub fn from_options(options: &Value) -> Result<OutboundFilter, SpecError> {
        let mut forward_headers = HashMap::new();
        if let Some(Value::Object(hosts)) = options.get("forward_headers") {
            for (host, names) in hosts {
                let Some(list) = names.as_array() else {
                    return Err(SpecError::InvalidFilter {
                        name: "http".to_string(),
                        reason: format!("forward_headers for '{host}' must be an array"),
                    });
                };
                forward_headers.insert(
                    host.clone(),
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_ascii_lowercase)
                        .collect(),
                );
            }
        }
        Ok(OutboundFilter { forward_headers })
    }

    fn filtered_headers(&self, req: &Request) -> Headers {
        let mut headers = Headers::new();
        let allowed = req
            .uri
            .authority
            .as_ref()
            .and_then(|authority| {
                let host = authority.rsplit("://").next().unwrap_or(authority);
                self.forward_headers.get(host)
            });
        if let Some(allowed) = allowed {
            for (name, value) in req.headers.iter() {
                if allowed.iter().any(|a| a == name) {
                    headers.set(name, value);
                }
            }
        }
        headers
    }
}

#[async_trait]
impl Filter for OutboundFilter {
    async fn apply(&self, ctx: Arc<Context>, req: Request, next: Next<'_>) -> HandlerResult {
        if !req.uri.is_absolute() {
            return next.run(ctx, req).await;
        }

        let mut outgoing = req.clone();
        outgoing.headers = self.filtered_headers(&req);
        outgoing.headers.set("x-request-id", ctx.request_id());
        outgoing.headers.set_default("user-agent", &ctx.config().user_agent);

        ctx.client().send(outgoing).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_allow_list_is_per_host() {
        let filter = OutboundFilter::from_options(&json!({
            "forward_headers": {"api.example.org": ["Accept-Language", "cookie"]}
        }))
        .unwrap();

        let mut req = Request::get("https://api.example.org/w/rest.php");
        req.headers.set("accept-language", "en");
        req.headers.set("cookie", "session=1");
        req.headers.set("authorization", "secret");
        let filtered = filter.filtered_headers(&req);
        assert_eq!(filtered.get("accept-language"), Some("en"));
        assert_eq!(filtered.get("cookie"), Some("session=1"));
        assert!(filtered.get("authorization").is_none());

        let other = Request::get("https://other.example.org/");
        let mut other = other;
        other.headers.set("cookie", "session=1");
        assert!(filter.filtered_headers(&other).get("cookie").is_none());
    }

    #[test]
    fn test_rejects_malformed_options() {
        assert!(OutboundFilter::from_options(&json!({
            "forward_headers": {"api.example.org": "cookie"}
        }))
        .is_err());
    }
}
