//! Per-route rate limiting.
//!
//! Consults the injected [`RateLimiter`](crate::observe::RateLimiter) counter
//! with a key of `(service_name, stripped path, METHOD) | client ip`. When
//! the counter reports the limit exceeded, the request fails with 429
//! `request_rate_exceeded` — unless the filter is configured `log_only`, in
//! which case the trip is only logged.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{metrics::strip_first_segment, Filter, Next};
use crate::dispatch::Context;
use crate::handler::HandlerResult;
use crate::protocol::{HttpError, Request};
use crate::spec::error::SpecError;

pub struct RateLimitFilter {
    log_only: bool,
}

impl RateLimitFilter {
    pub fn from_options(options: &Value) -> Result<RateLimitFilter, SpecError> {
        Ok(RateLimitFilter {
            log_only: options.get("log_only").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

#[async_trait]
impl Filter for RateLimitFilter {
    async fn apply(&self, ctx: Arc<Context>, req: Request, next: Next<'_>) -> HandlerResult {
        let path = next.route().map(|r| strip_first_segment(r.path)).unwrap_or("/");
        let client_ip = req.headers.get("x-client-ip").unwrap_or("-");
        let key = format!(
            "{}.{}.{}|{}",
            ctx.config().service_name,
            path,
            req.method.to_ascii_uppercase(),
            client_ip
        );

        if ctx.rate_limiter().exceeded(&key) {
            warn!(key = %key, log_only = self.log_only, "rate limit exceeded");
            if !self.log_only {
                return Err(HttpError::new(
                    429,
                    "request_rate_exceeded",
                    "Too many requests.",
                )
                .with_request(&req));
            }
        }

        next.run(ctx, req).await
    }
}
