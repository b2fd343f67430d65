//! Request latency metrics.
//!
//! Records one histogram observation per request, labelled by request class,
//! route path (with the leading `/{domain}`-style segment stripped), method
//! and response status. Observations are emitted on success and on failure.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{Filter, Next};
use crate::dispatch::Context;
use crate::handler::HandlerResult;
use crate::observe::RequestLabels;
use crate::protocol::Request;

pub struct MetricsFilter;

/// Drops the first path component: `/{domain}/v1/page` → `/v1/page`.
pub(crate) fn strip_first_segment(path: &str) -> &str {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.find('/') {
        Some(idx) => &trimmed[idx..],
        None => "/",
    }
}

#[async_trait]
impl Filter for MetricsFilter {
    async fn apply(&self, ctx: Arc<Context>, req: Request, next: Next<'_>) -> HandlerResult {
        let path = next.route().map(|r| strip_first_segment(r.path).to_string());
        let method = req.method.clone();
        let started = Instant::now();

        let result = next.run(ctx.clone(), req).await;

        let status = match &result {
            Ok(resp) => resp.status,
            Err(err) => err.status,
        };
        ctx.metrics().observe_request(
            &RequestLabels {
                request_class: ctx.request_class().as_str(),
                path: path.as_deref().unwrap_or("/"),
                method: &method,
                status,
            },
            started.elapsed(),
        );

        result
    }
}
