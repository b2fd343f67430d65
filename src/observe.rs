//! Observability collaborators.
//!
//! Metrics, rate limiting and documentation serving are external concerns:
//! the engine talks to them through traits and ships no-op defaults plus an
//! in-memory metrics sink for tests. All implementations must be thread-safe;
//! they are shared across every in-flight request.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::Level;

use crate::handler::HandlerResult;
use crate::protocol::Request;

/// Labels attached to one request observation.
#[derive(Debug)]
pub struct RequestLabels<'a> {
    pub request_class: &'a str,
    /// Route path with the leading `/{domain}`-style segment stripped.
    pub path: &'a str,
    pub method: &'a str,
    pub status: u16,
}

/// Sink for request latency histograms.
pub trait MetricsSink: Send + Sync {
    fn observe_request(&self, labels: &RequestLabels<'_>, elapsed: Duration);
}

pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe_request(&self, _labels: &RequestLabels<'_>, _elapsed: Duration) {}
}

/// Records observations in memory; for tests and local debugging.
#[derive(Default)]
pub struct InMemoryMetrics {
    samples: Mutex<Vec<(String, Duration)>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<(String, Duration)> {
        self.samples.lock().expect("metrics mutex poisoned").clone()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn observe_request(&self, labels: &RequestLabels<'_>, elapsed: Duration) {
        let key = format!(
            "{}.{}.{}.{}",
            labels.request_class, labels.path, labels.method, labels.status
        );
        self.samples.lock().expect("metrics mutex poisoned").push((key, elapsed));
    }
}

/// Counter backend consulted by the `ratelimit_route` filter.
pub trait RateLimiter: Send + Sync {
    /// Registers one hit for the key and reports whether the limit is
    /// exceeded.
    fn exceeded(&self, key: &str) -> bool;
}

pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn exceeded(&self, _key: &str) -> bool {
        false
    }
}

/// The documentation (Swagger-UI) collaborator the listing handler delegates
/// `?path=` and HTML requests to.
#[async_trait]
pub trait DocsServer: Send + Sync {
    async fn serve(&self, req: &Request, spec: &Value) -> HandlerResult;
}

/// Installs a fmt `tracing` subscriber; call once from the hosting binary.
pub fn init_logging() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("logging already initialised");
    }
}
