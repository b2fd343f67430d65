//! The filter runtime.
//!
//! Filters wrap the terminal operation handler in an onion: the outermost
//! entry runs first and `next.run(...)` hands the request to the rest of the
//! stack. Entries can be scoped to a method; a non-matching entry falls
//! through transparently (with `head` aliasing `get`). Filter options are
//! consumed at load time by a [`FilterFactory`], so per-call state such as
//! compiled regexes is parsed exactly once.
//!
//! Every spec gets the default stack `metrics`, `validator` prepended before
//! any user filter.

pub mod header_match;
pub mod metrics;
pub mod outbound;
pub mod ratelimit;
pub mod validator;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::dispatch::Context;
use crate::handler::HandlerResult;
use crate::protocol::Request;
use crate::router::Operation;
use crate::spec::error::SpecError;

/// A middleware wrapping the rest of the filter stack.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn apply(&self, ctx: Arc<Context>, req: Request, next: Next<'_>) -> HandlerResult;
}

/// One configured filter on a route node or engine stack.
#[derive(Clone)]
pub struct FilterEntry {
    pub name: String,
    pub filter: Arc<dyn Filter>,
    /// When set, the entry only participates for this method.
    pub method: Option<String>,
}

impl std::fmt::Debug for FilterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEntry")
            .field("name", &self.name)
            .field("method", &self.method)
            .finish()
    }
}

impl FilterEntry {
    pub fn applies_to(&self, method: &str) -> bool {
        match &self.method {
            None => true,
            Some(scoped) => scoped == method || (scoped == "get" && method == "head"),
        }
    }
}

/// Route metadata visible to filters after routing.
pub struct RouteInfo<'t> {
    /// Canonical route path of the matched node.
    pub path: &'t str,
    /// The matched operation; `None` for listing dispatches.
    pub operation: Option<&'t Operation>,
}

pub type TerminalFn =
    dyn Fn(Arc<Context>, Request) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// The continuation of a filter stack.
pub struct Next<'a> {
    entries: &'a [FilterEntry],
    route: Option<&'a RouteInfo<'a>>,
    terminal: &'a TerminalFn,
}

impl<'a> Next<'a> {
    pub fn new(
        entries: &'a [FilterEntry],
        route: Option<&'a RouteInfo<'a>>,
        terminal: &'a TerminalFn,
    ) -> Self {
        Self { entries, route, terminal }
    }

    /// Route metadata, when the stack runs after routing.
    pub fn route(&self) -> Option<&'a RouteInfo<'a>> {
        self.route
    }

    /// Invokes the next participating filter, or the terminal handler.
    pub fn run(self, ctx: Arc<Context>, req: Request) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let mut entries = self.entries;
            while let Some((entry, rest)) = entries.split_first() {
                entries = rest;
                if entry.applies_to(&req.method) {
                    let next = Next { entries, route: self.route, terminal: self.terminal };
                    return entry.filter.apply(ctx, req, next).await;
                }
            }
            (self.terminal)(ctx, req).await
        })
    }
}

/// Builds a [`Filter`] from its load-time options.
pub trait FilterFactory: Send + Sync {
    fn create(&self, options: &Value) -> Result<Arc<dyn Filter>, SpecError>;
}

impl<F> FilterFactory for F
where
    F: Fn(&Value) -> Result<Arc<dyn Filter>, SpecError> + Send + Sync,
{
    fn create(&self, options: &Value) -> Result<Arc<dyn Filter>, SpecError> {
        self(options)
    }
}

/// Named filter factories. The stock set is pre-registered; hosts add their
/// own before loading a spec.
#[derive(Clone)]
pub struct FilterRegistry {
    factories: HashMap<String, Arc<dyn FilterFactory>>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self { factories: HashMap::new() };
        registry.register("metrics", |_: &Value| -> Result<Arc<dyn Filter>, SpecError> {
            Ok(Arc::new(metrics::MetricsFilter))
        });
        registry.register("validator", |_: &Value| -> Result<Arc<dyn Filter>, SpecError> {
            Ok(Arc::new(validator::ValidatorFilter))
        });
        registry.register(
            "ratelimit_route",
            |options: &Value| -> Result<Arc<dyn Filter>, SpecError> {
                Ok(Arc::new(ratelimit::RateLimitFilter::from_options(options)?))
            },
        );
        registry.register("http", |options: &Value| -> Result<Arc<dyn Filter>, SpecError> {
            Ok(Arc::new(outbound::OutboundFilter::from_options(options)?))
        });
        registry.register(
            "header_match",
            |options: &Value| -> Result<Arc<dyn Filter>, SpecError> {
                Ok(Arc::new(header_match::HeaderMatchFilter::from_options(options)?))
            },
        );
        registry
    }
}

impl FilterRegistry {
    pub fn register<F: FilterFactory + 'static>(&mut self, name: &str, factory: F) -> &mut Self {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn create(
        &self,
        name: &str,
        options: &Value,
        method: Option<String>,
    ) -> Result<FilterEntry, SpecError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SpecError::UnknownFilter { name: name.to_string() })?;
        Ok(FilterEntry { name: name.to_string(), filter: factory.create(options)?, method })
    }

    /// Parses one `x-route-filters` entry: `{name, options?, method?}`.
    pub fn parse_entry(
        &self,
        value: &Value,
        method: Option<String>,
    ) -> Result<FilterEntry, SpecError> {
        match value {
            Value::String(name) => self.create(name, &Value::Object(Map::new()), method),
            Value::Object(map) => {
                let name = map
                    .get("name")
                    .or_else(|| map.get("type"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| SpecError::document("filter entry needs a name"))?;
                let options = map.get("options").cloned().unwrap_or(Value::Object(Map::new()));
                let method = map
                    .get("method")
                    .and_then(Value::as_str)
                    .map(str::to_ascii_lowercase)
                    .or(method);
                self.create(name, &options, method)
            }
            _ => Err(SpecError::document("filter entries must be names or objects")),
        }
    }

    /// The fixed default stack at the head of every spec.
    pub fn default_stack(&self) -> Result<Vec<FilterEntry>, SpecError> {
        let empty = Value::Object(Map::new());
        Ok(vec![
            self.create("metrics", &empty, None)?,
            self.create("validator", &empty, None)?,
        ])
    }
}
