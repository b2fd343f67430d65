//! The request dispatcher.
//!
//! [`HyperSwitch`] is the public facade: it owns the sealed [`Engine`]
//! (route tree, config, collaborators) and dispatches external requests.
//! Every dispatch — external or recursive — gets a fresh [`Context`] carrying
//! its request id, recursion depth, request class and a weak link to its
//! parent for diagnostics. Handlers issue sub-requests through
//! [`Context::request`], which re-enters the same engine one level deeper.
//!
//! Dispatch walks: recursion check → filter stack (engine-level) → route
//! lookup → /sys guard → node filter stack → operation handler → response
//! normalisation.

use std::sync::{Arc, OnceLock, Weak};

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{OutboundClient, ReqwestClient};
use crate::config::Config;
use crate::filters::{FilterEntry, FilterRegistry, Next, RouteInfo, TerminalFn};
use crate::handler::{Handler, HandlerResult, Operations};
use crate::observe::{DocsServer, MetricsSink, NoopMetrics, NoopRateLimiter, RateLimiter};
use crate::protocol::{Body, Headers, HttpError, Request, Response};
use crate::router::{RouteMatch, RouteTree, SpecRootId};
use crate::spec::error::SpecError;
use crate::spec::module::{ModuleRegistry, SpecModule};
use crate::spec::{load_spec, LoadedSpec};

/// Coarse request classification for metrics and rate partitioning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestClass {
    External,
    Internal,
    InternalUpdate,
    InternalStartup,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::External => "external",
            RequestClass::Internal => "internal",
            RequestClass::InternalUpdate => "internal_update",
            RequestClass::InternalStartup => "internal_startup",
        }
    }
}

/// The sealed engine: immutable after startup, shared across all requests.
pub struct Engine {
    tree: RouteTree,
    config: Arc<Config>,
    metrics: Arc<dyn MetricsSink>,
    rate_limiter: Arc<dyn RateLimiter>,
    client: Arc<dyn OutboundClient>,
    docs: Option<Arc<dyn DocsServer>>,
    request_filters: Arc<Vec<FilterEntry>>,
    sub_request_filters: Arc<Vec<FilterEntry>>,
}

/// Per-request dispatch state. One context exists per dispatched request;
/// children link back to their parent only weakly.
pub struct Context {
    engine: Arc<Engine>,
    request_id: String,
    recursion_depth: usize,
    parent: Option<Weak<Context>>,
    request_class: RequestClass,
    root_request: Arc<Request>,
    /// `user-agent` / `x-client-ip` captured from the root request and
    /// applied to sub-requests.
    forward_headers: Headers,
    /// `method uri` capture for recursion diagnostics.
    summary: Value,
    /// Globals of the matched route node, set after routing.
    globals: OnceLock<Value>,
}

impl Context {
    /// Issues a recursive sub-request into the engine.
    pub fn request(self: &Arc<Self>, req: Request) -> BoxFuture<'static, HandlerResult> {
        self.engine.dispatch(req, Some(self.clone()), RequestClass::Internal)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn recursion_depth(&self) -> usize {
        self.recursion_depth
    }

    pub fn request_class(&self) -> RequestClass {
        self.request_class
    }

    /// The request this dispatch chain entered the engine with.
    pub fn root_request(&self) -> &Request {
        &self.root_request
    }

    pub fn parent(&self) -> Option<Arc<Context>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn config(&self) -> &Config {
        &self.engine.config
    }

    /// Configuration of the matched route node, available to handlers.
    pub fn globals(&self) -> Option<&Value> {
        self.globals.get()
    }

    pub fn metrics(&self) -> &dyn MetricsSink {
        self.engine.metrics.as_ref()
    }

    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.engine.rate_limiter.as_ref()
    }

    pub fn client(&self) -> &dyn OutboundClient {
        self.engine.client.as_ref()
    }
}

#[derive(Clone)]
struct ListingInfo {
    spec_root: SpecRootId,
    base_path: String,
    listing_root: bool,
    host_base_path: Option<String>,
    items: Vec<String>,
}

fn new_request_id() -> String {
    Uuid::now_v7().to_string()
}

impl Engine {
    /// Dispatches a request. `root_class` applies only when there is no
    /// parent; sub-requests derive their class from their method.
    pub fn dispatch(
        self: &Arc<Self>,
        req: Request,
        parent: Option<Arc<Context>>,
        root_class: RequestClass,
    ) -> BoxFuture<'static, HandlerResult> {
        let engine = self.clone();
        Box::pin(async move {
            let mut req = req;
            req.method = if req.method.is_empty() {
                "get".to_string()
            } else {
                req.method.to_ascii_lowercase()
            };

            let depth = parent.as_ref().map_or(0, |p| p.recursion_depth + 1);
            if depth > engine.config.max_depth {
                let mut parents = Vec::new();
                let mut cursor = parent.clone();
                while let Some(ctx) = cursor {
                    parents.push(ctx.summary.clone());
                    cursor = ctx.parent();
                }
                return Err(HttpError::recursion_exceeded(depth, parents, &req));
            }

            let class = match &parent {
                Some(p) if p.request_class == RequestClass::InternalStartup => {
                    RequestClass::InternalStartup
                }
                Some(_) if matches!(req.method.as_str(), "get" | "head") => {
                    RequestClass::Internal
                }
                Some(_) => RequestClass::InternalUpdate,
                None => root_class,
            };

            let request_id = req
                .headers
                .get("x-request-id")
                .map(str::to_string)
                .or_else(|| parent.as_ref().map(|p| p.request_id.clone()))
                .unwrap_or_else(new_request_id);
            req.headers.set("x-request-id", &request_id);

            let forward_headers = match &parent {
                Some(p) => {
                    for (name, value) in p.forward_headers.iter() {
                        req.headers.set_default(name, value);
                    }
                    p.forward_headers.clone()
                }
                None => {
                    let mut headers = Headers::new();
                    for name in ["user-agent", "x-client-ip"] {
                        if let Some(value) = req.headers.get(name) {
                            headers.set(name, value);
                        }
                    }
                    headers
                }
            };

            let root_request = match &parent {
                Some(p) => p.root_request.clone(),
                None => Arc::new(req.clone()),
            };

            let ctx = Arc::new(Context {
                engine: engine.clone(),
                request_id: request_id.clone(),
                recursion_depth: depth,
                parent: parent.as_ref().map(Arc::downgrade),
                request_class: class,
                root_request,
                forward_headers,
                summary: req.summary(),
                globals: OnceLock::new(),
            });

            let stack = if depth == 0 {
                engine.request_filters.clone()
            } else {
                engine.sub_request_filters.clone()
            };
            let terminal_engine = engine.clone();
            let terminal = move |ctx: Arc<Context>,
                                 req: Request|
                  -> BoxFuture<'static, HandlerResult> {
                let engine = terminal_engine.clone();
                Box::pin(async move { engine.route_and_invoke(ctx, req).await })
            };
            let terminal: &TerminalFn = &terminal;

            let mut result = Next::new(stack.as_slice(), None, terminal).run(ctx, req).await;
            match &mut result {
                Ok(resp) => resp.headers.set_default("x-request-id", &request_id),
                Err(err) => err.headers.set_default("x-request-id", &request_id),
            }
            result
        })
    }

    async fn route_and_invoke(
        self: Arc<Engine>,
        ctx: Arc<Context>,
        mut req: Request,
    ) -> HandlerResult {
        let Some(matched) = self.tree.lookup(&req.uri) else {
            return Err(HttpError::not_found_route(&req));
        };

        // The top-level sys subtree is unreachable from outside; only
        // recursive dispatch (and the startup phase) may enter it.
        let external = ctx.recursion_depth == 0
            && ctx.request_class != RequestClass::InternalStartup;
        if external && (req.uri.segment(0) == Some("sys") || req.uri.segment(1) == Some("sys")) {
            return Err(HttpError::forbidden_sys(&req));
        }

        match matched {
            RouteMatch::Handler { value, params } => {
                let _ = ctx.globals.set(value.globals.clone());
                let mut merged = value.default_params.clone();
                for (key, val) in params {
                    merged.insert(key, val);
                }
                req.params = merged;

                let is_head = req.method == "head";
                let op = value
                    .methods
                    .get(&req.method)
                    .or_else(|| if is_head { value.methods.get("get") } else { None })
                    .ok_or_else(|| {
                        HttpError::not_found_route(&req)
                            .with_detail(format!("no handler for method '{}'", req.method))
                    })?;
                let Some(handler) = op.handler.clone() else {
                    return Err(HttpError::internal("handlers are disabled"));
                };

                let info = RouteInfo { path: &value.path, operation: Some(op) };
                let terminal = move |ctx: Arc<Context>,
                                     req: Request|
                      -> BoxFuture<'static, HandlerResult> {
                    let handler = handler.clone();
                    Box::pin(async move { handler.handle(ctx, req).await })
                };
                let terminal: &TerminalFn = &terminal;

                let capture = capture_of(&req);
                let result =
                    Next::new(&value.filters, Some(&info), terminal).run(ctx, req).await;
                normalise(result, is_head, &capture)
            }
            RouteMatch::Listing { value, items, at_api_root: _, params } => {
                let _ = ctx.globals.set(value.globals.clone());
                req.params = params;

                let listing = ListingInfo {
                    spec_root: value.spec_root,
                    base_path: value.path.clone(),
                    listing_root: value.listing,
                    host_base_path: value.host_base_path.clone(),
                    items,
                };
                let info = RouteInfo { path: &value.path, operation: None };
                let listing_engine = self.clone();
                let terminal = move |ctx: Arc<Context>,
                                     req: Request|
                      -> BoxFuture<'static, HandlerResult> {
                    let engine = listing_engine.clone();
                    let listing = listing.clone();
                    Box::pin(async move { engine.handle_listing(ctx, req, listing).await })
                };
                let terminal: &TerminalFn = &terminal;

                let is_head = req.method == "head";
                let capture = capture_of(&req);
                let result =
                    Next::new(&value.filters, Some(&info), terminal).run(ctx, req).await;
                normalise(result, is_head, &capture)
            }
        }
    }

    /// The default listing handler for paths ending in `/`.
    async fn handle_listing(
        self: Arc<Engine>,
        _ctx: Arc<Context>,
        req: Request,
        listing: ListingInfo,
    ) -> HandlerResult {
        let base_path =
            if listing.base_path.is_empty() { "/".to_string() } else { listing.base_path };

        if req.query.contains_key("spec") {
            let mut spec = self.tree.spec_root(listing.spec_root).clone();
            let base = if req.uri.is_absolute() {
                listing.host_base_path.clone().unwrap_or_else(|| base_path.clone())
            } else {
                base_path.clone()
            };
            spec["servers"] = json!([{ "url": base }]);
            return Ok(Response::json(200, spec));
        }

        let accept_html =
            req.headers.get("accept").is_some_and(|accept| accept.contains("text/html"));
        let has_path_query = req.query.contains_key("path");
        let docs_route = accept_html && !listing.listing_root;

        if has_path_query || docs_route {
            if docs_route && !has_path_query && !req.query.is_empty() {
                let mut resp = Response::new(301);
                resp.headers.set("location", format!("{}/", base_path.trim_end_matches('/')));
                return Ok(resp);
            }
            let Some(docs) = &self.docs else {
                return Err(HttpError::new(404, "not_found", "No docs handler configured.")
                    .with_request(&req));
            };
            return docs.serve(&req, self.tree.spec_root(listing.spec_root)).await;
        }

        let items: Vec<&String> =
            listing.items.iter().filter(|item| item.as_str() != "sys").collect();

        if accept_html {
            let mut html = String::from("<html><head><title>Index</title></head><body><ul>");
            for item in &items {
                html.push_str(&format!("<li><a href=\"{item}/\">{item}</a></li>"));
            }
            html.push_str("</ul></body></html>");
            return Ok(Response::html(200, html));
        }

        Ok(Response::json(200, json!({ "items": items })))
    }
}

fn capture_of(req: &Request) -> Request {
    let mut capture = req.clone();
    capture.body = Body::Empty;
    capture
}

/// Response normalisation: empty responses become 500s, plain error statuses
/// become error-shaped, `head` responses lose their body.
fn normalise(result: HandlerResult, is_head: bool, capture: &Request) -> HandlerResult {
    match result {
        Ok(resp) if resp.is_empty_sentinel() => Err(HttpError::empty_response(capture)),
        Ok(resp) if resp.status >= 400 && !resp.is_error_shaped() => {
            Err(HttpError::from_response(resp).with_request(capture))
        }
        Ok(mut resp) => {
            if is_head {
                resp.body = Body::Empty;
            }
            Ok(resp)
        }
        Err(err) => Err(err),
    }
}

/// The public dispatcher facade.
pub struct HyperSwitch {
    engine: Arc<Engine>,
    closed: watch::Sender<bool>,
}

impl HyperSwitch {
    pub fn builder() -> HyperSwitchBuilder {
        HyperSwitchBuilder::new()
    }

    /// Dispatches an externally originated request. Never fails: rejections
    /// come back as error-shaped responses with `application/problem+json`
    /// bodies and the configured error-type prefix.
    pub async fn request(&self, req: Request) -> Response {
        let result = self.engine.dispatch(req, None, RequestClass::External).await;
        self.finalize(result)
    }

    /// Dispatches with full error detail; for adaptors that want to shape
    /// errors themselves.
    pub async fn dispatch(&self, req: Request) -> HandlerResult {
        self.engine.dispatch(req, None, RequestClass::External).await
    }

    fn finalize(&self, result: HandlerResult) -> Response {
        let mut resp = match result {
            Ok(resp) => resp,
            Err(err) => err.into_response(),
        };
        if resp.status >= 400 {
            if let Some(Value::Object(body)) = resp.body.as_json_mut() {
                if let Some(Value::String(error_type)) = body.get_mut("type") {
                    if !error_type.starts_with("http://") && !error_type.starts_with("https://")
                    {
                        *error_type =
                            format!("{}{}", self.engine.config.default_error_uri, error_type);
                    }
                }
            }
            resp.headers.set("content-type", "application/problem+json");
        }
        resp
    }

    /// The merged spec document of the root API, for adaptors serving docs.
    pub fn root_spec(&self) -> &Value {
        self.engine.tree.spec_root(0)
    }

    /// Signals that the embedding server has stopped.
    pub fn close(&self) {
        info!("hyperswitch stopped");
        let _ = self.closed.send(true);
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Assembles a [`HyperSwitch`]: config, host operations, modules, filters and
/// collaborator overrides.
pub struct HyperSwitchBuilder {
    config: Config,
    operations: Operations,
    modules: ModuleRegistry,
    filters: FilterRegistry,
    metrics: Arc<dyn MetricsSink>,
    rate_limiter: Arc<dyn RateLimiter>,
    client: Option<Arc<dyn OutboundClient>>,
    docs: Option<Arc<dyn DocsServer>>,
}

impl Default for HyperSwitchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperSwitchBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            operations: Operations::new(),
            modules: ModuleRegistry::new(),
            filters: FilterRegistry::default(),
            metrics: Arc::new(NoopMetrics),
            rate_limiter: Arc::new(NoopRateLimiter),
            client: None,
            docs: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn spec(mut self, spec: Value) -> Self {
        self.config.spec = spec;
        self
    }

    /// Registers a host-language callable for an `operationId`.
    pub fn operation(mut self, operation_id: &str, handler: Arc<dyn Handler>) -> Self {
        self.operations.insert(operation_id.to_string(), handler);
        self
    }

    pub fn module<M: SpecModule + 'static>(mut self, name: &str, module: M) -> Self {
        self.modules.register(name, module);
        self
    }

    pub fn filter<F: crate::filters::FilterFactory + 'static>(
        mut self,
        name: &str,
        factory: F,
    ) -> Self {
        self.filters.register(name, factory);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn client(mut self, client: Arc<dyn OutboundClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn docs(mut self, docs: Arc<dyn DocsServer>) -> Self {
        self.docs = Some(docs);
        self
    }

    /// Loads the spec, seals the route tree and runs the startup resource
    /// phase.
    pub async fn build(self) -> Result<HyperSwitch, SpecError> {
        let config = Arc::new(self.config);
        let LoadedSpec { tree, request_filters, sub_request_filters } =
            load_spec(&config, &self.modules, self.operations, &self.filters)?;

        let engine = Arc::new(Engine {
            tree,
            config: config.clone(),
            metrics: self.metrics,
            rate_limiter: self.rate_limiter,
            client: self.client.unwrap_or_else(|| Arc::new(ReqwestClient::new())),
            docs: self.docs,
            request_filters: Arc::new(request_filters),
            sub_request_filters: Arc::new(sub_request_filters),
        });

        if !config.skip_resources {
            run_resources(&engine).await?;
        }

        let (closed, _) = watch::channel(false);
        Ok(HyperSwitch { engine, closed })
    }
}

/// Executes the startup resource templates collected during loading, using a
/// privileged startup class that may reach `/sys`.
async fn run_resources(engine: &Arc<Engine>) -> Result<(), SpecError> {
    let mut startup_requests = Vec::new();
    for value in engine.tree.values_with_resources() {
        let domain = value
            .path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or("")
            .trim_matches(|c| matches!(c, '{' | '}' | '+' | '/'))
            .to_string();
        let model = json!({ "request": { "params": { "domain": domain } } });
        for template in &value.resources {
            let expanded = template
                .expand(&model)
                .map_err(|e| SpecError::resource(e.to_string()))?
                .unwrap_or(Value::Object(Map::new()));
            if expanded.get("uri").or_else(|| expanded.get("url")).is_none() {
                return Err(SpecError::resource(format!(
                    "resource on '{}' has no uri",
                    value.path
                )));
            }
            let mut req =
                Request::from_value(expanded).map_err(|e| SpecError::resource(e.to_string()))?;
            if req.method.is_empty() {
                req.method = "put".to_string();
            }
            startup_requests.push(req);
        }
    }

    for req in startup_requests {
        let summary = format!("{} {}", req.method, req.uri);
        match engine.dispatch(req, None, RequestClass::InternalStartup).await {
            Ok(resp) => debug!(status = resp.status, request = %summary, "startup resource ok"),
            Err(err) => {
                return Err(SpecError::resource(format!("'{summary}' failed: {err}")));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handler::handler_fn;
    use crate::observe::InMemoryMetrics;

    fn echo_params() -> Arc<dyn Handler> {
        handler_fn(|_ctx, req| async move {
            Ok(Response::json(200, json!({ "params": req.params, "query": req.query })))
        })
    }

    async fn engine(spec: Value) -> HyperSwitch {
        HyperSwitch::builder()
            .spec(spec)
            .operation("echo", echo_params())
            .build()
            .await
            .expect("spec should load")
    }

    fn body_json(resp: &Response) -> &Value {
        resp.body.as_json().expect("expected a json body")
    }

    #[tokio::test]
    async fn test_greedy_segment_captures_remainder() {
        let hs = engine(json!({
            "paths": {"/test/{+rest}": {"get": {"operationId": "echo"}}}
        }))
        .await;
        let resp = hs.request(Request::get("/test/foo/bar/baz")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(body_json(&resp)["params"]["rest"], json!("foo/bar/baz"));
    }

    #[tokio::test]
    async fn test_optional_segment_present_and_absent() {
        let hs = engine(json!({
            "paths": {"/test{/rest}": {"get": {"operationId": "echo"}}}
        }))
        .await;

        let resp = hs.request(Request::get("/test")).await;
        assert_eq!(resp.status, 200);
        assert!(body_json(&resp)["params"].get("rest").is_none());

        let resp = hs.request(Request::get("/test/foo")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(body_json(&resp)["params"]["rest"], json!("foo"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let hs = engine(json!({
            "paths": {"/known": {"get": {"operationId": "echo"}}}
        }))
        .await;
        let resp = hs.request(Request::get("/unknown")).await;
        assert_eq!(resp.status, 404);
        assert!(body_json(&resp)["type"].as_str().unwrap().ends_with("not_found#route"));
        assert_eq!(resp.headers.get("content-type"), Some("application/problem+json"));
    }

    #[tokio::test]
    async fn test_chain_catch_and_parallel_return() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_x = hits.clone();
        let hs = HyperSwitch::builder()
            .spec(json!({
                "paths": {
                    "/x": {"get": {"operationId": "x_op"}},
                    "/y": {"get": {"operationId": "y_op"}},
                    "/combined": {
                        "get": {
                            "x-request-handler": [{
                                "a": {"request": {"uri": "/x"}, "catch": {"status": 404}},
                                "b": {"request": {"uri": "/y"}, "return": true}
                            }]
                        }
                    }
                }
            }))
            .operation(
                "x_op",
                handler_fn(move |_ctx, req| {
                    let hits = hits_x.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Err(HttpError::new(404, "not_found", "Not found.").with_request(&req))
                    }
                }),
            )
            .operation(
                "y_op",
                handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!("ok"))) }),
            )
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::get("/combined")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(body_json(&resp), &json!("ok"));
        // The caught request really ran in parallel with the returner.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_return_false_flag_does_not_halt_the_chain() {
        let hs = HyperSwitch::builder()
            .spec(json!({
                "paths": {
                    "/first": {"get": {"operationId": "first_op"}},
                    "/second": {"get": {"operationId": "second_op"}},
                    "/combined": {
                        "get": {
                            "x-request-handler": [
                                {"a": {"request": {"uri": "/first"}, "return": false}},
                                {"b": {"request": {"uri": "/second"}, "return": true}}
                            ]
                        }
                    }
                }
            }))
            .operation(
                "first_op",
                handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!("first"))) }),
            )
            .operation(
                "second_op",
                handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!("second"))) }),
            )
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::get("/combined")).await;
        assert_eq!(resp.status, 200);
        // The false flag on step one did not return early, and the JSON
        // string body survived the whole-response return.
        assert_eq!(body_json(&resp), &json!("second"));
        assert_eq!(resp.headers.get("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_parallel_step_records_both_results() {
        let hs = HyperSwitch::builder()
            .spec(json!({
                "paths": {
                    "/x": {"get": {"operationId": "x_op"}},
                    "/y": {"get": {"operationId": "y_op"}},
                    "/combined": {
                        "get": {
                            "x-request-handler": [
                                {
                                    "a": {"request": {"uri": "/x"}},
                                    "b": {"request": {"uri": "/y"}}
                                },
                                {
                                    "merged": {"return": {
                                        "status": 200,
                                        "body": {"a": "{$.a.body}", "b": "{$.b.body}"}
                                    }}
                                }
                            ]
                        }
                    }
                }
            }))
            .operation(
                "x_op",
                handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!("from x"))) }),
            )
            .operation(
                "y_op",
                handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!("from y"))) }),
            )
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::get("/combined")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(body_json(&resp), &json!({"a": "from x", "b": "from y"}));
    }

    #[tokio::test]
    async fn test_uncaught_chain_rejection_carries_request_name() {
        let hs = HyperSwitch::builder()
            .spec(json!({
                "paths": {
                    "/x": {"get": {"operationId": "x_op"}},
                    "/combined": {
                        "get": {
                            "x-request-handler": [
                                {"a": {"request": {"uri": "/x"}, "catch": {"status": 503}}}
                            ]
                        }
                    }
                }
            }))
            .operation(
                "x_op",
                handler_fn(|_ctx, req| async move {
                    Err(HttpError::new(404, "not_found", "Not found.").with_request(&req))
                }),
            )
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::get("/combined")).await;
        assert_eq!(resp.status, 404);
        assert_eq!(body_json(&resp)["requestName"], json!("a"));
    }

    #[tokio::test]
    async fn test_recursion_cap() {
        let mut config = Config::default();
        config.max_depth = 3;
        config.spec = json!({
            "paths": {"/loop": {"get": {"operationId": "loop_op"}}}
        });
        let entries = Arc::new(AtomicUsize::new(0));
        let entries_op = entries.clone();
        let hs = HyperSwitch::builder()
            .config(config)
            .operation(
                "loop_op",
                handler_fn(move |ctx, _req| {
                    let entries = entries_op.clone();
                    async move {
                        entries.fetch_add(1, Ordering::SeqCst);
                        ctx.request(Request::get("/loop")).await
                    }
                }),
            )
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::get("/loop")).await;
        assert_eq!(resp.status, 500);
        let body = body_json(&resp);
        assert!(body["type"]
            .as_str()
            .unwrap()
            .ends_with("request_recursion_depth_exceeded"));
        assert_eq!(body["depth"], json!(4));
        // maxDepth = 3 allows exactly 4 handler entries (depths 0..=3).
        assert_eq!(entries.load(Ordering::SeqCst), 4);
        assert_eq!(body["requests"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_direct_sys_forbidden_but_recursive_allowed() {
        let hs = HyperSwitch::builder()
            .spec(json!({
                "paths": {
                    "/v1/sys/foo": {"get": {"operationId": "sys_op"}},
                    "/v1/public": {"get": {"operationId": "public_op"}}
                }
            }))
            .operation(
                "sys_op",
                handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!("from sys"))) }),
            )
            .operation(
                "public_op",
                handler_fn(|ctx, _req| async move {
                    ctx.request(Request::get("/v1/sys/foo")).await
                }),
            )
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::get("/v1/sys/foo")).await;
        assert_eq!(resp.status, 403);
        assert!(body_json(&resp)["type"].as_str().unwrap().ends_with("forbidden#sys"));

        let resp = hs.request(Request::get("/v1/public")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(body_json(&resp), &json!("from sys"));
    }

    #[tokio::test]
    async fn test_head_falls_back_to_get_with_empty_body() {
        let hs = HyperSwitch::builder()
            .spec(json!({
                "paths": {"/page": {"get": {"operationId": "page_op"}}}
            }))
            .operation(
                "page_op",
                handler_fn(|_ctx, _req| async {
                    let mut resp = Response::json(200, json!({"a": 1}));
                    resp.headers.set("etag", "\"v1\"");
                    Ok(resp)
                }),
            )
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::new("head", "/page")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers.get("etag"), Some("\"v1\""));
        assert!(resp.body.is_empty());
    }

    #[tokio::test]
    async fn test_listing_and_spec_queries() {
        let hs = engine(json!({
            "x-listing": true,
            "paths": {
                "/a": {"get": {"operationId": "echo"}},
                "/sys/secret": {"get": {"operationId": "echo"}}
            }
        }))
        .await;

        let mut req = Request::get("/");
        req.headers.set("accept", "application/json");
        let resp = hs.request(req).await;
        assert_eq!(resp.status, 200);
        assert_eq!(body_json(&resp), &json!({"items": ["a"]}));

        let resp = hs.request(Request::get("/?spec")).await;
        assert_eq!(resp.status, 200);
        let spec = body_json(&resp);
        assert_eq!(spec["servers"][0]["url"], json!("/"));
        assert!(spec["paths"].get("/a").is_some());

        let mut req = Request::get("/");
        req.headers.set("accept", "text/html");
        let resp = hs.request(req).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers.get("content-type"), Some("text/html"));
    }

    #[tokio::test]
    async fn test_validator_coercion_end_to_end() {
        let hs = engine(json!({
            "paths": {
                "/val": {
                    "get": {
                        "operationId": "echo",
                        "parameters": [
                            {"name": "flag", "in": "query", "schema": {"type": "boolean"}},
                            {"name": "q", "in": "query",
                             "schema": {"type": "string", "enum": ["one", "two", "three"]}}
                        ]
                    }
                }
            }
        }))
        .await;

        let resp = hs.request(Request::get("/val?flag=True")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(body_json(&resp)["query"]["flag"], json!(true));

        let resp = hs.request(Request::get("/val?q=four")).await;
        assert_eq!(resp.status, 400);
        assert_eq!(
            body_json(&resp)["detail"],
            json!("data.query.q should be equal to one of the allowed values: [one, two, three]")
        );
    }

    #[tokio::test]
    async fn test_request_id_generated_and_propagated() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let seen_inner = seen.clone();
        let hs = HyperSwitch::builder()
            .spec(json!({
                "paths": {
                    "/inner": {"get": {"operationId": "inner_op"}},
                    "/outer": {"get": {"operationId": "outer_op"}}
                }
            }))
            .operation(
                "inner_op",
                handler_fn(move |_ctx, req| {
                    let seen = seen_inner.clone();
                    async move {
                        seen.lock()
                            .unwrap()
                            .push(req.headers.get("x-request-id").unwrap().to_string());
                        Ok(Response::json(200, json!({})))
                    }
                }),
            )
            .operation(
                "outer_op",
                handler_fn(|ctx, _req| async move {
                    ctx.request(Request::get("/inner")).await
                }),
            )
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::get("/outer")).await;
        assert_eq!(resp.status, 200);
        let outer_id = resp.headers.get("x-request-id").unwrap().to_string();
        let inner_ids = seen.lock().unwrap().clone();
        assert_eq!(inner_ids, vec![outer_id]);
    }

    #[tokio::test]
    async fn test_request_clone_isolation() {
        let hs = engine(json!({
            "paths": {"/test/{p}": {"get": {"operationId": "echo"}}}
        }))
        .await;

        let original = Request::get("/test/value");
        let resp = hs.request(original.clone()).await;
        assert_eq!(resp.status, 200);
        // The router populated params on the dispatched copy only.
        assert!(original.params.is_empty());
        assert!(original.headers.get("x-request-id").is_none());
    }

    #[tokio::test]
    async fn test_error_statuses_are_wrapped_error_shaped() {
        let hs = HyperSwitch::builder()
            .spec(json!({"paths": {"/plain": {"get": {"operationId": "plain_op"}}}}))
            .operation(
                "plain_op",
                handler_fn(|_ctx, _req| async {
                    Ok(Response::json(502, json!({"message": "bad upstream"})))
                }),
            )
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::get("/plain")).await;
        assert_eq!(resp.status, 502);
        let body = body_json(&resp);
        assert!(body["type"].as_str().unwrap().ends_with("internal_error"));
        assert_eq!(body["uri"], json!("/plain"));
    }

    #[tokio::test]
    async fn test_metrics_observed_with_stripped_path() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let hs = HyperSwitch::builder()
            .spec(json!({
                "paths": {"/{domain}/v1/page": {"get": {"operationId": "echo"}}}
            }))
            .operation("echo", echo_params())
            .metrics(metrics.clone())
            .build()
            .await
            .unwrap();

        let resp = hs.request(Request::get("/en.wikipedia.org/v1/page")).await;
        assert_eq!(resp.status, 200);
        let samples = metrics.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].0, "external./v1/page.get.200");
    }

    #[tokio::test]
    async fn test_startup_resources_run_before_serving() {
        let setup_hits = Arc::new(AtomicUsize::new(0));
        let setup_inner = setup_hits.clone();
        let hs = HyperSwitch::builder()
            .spec(json!({
                "paths": {
                    "/sys/table": {"put": {"operationId": "create_table"}},
                    "/data": {
                        "get": {
                            "operationId": "echo",
                            "x-setup-handler": [{"uri": "/sys/table"}]
                        }
                    }
                }
            }))
            .operation("echo", echo_params())
            .operation(
                "create_table",
                handler_fn(move |ctx, _req| {
                    let hits = setup_inner.clone();
                    async move {
                        assert_eq!(ctx.request_class(), RequestClass::InternalStartup);
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(Response::json(201, json!({})))
                    }
                }),
            )
            .build()
            .await
            .unwrap();

        // The privileged startup dispatch reached /sys despite depth 0.
        assert_eq!(setup_hits.load(Ordering::SeqCst), 1);

        let resp = hs.request(Request::get("/data")).await;
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn test_close_notification() {
        let hs = engine(json!({"paths": {}})).await;
        hs.close();
        // Resolves immediately once closed.
        hs.closed().await;
    }
}
