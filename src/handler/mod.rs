//! Operation handlers.
//!
//! A [`Handler`] is the terminal of a filter stack: it receives the routed
//! request together with its per-request [`Context`] and produces a response
//! or an error-shaped rejection. Handlers are either host-language callables
//! bound by `operationId` (register them with [`handler_fn`] or a custom
//! [`Handler`] impl), or declarative request chains compiled from
//! `x-request-handler` (see [`chain`]).

pub mod chain;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::dispatch::Context;
use crate::protocol::{HttpError, Request, Response};

pub type HandlerResult = Result<Response, HttpError>;

/// The terminal request handler bound to an operation.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: Arc<Context>, req: Request) -> HandlerResult;
}

/// Host-language callables keyed by `operationId`.
pub type Operations = HashMap<String, Arc<dyn Handler>>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Arc<Context>, Request) -> BoxFuture<'static, HandlerResult> + Send + Sync,
{
    async fn handle(&self, ctx: Arc<Context>, req: Request) -> HandlerResult {
        (self.0)(ctx, req).await
    }
}

/// Wraps an async closure as a [`Handler`].
///
/// ```ignore
/// let ops = [("get_page", handler_fn(|_ctx, req| async move {
///     Ok(Response::json(200, serde_json::json!({"title": req.params["title"]})))
/// }))];
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Arc<Context>, Request) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(
        move |ctx: Arc<Context>, req: Request| -> BoxFuture<'static, HandlerResult> {
            Box::pin(f(ctx, req))
        },
    ))
}
