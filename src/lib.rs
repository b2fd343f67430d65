//! HyperSwitch is an in-process HTTP request dispatcher.
//!
//! A merged OpenAPI-style specification is compiled at startup into a prefix
//! tree of path patterns. External requests (handed over by a socket adaptor,
//! which is not part of this crate) are routed against that tree, wrapped in
//! an ordered filter stack and dispatched to an operation handler. Handlers
//! may recursively issue sub-requests back into the same engine.
//!
//! The main entry points are [`HyperSwitch::builder`] for assembling an engine
//! from a spec document and [`HyperSwitch::request`] for dispatching a
//! normalised [`Request`].

pub mod client;
pub mod config;
pub mod dispatch;
pub mod filters;
pub mod handler;
pub mod observe;
pub mod protocol;
pub mod router;
pub mod spec;
pub mod template;

pub use client::{OutboundClient, ReqwestClient};
pub use config::Config;
pub use dispatch::{Context, HyperSwitch, HyperSwitchBuilder, RequestClass};
pub use filters::{Filter, FilterEntry, FilterRegistry, Next};
pub use handler::{handler_fn, Handler};
pub use observe::{DocsServer, MetricsSink, RateLimiter, RequestLabels};
pub use protocol::{Body, Headers, HttpError, Request, Response, Uri};
pub use spec::error::SpecError;
pub use spec::module::{ModuleExport, ModuleRegistry, SpecModule};
pub use template::Template;
