//! The declarative handler-chain compiler.
//!
//! An `x-request-handler` value is an ordered list of *steps*; each step maps
//! request names to stanzas `{request?, response?, return?, return_if?,
//! catch?}`. Compilation validates the chain shape, parses every template
//! once and builds predicate ASTs for `catch`/`return_if`. Execution runs
//! steps sequentially, fans the requests of one step out concurrently, stores
//! results in the model under their stanza names and stops at the first step
//! that decides to return.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Handler, HandlerResult};
use crate::dispatch::Context;
use crate::protocol::{canonical_string, HttpError, Request, Response};
use crate::spec::error::SpecError;
use crate::template::Template;

/// Compiles a declarative chain into a callable handler.
pub fn create_handler(spec: &Value) -> Result<Arc<dyn Handler>, SpecError> {
    Ok(Arc::new(ChainHandler::compile(spec)?))
}

struct ChainHandler {
    steps: Vec<Step>,
}

struct Step {
    stanzas: Vec<Stanza>,
}

struct Stanza {
    name: String,
    request: Option<RequestStanza>,
    response: Option<Template>,
    decision: Option<Decision>,
}

struct RequestStanza {
    template: Template,
    catch: Option<Predicate>,
}

enum Decision {
    /// Unconditional return; an optional template builds the returned value.
    Return(Option<Template>),
    /// Conditional return over the stanza's stored response.
    ReturnIf(Predicate),
}

impl ChainHandler {
    fn compile(spec: &Value) -> Result<ChainHandler, SpecError> {
        let Value::Array(raw_steps) = spec else {
            return Err(SpecError::chain(
                "Invalid spec. Must be a non-empty array of request step definitions.",
            ));
        };
        if raw_steps.is_empty() {
            return Err(SpecError::chain(
                "Invalid spec. Must be a non-empty array of request step definitions.",
            ));
        }

        let mut steps = Vec::with_capacity(raw_steps.len());
        for raw_step in raw_steps {
            let Value::Object(map) = raw_step else {
                return Err(SpecError::chain(
                    "Invalid spec. Step must be an object with at least one request definition.",
                ));
            };
            if map.is_empty() {
                return Err(SpecError::chain(
                    "Invalid spec. Step must be an object with at least one request definition.",
                ));
            }

            let mut stanzas = Vec::with_capacity(map.len());
            for (name, raw_stanza) in map {
                stanzas.push(Stanza::compile(name, raw_stanza)?);
            }
            if stanzas.iter().filter(|s| s.decision.is_some()).count() > 1 {
                return Err(SpecError::chain(
                    "Invalid spec. Returning requests cannot be parallel.",
                ));
            }
            steps.push(Step { stanzas });
        }

        // The final step must decide; a single trailing request implies it.
        let last = steps.last_mut().expect("validated non-empty");
        if !last.stanzas.iter().any(|s| s.decision.is_some()) {
            if last.stanzas.len() > 1 {
                return Err(SpecError::chain(
                    "Invalid spec. The last step must explicitly return if it contains parallel requests.",
                ));
            }
            last.stanzas[0].decision = Some(Decision::Return(None));
        }

        Ok(ChainHandler { steps })
    }
}

impl Stanza {
    fn compile(name: &str, raw: &Value) -> Result<Stanza, SpecError> {
        let Value::Object(map) = raw else {
            return Err(SpecError::chain(format!(
                "Invalid spec. Request block '{name}' must be an object."
            )));
        };

        let request = map.get("request").map(|tpl| {
            Ok::<_, SpecError>(RequestStanza {
                template: Template::parse(tpl),
                catch: map.get("catch").map(Predicate::compile).transpose()?,
            })
        });
        let request = request.transpose()?;

        let return_value = map.get("return");
        let return_if = map.get("return_if");

        if return_if.is_some() && request.is_none() {
            return Err(SpecError::chain(
                "Invalid spec. return_if is only allowed for request blocks.",
            ));
        }
        if map.contains_key("catch") && request.is_none() {
            return Err(SpecError::chain(
                "Invalid spec. catch is only allowed for request blocks.",
            ));
        }
        if request.is_none() && return_value.is_none() {
            return Err(SpecError::chain(
                "Invalid spec. Request block must define either request or return.",
            ));
        }

        // A conditional return wins over a bare `return` on the same stanza.
        // `return` is a flag or a template: `true` returns the stanza's own
        // result, `false` is no decision at all, anything else builds the
        // returned value.
        let decision = if let Some(condition) = return_if {
            Some(Decision::ReturnIf(Predicate::compile(condition)?))
        } else {
            match return_value {
                Some(Value::Bool(true)) => Some(Decision::Return(None)),
                Some(Value::Bool(false)) | None => None,
                Some(other) => Some(Decision::Return(Some(Template::parse(other)))),
            }
        };

        let response = map.get("response").map(Template::parse);

        Ok(Stanza { name: name.to_string(), request, response, decision })
    }
}

#[async_trait]
impl Handler for ChainHandler {
    async fn handle(&self, ctx: Arc<Context>, req: Request) -> HandlerResult {
        let incoming_method = req.method.clone();
        let default_method = ctx.config().default_sub_request_method.clone();

        let mut model_map = Map::new();
        model_map.insert("request".to_string(), req.to_value());
        model_map.insert(
            "options".to_string(),
            ctx.globals().and_then(|g| g.get("options").cloned()).unwrap_or(Value::Null),
        );
        let mut model = Value::Object(model_map);
        // Typed copies of stored sub-responses. The model only carries plain
        // values, which cannot tell a JSON string body apart from text; a
        // whole-response return hands back the typed copy instead. Entries
        // are dropped as soon as a template rewrites the model slot.
        let mut responses: HashMap<String, Response> = HashMap::new();
        let mut do_return: Option<String> = None;

        for step in &self.steps {
            // Expand every request stanza against the pre-step model, then
            // fan them out concurrently.
            let mut launches = Vec::new();
            for stanza in &step.stanzas {
                let Some(request_stanza) = &stanza.request else { continue };
                let expanded = request_stanza.template.expand(&model).map_err(|e| {
                    HttpError::internal(format!(
                        "template expansion failed in request '{}': {e}",
                        stanza.name
                    ))
                })?;
                let mut sub = Request::from_value(expanded.unwrap_or(Value::Null))?;
                if sub.method.is_empty() {
                    sub.method = if incoming_method.is_empty() {
                        default_method.clone()
                    } else {
                        incoming_method.clone()
                    };
                }
                launches.push((stanza.name.as_str(), request_stanza.catch.as_ref(), sub));
            }

            let settled = futures::future::join_all(launches.into_iter().map(
                |(name, catch, sub)| {
                    let ctx = ctx.clone();
                    async move { (name, catch, ctx.request(sub).await) }
                },
            ))
            .await;

            let model_obj = model.as_object_mut().expect("model is an object");
            for (name, catch, result) in settled {
                match result {
                    Ok(resp) => {
                        model_obj.insert(name.to_string(), resp.to_value());
                        responses.insert(name.to_string(), resp);
                    }
                    Err(mut err) => {
                        let err_value = err.to_value();
                        if catch.is_some_and(|p| p.matches(&err_value)) {
                            model_obj.insert(name.to_string(), err_value);
                            responses.insert(name.to_string(), err.into_response());
                        } else {
                            err.set_field("requestName", Value::String(name.to_string()));
                            return Err(err);
                        }
                    }
                }
            }

            // Response massaging and return decisions, in declaration order.
            for stanza in &step.stanzas {
                if let Some(response_tpl) = &stanza.response {
                    let massaged = response_tpl.expand(&model).map_err(|e| {
                        HttpError::internal(format!(
                            "template expansion failed in response '{}': {e}",
                            stanza.name
                        ))
                    })?;
                    model
                        .as_object_mut()
                        .expect("model is an object")
                        .insert(stanza.name.clone(), massaged.unwrap_or(Value::Null));
                    responses.remove(&stanza.name);
                }

                match &stanza.decision {
                    Some(Decision::Return(template)) => {
                        if let Some(tpl) = template {
                            let value = tpl.expand(&model).map_err(|e| {
                                HttpError::internal(format!(
                                    "template expansion failed in return '{}': {e}",
                                    stanza.name
                                ))
                            })?;
                            model
                                .as_object_mut()
                                .expect("model is an object")
                                .insert(stanza.name.clone(), value.unwrap_or(Value::Null));
                            responses.remove(&stanza.name);
                        }
                        if do_return.is_none() {
                            do_return = Some(stanza.name.clone());
                        }
                    }
                    Some(Decision::ReturnIf(predicate)) => {
                        let stored = model.get(&stanza.name).cloned().unwrap_or(Value::Null);
                        if do_return.is_none() && predicate.matches(&stored) {
                            do_return = Some(stanza.name.clone());
                        }
                    }
                    None => {}
                }
            }

            if do_return.is_some() {
                break;
            }
        }

        let Some(name) = do_return else {
            return Ok(Response::default());
        };
        if let Some(resp) = responses.remove(&name) {
            return Ok(resp);
        }
        Ok(Response::from_value(model.get(&name).cloned().unwrap_or(Value::Null)))
    }
}

/// A compiled `catch`/`return_if` condition: a conjunction of field
/// comparisons, each field accepting a disjunction of values.
#[derive(Clone, Debug)]
pub struct Predicate {
    fields: Vec<FieldPredicate>,
}

#[derive(Clone, Debug)]
struct FieldPredicate {
    path: Vec<String>,
    matchers: Vec<Matcher>,
}

#[derive(Clone, Debug)]
enum Matcher {
    Status(u16),
    /// A `5xx`-style pattern: each `x` stands for any digit.
    StatusPattern(String),
    /// Canonical JSON text of the expected value.
    Json(String),
}

impl Predicate {
    pub fn compile(condition: &Value) -> Result<Predicate, SpecError> {
        let Value::Object(map) = condition else {
            return Err(SpecError::chain(
                "Invalid spec. catch/return_if conditions must be objects.",
            ));
        };

        let mut fields = Vec::with_capacity(map.len());
        for (field, raw) in map {
            let values: Vec<&Value> = match raw {
                Value::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            let mut matchers = Vec::with_capacity(values.len());
            for value in values {
                matchers.push(Matcher::compile(field, value)?);
            }
            fields.push(FieldPredicate {
                path: field.split('.').map(str::to_string).collect(),
                matchers,
            });
        }
        Ok(Predicate { fields })
    }

    /// True when every field condition holds for the response value.
    pub fn matches(&self, response: &Value) -> bool {
        self.fields.iter().all(|field| {
            let Some(actual) = resolve_path(response, &field.path) else {
                return false;
            };
            field.matchers.iter().any(|m| m.matches(actual))
        })
    }
}

impl Matcher {
    fn compile(field: &str, value: &Value) -> Result<Matcher, SpecError> {
        if field == "status" {
            return match value {
                Value::Number(n) => {
                    let status = n.as_u64().and_then(|v| u16::try_from(v).ok()).ok_or_else(
                        || {
                            SpecError::chain(format!(
                                "Invalid spec. Invalid status condition value {n}."
                            ))
                        },
                    )?;
                    Ok(Matcher::Status(status))
                }
                Value::String(pattern)
                    if pattern.len() == 3
                        && pattern.chars().all(|c| c.is_ascii_digit() || c == 'x') =>
                {
                    Ok(Matcher::StatusPattern(pattern.clone()))
                }
                other => Err(SpecError::chain(format!(
                    "Invalid spec. Invalid status condition value {other}."
                ))),
            };
        }
        Ok(Matcher::Json(canonical_string(value)))
    }

    fn matches(&self, actual: &Value) -> bool {
        match self {
            Matcher::Status(expected) => actual.as_u64() == Some(u64::from(*expected)),
            Matcher::StatusPattern(pattern) => {
                let Some(status) = actual.as_u64() else { return false };
                let digits = status.to_string();
                digits.len() == pattern.len()
                    && digits
                        .chars()
                        .zip(pattern.chars())
                        .all(|(d, p)| p == 'x' || p == d)
            }
            Matcher::Json(expected) => canonical_string(actual) == *expected,
        }
    }
}

fn resolve_path<'m>(value: &'m Value, path: &[String]) -> Option<&'m Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
