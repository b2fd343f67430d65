//! Request validation.
//!
//! One [`RequestValidator`] is compiled per operation at load time from the
//! operation's `parameters` (and form body schema): required checks, type
//! checks and enum checks over `{params, query, headers, body}`. For
//! parameters declared with a non-`string` type, incoming string values are
//! coerced in place to their declared type; body fields are only coerced when
//! the request content type is not JSON (JSON bodies already carry types).
//!
//! Failures are 400 `bad_request` errors with Ajv-style details such as
//! `data.query.n should be a number`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Number, Value};

use super::{Filter, Next};
use crate::dispatch::Context;
use crate::handler::HandlerResult;
use crate::protocol::{HttpError, Request};

/// The stock `validator` filter; part of the default stack of every spec.
pub struct ValidatorFilter;

#[async_trait]
impl Filter for ValidatorFilter {
    async fn apply(&self, ctx: Arc<Context>, mut req: Request, next: Next<'_>) -> HandlerResult {
        if let Some(validator) =
            next.route().and_then(|r| r.operation).and_then(|op| op.validator.as_ref())
        {
            validator.check(&mut req)?;
        }
        next.run(ctx, req).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Location {
    Path,
    Query,
    Header,
    Body,
}

impl Location {
    fn data_key(self) -> &'static str {
        match self {
            Location::Path => "params",
            Location::Query => "query",
            Location::Header => "headers",
            Location::Body => "body",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
}

impl ParamKind {
    fn parse(name: &str) -> Option<ParamKind> {
        match name {
            "string" => Some(ParamKind::String),
            "integer" => Some(ParamKind::Integer),
            "number" => Some(ParamKind::Number),
            "boolean" => Some(ParamKind::Boolean),
            "object" => Some(ParamKind::Object),
            _ => None,
        }
    }

    fn article_name(self) -> &'static str {
        match self {
            ParamKind::String => "a string",
            ParamKind::Integer => "an integer",
            ParamKind::Number => "a number",
            ParamKind::Boolean => "a boolean",
            ParamKind::Object => "an object",
        }
    }
}

#[derive(Clone, Debug)]
struct ParamCheck {
    name: String,
    location: Location,
    required: bool,
    kind: Option<ParamKind>,
    enum_values: Option<Vec<Value>>,
}

/// Compiled parameter checks for one operation.
#[derive(Clone, Debug)]
pub struct RequestValidator {
    checks: Vec<ParamCheck>,
}

impl RequestValidator {
    /// Compiles the checks for an operation spec; `None` when the operation
    /// declares nothing to validate.
    pub fn compile(op_spec: &Value) -> Option<RequestValidator> {
        let mut checks = Vec::new();

        if let Some(Value::Array(parameters)) = op_spec.get("parameters") {
            for param in parameters {
                let Some(name) = param.get("name").and_then(Value::as_str) else { continue };
                let location = match param.get("in").and_then(Value::as_str) {
                    Some("path") => Location::Path,
                    Some("query") => Location::Query,
                    Some("header") => Location::Header,
                    Some("formData") => Location::Body,
                    _ => continue,
                };
                // OpenAPI 3 nests the type under `schema`; Swagger 2 keeps it
                // on the parameter itself.
                let schema = param.get("schema").unwrap_or(param);
                checks.push(ParamCheck {
                    name: name.to_string(),
                    location,
                    required: param.get("required").and_then(Value::as_bool).unwrap_or(false),
                    kind: schema.get("type").and_then(Value::as_str).and_then(ParamKind::parse),
                    enum_values: schema
                        .get("enum")
                        .and_then(Value::as_array)
                        .map(|values| values.to_vec()),
                });
            }
        }

        // Form body properties, for adaptors that parse form bodies into
        // objects of strings.
        if let Some(properties) = op_spec
            .pointer("/requestBody/content/application~1x-www-form-urlencoded/schema/properties")
            .and_then(Value::as_object)
        {
            let required: Vec<&str> = op_spec
                .pointer("/requestBody/content/application~1x-www-form-urlencoded/schema/required")
                .and_then(Value::as_array)
                .map(|list| list.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            for (name, schema) in properties {
                checks.push(ParamCheck {
                    name: name.clone(),
                    location: Location::Body,
                    required: required.contains(&name.as_str()),
                    kind: schema.get("type").and_then(Value::as_str).and_then(ParamKind::parse),
                    enum_values: schema
                        .get("enum")
                        .and_then(Value::as_array)
                        .map(|values| values.to_vec()),
                });
            }
        }

        if checks.is_empty() {
            None
        } else {
            Some(RequestValidator { checks })
        }
    }

    /// Validates the request, coercing typed parameters in place.
    pub fn check(&self, req: &mut Request) -> Result<(), HttpError> {
        let body_is_json = req
            .headers
            .get("content-type")
            .map_or(true, |ct| ct.starts_with(mime::APPLICATION_JSON.essence_str()));

        for check in &self.checks {
            match check.location {
                Location::Path | Location::Query => {
                    let map = match check.location {
                        Location::Path => &mut req.params,
                        _ => &mut req.query,
                    };
                    match map.get_mut(&check.name) {
                        None => check.require()?,
                        Some(value) => {
                            check.coerce_in_place(value)?;
                            check.check_enum(value)?;
                        }
                    }
                }
                Location::Header => match req.headers.get(&check.name) {
                    None => check.require()?,
                    Some(raw) => {
                        let mut value = Value::String(raw.to_string());
                        check.coerce_in_place(&mut value)?;
                        check.check_enum(&value)?;
                    }
                },
                Location::Body => {
                    let field = req
                        .body
                        .as_json_mut()
                        .and_then(Value::as_object_mut)
                        .and_then(|map| map.get_mut(&check.name));
                    match field {
                        None => check.require()?,
                        Some(value) => {
                            if body_is_json {
                                check.verify_type(value)?;
                            } else {
                                check.coerce_in_place(value)?;
                            }
                            check.check_enum(value)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl ParamCheck {
    fn data_path(&self) -> String {
        format!("data.{}.{}", self.location.data_key(), self.name)
    }

    fn require(&self) -> Result<(), HttpError> {
        if self.required {
            return Err(bad_request(format!(
                "data.{} should have required property '{}'",
                self.location.data_key(),
                self.name
            )));
        }
        Ok(())
    }

    fn coerce_in_place(&self, value: &mut Value) -> Result<(), HttpError> {
        let Some(kind) = self.kind else { return Ok(()) };
        if kind == ParamKind::String {
            return Ok(());
        }

        let type_error =
            || bad_request(format!("{} should be {}", self.data_path(), kind.article_name()));

        if let Value::String(raw) = value {
            let coerced = match kind {
                ParamKind::Integer => {
                    Value::Number(raw.parse::<i64>().map_err(|_| type_error())?.into())
                }
                ParamKind::Number => {
                    let parsed: f64 = raw.parse().map_err(|_| type_error())?;
                    Value::Number(Number::from_f64(parsed).ok_or_else(type_error)?)
                }
                ParamKind::Boolean => match raw.to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Value::Bool(true),
                    "false" | "0" | "no" => Value::Bool(false),
                    _ => return Err(type_error()),
                },
                ParamKind::Object => serde_json::from_str(raw).map_err(|_| type_error())?,
                ParamKind::String => unreachable!(),
            };
            if kind == ParamKind::Object && !coerced.is_object() {
                return Err(type_error());
            }
            *value = coerced;
            return Ok(());
        }

        // Already-typed values (defaults, list-valued query params) are
        // verified, not converted.
        self.verify_type(value)
    }

    /// Checks a value against the declared type without converting it.
    fn verify_type(&self, value: &Value) -> Result<(), HttpError> {
        let Some(kind) = self.kind else { return Ok(()) };
        let ok = match kind {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
        };
        if ok {
            Ok(())
        } else {
            Err(bad_request(format!(
                "{} should be {}",
                self.data_path(),
                kind.article_name()
            )))
        }
    }

    fn check_enum(&self, value: &Value) -> Result<(), HttpError> {
        let Some(allowed) = &self.enum_values else { return Ok(()) };
        if allowed.contains(value) {
            return Ok(());
        }
        let rendered: Vec<String> = allowed
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        Err(bad_request(format!(
            "{} should be equal to one of the allowed values: [{}]",
            self.data_path(),
            rendered.join(", ")
        )))
    }
}

fn bad_request(detail: String) -> HttpError {
    HttpError::new(400, "bad_request", "Invalid parameters.").with_detail(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op_with_query(name: &str, schema: Value) -> Value {
        json!({
            "parameters": [
                {"name": name, "in": "query", "required": false, "schema": schema}
            ]
        })
    }

    fn detail(err: HttpError) -> String {
        err.body["detail"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_boolean_coercion_case_insensitive() {
        let validator =
            RequestValidator::compile(&op_with_query("flag", json!({"type": "boolean"}))).unwrap();
        let mut req = Request::get("/x?flag=True");
        validator.check(&mut req).unwrap();
        assert_eq!(req.query["flag"], json!(true));

        let mut req = Request::get("/x?flag=0");
        validator.check(&mut req).unwrap();
        assert_eq!(req.query["flag"], json!(false));
    }

    #[test]
    fn test_number_coercion() {
        let validator =
            RequestValidator::compile(&op_with_query("n", json!({"type": "number"}))).unwrap();
        let mut req = Request::get("/x?n=27.5");
        validator.check(&mut req).unwrap();
        assert_eq!(req.query["n"], json!(27.5));

        let mut req = Request::get("/x?n=not_a_number");
        let err = validator.check(&mut req).unwrap_err();
        assert_eq!(err.status, 400);
        assert_eq!(detail(err), "data.query.n should be a number");
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let validator =
            RequestValidator::compile(&op_with_query("n", json!({"type": "integer"}))).unwrap();
        let mut req = Request::get("/x?n=27.5");
        let err = validator.check(&mut req).unwrap_err();
        assert_eq!(detail(err), "data.query.n should be an integer");

        let mut req = Request::get("/x?n=27");
        validator.check(&mut req).unwrap();
        assert_eq!(req.query["n"], json!(27));
    }

    #[test]
    fn test_enum_detail_lists_allowed_values() {
        let validator = RequestValidator::compile(&op_with_query(
            "q",
            json!({"type": "string", "enum": ["one", "two", "three"]}),
        ))
        .unwrap();
        let mut req = Request::get("/x?q=four");
        let err = validator.check(&mut req).unwrap_err();
        assert_eq!(
            detail(err),
            "data.query.q should be equal to one of the allowed values: [one, two, three]"
        );

        let mut req = Request::get("/x?q=two");
        validator.check(&mut req).unwrap();
    }

    #[test]
    fn test_required_query_param() {
        let spec = json!({
            "parameters": [{"name": "q", "in": "query", "required": true}]
        });
        let validator = RequestValidator::compile(&spec).unwrap();
        let mut req = Request::get("/x");
        let err = validator.check(&mut req).unwrap_err();
        assert_eq!(detail(err), "data.query should have required property 'q'");
    }

    #[test]
    fn test_body_coercion_only_for_non_json() {
        let spec = json!({
            "requestBody": {
                "content": {
                    "application/x-www-form-urlencoded": {
                        "schema": {
                            "properties": {"count": {"type": "integer"}},
                            "required": ["count"]
                        }
                    }
                }
            }
        });
        let validator = RequestValidator::compile(&spec).unwrap();

        // Form content type: string fields are coerced.
        let mut req = Request::new("post", "/x");
        req.headers.set("content-type", "application/x-www-form-urlencoded");
        req.body = crate::protocol::Body::Json(json!({"count": "5"}));
        validator.check(&mut req).unwrap();
        assert_eq!(req.body.as_json().unwrap()["count"], json!(5));

        // JSON content type: a string where an integer is declared fails.
        let mut req = Request::new("post", "/x");
        req.headers.set("content-type", "application/json");
        req.body = crate::protocol::Body::Json(json!({"count": "5"}));
        assert!(validator.check(&mut req).is_err());
    }

    #[test]
    fn test_nothing_to_validate() {
        assert!(RequestValidator::compile(&json!({"operationId": "x"})).is_none());
    }
}
