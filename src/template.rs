//! Parse-once templates.
//!
//! A template is a declarative object (a request stanza, a resource, a
//! response massage) whose strings may contain `{...}` placeholders resolving
//! against dotted paths into a runtime model, e.g. `{$.request.params.title}`.
//! Parsing happens once at load time and produces a small AST; expansion walks
//! the AST against the model.
//!
//! Expansion rules:
//! - a string that is exactly one placeholder expands to the referenced value
//!   itself (objects and arrays survive un-stringified);
//! - mixed strings concatenate, stringifying scalar parts;
//! - missing paths expand to "undefined": the enclosing object drops the key,
//!   an enclosing array keeps `null`;
//! - the protected key `templates` is carried verbatim, so modules can hand
//!   raw template definitions through options untouched.

use std::fmt;

use serde_json::{Map, Value};

/// An expansion failure, reported against the placeholder that caused it.
#[derive(Debug, thiserror::Error)]
#[error("cannot expand '{{{placeholder}}}': {reason}")]
pub struct TemplateError {
    pub placeholder: String,
    pub reason: String,
}

/// A dotted model path such as `$.request.params.title`.
#[derive(Clone, Debug)]
pub struct PathExpr {
    raw: String,
    segments: Vec<String>,
}

impl PathExpr {
    fn parse(expr: &str) -> Self {
        let trimmed = expr.strip_prefix("$.").or_else(|| expr.strip_prefix('$')).unwrap_or(expr);
        let segments = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('.').map(str::to_string).collect()
        };
        Self { raw: expr.to_string(), segments }
    }

    fn resolve<'m>(&self, model: &'m Value) -> Option<&'m Value> {
        let mut current = model;
        for segment in &self.segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Clone, Debug)]
enum Part {
    Text(String),
    Path(PathExpr),
}

#[derive(Clone, Debug)]
enum Tpl {
    /// No placeholders anywhere below; expansion is a clone.
    Fixed(Value),
    /// Protected subtree, carried verbatim.
    Raw(Value),
    /// A whole-string placeholder.
    Path(PathExpr),
    /// A string with embedded placeholders.
    Text(Vec<Part>),
    Object(Vec<(String, Tpl)>),
    Array(Vec<Tpl>),
}

/// A compiled template.
#[derive(Clone, Debug)]
pub struct Template {
    root: Tpl,
}

impl Template {
    pub fn parse(value: &Value) -> Template {
        Template { root: parse_node(value, false) }
    }

    /// Expands the template against a model. `None` means the whole template
    /// resolved to a missing value.
    pub fn expand(&self, model: &Value) -> Result<Option<Value>, TemplateError> {
        expand_node(&self.root, model)
    }
}

fn parse_node(value: &Value, protected: bool) -> Tpl {
    if protected {
        return Tpl::Raw(value.clone());
    }
    match value {
        Value::String(text) => parse_string(text),
        Value::Object(map) => {
            let fields: Vec<(String, Tpl)> = map
                .iter()
                .map(|(key, val)| (key.clone(), parse_node(val, key == "templates")))
                .collect();
            if fields.iter().all(|(_, tpl)| matches!(tpl, Tpl::Fixed(_))) {
                Tpl::Fixed(value.clone())
            } else {
                Tpl::Object(fields)
            }
        }
        Value::Array(items) => {
            let parsed: Vec<Tpl> = items.iter().map(|item| parse_node(item, false)).collect();
            if parsed.iter().all(|tpl| matches!(tpl, Tpl::Fixed(_))) {
                Tpl::Fixed(value.clone())
            } else {
                Tpl::Array(parsed)
            }
        }
        other => Tpl::Fixed(other.clone()),
    }
}

fn parse_string(text: &str) -> Tpl {
    if !text.contains('{') {
        return Tpl::Fixed(Value::String(text.to_string()));
    }

    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let Some(close_rel) = rest[open..].find('}') else {
            // Unterminated brace: keep the text literally.
            literal.push_str(rest);
            rest = "";
            break;
        };
        literal.push_str(&rest[..open]);
        if !literal.is_empty() {
            parts.push(Part::Text(std::mem::take(&mut literal)));
        }
        let expr = &rest[open + 1..open + close_rel];
        parts.push(Part::Path(PathExpr::parse(expr)));
        rest = &rest[open + close_rel + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(Part::Text(literal));
    }

    if parts.is_empty() {
        Tpl::Fixed(Value::String(String::new()))
    } else if parts.len() == 1 && matches!(parts[0], Part::Path(_)) {
        match parts.into_iter().next() {
            Some(Part::Path(path)) => Tpl::Path(path),
            _ => unreachable!(),
        }
    } else {
        Tpl::Text(parts)
    }
}

fn expand_node(tpl: &Tpl, model: &Value) -> Result<Option<Value>, TemplateError> {
    match tpl {
        Tpl::Fixed(value) | Tpl::Raw(value) => Ok(Some(value.clone())),
        Tpl::Path(path) => Ok(path.resolve(model).cloned()),
        Tpl::Text(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    Part::Text(text) => out.push_str(text),
                    Part::Path(path) => match path.resolve(model) {
                        None | Some(Value::Null) => {}
                        Some(Value::String(s)) => out.push_str(s),
                        Some(Value::Number(n)) => out.push_str(&n.to_string()),
                        Some(Value::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
                        Some(_) => {
                            return Err(TemplateError {
                                placeholder: path.to_string(),
                                reason: "cannot interpolate a structured value into a string"
                                    .to_string(),
                            })
                        }
                    },
                }
            }
            Ok(Some(Value::String(out)))
        }
        Tpl::Object(fields) => {
            let mut map = Map::new();
            for (key, field) in fields {
                if let Some(value) = expand_node(field, model)? {
                    map.insert(key.clone(), value);
                }
            }
            Ok(Some(Value::Object(map)))
        }
        Tpl::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(expand_node(item, model)?.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(out)))
        }
    }
}
