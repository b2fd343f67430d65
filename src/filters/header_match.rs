//! Header allow-list matching.
//!
//! Applied to root requests only (recursion depth 0): each configured header
//! present on the request must match one of its allow-list regexes, otherwise
//! the request fails 403 `forbidden`. Patterns are compiled once at load.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::{Filter, Next};
use crate::dispatch::Context;
use crate::handler::HandlerResult;
use crate::protocol::{HttpError, Request};
use crate::spec::error::SpecError;

pub struct HeaderMatchFilter {
    rules: Vec<(String, Vec<Regex>)>,
}

impl HeaderMatchFilter {
    pub fn from_options(options: &Value) -> Result<HeaderMatchFilter, SpecError> {
        let Some(Value::Object(whitelist)) = options.get("whitelist") else {
            return Err(SpecError::InvalidFilter {
                name: "header_match".to_string(),
                reason: "missing whitelist".to_string(),
            });
        };

        let mut rules = Vec::with_capacity(whitelist.len());
        for (header, patterns) in whitelist {
            let list: Vec<&Value> = match patterns {
                Value::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            let mut compiled = Vec::with_capacity(list.len());
            for pattern in list {
                let Some(raw) = pattern.as_str() else {
                    return Err(SpecError::InvalidFilter {
                        name: "header_match".to_string(),
                        reason: format!("patterns for '{header}' must be strings"),
                    });
                };
                let regex = Regex::new(&format!("^(?:{raw})$")).map_err(|e| {
                    SpecError::InvalidFilter {
                        name: "header_match".to_string(),
                        reason: e.to_string(),
                    }
                })?;
                compiled.push(regex);
            }
            rules.push((header.to_ascii_lowercase(), compiled));
        }
        Ok(HeaderMatchFilter { rules })
    }

    fn check(&self, req: &Request) -> Result<(), HttpError> {
        for (header, patterns) in &self.rules {
            if let Some(value) = req.headers.get(header) {
                if !patterns.iter().any(|p| p.is_match(value)) {
                    return Err(HttpError::new(403, "forbidden", "Access denied.")
                        .with_detail(format!("header '{header}' is not allowed"))
                        .with_request(req));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Filter for HeaderMatchFilter {
    async fn apply(&self, ctx: Arc<Context>, req: Request, next: Next<'_>) -> HandlerResult {
        if ctx.recursion_depth() == 0 {
            self.check(&req)?;
        }
        next.run(ctx, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_matching_and_denied_values() {
        let filter = HeaderMatchFilter::from_options(&json!({
            "whitelist": {"x-client-ip": ["10\\..*", "192\\.168\\..*"]}
        }))
        .unwrap();

        let mut req = Request::get("/x");
        req.headers.set("x-client-ip", "10.0.0.8");
        assert!(filter.check(&req).is_ok());

        req.headers.set("x-client-ip", "8.8.8.8");
        let err = filter.check(&req).unwrap_err();
        assert_eq!(err.status, 403);
        assert_eq!(err.error_type(), Some("forbidden"));
    }

    #[test]
    fn test_absent_header_passes() {
        let filter = HeaderMatchFilter::from_options(&json!({
            "whitelist": {"x-client-ip": "10\\..*"}
        }))
        .unwrap();
        assert!(filter.check(&Request::get("/x")).is_ok());
    }

    #[test]
    fn test_missing_whitelist_rejected() {
        assert!(HeaderMatchFilter::from_options(&json!({})).is_err());
    }
}
