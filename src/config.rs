//! Engine configuration.
//!
//! All keys are optional in serialised form; defaults match the documented
//! service behaviour (listen port 7231, recursion cap 10, the public error
//! type prefix).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration for the dispatcher engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Listen port, used by the socket adaptor and docs branding.
    pub port: u16,

    /// Listen host, if the adaptor should bind a specific interface.
    pub host: Option<String>,

    /// Root OpenAPI-style spec document.
    pub spec: Value,

    /// Default outbound user agent.
    pub user_agent: String,

    /// Documentation UI branding.
    pub ui_name: String,
    pub ui_url: String,
    pub ui_title: String,

    /// Prefix applied to relative error `type` values.
    pub default_error_uri: String,

    /// Maximum sub-request recursion depth.
    pub max_depth: usize,

    /// Skip the startup resource phase.
    pub skip_resources: bool,

    /// Dry-run the loader without binding host-language handlers.
    pub disable_handlers: bool,

    /// Base directory for resolving relative module paths.
    pub app_base_path: Option<String>,

    /// Service name used as the rate-limit key prefix.
    pub service_name: String,

    /// Method applied to sub-requests that do not specify one.
    pub default_sub_request_method: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7231,
            host: None,
            spec: Value::Null,
            user_agent: "HyperSwitch".to_string(),
            ui_name: "HyperSwitch".to_string(),
            ui_url: String::new(),
            ui_title: "HyperSwitch docs".to_string(),
            default_error_uri: "https://mediawiki.org/wiki/HyperSwitch/errors/".to_string(),
            max_depth: 10,
            skip_resources: false,
            disable_handlers: false,
            app_base_path: None,
            service_name: "hyperswitch".to_string(),
            default_sub_request_method: "get".to_string(),
        }
    }
}

impl Config {
    /// Builds a config around a spec document, keeping every other default.
    pub fn with_spec(spec: Value) -> Self {
        Self { spec, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 7231);
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.user_agent, "HyperSwitch");
        assert!(config.default_error_uri.ends_with("/errors/"));
    }

    #[test]
    fn test_partial_deserialization() {
        let config: Config =
            serde_json::from_value(json!({ "port": 8888, "max_depth": 3 })).unwrap();
        assert_eq!(config.port, 8888);
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.user_agent, "HyperSwitch");
    }
}
