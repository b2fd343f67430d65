//! Load-time errors.
//!
//! Everything that can go wrong while turning spec documents into the sealed
//! route tree: bad path patterns, conflicting merges, unresolvable modules,
//! malformed handler chains and failing startup resources. These are fatal at
//! startup and never surface as HTTP responses.

use std::io;

use thiserror::Error;

/// Errors raised while loading specs and building the route tree.
#[derive(Error, Debug)]
pub enum SpecError {
    /// A path pattern that does not parse.
    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A verb registered twice on one route node.
    #[error("Trying to re-define existing method {path}:{method}")]
    MethodRedefinition { path: String, method: String },

    /// Two same-named tags with different descriptions.
    #[error("conflicting descriptions for tag '{name}'")]
    TagConflict { name: String },

    /// Two structurally different component entries under one key.
    #[error("conflicting component definition for '{section}.{name}'")]
    ComponentConflict { section: String, name: String },

    /// A malformed declarative handler chain. Messages carry the
    /// `Invalid spec.` prefix.
    #[error("{0}")]
    InvalidChain(String),

    /// A module that cannot be resolved or loaded.
    #[error("cannot load module '{name}': {reason}")]
    Module { name: String, reason: String },

    /// An `operationId` with no registered host-language callable.
    #[error("no handler found for operation '{operation_id}'")]
    MissingOperation { operation_id: String },

    /// An unknown filter name in `x-route-filters`.
    #[error("unknown filter '{name}'")]
    UnknownFilter { name: String },

    /// Bad filter options.
    #[error("invalid options for filter '{name}': {reason}")]
    InvalidFilter { name: String, reason: String },

    /// A startup resource that is malformed or fails to execute.
    #[error("invalid resource: {reason}")]
    InvalidResource { reason: String },

    /// A structurally invalid spec document.
    #[error("invalid spec document: {reason}")]
    InvalidDocument { reason: String },

    #[error("yaml error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SpecError {
    pub fn invalid_pattern<S: ToString>(pattern: &str, reason: S) -> Self {
        Self::InvalidPattern { pattern: pattern.to_string(), reason: reason.to_string() }
    }

    pub fn module<S: ToString>(name: &str, reason: S) -> Self {
        Self::Module { name: name.to_string(), reason: reason.to_string() }
    }

    pub fn chain<S: ToString>(message: S) -> Self {
        Self::InvalidChain(message.to_string())
    }

    pub fn resource<S: ToString>(reason: S) -> Self {
        Self::InvalidResource { reason: reason.to_string() }
    }

    pub fn document<S: ToString>(reason: S) -> Self {
        Self::InvalidDocument { reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_redefinition_message() {
        let err = SpecError::MethodRedefinition {
            path: "/v1/page/{title}".to_string(),
            method: "get".to_string(),
        };
        assert!(err.to_string().starts_with("Trying to re-define existing method"));
    }

    #[test]
    fn test_chain_message_passthrough() {
        let err = SpecError::chain("Invalid spec. Returning requests cannot be parallel.");
        assert_eq!(err.to_string(), "Invalid spec. Returning requests cannot be parallel.");
    }
}
