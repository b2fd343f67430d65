//! The spec loader and tree builder.
//!
//! Turns one or more OpenAPI-style documents into the sealed [`RouteTree`]:
//! paths become tree nodes, verbs become compiled operations, `x-modules`
//! mount further specs (and host-language operations) under their node, and
//! `x-route-filters` build the per-node filter stacks. Components and tags
//! merge into one spec document per API root; conflicting definitions fail
//! the load.
//!
//! Loading is strictly sequential and happens once at startup; both caches
//! (modules and shared subtrees) are content-addressed and dropped when the
//! tree is sealed.

pub mod error;
pub mod module;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::Config;
use crate::filters::validator::RequestValidator;
use crate::filters::{FilterEntry, FilterRegistry};
use crate::handler::{chain, Operations};
use crate::protocol::{canonical_hash, canonical_string, PathPattern, PatternSegment};
use crate::router::{NodeId, NodeValue, Operation, RouteTree, SpecRootId};
use crate::template::Template;
use error::SpecError;
use module::{ModuleCache, ModuleRegistry};

const HTTP_METHODS: [&str; 8] =
    ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Everything the loader produces.
pub struct LoadedSpec {
    pub tree: RouteTree,
    /// Engine-level filters wrapping externally initiated requests.
    pub request_filters: Vec<FilterEntry>,
    /// Engine-level filters wrapping recursive sub-requests.
    pub sub_request_filters: Vec<FilterEntry>,
}

/// Loads the configured root spec into a sealed route tree.
pub fn load_spec(
    config: &Arc<Config>,
    modules: &ModuleRegistry,
    operations: Operations,
    filters: &FilterRegistry,
) -> Result<LoadedSpec, SpecError> {
    let root_spec = match &config.spec {
        Value::Null => json!({ "paths": {} }),
        Value::Object(_) => config.spec.clone(),
        _ => return Err(SpecError::document("the root spec must be an object")),
    };

    let options = serde_json::to_value(config.as_ref())
        .map_err(|e| SpecError::document(e.to_string()))?;
    let globals = json!({ "options": options });

    let mut loader = Loader {
        tree: RouteTree::new(),
        config,
        modules,
        filters,
        module_cache: ModuleCache::default(),
        subtree_cache: HashMap::new(),
        request_filters: Vec::new(),
        sub_request_filters: Vec::new(),
    };

    let spec_root = loader.install_api_root(RouteTree::ROOT, &root_spec, "", &globals)?;
    let scope = ApiScope {
        spec_root,
        prefix_path: String::new(),
        globals,
        operations: Arc::new(operations),
        filters: Vec::new(),
        security: Vec::new(),
    };
    loader.handle_spec(RouteTree::ROOT, &root_spec, &scope)?;

    debug!("spec loaded, sealing route tree");
    Ok(LoadedSpec {
        tree: loader.tree,
        request_filters: loader.request_filters,
        sub_request_filters: loader.sub_request_filters,
    })
}

/// The traversal state for one spec document.
#[derive(Clone)]
struct ApiScope {
    spec_root: SpecRootId,
    prefix_path: String,
    globals: Value,
    operations: Arc<Operations>,
    /// Spec-level route filters inherited by every path below.
    filters: Vec<FilterEntry>,
    /// Security requirements accumulated along the path.
    security: Vec<Value>,
}

struct Loader<'a> {
    tree: RouteTree,
    config: &'a Arc<Config>,
    modules: &'a ModuleRegistry,
    filters: &'a FilterRegistry,
    module_cache: ModuleCache,
    subtree_cache: HashMap<(u64, u64), NodeId>,
    request_filters: Vec<FilterEntry>,
    sub_request_filters: Vec<FilterEntry>,
}

fn meta_segment() -> PatternSegment {
    PatternSegment::Meta { name: "apiRoot".to_string() }
}

/// Shallow object merge; `overlay` wins.
fn merge_objects(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, overlay) if !overlay.is_null() => overlay.clone(),
        (base, _) => base.clone(),
    }
}

impl<'a> Loader<'a> {
    /// Installs the synthetic `apiRoot` meta child on a node, creating the
    /// node's merged spec document. Idempotent per node.
    fn install_api_root(
        &mut self,
        node: NodeId,
        spec: &Value,
        prefix: &str,
        globals: &Value,
    ) -> Result<SpecRootId, SpecError> {
        if let Some(meta_id) = self.tree.find_child(node, &meta_segment()) {
            if let Some(value) = self.tree.value(meta_id) {
                return Ok(value.spec_root);
            }
        }

        // The merged document keeps the source's descriptive fields and
        // starts with empty paths/components/tags.
        let mut doc = Map::new();
        if let Value::Object(spec_map) = spec {
            for (key, value) in spec_map {
                if matches!(key.as_str(), "paths" | "components" | "tags" | "servers")
                    || key.starts_with("x-")
                {
                    continue;
                }
                doc.insert(key.clone(), value.clone());
            }
        }
        doc.insert("paths".to_string(), json!({}));
        doc.insert("components".to_string(), json!({ "schemas": {} }));
        doc.insert("tags".to_string(), json!([]));
        let base = if prefix.is_empty() { "/" } else { prefix };
        doc.insert("servers".to_string(), json!([{ "url": base }]));

        let spec_root = self.tree.add_spec_root(Value::Object(doc));
        let meta_id = self.tree.ensure_child(node, meta_segment());
        let mut value = NodeValue::new(prefix.to_string(), spec_root, globals.clone());
        value.listing = spec.get("x-listing").and_then(Value::as_bool).unwrap_or(false);
        value.host_base_path =
            spec.get("x-host-basePath").and_then(Value::as_str).map(str::to_string);
        value.filters = self.filters.default_stack()?;
        *self.tree.value_mut(meta_id) = Some(value);
        Ok(spec_root)
    }

    fn handle_spec(
        &mut self,
        node: NodeId,
        spec: &Value,
        scope: &ApiScope,
    ) -> Result<(), SpecError> {
        let Value::Object(spec_map) = spec else {
            return Err(SpecError::document("spec documents must be objects"));
        };

        self.merge_components(scope.spec_root, spec_map.get("components"))?;
        self.merge_tags(scope.spec_root, spec_map.get("tags"))?;

        let filters = self.filters;
        if let Some(Value::Array(entries)) = spec_map.get("x-request-filters") {
            for entry in entries {
                self.request_filters.push(filters.parse_entry(entry, None)?);
            }
        }
        if let Some(Value::Array(entries)) = spec_map.get("x-sub-request-filters") {
            for entry in entries {
                self.sub_request_filters.push(filters.parse_entry(entry, None)?);
            }
        }

        let mut scope = scope.clone();
        if let Some(Value::Array(entries)) = spec_map.get("x-route-filters") {
            for entry in entries {
                scope.filters.push(filters.parse_entry(entry, None)?);
            }
        }
        if let Some(Value::Array(requirements)) = spec_map.get("security") {
            scope.security.extend(requirements.iter().cloned());
        }

        if let Some(paths) = spec_map.get("paths") {
            let Value::Object(paths) = paths else {
                return Err(SpecError::document("'paths' must be an object"));
            };
            // Paths are processed strictly in declaration order.
            for (pattern, path_spec) in paths {
                self.handle_path(node, pattern, path_spec, &scope)?;
            }
        }
        Ok(())
    }

    fn handle_path(
        &mut self,
        node: NodeId,
        pattern_str: &str,
        path_spec: &Value,
        scope: &ApiScope,
    ) -> Result<(), SpecError> {
        let pattern = PathPattern::parse(pattern_str)?;
        let mut child_scope = scope.clone();
        child_scope.prefix_path = format!("{}{}", scope.prefix_path, pattern);

        let (leaf, mirror_parent) = if pattern.segments.is_empty() {
            (node, None)
        } else {
            let mut current = node;
            for segment in &pattern.segments[..pattern.segments.len() - 1] {
                current = self.tree.ensure_child(current, segment.clone());
            }
            let last = pattern.segments.last().expect("non-empty").clone();
            let is_optional = matches!(last, PatternSegment::Optional { .. });

            // Identical path specs under identical globals share one subtree.
            let share_key = (canonical_hash(path_spec), canonical_hash(&scope.globals));
            if let Some(&shared) = self.subtree_cache.get(&share_key) {
                if self.tree.find_child(current, &last) != Some(shared) {
                    self.tree.share_child(current, last, shared);
                    if is_optional {
                        self.mirror_value(shared, current)?;
                    }
                }
                return Ok(());
            }
            let leaf = self.tree.ensure_child(current, last);
            self.subtree_cache.insert(share_key, leaf);
            (leaf, is_optional.then_some(current))
        };

        if self.tree.value(leaf).is_none() {
            let mut value = NodeValue::new(
                child_scope.prefix_path.clone(),
                scope.spec_root,
                scope.globals.clone(),
            );
            value.filters = self.filters.default_stack()?;
            value.filters.extend(child_scope.filters.iter().cloned());
            *self.tree.value_mut(leaf) = Some(value);
        }

        self.handle_path_spec(leaf, path_spec, &child_scope)?;

        // Optional trailing segments also answer on the parent path; a method
        // already registered there is a re-definition.
        if let Some(parent) = mirror_parent {
            self.mirror_value(leaf, parent)?;
        }
        Ok(())
    }

    fn handle_path_spec(
        &mut self,
        node: NodeId,
        path_spec: &Value,
        scope: &ApiScope,
    ) -> Result<(), SpecError> {
        let Value::Object(map) = path_spec else {
            return Err(SpecError::document(format!(
                "path spec at '{}' must be an object",
                scope.prefix_path
            )));
        };

        let mut scope = scope.clone();
        if let Some(Value::Array(requirements)) = map.get("security") {
            scope.security.extend(requirements.iter().cloned());
        }

        let filters = self.filters;
        if let Some(Value::Array(entries)) = map.get("x-route-filters") {
            for entry in entries {
                let parsed = filters.parse_entry(entry, None)?;
                if let Some(value) = self.tree.value_mut(node).as_mut() {
                    value.filters.push(parsed);
                }
            }
        }
        if map.get("x-hidden").and_then(Value::as_bool) == Some(true) {
            if let Some(value) = self.tree.value_mut(node).as_mut() {
                value.hidden = true;
            }
        }
        if let Some(Value::Object(defaults)) = map.get("x-default-params") {
            if let Some(value) = self.tree.value_mut(node).as_mut() {
                for (key, default) in defaults {
                    value.default_params.insert(key.clone(), default.clone());
                }
            }
        }

        if let Some(Value::Array(defs)) = map.get("x-modules") {
            for def in defs {
                self.mount_module(node, def, &scope)?;
            }
        }

        for (key, op_spec) in map {
            if HTTP_METHODS.contains(&key.as_str()) {
                self.register_method(node, key, op_spec, &scope)?;
            }
        }
        Ok(())
    }

    /// Loads one `x-modules` entry and merges its spec under the same node,
    /// installing an API root there.
    fn mount_module(
        &mut self,
        node: NodeId,
        def: &Value,
        scope: &ApiScope,
    ) -> Result<(), SpecError> {
        let export = self.module_cache.load(
            def,
            self.modules,
            &scope.globals,
            self.config.app_base_path.as_deref(),
        )?;

        let mut module_scope = scope.clone();
        module_scope.globals = merge_objects(&scope.globals, &export.globals);
        if !export.operations.is_empty() {
            module_scope.operations = export.operations.clone();
        }
        module_scope.spec_root = self.install_api_root(
            node,
            &export.spec,
            &scope.prefix_path,
            &module_scope.globals,
        )?;

        self.handle_spec(node, &export.spec, &module_scope)?;

        if !export.resources.is_empty() {
            let meta_id = self
                .tree
                .find_child(node, &meta_segment())
                .expect("api root was just installed");
            if let Some(value) = self.tree.value_mut(meta_id).as_mut() {
                for resource in &export.resources {
                    value.resources.push(Template::parse(resource));
                }
            }
        }
        Ok(())
    }

    fn register_method(
        &mut self,
        node: NodeId,
        verb: &str,
        op_spec: &Value,
        scope: &ApiScope,
    ) -> Result<(), SpecError> {
        let filters = self.filters;
        let config = self.config;

        let path = {
            let value = self
                .tree
                .value(node)
                .ok_or_else(|| SpecError::document("method registered on a bare node"))?;
            if value.methods.contains_key(verb) {
                return Err(SpecError::MethodRedefinition {
                    path: value.path.clone(),
                    method: verb.to_string(),
                });
            }
            value.path.clone()
        };

        let hidden = op_spec.get("x-hidden").and_then(Value::as_bool).unwrap_or(false)
            || self.tree.value(node).is_some_and(|v| v.hidden);

        // Merge the operation into the spec document, skipping hidden
        // operations and existing copies.
        if !hidden {
            let mut public_spec = op_spec.clone();
            if let Value::Object(spec_map) = &mut public_spec {
                spec_map.remove("x-request-handler");
                spec_map.remove("x-setup-handler");
                spec_map.remove("x-route-filters");
            }
            let prefix = scope.prefix_path.clone();
            let root = self.tree.spec_root_mut(scope.spec_root);
            let paths = root
                .as_object_mut()
                .expect("spec roots are objects")
                .entry("paths".to_string())
                .or_insert_with(|| json!({}));
            let entry = paths
                .as_object_mut()
                .expect("'paths' is an object")
                .entry(prefix)
                .or_insert_with(|| json!({}));
            if let Some(entry) = entry.as_object_mut() {
                if !entry.contains_key(verb) {
                    entry.insert(verb.to_string(), public_spec);
                }
            }
        }

        let mut method_filters = Vec::new();
        if let Some(Value::Array(entries)) = op_spec.get("x-route-filters") {
            for entry in entries {
                method_filters.push(filters.parse_entry(entry, Some(verb.to_string()))?);
            }
        }

        let mut setup_templates = Vec::new();
        if let Some(Value::Array(setups)) = op_spec.get("x-setup-handler") {
            for setup in setups {
                setup_templates.push(Template::parse(setup));
            }
        }

        let handler = if let Some(chain_spec) = op_spec.get("x-request-handler") {
            Some(chain::create_handler(chain_spec)?)
        } else if let Some(operation_id) = op_spec.get("operationId").and_then(Value::as_str) {
            match scope.operations.get(operation_id) {
                Some(handler) => Some(handler.clone()),
                None if config.disable_handlers => None,
                None => {
                    return Err(SpecError::MissingOperation {
                        operation_id: operation_id.to_string(),
                    })
                }
            }
        } else if config.disable_handlers {
            None
        } else {
            return Err(SpecError::document(format!(
                "operation {verb} on '{path}' has neither x-request-handler nor operationId"
            )));
        };

        let mut security = scope.security.clone();
        if let Some(Value::Array(requirements)) = op_spec.get("security") {
            security.extend(requirements.iter().cloned());
        }
        let security: Vec<Value> = security
            .into_iter()
            .map(|requirement| json!({ "method": verb, "requirements": requirement }))
            .collect();

        let operation = Operation {
            handler,
            spec: op_spec.clone(),
            validator: RequestValidator::compile(op_spec),
            security,
        };

        let value = self
            .tree
            .value_mut(node)
            .as_mut()
            .expect("checked above");
        value.filters.extend(method_filters);
        value.resources.extend(setup_templates);
        value.methods.insert(verb.to_string(), operation);
        Ok(())
    }

    /// Copies an optional-segment child's value onto its parent so `/foo`
    /// answers when `/foo{/bar}` is mounted. Method collisions are errors.
    fn mirror_value(&mut self, child: NodeId, parent: NodeId) -> Result<(), SpecError> {
        let Some(child_value) = self.tree.value(child).cloned() else {
            return Ok(());
        };
        let slot = self.tree.value_mut(parent);
        let Some(parent_value) = slot.as_mut() else {
            *slot = Some(child_value);
            return Ok(());
        };
        for (verb, operation) in child_value.methods {
            if parent_value.methods.contains_key(&verb) {
                return Err(SpecError::MethodRedefinition {
                    path: parent_value.path.clone(),
                    method: verb,
                });
            }
            parent_value.methods.insert(verb, operation);
        }
        Ok(())
    }

    fn merge_components(
        &mut self,
        spec_root: SpecRootId,
        components: Option<&Value>,
    ) -> Result<(), SpecError> {
        let Some(Value::Object(sections)) = components else {
            return Ok(());
        };
        let root = self.tree.spec_root_mut(spec_root);
        let target = root
            .as_object_mut()
            .expect("spec roots are objects")
            .entry("components".to_string())
            .or_insert_with(|| json!({}));

        for (section, entries) in sections {
            let Value::Object(entries) = entries else { continue };
            let section_map = target
                .as_object_mut()
                .expect("'components' is an object")
                .entry(section.clone())
                .or_insert_with(|| json!({}));
            let Some(section_map) = section_map.as_object_mut() else { continue };
            for (name, definition) in entries {
                let conflicting = section_map
                    .get(name)
                    .is_some_and(|existing| {
                        canonical_string(existing) != canonical_string(definition)
                    });
                if conflicting {
                    return Err(SpecError::ComponentConflict {
                        section: section.clone(),
                        name: name.clone(),
                    });
                }
                if !section_map.contains_key(name) {
                    section_map.insert(name.clone(), definition.clone());
                }
            }
        }
        Ok(())
    }

    fn merge_tags(&mut self, spec_root: SpecRootId, tags: Option<&Value>) -> Result<(), SpecError> {
        let Some(Value::Array(tags)) = tags else {
            return Ok(());
        };
        let root = self.tree.spec_root_mut(spec_root);
        let target = root
            .as_object_mut()
            .expect("spec roots are objects")
            .entry("tags".to_string())
            .or_insert_with(|| json!([]));
        let Some(target) = target.as_array_mut() else {
            return Ok(());
        };

        for tag in tags {
            let name = tag.get("name").and_then(Value::as_str).unwrap_or_default();
            let existing = target.iter().position(|t| t.get("name") == tag.get("name"));
            match existing {
                Some(index) => {
                    if target[index].get("description") != tag.get("description") {
                        return Err(SpecError::TagConflict { name: name.to_string() });
                    }
                }
                None => target.push(tag.clone()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::protocol::{Response, Uri};
    use crate::router::RouteMatch;

    fn load_err(spec: Value) -> SpecError {
        match load(spec) {
            Ok(_) => panic!("expected the load to fail"),
            Err(err) => err,
        }
    }

    fn load(spec: Value) -> Result<LoadedSpec, SpecError> {
        let config = Arc::new(Config::with_spec(spec));
        let mut operations = Operations::new();
        operations.insert(
            "get_page".to_string(),
            handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!({}))) }),
        );
        operations.insert(
            "other_op".to_string(),
            handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!({}))) }),
        );
        load_spec(&config, &ModuleRegistry::new(), operations, &FilterRegistry::default())
    }

    #[test]
    fn test_builds_routes_and_default_filters() {
        let loaded = load(json!({
            "paths": {
                "/page/{title}": {
                    "get": {"operationId": "get_page"}
                }
            }
        }))
        .unwrap();

        match loaded.tree.lookup(&Uri::from("/page/Foo")).unwrap() {
            RouteMatch::Handler { value, params } => {
                assert_eq!(params["title"], json!("Foo"));
                assert!(value.methods.contains_key("get"));
                let names: Vec<&str> =
                    value.filters.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(&names[..2], &["metrics", "validator"]);
            }
            _ => panic!("expected handler match"),
        }
    }

    #[test]
    fn test_method_redefinition_is_fatal() {
        let spec_a = json!({"get": {"operationId": "get_page"}});
        let err = load(json!({
            "paths": {"/dup": &spec_a},
            "x-modules": []
        }))
        .map(|_| ());
        assert!(err.is_ok());

        // Mounting overlapping methods on the same node fails.
        let mut loader_input = json!({
            "paths": {
                "/dup": {"get": {"operationId": "get_page"}},
            }
        });
        loader_input["paths"]["/dup{/x}"] = json!({"get": {"operationId": "other_op"}});
        let err = load_err(loader_input);
        assert!(err.to_string().starts_with("Trying to re-define existing method"));
    }

    #[test]
    fn test_unknown_operation_id_is_fatal_unless_disabled() {
        let spec = json!({"paths": {"/x": {"get": {"operationId": "missing"}}}});
        let err = load_err(spec.clone());
        assert!(matches!(err, SpecError::MissingOperation { .. }));

        let mut config = Config::with_spec(spec);
        config.disable_handlers = true;
        let loaded = load_spec(
            &Arc::new(config),
            &ModuleRegistry::new(),
            Operations::new(),
            &FilterRegistry::default(),
        )
        .unwrap();
        match loaded.tree.lookup(&Uri::from("/x")).unwrap() {
            RouteMatch::Handler { value, .. } => {
                assert!(value.methods["get"].handler.is_none());
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_modules_merge_paths_and_components() {
        let config = Arc::new(Config::with_spec(json!({
            "paths": {
                "/v1": {
                    "x-modules": [
                        {"type": "inline", "spec": {
                            "paths": {"/a": {"get": {"operationId": "mod_a"}}},
                            "components": {"schemas": {"A": {"type": "object"}}},
                            "tags": [{"name": "shared", "description": "common"}]
                        }},
                        {"type": "inline", "spec": {
                            "paths": {"/b": {"get": {"operationId": "mod_b"}}},
                            "components": {"schemas": {"B": {"type": "object"}}},
                            "tags": [{"name": "shared", "description": "common"}]
                        }}
                    ]
                }
            }
        })));
        let registry = ModuleRegistry::new();
        let mut operations = Operations::new();
        for op in ["mod_a", "mod_b"] {
            operations.insert(
                op.to_string(),
                handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!({}))) }),
            );
        }
        let loaded =
            load_spec(&config, &registry, operations, &FilterRegistry::default()).unwrap();

        assert!(loaded.tree.lookup(&Uri::from("/v1/a")).is_some());
        assert!(loaded.tree.lookup(&Uri::from("/v1/b")).is_some());

        // Both modules merged into the same api root document.
        let spec_root = match loaded.tree.lookup(&Uri::from("/v1/a")).unwrap() {
            RouteMatch::Handler { value, .. } => value.spec_root,
            _ => panic!(),
        };
        let merged = loaded.tree.spec_root(spec_root);
        assert!(merged["paths"].get("/v1/a").is_some());
        assert!(merged["paths"].get("/v1/b").is_some());
        assert!(merged["components"]["schemas"].get("A").is_some());
        assert!(merged["components"]["schemas"].get("B").is_some());
        assert_eq!(merged["tags"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_two_modules_contributing_the_same_method_fail() {
        let config = Arc::new(Config::with_spec(json!({
            "paths": {
                "/v1": {
                    "x-modules": [
                        {"type": "inline", "spec": {
                            "paths": {"/dup": {"get": {"operationId": "mod_a"}}}
                        }},
                        {"type": "inline", "spec": {
                            "paths": {"/dup": {"get": {"operationId": "mod_b"}}}
                        }}
                    ]
                }
            }
        })));
        let mut operations = Operations::new();
        for op in ["mod_a", "mod_b"] {
            operations.insert(
                op.to_string(),
                handler_fn(|_ctx, _req| async { Ok(Response::json(200, json!({}))) }),
            );
        }
        let err = match load_spec(
            &config,
            &ModuleRegistry::new(),
            operations,
            &FilterRegistry::default(),
        ) {
            Ok(_) => panic!("expected the load to fail"),
            Err(err) => err,
        };
        assert!(err.to_string().starts_with("Trying to re-define existing method"));
    }

    #[test]
    fn test_conflicting_tags_fail_the_load() {
        let result = load(json!({
            "tags": [{"name": "t", "description": "one"}],
            "paths": {
                "/v1": {
                    "x-modules": [{"type": "inline", "spec": {
                        "paths": {},
                        "tags": [{"name": "t", "description": "two"}]
                    }}]
                }
            }
        }));
        // The module merges into its own api root; conflict requires the same
        // root, so mount both tags at top level instead.
        assert!(result.is_ok());

        let err = load_err(json!({
            "tags": [
                {"name": "t", "description": "one"},
                {"name": "t", "description": "two"}
            ],
            "paths": {}
        }));
        assert!(matches!(err, SpecError::TagConflict { .. }));
    }

    #[test]
    fn test_hidden_paths_stay_out_of_merged_spec() {
        let loaded = load(json!({
            "paths": {
                "/public": {"get": {"operationId": "get_page"}},
                "/secret": {"x-hidden": true, "get": {"operationId": "other_op"}}
            }
        }))
        .unwrap();
        let merged = loaded.tree.spec_root(0);
        assert!(merged["paths"].get("/public").is_some());
        assert!(merged["paths"].get("/secret").is_none());
    }

    #[test]
    fn test_declarative_chain_binds_without_operations() {
        let loaded = load(json!({
            "paths": {
                "/chained": {
                    "get": {
                        "x-request-handler": [
                            {"fetch": {"request": {"uri": "/page/Foo"}, "return": true}}
                        ]
                    }
                },
                "/page/{title}": {"get": {"operationId": "get_page"}}
            }
        }))
        .unwrap();
        match loaded.tree.lookup(&Uri::from("/chained")).unwrap() {
            RouteMatch::Handler { value, .. } => {
                assert!(value.methods["get"].handler.is_some());
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_subtree_sharing_under_identical_globals() {
        let page_spec = json!({"get": {"operationId": "get_page"}});
        let loaded = load(json!({
            "paths": {
                "/a/page": &page_spec,
                "/b/page": &page_spec
            }
        }))
        .unwrap();
        assert!(loaded.tree.lookup(&Uri::from("/a/page")).is_some());
        assert!(loaded.tree.lookup(&Uri::from("/b/page")).is_some());
    }
}
