//! Module loading.
//!
//! Specs mount reusable building blocks through `x-modules`. A module
//! definition is one of:
//!
//! - `{type: file, path}` / `{type: lib, name}` — a host-language module
//!   registered in the [`ModuleRegistry`], returning spec, operations and
//!   optional resources/globals;
//! - `{type: spec, path}` — a YAML document read from disk;
//! - `{type: inline, spec}` — a document embedded in the parent spec.
//!
//! Modules are content-addressed: the cache key hashes the canonical form of
//! the definition together with the globals it is instantiated under, so the
//! same module mounted twice with identical globals is loaded once and its
//! subtree shared. The cache lives only until the tree is sealed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::error::SpecError;
use crate::handler::Operations;
use crate::protocol::canonical_hash;
use crate::template::Template;

/// What a loaded module contributes.
#[derive(Clone)]
pub struct ModuleExport {
    /// Paths and operations to merge under the mount point.
    pub spec: Value,
    /// Host-language callables keyed by `operationId`.
    pub operations: Arc<Operations>,
    /// Startup request templates.
    pub resources: Vec<Value>,
    /// Configuration visible to the module's handlers and templates.
    pub globals: Value,
}

impl ModuleExport {
    pub fn from_spec(spec: Value) -> Self {
        Self {
            spec,
            operations: Arc::new(Operations::new()),
            resources: Vec::new(),
            globals: Value::Object(Map::new()),
        }
    }
}

/// A host-language module: the Rust counterpart of a requireable file.
pub trait SpecModule: Send + Sync {
    /// Instantiates the module with its expanded options.
    fn load(&self, options: &Value) -> Result<ModuleExport, SpecError>;
}

impl<F> SpecModule for F
where
    F: Fn(&Value) -> Result<ModuleExport, SpecError> + Send + Sync,
{
    fn load(&self, options: &Value) -> Result<ModuleExport, SpecError> {
        self(options)
    }
}

/// Registry of host-language modules, keyed by the path or name the spec
/// refers to them with.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn SpecModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: SpecModule + 'static>(&mut self, name: &str, module: M) -> &mut Self {
        self.modules.insert(name.to_string(), Arc::new(module));
        self
    }

    fn get(&self, name: &str) -> Option<Arc<dyn SpecModule>> {
        self.modules.get(name).cloned()
    }
}

/// The parsed form of one `x-modules` entry.
#[derive(Clone, Debug)]
pub enum ModuleDef {
    Host { name: String, options: Value },
    SpecFile { path: String },
    Inline { spec: Value, options: Value },
}

impl ModuleDef {
    pub fn parse(value: &Value) -> Result<ModuleDef, SpecError> {
        let Value::Object(map) = value else {
            return Err(SpecError::document("x-modules entries must be objects"));
        };
        let module_type = map.get("type").and_then(Value::as_str).unwrap_or("file");
        let options = map.get("options").cloned().unwrap_or(Value::Object(Map::new()));
        match module_type {
            "file" | "lib" | "npm" => {
                let name = map
                    .get("path")
                    .or_else(|| map.get("name"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        SpecError::document("module definition needs a path or name")
                    })?;
                Ok(ModuleDef::Host { name: name.to_string(), options })
            }
            "spec" => {
                if let Some(inline) = map.get("inline") {
                    return Ok(ModuleDef::Inline { spec: inline.clone(), options });
                }
                let path = map.get("path").and_then(Value::as_str).ok_or_else(|| {
                    SpecError::document("spec module definition needs a path")
                })?;
                Ok(ModuleDef::SpecFile { path: path.to_string() })
            }
            "inline" => {
                let spec = map
                    .get("spec")
                    .cloned()
                    .ok_or_else(|| SpecError::document("inline module needs a spec"))?;
                Ok(ModuleDef::Inline { spec, options })
            }
            other => Err(SpecError::document(format!("unknown module type '{other}'"))),
        }
    }
}

/// Content-addressed module cache, dropped once the tree is sealed.
#[derive(Default)]
pub struct ModuleCache {
    entries: HashMap<(u64, u64), ModuleExport>,
}

impl ModuleCache {
    pub fn load(
        &mut self,
        def_value: &Value,
        registry: &ModuleRegistry,
        globals: &Value,
        base_path: Option<&str>,
    ) -> Result<ModuleExport, SpecError> {
        let key = (canonical_hash(def_value), canonical_hash(globals));
        if let Some(cached) = self.entries.get(&key) {
            return Ok(cached.clone());
        }

        let def = ModuleDef::parse(def_value)?;
        let export = match def {
            ModuleDef::Host { name, options } => {
                let module = resolve_host(&name, registry, base_path)
                    .ok_or_else(|| SpecError::module(&name, "not registered"))?;
                let expanded = expand_options(&options, globals)?;
                module.load(&expanded)?
            }
            ModuleDef::SpecFile { path } => {
                let text = read_spec_file(&path, base_path)?;
                let spec: Value = serde_yaml::from_str(&text)?;
                ModuleExport::from_spec(spec)
            }
            ModuleDef::Inline { spec, options } => {
                let mut export = ModuleExport::from_spec(spec);
                export.globals = expand_options(&options, globals)?;
                export
            }
        };

        self.entries.insert(key, export.clone());
        Ok(export)
    }
}

/// Resolution order for host modules: as given, then relative to the app base
/// path, then under its `modules/` directory.
fn resolve_host(
    name: &str,
    registry: &ModuleRegistry,
    base_path: Option<&str>,
) -> Option<Arc<dyn SpecModule>> {
    if let Some(module) = registry.get(name) {
        return Some(module);
    }
    let base = base_path?;
    let joined = format!("{base}/{name}");
    if let Some(module) = registry.get(&joined) {
        return Some(module);
    }
    registry.get(&format!("{base}/modules/{name}"))
}

fn read_spec_file(path: &str, base_path: Option<&str>) -> Result<String, SpecError> {
    let mut candidates: Vec<PathBuf> = vec![PathBuf::from(path)];
    if !Path::new(path).is_absolute() {
        if let Some(base) = base_path {
            candidates.push(Path::new(base).join(path));
            candidates.push(Path::new(base).join("modules").join(path));
        }
    }
    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(std::fs::read_to_string(candidate)?);
        }
    }
    Err(SpecError::module(path, "spec file not found"))
}

/// Module options are themselves templates over the mount scope's globals,
/// with the protected `templates` key carried through untouched.
fn expand_options(options: &Value, globals: &Value) -> Result<Value, SpecError> {
    let mut model = Map::new();
    model.insert("options".to_string(), globals.get("options").cloned().unwrap_or(Value::Null));
    Template::parse(options)
        .expand(&Value::Object(model))
        .map_err(|e| SpecError::document(e.to_string()))
        .map(|v| v.unwrap_or(Value::Object(Map::new())))
}
