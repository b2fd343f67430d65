//! The route tree.
//!
//! A prefix tree over [`PatternSegment`] edges, stored in an arena
//! (`Vec<Node>`, edges by index) so subtrees can be shared between mount
//! points and the sealed tree is plain immutable data. Matching walks one
//! path token at a time and picks the most specific accepting child:
//! literal > constrained parameter > unconstrained parameter > greedy.
//!
//! A lookup on a path ending in `/` that reaches a node without a direct
//! handler produces a listing match against the nearest enclosing API root
//! (located through its synthetic meta child).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::filters::validator::RequestValidator;
use crate::filters::FilterEntry;
use crate::handler::Handler;
use crate::protocol::{PatternSegment, Uri};
use crate::template::Template;

pub type NodeId = usize;
pub type SpecRootId = usize;

/// A compiled operation: the terminal handler plus its operation spec.
#[derive(Clone)]
pub struct Operation {
    /// `None` when handlers are globally disabled (dry-run mode).
    pub handler: Option<Arc<dyn Handler>>,
    /// The operation spec this handler was compiled from.
    pub spec: Value,
    /// Parameter checks compiled once at load time.
    pub validator: Option<RequestValidator>,
    /// Security requirements accumulated along the path, tagged with the
    /// method they were registered for.
    pub security: Vec<Value>,
}

/// The payload of a route node.
#[derive(Clone)]
pub struct NodeValue {
    /// Canonical base + prefix path of this node.
    pub path: String,
    /// Verb → compiled operation.
    pub methods: HashMap<String, Operation>,
    /// Ordered filter stack; outermost first.
    pub filters: Vec<FilterEntry>,
    /// Startup request templates.
    pub resources: Vec<Template>,
    /// The merged spec document this subtree belongs to.
    pub spec_root: SpecRootId,
    /// Configuration visible to handlers and templates.
    pub globals: Value,
    /// Default path-parameter bindings (`x-default-params`).
    pub default_params: Map<String, Value>,
    /// Omitted from the merged spec and listings (`x-hidden`).
    pub hidden: bool,
    /// Marks a synthetic listing API root (`x-listing`).
    pub listing: bool,
    /// Base-path override for host-based requests (`x-host-basePath`).
    pub host_base_path: Option<String>,
}

impl NodeValue {
    pub fn new(path: String, spec_root: SpecRootId, globals: Value) -> Self {
        Self {
            path,
            methods: HashMap::new(),
            filters: Vec::new(),
            resources: Vec::new(),
            spec_root,
            globals,
            default_params: Map::new(),
            hidden: false,
            listing: false,
            host_base_path: None,
        }
    }
}

#[derive(Default)]
pub struct Node {
    children: Vec<(PatternSegment, NodeId)>,
    pub value: Option<NodeValue>,
}

/// The result of a lookup.
pub enum RouteMatch<'t> {
    /// A concrete route with registered methods.
    Handler { value: &'t NodeValue, params: Map<String, Value> },
    /// A trailing-slash lookup without a direct handler: resolved against the
    /// nearest API root, listing the reached node's children.
    Listing {
        value: &'t NodeValue,
        items: Vec<String>,
        at_api_root: bool,
        params: Map<String, Value>,
    },
}

/// The sealed routing structure: the node arena plus the merged spec roots.
pub struct RouteTree {
    nodes: Vec<Node>,
    spec_roots: Vec<Value>,
}

impl Default for RouteTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTree {
    pub fn new() -> Self {
        Self { nodes: vec![Node::default()], spec_roots: Vec::new() }
    }

    pub const ROOT: NodeId = 0;

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn value(&self, id: NodeId) -> Option<&NodeValue> {
        self.nodes[id].value.as_ref()
    }

    pub fn value_mut(&mut self, id: NodeId) -> &mut Option<NodeValue> {
        &mut self.nodes[id].value
    }

    pub fn find_child(&self, parent: NodeId, segment: &PatternSegment) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .find(|(seg, _)| seg == segment)
            .map(|(_, id)| *id)
    }

    /// Returns the existing child for this exact segment or creates one.
    pub fn ensure_child(&mut self, parent: NodeId, segment: PatternSegment) -> NodeId {
        if let Some(existing) = self.find_child(parent, &segment) {
            return existing;
        }
        let id = self.nodes.len();
        self.nodes.push(Node::default());
        self.nodes[parent].children.push((segment.clone(), id));
        // Greedy segments keep matching: the node is its own child.
        if matches!(segment, PatternSegment::Greedy { .. }) {
            self.nodes[id].children.push((segment, id));
        }
        id
    }

    /// Mounts an already-built subtree under another parent (clone-on-share).
    pub fn share_child(&mut self, parent: NodeId, segment: PatternSegment, child: NodeId) {
        if self.find_child(parent, &segment).is_none() {
            self.nodes[parent].children.push((segment, child));
        }
    }

    fn meta_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .find(|(seg, _)| matches!(seg, PatternSegment::Meta { .. }))
            .map(|(_, id)| *id)
    }

    pub fn add_spec_root(&mut self, spec: Value) -> SpecRootId {
        self.spec_roots.push(spec);
        self.spec_roots.len() - 1
    }

    pub fn spec_root(&self, id: SpecRootId) -> &Value {
        &self.spec_roots[id]
    }

    pub fn spec_root_mut(&mut self, id: SpecRootId) -> &mut Value {
        &mut self.spec_roots[id]
    }

    /// All node values carrying startup resources, in creation order.
    pub fn values_with_resources(&self) -> impl Iterator<Item = &NodeValue> {
        self.nodes
            .iter()
            .filter_map(|node| node.value.as_ref())
            .filter(|value| !value.resources.is_empty())
    }

    /// Resolves a concrete URI against the tree.
    pub fn lookup(&self, uri: &Uri) -> Option<RouteMatch<'_>> {
        let mut node_id = Self::ROOT;
        let mut params: Map<String, Value> = Map::new();
        let mut api_root = self.meta_child(node_id);

        for token in &uri.path {
            let mut best: Option<(u8, &PatternSegment, NodeId)> = None;
            for (seg, child) in &self.nodes[node_id].children {
                if seg.accepts(token) && best.map_or(true, |(rank, _, _)| seg.rank() < rank) {
                    best = Some((seg.rank(), seg, *child));
                }
            }
            let (_, segment, child) = best?;

            match segment {
                PatternSegment::Literal(_) => {}
                PatternSegment::Param { name, .. } | PatternSegment::Optional { name } => {
                    params.insert(name.clone(), Value::String(token.clone()));
                }
                PatternSegment::Greedy { name } => match params.get_mut(name) {
                    Some(Value::String(acc)) => {
                        acc.push('/');
                        acc.push_str(token);
                    }
                    _ => {
                        params.insert(name.clone(), Value::String(token.clone()));
                    }
                },
                PatternSegment::Meta { .. } => unreachable!("meta segments never accept tokens"),
            }

            node_id = child;
            if let Some(meta) = self.meta_child(node_id) {
                api_root = Some(meta);
            }
        }

        let node = &self.nodes[node_id];
        if !uri.trailing_slash {
            return node.value.as_ref().map(|value| RouteMatch::Handler { value, params });
        }

        // Trailing slash: a direct handler wins, otherwise list the node's
        // children against the nearest API root.
        if let Some(value) = &node.value {
            if !value.methods.is_empty() {
                return Some(RouteMatch::Handler { value, params });
            }
        }

        let at_api_root = self.meta_child(node_id).is_some();
        let meta_id = self.meta_child(node_id).or(api_root)?;
        let value = self.nodes[meta_id].value.as_ref()?;
        let mut items = Vec::new();
        for (seg, child) in &node.children {
            if matches!(seg, PatternSegment::Meta { .. }) {
                continue;
            }
            if *child == node_id {
                continue; // greedy self-edge
            }
            if self.nodes[*child].value.as_ref().is_some_and(|v| v.hidden) {
                continue;
            }
            items.push(seg.to_string());
        }
        params.insert("_ls".to_string(), Value::Array(
            items.iter().cloned().map(Value::String).collect(),
        ));

        Some(RouteMatch::Listing { value, items, at_api_root, params })
    }
}
