//! Node contract: identity, versioning, parameters and the `Generator` trait.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::types::Result;
use crate::tile::{OutputKind, StopToken, TerrainSink, TileContext, TileData};

use super::graph::Graph;
use super::port::{Inlet, InletSpec, Outlet, OutletSpec, PortId, Value};

/// Stable identifier of a node, unique within a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Named scalar parameters of a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params(BTreeMap<String, f32>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f32) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f32) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f32) -> f32 {
        self.get(name).unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parameters as seen by one `generate` call: the node's own values with
/// field-inlet and exposed overrides applied. The node itself is untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedParams {
    values: Params,
    overridden: Vec<String>,
}

impl ResolvedParams {
    pub fn new(base: &Params) -> Self {
        Self {
            values: base.clone(),
            overridden: Vec::new(),
        }
    }

    pub fn override_value(&mut self, name: &str, value: f32) {
        self.values.set(name, value);
        if !self.overridden.iter().any(|n| n == name) {
            self.overridden.push(name.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name)
    }

    pub fn get_or(&self, name: &str, default: f32) -> f32 {
        self.values.get_or(name, default)
    }

    /// Names whose value differs from the node definition's source.
    pub fn overridden(&self) -> &[String] {
        &self.overridden
    }
}

/// A unit of computation in the graph.
///
/// Implementations read upstream values through [`GenerateContext::input`]
/// and publish results with [`GenerateContext::set_output`]. They must poll
/// the stop token between expensive steps and return early when it fires.
pub trait Generator: Send + Sync + fmt::Debug {
    /// Short type name used in logs.
    fn type_name(&self) -> &'static str;

    /// Inlets created when the node is added to a graph.
    fn inlets(&self) -> Vec<InletSpec> {
        Vec::new()
    }

    /// Outlets created when the node is added to a graph.
    fn outlets(&self) -> Vec<OutletSpec> {
        Vec::new()
    }

    /// Parameter values a new node starts with.
    fn default_params(&self) -> Params {
        Params::new()
    }

    /// Output nodes report which final product they contribute to.
    fn output_kind(&self) -> Option<OutputKind> {
        None
    }

    /// Sub-graph hosted by this node, generated into a child cache.
    fn subgraph(&self) -> Option<&Arc<Graph>> {
        None
    }

    /// Compute this node's products into `cx`.
    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()>;

    /// Invalidation hook, called for every visited node before its ready
    /// state is settled. Sub-graph hosts decide here which inner nodes to drop.
    fn on_clearing(&self, _cx: &mut ClearingContext<'_>) {}

    /// Whether [`Generator::prepare`] must run on the main thread before
    /// each generation.
    fn wants_prepare(&self) -> bool {
        false
    }

    /// Main-thread pre-pass; the returned value is stored in the tile cache
    /// and visible to `generate` through [`GenerateContext::prepared`].
    fn prepare(&self, _node: &Node, _tile: &TileContext, _sink: &dyn TerrainSink) -> Option<Value> {
        None
    }
}

/// A generator placed in a graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// Incremented on every parameter or wiring change.
    pub version: u64,
    pub enabled: bool,
    pub inlets: Vec<Inlet>,
    pub outlets: Vec<Outlet>,
    pub params: Params,
    /// Relevant regardless of outputs (e.g. feeds an external consumer).
    pub always_relevant: bool,
    /// Preview window open in the editor.
    pub preview: bool,
    /// Output participates in draft generation.
    pub draft: bool,
    pub generator: Arc<dyn Generator>,
}

impl Node {
    pub fn inlet(&self, index: usize) -> Option<&Inlet> {
        self.inlets.get(index)
    }

    pub fn outlet(&self, index: usize) -> Option<&Outlet> {
        self.outlets.get(index)
    }

    pub fn inlet_by_id(&self, id: PortId) -> Option<&Inlet> {
        self.inlets.iter().find(|i| i.id == id)
    }

    pub fn outlet_by_id(&self, id: PortId) -> Option<&Outlet> {
        self.outlets.iter().find(|o| o.id == id)
    }

    pub fn has_port(&self, id: PortId) -> bool {
        self.inlet_by_id(id).is_some() || self.outlet_by_id(id).is_some()
    }

    pub fn port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        self.inlets.iter().map(|i| i.id).chain(self.outlets.iter().map(|o| o.id))
    }

    pub fn is_output(&self) -> bool {
        self.generator.output_kind().is_some()
    }

    pub fn hosts_subgraph(&self) -> bool {
        self.generator.subgraph().is_some()
    }
}

/// Everything a generator may touch during one `generate` call.
pub struct GenerateContext<'a> {
    node: &'a Node,
    graph: &'a Graph,
    cache: &'a mut TileData,
    stop: &'a StopToken,
    params: ResolvedParams,
}

impl<'a> GenerateContext<'a> {
    pub(crate) fn new(
        node: &'a Node,
        graph: &'a Graph,
        cache: &'a mut TileData,
        stop: &'a StopToken,
        params: ResolvedParams,
    ) -> Self {
        Self { node, graph, cache, stop, params }
    }

    pub fn node(&self) -> &Node {
        self.node
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    pub fn params(&self) -> &ResolvedParams {
        &self.params
    }

    pub fn tile(&self) -> &TileContext {
        self.cache.context()
    }

    pub fn stop(&self) -> &StopToken {
        self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Value delivered to inlet `index`, if linked and produced.
    pub fn input(&self, index: usize) -> Option<Value> {
        let inlet = self.node.inlet(index)?;
        let outlet = self.graph.producer_of(inlet.id)?;
        self.cache.product(outlet).cloned()
    }

    /// Publish the value of outlet `index`.
    pub fn set_output(&mut self, index: usize, value: Value) {
        if let Some(outlet) = self.node.outlet(index) {
            debug_assert_eq!(outlet.kind, value.kind(), "outlet kind mismatch on {}", self.node.id);
            self.cache.set_product(outlet.id, value);
        }
    }

    /// Remove the value of outlet `index` (nothing to produce).
    pub fn clear_output(&mut self, index: usize) {
        if let Some(outlet) = self.node.outlet(index) {
            self.cache.remove_product(outlet.id);
        }
    }

    /// Result of this node's main-thread pre-pass.
    pub fn prepared(&self) -> Option<&Value> {
        self.cache.prepared(self.node.id)
    }

    pub fn cache(&self) -> &TileData {
        self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TileData {
        self.cache
    }
}

/// Input and output of [`Generator::on_clearing`].
pub struct ClearingContext<'a> {
    pub node: &'a Node,
    pub tile: &'a TileContext,
    /// The node's own version differs from the cached one.
    pub this_changed: bool,
    /// At least one upstream producer is not ready.
    pub inlet_changed: bool,
    pub total_rebuild: bool,
    /// Identifies the total rebuild this pass belongs to. Every tile cleared
    /// for the same rebuild sees the same epoch.
    pub rebuild_epoch: u64,
    /// Marker the node stored in this cache, if any. Already dropped on a
    /// total rebuild.
    pub marker: Option<u64>,
    /// Child cache of a sub-graph host.
    pub sub: Option<&'a mut TileData>,
    /// Set by the hook to drop the node even though nothing visible changed.
    pub invalidate: bool,
}
