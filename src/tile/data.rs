//! Per-tile result cache with nested sub-caches for sub-graphs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::types::{DetailLevel, Rect, TileCoord};
use crate::core::{EngineConfig, Matrix};
use crate::graph::{Graph, Node, NodeId, Params, PortId, Value};

use super::finalize::{ApplyDescriptor, Finalizer, OutputKind};

/// Area, detail and globals of a tile. Shared by reference between a cache
/// and all of its sub-caches.
#[derive(Clone, Debug, PartialEq)]
pub struct TileContext {
    pub coord: TileCoord,
    pub rect: Rect,
    /// Matrix samples per side.
    pub resolution: u32,
    pub detail: DetailLevel,
    pub seed: u64,
    /// Values visible to every generator (sea level, world height, ...).
    pub globals: Params,
}

impl TileContext {
    /// Context of a tile as configured for `detail`.
    pub fn for_tile(coord: TileCoord, detail: DetailLevel, config: &EngineConfig) -> Self {
        Self {
            coord,
            rect: coord.rect(config.tile_size),
            resolution: config.resolution(detail),
            detail,
            seed: config.seed,
            globals: Params::new(),
        }
    }
}

/// Cached readiness and products for one tile (or one sub-graph within it).
///
/// `ready` maps a node to the version it was last generated at; a node is
/// ready iff that equals its current version. Sub-caches form a strict tree
/// and never share maps with their parent even though ids are graph-global.
#[derive(Debug)]
pub struct TileData {
    context: Arc<TileContext>,
    ready: HashMap<NodeId, u64>,
    products: HashMap<PortId, Value>,
    subs: HashMap<NodeId, TileData>,
    prepared: HashMap<NodeId, Value>,
    /// Up-to-date markers versions cannot express (consumed cluster revision)
    markers: HashMap<NodeId, u64>,
    /// Per output node: contributed final product
    outputs: HashMap<NodeId, (OutputKind, Value)>,
    /// Blend weight of this sub-cache's outputs (biome mask)
    mask: Option<Arc<Matrix>>,
    finalize: BTreeMap<OutputKind, Arc<dyn Finalizer>>,
    apply: HashMap<OutputKind, ApplyDescriptor>,
}

impl TileData {
    pub fn new(context: TileContext) -> Self {
        Self::with_context(Arc::new(context))
    }

    fn with_context(context: Arc<TileContext>) -> Self {
        Self {
            context,
            ready: HashMap::new(),
            products: HashMap::new(),
            subs: HashMap::new(),
            prepared: HashMap::new(),
            markers: HashMap::new(),
            outputs: HashMap::new(),
            mask: None,
            finalize: BTreeMap::new(),
            apply: HashMap::new(),
        }
    }

    pub fn context(&self) -> &TileContext {
        &self.context
    }

    /// Reference-counted handle on the context, for callers that need it
    /// while the cache itself is mutably borrowed.
    pub fn shared_context(&self) -> Arc<TileContext> {
        Arc::clone(&self.context)
    }

    pub fn shares_context_with(&self, other: &TileData) -> bool {
        Arc::ptr_eq(&self.context, &other.context)
    }

    // ── Ready state ──

    pub fn is_ready(&self, node: &Node) -> bool {
        self.ready.get(&node.id) == Some(&node.version)
    }

    pub fn ready_version(&self, id: NodeId) -> Option<u64> {
        self.ready.get(&id).copied()
    }

    pub fn mark_ready(&mut self, id: NodeId, version: u64) {
        self.ready.insert(id, version);
    }

    pub fn clear_ready(&mut self, id: NodeId) {
        self.ready.remove(&id);
    }

    /// Drop every ready mark, optionally in all sub-caches too.
    pub fn clear_all_ready(&mut self, in_subs: bool) {
        self.ready.clear();
        if in_subs {
            for sub in self.subs.values_mut() {
                sub.clear_all_ready(true);
            }
        }
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Ids marked ready, ascending.
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.ready.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Whether every relevant node of `graph` is ready, optionally checking
    /// sub-graph hosts' child caches against their own graphs.
    pub fn all_outputs_ready(&self, graph: &Graph, in_subs: bool) -> bool {
        let detail = self.context.detail;
        graph
            .nodes()
            .filter(|n| graph.is_relevant(n, detail))
            .all(|node| {
                if !self.is_ready(node) {
                    return false;
                }
                if !in_subs || !node.enabled {
                    return true;
                }
                match (node.generator.subgraph(), self.subs.get(&node.id)) {
                    (Some(inner), Some(sub)) => sub.all_outputs_ready(inner, true),
                    (Some(_), None) => false,
                    _ => true,
                }
            })
    }

    // ── Products ──

    pub fn product(&self, port: PortId) -> Option<&Value> {
        self.products.get(&port)
    }

    pub fn set_product(&mut self, port: PortId, value: Value) {
        self.products.insert(port, value);
    }

    pub fn remove_product(&mut self, port: PortId) -> Option<Value> {
        self.products.remove(&port)
    }

    pub fn products(&self) -> &HashMap<PortId, Value> {
        &self.products
    }

    // ── Sub-caches ──

    pub fn sub(&self, host: NodeId) -> Option<&TileData> {
        self.subs.get(&host)
    }

    /// Child cache of a sub-graph host, created on first use.
    pub fn sub_mut(&mut self, host: NodeId) -> &mut TileData {
        let context = self.context.clone();
        self.subs
            .entry(host)
            .or_insert_with(|| TileData::with_context(context))
    }

    pub fn remove_sub(&mut self, host: NodeId) -> Option<TileData> {
        self.subs.remove(&host)
    }

    pub fn sub_count(&self) -> usize {
        self.subs.len()
    }

    pub fn mask(&self) -> Option<&Arc<Matrix>> {
        self.mask.as_ref()
    }

    pub fn set_mask(&mut self, mask: Option<Arc<Matrix>>) {
        self.mask = mask;
    }

    // ── Prepare / outputs ──

    pub fn prepared(&self, node: NodeId) -> Option<&Value> {
        self.prepared.get(&node)
    }

    pub fn set_prepared(&mut self, node: NodeId, value: Value) {
        self.prepared.insert(node, value);
    }

    pub fn marker(&self, node: NodeId) -> Option<u64> {
        self.markers.get(&node).copied()
    }

    pub fn set_marker(&mut self, node: NodeId, value: u64) {
        self.markers.insert(node, value);
    }

    /// Drop every marker of this cache, leaving sub-caches alone.
    pub fn clear_markers(&mut self) {
        self.markers.clear();
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn set_output(&mut self, node: NodeId, kind: OutputKind, value: Value) {
        self.outputs.insert(node, (kind, value));
    }

    pub fn remove_output(&mut self, node: NodeId) {
        self.outputs.remove(&node);
    }

    /// Outputs of `kind` across this cache and all sub-caches, with the mask
    /// of the cache each one lives in. Ordered by depth then node id.
    pub fn collect_outputs(&self, kind: OutputKind) -> Vec<(Value, Option<Arc<Matrix>>)> {
        let mut own: Vec<(&NodeId, &Value)> = self
            .outputs
            .iter()
            .filter(|(_, (k, _))| *k == kind)
            .map(|(id, (_, v))| (id, v))
            .collect();
        own.sort_by_key(|(id, _)| **id);

        let mut out: Vec<_> = own
            .into_iter()
            .map(|(_, v)| (v.clone(), self.mask.clone()))
            .collect();

        let mut hosts: Vec<&NodeId> = self.subs.keys().collect();
        hosts.sort();
        for host in hosts {
            out.extend(self.subs[host].collect_outputs(kind));
        }
        out
    }

    pub fn has_outputs(&self, kind: OutputKind) -> bool {
        self.outputs.values().any(|(k, _)| *k == kind)
            || self.subs.values().any(|s| s.has_outputs(kind))
    }

    // ── Finalize queue ──

    /// Schedule a finalizer. At most one is pending per kind.
    pub fn enqueue_finalize(&mut self, finalizer: Arc<dyn Finalizer>) {
        self.finalize.insert(finalizer.kind(), finalizer);
    }

    pub fn has_pending_finalize(&self) -> bool {
        !self.finalize.is_empty() || self.subs.values().any(|s| s.has_pending_finalize())
    }

    /// Take the highest-priority pending finalizer anywhere in the cache tree.
    ///
    /// Every pending entry of that kind is removed, so a finalizer scheduled
    /// from several biomes runs once.
    pub fn pop_finalize(&mut self) -> Option<Arc<dyn Finalizer>> {
        let kind = self.min_finalize_kind()?;
        self.take_finalize(kind)
    }

    fn min_finalize_kind(&self) -> Option<OutputKind> {
        let own = self.finalize.keys().next().copied();
        self.subs
            .values()
            .filter_map(|s| s.min_finalize_kind())
            .chain(own)
            .min()
    }

    fn take_finalize(&mut self, kind: OutputKind) -> Option<Arc<dyn Finalizer>> {
        let mut found = self.finalize.remove(&kind);
        for sub in self.subs.values_mut() {
            if let Some(f) = sub.take_finalize(kind) {
                found.get_or_insert(f);
            }
        }
        found
    }

    // ── Apply queue ──

    /// Store a write-back descriptor, replacing a pending one of the same kind.
    pub fn set_apply(&mut self, descriptor: ApplyDescriptor) {
        self.apply.insert(descriptor.kind(), descriptor);
    }

    pub fn pending_apply(&self, kind: OutputKind) -> Option<&ApplyDescriptor> {
        self.apply.get(&kind)
    }

    /// Drain pending descriptors in finalize order.
    pub fn take_apply(&mut self) -> Vec<ApplyDescriptor> {
        let mut descriptors: Vec<ApplyDescriptor> = self.apply.drain().map(|(_, d)| d).collect();
        descriptors.sort_by_key(|d| d.kind());
        descriptors
    }

    // ── Maintenance ──

    /// Remove every entry whose node or port no longer exists in `graph`.
    ///
    /// Sub-caches of deleted or disabled hosts are dropped; live ones are cleaned against
    /// their host's current sub-graph.
    pub fn clear_stray(&mut self, graph: &Graph) {
        let before = self.ready.len() + self.products.len() + self.subs.len();

        self.ready.retain(|id, _| graph.contains_node(*id));
        self.products.retain(|port, _| graph.contains_port(*port));
        self.prepared.retain(|id, _| graph.contains_node(*id));
        self.markers.retain(|id, _| graph.contains_node(*id));
        self.outputs.retain(|id, _| graph.contains_node(*id));
        self.subs.retain(|id, _| {
            graph
                .node(*id)
                .is_some_and(|n| n.enabled && n.generator.subgraph().is_some())
        });
        for (host, sub) in self.subs.iter_mut() {
            if let Some(inner) = graph.node(*host).and_then(|n| n.generator.subgraph()) {
                sub.clear_stray(inner);
            }
        }

        let after = self.ready.len() + self.products.len() + self.subs.len();
        if after < before {
            log::trace!("{}: cleared {} stray cache entries", self.context.coord, before - after);
        }
    }

    /// Forget everything computed for this tile.
    pub fn reset(&mut self) {
        self.ready.clear();
        self.products.clear();
        self.subs.clear();
        self.prepared.clear();
        self.markers.clear();
        self.outputs.clear();
        self.mask = None;
        self.finalize.clear();
        self.apply.clear();
    }
}
