//! Generation pass: producers before consumers, driven by the link table.

use std::collections::HashMap;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::tile::{StopToken, TerrainSink, TileContext, TileData};

use super::graph::Graph;
use super::node::{GenerateContext, Node, NodeId, ResolvedParams};
use super::port::Value;

/// Parameter overrides applied to nodes of a graph generated on behalf of a
/// host node (a biome's exposed parameters).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerateScope {
    overrides: HashMap<NodeId, Vec<(String, f32)>>,
}

impl GenerateScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, node: NodeId, param: impl Into<String>, value: f32) {
        let param = param.into();
        let entry = self.overrides.entry(node).or_default();
        match entry.iter_mut().find(|(name, _)| *name == param) {
            Some(slot) => slot.1 = value,
            None => entry.push((param, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    fn apply(&self, node: NodeId, params: &mut ResolvedParams) {
        for (name, value) in self.overrides.get(&node).into_iter().flatten() {
            params.override_value(name, *value);
        }
    }
}

impl Graph {
    /// Generate every relevant node of the cache's detail level, then drain
    /// the finalize queue.
    pub fn generate(&self, cache: &mut TileData, stop: &StopToken) -> Result<()> {
        self.generate_relevant(cache, stop, &GenerateScope::default())?;
        finalize(cache, stop)?;
        Ok(())
    }

    /// Generate every relevant node without finalizing.
    pub fn generate_relevant(&self, cache: &mut TileData, stop: &StopToken, scope: &GenerateScope) -> Result<()> {
        let detail = cache.context().detail;
        for id in self.relevant_nodes(detail) {
            if stop.is_stopped() {
                break;
            }
            self.generate_recursive(id, cache, stop, scope)?;
        }
        Ok(())
    }

    /// Bring one node up to date in `cache`, generating stale producers first.
    ///
    /// The version stamped on success is the one this graph held when the
    /// node started, so a later edit made on another copy of the graph still
    /// invalidates the result on the next clear pass.
    pub fn generate_recursive(
        &self,
        id: NodeId,
        cache: &mut TileData,
        stop: &StopToken,
        scope: &GenerateScope,
    ) -> Result<()> {
        if stop.is_stopped() {
            return Ok(());
        }
        let node = self.node(id).ok_or(Error::UnknownNode(id))?;
        if cache.is_ready(node) {
            return Ok(());
        }

        for inlet in &node.inlets {
            if let Some(producer) = self.producer_node(inlet.id) {
                self.generate_recursive(producer.id, cache, stop, scope)?;
            }
        }

        if stop.is_stopped() {
            return Ok(());
        }
        if cache.is_ready(node) {
            log::error!("{} '{}' became ready while generating its inputs", id, node.name);
            return Err(Error::ReentrantGeneration(id));
        }

        let version = node.version;
        if node.enabled {
            let params = self.resolve_params(node, cache, scope);
            let mut cx = GenerateContext::new(node, self, cache, stop, params);
            node.generator.generate(&mut cx).inspect_err(|e| {
                log::error!("{} '{}' ({}) failed: {}", id, node.name, node.generator.type_name(), e);
            })?;
        } else {
            for outlet in &node.outlets {
                cache.remove_product(outlet.id);
            }
            cache.remove_output(id);
            cache.remove_sub(id);
        }

        if !stop.is_stopped() {
            cache.mark_ready(id, version);
            log::trace!("Generated {} '{}' at version {}", id, node.name, version);
        }
        Ok(())
    }

    /// Node parameters with linked field inlets and scope overrides applied.
    fn resolve_params(&self, node: &Node, cache: &TileData, scope: &GenerateScope) -> ResolvedParams {
        let mut params = ResolvedParams::new(&node.params);
        for inlet in &node.inlets {
            let Some(field) = &inlet.field else { continue };
            let value = self
                .producer_of(inlet.id)
                .and_then(|outlet| cache.product(outlet))
                .and_then(Value::as_scalar);
            if let Some(value) = value {
                params.override_value(field, value);
            }
        }
        scope.apply(node.id, &mut params);
        params
    }

    /// Whether any enabled node asks for a main-thread pre-pass.
    pub fn needs_prepare(&self) -> bool {
        self.nodes().any(|n| n.enabled && n.generator.wants_prepare())
    }

    /// Run the main-thread pre-pass of every node that wants one.
    ///
    /// Must be called on the thread owning `sink`; the results are stored
    /// into the tile cache before the generation run starts.
    pub fn prepare(&self, tile: &TileContext, sink: &dyn TerrainSink) -> Vec<(NodeId, Value)> {
        self.nodes()
            .filter(|n| n.enabled && n.generator.wants_prepare())
            .filter_map(|n| n.generator.prepare(n, tile, sink).map(|v| (n.id, v)))
            .collect()
    }
}

/// Run pending finalizers across the cache tree until none are left or the
/// run is stopped. Finalizers may schedule more, so the queue is re-checked
/// after every call. Returns how many ran.
pub fn finalize(cache: &mut TileData, stop: &StopToken) -> Result<usize> {
    let mut ran = 0;
    while !stop.is_stopped() {
        let Some(finalizer) = cache.pop_finalize() else {
            break;
        };
        finalizer.finalize(cache, stop)?;
        log::trace!("{}: finalized {:?}", cache.context().coord, finalizer.kind());
        ran += 1;
    }
    Ok(ran)
}
