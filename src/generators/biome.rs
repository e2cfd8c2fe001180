//! Biome: a node hosting its own sub-graph, generated into a child cache.
//!
//! Outer values enter the sub-graph through portal nodes, selected inner
//! outlets leave it as the biome's outlets, and selected inner parameters
//! are exposed as biome parameters. Output nodes inside the sub-graph
//! contribute to the tile weighted by the biome's mask.

use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::graph::{
    ClearingContext, GenerateContext, GenerateScope, Generator, Graph, InletSpec, NodeId, OutletSpec, Params,
    PortId, PortKind, Value,
};

/// Entry point of an outer value inside a biome sub-graph. The biome writes
/// the value into the portal's outlet before generating.
#[derive(Clone, Copy, Debug)]
pub struct Portal {
    kind: PortKind,
}

impl Portal {
    pub fn new(kind: PortKind) -> Arc<Self> {
        Arc::new(Self { kind })
    }
}

impl Generator for Portal {
    fn type_name(&self) -> &'static str {
        "portal"
    }

    fn outlets(&self) -> Vec<OutletSpec> {
        vec![OutletSpec::new("value", self.kind)]
    }

    fn generate(&self, _cx: &mut GenerateContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Import {
    name: String,
    kind: PortKind,
    portal: NodeId,
}

#[derive(Clone, Debug)]
struct Export {
    name: String,
    kind: PortKind,
    outlet: PortId,
}

#[derive(Clone, Debug)]
struct Exposed {
    name: String,
    node: NodeId,
    param: String,
    default: f32,
}

/// Assembles a [`Biome`] around an inner graph.
#[derive(Debug)]
pub struct BiomeBuilder {
    graph: Graph,
    imports: Vec<Import>,
    exports: Vec<Export>,
    exposed: Vec<Exposed>,
}

impl BiomeBuilder {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            imports: Vec::new(),
            exports: Vec::new(),
            exposed: Vec::new(),
        }
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Add an outer inlet. Returns the inner portal node carrying its value.
    pub fn import(&mut self, name: impl Into<String>, kind: PortKind) -> NodeId {
        let name = name.into();
        let portal = self.graph.add_node(format!("import {}", name), Portal::new(kind));
        self.imports.push(Import { name, kind, portal });
        portal
    }

    /// Publish outlet `index` of an inner node as an outer outlet. The node
    /// is kept relevant so it is generated even without inner outputs.
    pub fn export(&mut self, name: impl Into<String>, node: NodeId, index: usize) -> Result<()> {
        let outlet = self
            .graph
            .node(node)
            .ok_or(Error::UnknownNode(node))?
            .outlet(index)
            .cloned()
            .ok_or_else(|| Error::Generator(format!("{} has no outlet {}", node, index)))?;
        self.graph.set_always_relevant(node, true)?;
        self.exports.push(Export {
            name: name.into(),
            kind: outlet.kind,
            outlet: outlet.id,
        });
        Ok(())
    }

    /// Expose an inner parameter as a biome parameter, defaulting to the
    /// inner node's current value.
    pub fn expose(&mut self, name: impl Into<String>, node: NodeId, param: &str) -> Result<()> {
        let default = self
            .graph
            .node(node)
            .ok_or(Error::UnknownNode(node))?
            .params
            .get_or(param, 0.0);
        self.exposed.push(Exposed {
            name: name.into(),
            node,
            param: param.to_string(),
            default,
        });
        Ok(())
    }

    pub fn build(self) -> Arc<Biome> {
        Arc::new(Biome {
            graph: Arc::new(self.graph),
            imports: self.imports,
            exports: self.exports,
            exposed: self.exposed,
        })
    }
}

/// Sub-graph host. Inlet 0 is the blend mask; inlets `1..` are imports.
#[derive(Debug)]
pub struct Biome {
    graph: Arc<Graph>,
    imports: Vec<Import>,
    exports: Vec<Export>,
    exposed: Vec<Exposed>,
}

impl Biome {
    pub fn builder(graph: Graph) -> BiomeBuilder {
        BiomeBuilder::new(graph)
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }
}

impl Generator for Biome {
    fn type_name(&self) -> &'static str {
        "biome"
    }

    fn inlets(&self) -> Vec<InletSpec> {
        std::iter::once(InletSpec::new("mask", PortKind::Matrix))
            .chain(self.imports.iter().map(|i| InletSpec::new(i.name.clone(), i.kind)))
            .collect()
    }

    fn outlets(&self) -> Vec<OutletSpec> {
        self.exports
            .iter()
            .map(|e| OutletSpec::new(e.name.clone(), e.kind))
            .collect()
    }

    fn default_params(&self) -> Params {
        let mut params = Params::new();
        for exposed in &self.exposed {
            params.set(exposed.name.clone(), exposed.default);
        }
        params
    }

    fn subgraph(&self) -> Option<&Arc<Graph>> {
        Some(&self.graph)
    }

    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let id = cx.node().id;
        let stop = cx.stop().clone();

        let mask = cx.input(0).and_then(|v| v.as_matrix().cloned());
        let inputs: Vec<Option<Value>> = (1..=self.imports.len()).map(|i| cx.input(i)).collect();

        let mut scope = GenerateScope::new();
        for exposed in &self.exposed {
            let value = cx.params().get_or(&exposed.name, exposed.default);
            scope.set(exposed.node, exposed.param.clone(), value);
        }

        let sub = cx.cache_mut().sub_mut(id);
        sub.set_mask(mask);
        for (import, value) in self.imports.iter().zip(inputs) {
            let Some(portal) = self.graph.node(import.portal) else {
                continue;
            };
            let outlet = portal.outlets[0].id;
            match value {
                Some(value) => sub.set_product(outlet, value),
                None => {
                    sub.remove_product(outlet);
                }
            }
            sub.mark_ready(portal.id, portal.version);
        }

        self.graph.generate_relevant(sub, &stop, &scope)?;

        let exported: Vec<Option<Value>> = self.exports.iter().map(|e| sub.product(e.outlet).cloned()).collect();
        for (index, value) in exported.into_iter().enumerate() {
            match value {
                Some(value) => cx.set_output(index, value),
                None => cx.clear_output(index),
            }
        }
        Ok(())
    }

    fn on_clearing(&self, cx: &mut ClearingContext<'_>) {
        let Some(sub) = cx.sub.as_deref_mut() else {
            return;
        };

        // New mask or imports: re-inject and re-record every inner output
        if cx.this_changed || cx.inlet_changed || cx.total_rebuild {
            for import in &self.imports {
                sub.clear_ready(import.portal);
            }
            for node in self.graph.nodes().filter(|n| n.is_output()) {
                sub.clear_ready(node.id);
            }
        }
        if cx.this_changed {
            for exposed in &self.exposed {
                sub.clear_ready(exposed.node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{Blend, Constant, HeightOutput};
    use crate::graph::ClearOptions;
    use crate::graph::testing::test_context;
    use crate::tile::{ApplyDescriptor, OutputKind, StopToken, TileData};

    fn link(graph: &mut Graph, from: NodeId, out: usize, to: NodeId, inlet: usize) {
        let outlet = graph.node(from).unwrap().outlets[out].id;
        let inlet = graph.node(to).unwrap().inlets[inlet].id;
        graph.link(outlet, inlet).unwrap();
    }

    fn refresh(graph: &Graph, cache: &mut TileData) {
        graph.clear_changed(cache, &mut ClearOptions::default());
        graph.generate(cache, &StopToken::new()).unwrap();
    }

    fn height(cache: &TileData) -> f32 {
        match cache.pending_apply(OutputKind::Height) {
            Some(ApplyDescriptor::Height(m)) => m.data[0],
            other => panic!("expected height, got {:?}", other),
        }
    }

    /// Outer `base` constant imported into a blend whose factor is exposed;
    /// the blend feeds an inner height output and is exported.
    fn biome_graph() -> (Graph, NodeId, NodeId, NodeId) {
        let mut inner = Biome::builder(Graph::new(1));
        let portal = inner.import("base", PortKind::Matrix);
        let blend = inner.graph_mut().add(Blend::new());
        inner.graph_mut().set_param(blend, "factor", 0.0).unwrap();
        let out = inner.graph_mut().add(HeightOutput::new());
        link(inner.graph_mut(), portal, 0, blend, 0);
        link(inner.graph_mut(), blend, 0, out, 0);
        inner.export("blended", blend, 0).unwrap();
        inner.expose("factor", blend, "factor").unwrap();

        let mut graph = Graph::new(1);
        let base = graph.add(Constant::matrix());
        graph.set_param(base, "value", 4.0).unwrap();
        let biome = graph.add(inner.build());
        link(&mut graph, base, 0, biome, 1);
        let mask = graph.add(Constant::matrix());
        graph.set_param(mask, "value", 1.0).unwrap();
        link(&mut graph, mask, 0, biome, 0);
        (graph, base, biome, mask)
    }

    #[test]
    fn test_biome_output_weighted_by_mask() {
        let (mut graph, _, _, mask) = biome_graph();
        let mut cache = TileData::new(test_context());
        refresh(&graph, &mut cache);
        assert_eq!(height(&cache), 4.0);

        graph.set_param(mask, "value", 0.5).unwrap();
        refresh(&graph, &mut cache);
        assert_eq!(height(&cache), 2.0);
    }

    #[test]
    fn test_import_change_reaches_export() {
        let (mut graph, base, biome, _) = biome_graph();
        let mut cache = TileData::new(test_context());
        refresh(&graph, &mut cache);

        graph.set_param(base, "value", 6.0).unwrap();
        refresh(&graph, &mut cache);

        let outlet = graph.node(biome).unwrap().outlets[0].id;
        let exported = cache.product(outlet).and_then(Value::as_matrix).unwrap();
        assert_eq!(exported.data[0], 6.0);
        assert_eq!(height(&cache), 6.0);
    }

    #[test]
    fn test_exposed_param_overrides_inner_node() {
        let (mut graph, _, biome, _) = biome_graph();
        let mut cache = TileData::new(test_context());
        refresh(&graph, &mut cache);
        assert_eq!(graph.node(biome).unwrap().params.get("factor"), Some(0.0));

        // Blend's second input is unlinked, so factor 0.5 halves the base
        graph.set_param(biome, "factor", 0.5).unwrap();
        refresh(&graph, &mut cache);
        assert_eq!(height(&cache), 2.0);
    }

    #[test]
    fn test_unrelated_edit_keeps_sub_cache_ready() {
        let (mut graph, _, biome, _) = biome_graph();
        let other = graph.add(Constant::matrix());
        graph.set_always_relevant(other, true).unwrap();
        let mut cache = TileData::new(test_context());
        refresh(&graph, &mut cache);
        let inner_ready = cache.sub(biome).unwrap().ready_count();
        cache.take_apply();

        graph.set_param(other, "value", 1.0).unwrap();
        let dropped = graph.clear_changed(&mut cache, &mut ClearOptions::default());
        assert_eq!(dropped, 1);
        assert_eq!(cache.sub(biome).unwrap().ready_count(), inner_ready);
        assert!(cache.is_ready(graph.node(biome).unwrap()));
    }

    #[test]
    fn test_disabled_biome_contributes_nothing() {
        let (mut graph, _, biome, _) = biome_graph();
        let mut cache = TileData::new(test_context());
        refresh(&graph, &mut cache);

        graph.set_enabled(biome, false).unwrap();
        let direct = graph.add(Constant::matrix());
        let out = graph.add(HeightOutput::new());
        link(&mut graph, direct, 0, out, 0);
        refresh(&graph, &mut cache);

        assert!(cache.sub(biome).is_none());
        assert_eq!(height(&cache), 0.0);
    }
}
