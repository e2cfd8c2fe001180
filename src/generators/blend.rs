//! Linear blend of two height matrices.

use std::sync::Arc;

use crate::core::types::Result;
use crate::core::Matrix;
use crate::graph::{GenerateContext, Generator, InletSpec, OutletSpec, Params, PortKind, Value};

/// `a * (1 - factor) + b * factor`. A missing input counts as flat zero.
///
/// `factor` is a field inlet: linking a scalar to it overrides the parameter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blend;

impl Blend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Generator for Blend {
    fn type_name(&self) -> &'static str {
        "blend"
    }

    fn inlets(&self) -> Vec<InletSpec> {
        vec![
            InletSpec::new("a", PortKind::Matrix),
            InletSpec::new("b", PortKind::Matrix),
            InletSpec::field("factor"),
        ]
    }

    fn outlets(&self) -> Vec<OutletSpec> {
        vec![OutletSpec::new("out", PortKind::Matrix)]
    }

    fn default_params(&self) -> Params {
        Params::new().with("factor", 0.5)
    }

    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let factor = cx.params().get_or("factor", 0.5).clamp(0.0, 1.0);
        let a = cx.input(0);
        let b = cx.input(1);
        if a.is_none() && b.is_none() {
            cx.clear_output(0);
            return Ok(());
        }

        let tile = cx.tile();
        let mut out = Matrix::filled(tile.rect, tile.resolution, 0.0);
        let mut scratch = out.clone();
        for (input, weight) in [(a, 1.0 - factor), (b, factor)] {
            let Some(Value::Matrix(m)) = input else { continue };
            let fitted = if m.rect == out.rect && m.resolution == out.resolution {
                m
            } else {
                scratch.data.fill(0.0);
                scratch.blit_from(&m);
                Arc::new(scratch.clone())
            };
            for (o, v) in out.data.iter_mut().zip(&fitted.data) {
                *o += v * weight;
            }
        }

        cx.set_output(0, out.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::Constant;
    use crate::graph::{Graph, NodeId};
    use crate::graph::testing::test_context;
    use crate::tile::{StopToken, TileData};

    fn link(graph: &mut Graph, from: NodeId, to: NodeId, inlet: usize) {
        let outlet = graph.node(from).unwrap().outlets[0].id;
        let inlet = graph.node(to).unwrap().inlets[inlet].id;
        graph.link(outlet, inlet).unwrap();
    }

    fn blended(graph: &Graph, id: NodeId) -> f32 {
        let mut cache = TileData::new(test_context());
        graph.generate(&mut cache, &StopToken::new()).unwrap();
        let outlet = graph.node(id).unwrap().outlets[0].id;
        cache.product(outlet).and_then(Value::as_matrix).unwrap().data[0]
    }

    fn setup() -> (Graph, NodeId) {
        let mut graph = Graph::new(1);
        let a = graph.add(Constant::matrix());
        let b = graph.add(Constant::matrix());
        graph.set_param(a, "value", 10.0).unwrap();
        graph.set_param(b, "value", 20.0).unwrap();
        let blend = graph.add(Blend::new());
        link(&mut graph, a, blend, 0);
        link(&mut graph, b, blend, 1);
        graph.set_always_relevant(blend, true).unwrap();
        (graph, blend)
    }

    #[test]
    fn test_blend_by_param() {
        let (mut graph, blend) = setup();
        assert_eq!(blended(&graph, blend), 15.0);
        graph.set_param(blend, "factor", 1.0).unwrap();
        assert_eq!(blended(&graph, blend), 20.0);
    }

    #[test]
    fn test_factor_from_field_inlet() {
        let (mut graph, blend) = setup();
        let factor = graph.add(Constant::scalar());
        graph.set_param(factor, "value", 0.25).unwrap();
        link(&mut graph, factor, blend, 2);
        assert_eq!(blended(&graph, blend), 12.5);
    }

    #[test]
    fn test_missing_input_counts_as_zero() {
        let (mut graph, blend) = setup();
        let inlet = graph.node(blend).unwrap().inlets[1].id;
        graph.unlink(inlet);
        assert_eq!(blended(&graph, blend), 5.0);
    }
}
