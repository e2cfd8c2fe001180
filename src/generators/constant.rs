//! Constant value generator.

use std::sync::Arc;

use crate::core::types::Result;
use crate::core::Matrix;
use crate::graph::{GenerateContext, Generator, OutletSpec, Params, PortKind, Value};

/// Emits its `value` parameter, either as a flat matrix over the tile or
/// as a scalar for field inlets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Constant {
    kind: PortKind,
}

impl Constant {
    pub fn matrix() -> Arc<Self> {
        Arc::new(Self { kind: PortKind::Matrix })
    }

    pub fn scalar() -> Arc<Self> {
        Arc::new(Self { kind: PortKind::Scalar })
    }
}

impl Generator for Constant {
    fn type_name(&self) -> &'static str {
        match self.kind {
            PortKind::Scalar => "constant_scalar",
            _ => "constant",
        }
    }

    fn outlets(&self) -> Vec<OutletSpec> {
        vec![OutletSpec::new("out", self.kind)]
    }

    fn default_params(&self) -> Params {
        Params::new().with("value", 0.0)
    }

    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let value = cx.params().get_or("value", 0.0);
        let output = match self.kind {
            PortKind::Scalar => Value::Scalar(value),
            _ => {
                let tile = cx.tile();
                Matrix::filled(tile.rect, tile.resolution, value).into()
            }
        };
        cx.set_output(0, output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::graph::testing::test_context;
    use crate::tile::{StopToken, TileData};

    #[test]
    fn test_matrix_covers_tile() {
        let mut graph = Graph::new(1);
        let id = graph.add(Constant::matrix());
        graph.set_param(id, "value", 3.5).unwrap();
        graph.set_always_relevant(id, true).unwrap();

        let mut cache = TileData::new(test_context());
        graph.generate(&mut cache, &StopToken::new()).unwrap();

        let outlet = graph.node(id).unwrap().outlets[0].id;
        let m = cache.product(outlet).and_then(Value::as_matrix).unwrap();
        assert_eq!(m.rect, cache.context().rect);
        assert_eq!(m.resolution, 4);
        assert!(m.data.iter().all(|&v| v == 3.5));
    }

    #[test]
    fn test_scalar_output() {
        let mut graph = Graph::new(1);
        let id = graph.add(Constant::scalar());
        graph.set_param(id, "value", -2.0).unwrap();
        graph.set_always_relevant(id, true).unwrap();

        let mut cache = TileData::new(test_context());
        graph.generate(&mut cache, &StopToken::new()).unwrap();

        let outlet = graph.node(id).unwrap().outlets[0].id;
        assert_eq!(cache.product(outlet), Some(&Value::Scalar(-2.0)));
    }
}
