//! Small generators and graph builders shared by unit tests.

use std::sync::{Arc, Mutex};

use crate::core::error::Error;
use crate::core::types::{DetailLevel, Result, TileCoord};
use crate::core::Matrix;
use crate::tile::{OutputKind, StopToken, TileContext};

use super::graph::Graph;
use super::node::{GenerateContext, Generator, NodeId, Params};
use super::port::{InletSpec, OutletSpec, PortKind, Value};

/// 4×4 main-detail context over a 100-unit tile at the origin.
pub fn test_context() -> TileContext {
    crate::core::logging::init_for_tests();
    let coord = TileCoord::new(0, 0);
    TileContext {
        coord,
        rect: coord.rect(100),
        resolution: 4,
        detail: DetailLevel::Main,
        seed: 1,
        globals: Params::new(),
    }
}

/// Shared record of stub `generate` calls, in call order.
#[derive(Clone, Debug, Default)]
pub struct StubLog(Arc<Mutex<Vec<String>>>);

impl StubLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.0.lock().unwrap().clear();
    }

    fn push(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum StubKind {
    /// Matrix filled with `value`
    Source,
    /// Input plus `value`
    Pass,
    /// `Scalar(value)`
    ScalarSource,
    /// Reads a scalar, produces nothing
    ScalarConsumer,
    /// Height output forwarding its input
    Output,
    /// Always fails
    Failing,
}

/// Configurable test generator. Every stub has a `value` parameter
/// defaulting to 1.
#[derive(Clone, Debug)]
pub struct Stub {
    kind: StubKind,
    name: String,
    log: Option<StubLog>,
    stop_on_run: Option<StopToken>,
}

impl Stub {
    fn make(kind: StubKind, name: &str) -> Arc<Stub> {
        Arc::new(Stub {
            kind,
            name: name.to_string(),
            log: None,
            stop_on_run: None,
        })
    }

    pub fn source(name: &str) -> Arc<Stub> {
        Self::make(StubKind::Source, name)
    }

    pub fn pass(name: &str) -> Arc<Stub> {
        Self::make(StubKind::Pass, name)
    }

    pub fn scalar_source(name: &str) -> Arc<Stub> {
        Self::make(StubKind::ScalarSource, name)
    }

    pub fn scalar_consumer(name: &str) -> Arc<Stub> {
        Self::make(StubKind::ScalarConsumer, name)
    }

    pub fn output(name: &str) -> Arc<Stub> {
        Self::make(StubKind::Output, name)
    }

    pub fn failing(name: &str) -> Arc<Stub> {
        Self::make(StubKind::Failing, name)
    }

    /// Record each call into `log`.
    pub fn logged(self: Arc<Self>, log: &StubLog) -> Arc<Stub> {
        let mut stub = Arc::unwrap_or_clone(self);
        stub.log = Some(log.clone());
        Arc::new(stub)
    }

    /// Fire `stop` from inside `generate`, as if the owner cancelled mid-node.
    pub fn stopping(self: Arc<Self>, stop: &StopToken) -> Arc<Stub> {
        let mut stub = Arc::unwrap_or_clone(self);
        stub.stop_on_run = Some(stop.clone());
        Arc::new(stub)
    }
}

impl Generator for Stub {
    fn type_name(&self) -> &'static str {
        "stub"
    }

    fn inlets(&self) -> Vec<InletSpec> {
        match self.kind {
            StubKind::Pass | StubKind::Output => vec![InletSpec::new("in", PortKind::Matrix)],
            StubKind::ScalarConsumer => vec![InletSpec::new("in", PortKind::Scalar)],
            _ => Vec::new(),
        }
    }

    fn outlets(&self) -> Vec<OutletSpec> {
        match self.kind {
            StubKind::Source | StubKind::Pass | StubKind::Failing => {
                vec![OutletSpec::new("out", PortKind::Matrix)]
            }
            StubKind::ScalarSource => vec![OutletSpec::new("out", PortKind::Scalar)],
            _ => Vec::new(),
        }
    }

    fn default_params(&self) -> Params {
        Params::new().with("value", 1.0)
    }

    fn output_kind(&self) -> Option<OutputKind> {
        (self.kind == StubKind::Output).then_some(OutputKind::Height)
    }

    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        if let Some(log) = &self.log {
            log.push(&self.name);
        }
        if let Some(stop) = &self.stop_on_run {
            stop.stop();
        }

        let value = cx.params().get_or("value", 1.0);
        let tile = cx.tile().clone();
        match self.kind {
            StubKind::Source => {
                cx.set_output(0, Matrix::filled(tile.rect, tile.resolution, value).into());
            }
            StubKind::Pass => {
                let mut m = match cx.input(0) {
                    Some(Value::Matrix(m)) => (*m).clone(),
                    _ => Matrix::filled(tile.rect, tile.resolution, 0.0),
                };
                m.data.iter_mut().for_each(|v| *v += value);
                cx.set_output(0, m.into());
            }
            StubKind::ScalarSource => cx.set_output(0, Value::Scalar(value)),
            StubKind::ScalarConsumer => {}
            StubKind::Output => {
                let id = cx.node().id;
                match cx.input(0) {
                    Some(v) => cx.cache_mut().set_output(id, OutputKind::Height, v),
                    None => cx.cache_mut().remove_output(id),
                }
            }
            StubKind::Failing => return Err(Error::Generator(format!("{} failed", self.name))),
        }
        Ok(())
    }
}

/// Linear chain `source -> pass -> pass ...` of `len` nodes, in id order.
pub fn chain(len: usize) -> (Graph, Vec<NodeId>) {
    let mut graph = Graph::new(1);
    let mut ids = Vec::with_capacity(len);
    for i in 0..len {
        let generator = if i == 0 {
            Stub::source(&format!("n{i}"))
        } else {
            Stub::pass(&format!("n{i}"))
        };
        let id = graph.add(generator);
        if let Some(&prev) = ids.last() {
            let outlet = graph.node(prev).map(|n| n.outlets[0].id);
            let inlet = graph.node(id).map(|n| n.inlets[0].id);
            if let (Some(outlet), Some(inlet)) = (outlet, inlet) {
                graph.link(outlet, inlet).unwrap();
            }
        }
        ids.push(id);
    }
    (graph, ids)
}
