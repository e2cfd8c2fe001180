use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use terragraph::core::{DetailLevel, EngineConfig, TileCoord};
use terragraph::generators::{Blend, Constant, HeightOutput, NoiseGenerator};
use terragraph::graph::{ClearOptions, Graph, NodeId};
use terragraph::tile::{StopToken, TileContext, TileData};

/// `width` noise sources folded pairwise through blends into one output.
fn blend_tree(width: usize) -> (Graph, Vec<NodeId>) {
    let mut graph = Graph::new(42);
    let mut sources = Vec::with_capacity(width);
    let mut layer: Vec<NodeId> = (0..width)
        .map(|i| {
            let id = graph.add(NoiseGenerator::new());
            graph.set_param(id, "seed", i as f32).unwrap();
            sources.push(id);
            id
        })
        .collect();

    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| {
                let blend = graph.add(Blend::new());
                for (slot, &input) in pair.iter().enumerate() {
                    let outlet = graph.node(input).unwrap().outlets[0].id;
                    let inlet = graph.node(blend).unwrap().inlets[slot].id;
                    graph.link(outlet, inlet).unwrap();
                }
                blend
            })
            .collect();
    }

    let out = graph.add(HeightOutput::new());
    let outlet = graph.node(layer[0]).unwrap().outlets[0].id;
    let inlet = graph.node(out).unwrap().inlets[0].id;
    graph.link(outlet, inlet).unwrap();
    (graph, sources)
}

fn context(resolution: u32) -> TileContext {
    let config = EngineConfig {
        tile_size: 500,
        main_resolution: resolution,
        ..EngineConfig::default()
    };
    TileContext::for_tile(TileCoord::new(0, 0), DetailLevel::Main, &config)
}

fn generated(graph: &Graph, resolution: u32) -> TileData {
    let mut cache = TileData::new(context(resolution));
    graph.generate(&mut cache, &StopToken::new()).unwrap();
    cache
}

fn bench_clear_unchanged(c: &mut Criterion) {
    let (graph, _) = blend_tree(64);
    let mut cache = generated(&graph, 8);

    c.bench_function("clear_unchanged_64", |b| {
        b.iter(|| graph.clear_changed(black_box(&mut cache), &mut ClearOptions::default()));
    });
}

fn bench_generate_full(c: &mut Criterion) {
    let (graph, _) = blend_tree(16);

    c.bench_function("generate_full_16x65", |b| {
        b.iter(|| generated(black_box(&graph), 65));
    });
}

fn bench_regenerate_one_leaf(c: &mut Criterion) {
    let (before, sources) = blend_tree(16);
    let mut after = before.clone();
    after.bump_version(sources[0]).unwrap();

    c.bench_function("regenerate_one_leaf_16x65", |b| {
        b.iter_batched(
            || generated(&before, 65),
            |mut cache| {
                after.clear_changed(&mut cache, &mut ClearOptions::default());
                after.generate(&mut cache, &StopToken::new()).unwrap();
                cache
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_constant_fanout(c: &mut Criterion) {
    let mut graph = Graph::new(1);
    for _ in 0..256 {
        let id = graph.add(Constant::matrix());
        graph.set_always_relevant(id, true).unwrap();
    }
    let graph = Arc::new(graph);

    c.bench_function("generate_constants_256x33", |b| {
        b.iter(|| generated(black_box(&graph), 33));
    });
}

criterion_group!(
    benches,
    bench_clear_unchanged,
    bench_generate_full,
    bench_regenerate_one_leaf,
    bench_constant_fanout,
);
criterion_main!(benches);
