//! Batch tile generator: builds a demo graph and generates a square grid of
//! tiles in parallel, without the scheduler.
//!
//! Usage: cargo run --release --bin generate_tiles -- [OPTIONS]
//!
//! Options:
//!   --grid <N>        Tiles per side (default: 8)
//!   --seed <SEED>     Graph seed (default: from config)
//!   --jobs <N>        Max parallel tiles (default: 4)
//!   --config <PATH>   Engine config JSON (default: built-in defaults)

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use terragraph::cluster::ClusterCoordinator;
use terragraph::core::{DetailLevel, EngineConfig, Error, Result, TileCoord, logging};
use terragraph::generators::{
    Biome, Blend, ClusterInput, Constant, HeightOutput, NoiseGenerator, ObjectsOutput, Scatter,
};
use terragraph::graph::{Graph, NodeId, PortId};
use terragraph::runtime::WorkerPool;
use terragraph::tile::{ApplyDescriptor, StopToken, TileContext, TileData};

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let grid = parse_arg::<i32>(&args, "--grid").unwrap_or(8).max(1);
    let jobs = parse_arg::<usize>(&args, "--jobs").unwrap_or(4).max(1);

    let mut config = match parse_arg::<String>(&args, "--config") {
        Some(path) => match EngineConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };
    if let Some(seed) = parse_arg::<u64>(&args, "--seed") {
        config.seed = seed;
    }

    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(jobs).build_global() {
        log::warn!("Could not size rayon pool: {}", e);
    }

    println!("=== Terragraph Tile Generator ===");
    println!("Grid:  {} x {} tiles of {} units", grid, grid, config.tile_size);
    println!("Res:   {} samples per side", config.main_resolution);
    println!("Seed:  {}", config.seed);
    println!("Jobs:  {} parallel", jobs);
    println!();

    if let Err(e) = run(&config, grid) {
        eprintln!("Generation failed: {}", e);
        std::process::exit(1);
    }
}

fn run(config: &EngineConfig, grid: i32) -> Result<()> {
    let pool = Arc::new(WorkerPool::new(config.worker_threads));
    let (cluster_graph, cluster_source) = cluster_graph(config)?;
    let coordinator = Arc::new(ClusterCoordinator::new(
        Arc::new(cluster_graph),
        config.cluster.clone(),
        config.seed,
        Duration::from_millis(config.gate_poll_ms),
        pool.clone(),
        Vec::new(),
    ));
    let graph = Arc::new(tile_graph(config, ClusterInput::new(coordinator, cluster_source))?);

    let coords: Vec<TileCoord> = (0..grid)
        .flat_map(|z| (0..grid).map(move |x| TileCoord::new(x, z)))
        .collect();
    let total = coords.len();

    let start = Instant::now();
    let done = AtomicUsize::new(0);
    let objects = AtomicUsize::new(0);

    let heights: Vec<(TileCoord, f32, f32)> = coords
        .par_iter()
        .map(|&coord| -> Result<(TileCoord, f32, f32)> {
            let mut cache = TileData::new(TileContext::for_tile(coord, DetailLevel::Main, config));
            graph.generate(&mut cache, &StopToken::new())?;

            let mut range = (0.0, 0.0);
            for descriptor in cache.take_apply() {
                match descriptor {
                    ApplyDescriptor::Height(m) => range = m.min_max(),
                    ApplyDescriptor::Objects(o) => {
                        objects.fetch_add(o.len(), Ordering::Relaxed);
                    }
                    ApplyDescriptor::Splats(_) => {}
                }
            }

            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 16 == 0 || n == total {
                eprintln!("  [{}/{}] {:.1}s", n, total, start.elapsed().as_secs_f32());
            }
            Ok((coord, range.0, range.1))
        })
        .collect::<Result<Vec<_>>>()?;

    let elapsed = start.elapsed().as_secs_f32();
    let lo = heights.iter().map(|h| h.1).fold(f32::INFINITY, f32::min);
    let hi = heights.iter().map(|h| h.2).fold(f32::NEG_INFINITY, f32::max);

    println!();
    println!("=== Generation Complete ===");
    println!("Tiles:   {} in {:.2}s ({:.1} tiles/sec)", total, elapsed, total as f32 / elapsed.max(1e-3));
    println!("Height:  {:.2} .. {:.2}", lo, hi);
    println!("Objects: {}", objects.load(Ordering::Relaxed));
    Ok(())
}

/// Continent-scale noise shared by every tile of a cluster cell.
fn cluster_graph(config: &EngineConfig) -> Result<(Graph, PortId)> {
    let mut graph = Graph::new(config.seed);
    let continent = graph.add_node("continent", NoiseGenerator::new());
    graph.set_param(continent, "scale", config.cluster.cell_size as f32 * 2.0)?;
    graph.set_param(continent, "height", 60.0)?;
    graph.set_always_relevant(continent, true)?;
    let source = graph
        .node(continent)
        .map(|n| n.outlets[0].id)
        .ok_or(Error::UnknownNode(continent))?;
    Ok((graph, source))
}

/// Continent plus local detail, with a masked rocky biome adding bumps and
/// boulders on top.
fn tile_graph(config: &EngineConfig, continent: Arc<ClusterInput>) -> Result<Graph> {
    let mut graph = Graph::new(config.seed);

    let continent = graph.add_node("continent", continent);
    let detail = graph.add_node("detail", NoiseGenerator::new());
    graph.set_param(detail, "scale", 150.0)?;
    graph.set_param(detail, "height", 12.0)?;
    graph.set_param(detail, "seed", 3.0)?;

    let blend = graph.add(Blend::new());
    link(&mut graph, continent, 0, blend, 0)?;
    link(&mut graph, detail, 0, blend, 1)?;
    let weight = graph.add_node("detail weight", Constant::scalar());
    graph.set_param(weight, "value", 0.2)?;
    link(&mut graph, weight, 0, blend, 2)?;

    let height = graph.add(HeightOutput::new());
    link(&mut graph, blend, 0, height, 0)?;

    let rocky = rocky_biome()?;
    let biome = graph.add_node("rocky", rocky);
    let mask = graph.add_node("rocky mask", NoiseGenerator::new());
    graph.set_param(mask, "scale", 400.0)?;
    graph.set_param(mask, "seed", 11.0)?;
    link(&mut graph, mask, 0, biome, 0)?;

    Ok(graph)
}

fn rocky_biome() -> Result<Arc<Biome>> {
    let mut builder = Biome::builder(Graph::new(0));
    let inner = builder.graph_mut();
    let bumps = inner.add_node("bumps", NoiseGenerator::new());
    inner.set_param(bumps, "scale", 20.0)?;
    inner.set_param(bumps, "height", 3.0)?;
    let out = inner.add(HeightOutput::new());
    link(inner, bumps, 0, out, 0)?;

    let scatter = inner.add_node("boulders", Scatter::new());
    inner.set_param(scatter, "spacing", 40.0)?;
    inner.set_param(scatter, "density", 0.6)?;
    let objects = inner.add(ObjectsOutput::new());
    link(inner, scatter, 0, objects, 0)?;

    builder.expose("boulder_density", scatter, "density")?;
    Ok(builder.build())
}

fn link(graph: &mut Graph, from: NodeId, outlet: usize, to: NodeId, inlet: usize) -> Result<()> {
    let outlet = graph
        .node(from)
        .and_then(|n| n.outlet(outlet))
        .map(|o| o.id)
        .ok_or(Error::UnknownNode(from))?;
    let inlet = graph
        .node(to)
        .and_then(|n| n.inlet(inlet))
        .map(|i| i.id)
        .ok_or(Error::UnknownNode(to))?;
    graph.link(outlet, inlet)
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}
