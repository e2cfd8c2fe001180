//! Reads a shared cluster product into a tile.

use std::sync::Arc;

use crate::cluster::ClusterCoordinator;
use crate::core::types::{ClusterCoord, Result};
use crate::core::Matrix;
use crate::graph::{ClearingContext, GenerateContext, Generator, OutletSpec, PortId, PortKind, Value};

/// Brings every cluster cell under the tile up to the current revision and
/// cuts the tile's area out of the cells' `source` matrices.
///
/// The node's version does not move when the cluster graph changes, so the
/// consumed revision is stored as the node's marker in the tile cache and
/// compared on clearing.
#[derive(Debug)]
pub struct ClusterInput {
    coordinator: Arc<ClusterCoordinator>,
    /// Outlet of the cluster graph to read
    source: PortId,
}

impl ClusterInput {
    pub fn new(coordinator: Arc<ClusterCoordinator>, source: PortId) -> Arc<Self> {
        Arc::new(Self { coordinator, source })
    }
}

impl Generator for ClusterInput {
    fn type_name(&self) -> &'static str {
        "cluster_input"
    }

    fn outlets(&self) -> Vec<OutletSpec> {
        vec![OutletSpec::new("out", PortKind::Matrix)]
    }

    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let tile = cx.tile().clone();
        let stop = cx.stop().clone();
        let cells = ClusterCoord::covering(&tile.rect, self.coordinator.config().cell_size);

        let revision = self.coordinator.refresh_area(&cells, &stop)?;
        if stop.is_stopped() {
            return Ok(());
        }

        let mut out = Matrix::filled(tile.rect, tile.resolution, 0.0);
        for cell in cells {
            match self.coordinator.product(cell, self.source) {
                Some(Value::Matrix(m)) => {
                    out.blit_from(&m);
                }
                _ => log::warn!("{}: {} has no product for {}", tile.coord, cell, self.source),
            }
        }
        cx.set_output(0, out.into());

        let id = cx.node().id;
        cx.cache_mut().set_marker(id, revision);
        Ok(())
    }

    fn on_clearing(&self, cx: &mut ClearingContext<'_>) {
        if cx.total_rebuild {
            // Cells regenerate once per rebuild, however many tiles take part
            self.coordinator.force_refresh_for(cx.rebuild_epoch);
            cx.invalidate = true;
            return;
        }
        if cx.marker != Some(self.coordinator.current_revision()) {
            cx.invalidate = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ClusterConfig, EngineConfig};
    use crate::generators::HeightOutput;
    use crate::graph::testing::test_context;
    use crate::core::types::TileCoord;
    use crate::graph::{ClearOptions, Graph, NodeId, Params, next_rebuild_epoch};
    use crate::runtime::{MainQueue, WorkerPool};
    use crate::tile::{ApplyDescriptor, RecordingSink, StopToken, TileData, TileScheduler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Cluster cell generator: counts runs, takes a while, fills `value`.
    #[derive(Debug, Default)]
    struct Slow {
        runs: AtomicUsize,
    }

    impl Generator for Slow {
        fn type_name(&self) -> &'static str {
            "slow"
        }

        fn outlets(&self) -> Vec<OutletSpec> {
            vec![OutletSpec::new("out", PortKind::Matrix)]
        }

        fn default_params(&self) -> Params {
            Params::new().with("value", 7.0)
        }

        fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            let tile = cx.tile().clone();
            let value = cx.params().get_or("value", 0.0);
            cx.set_output(0, Matrix::filled(tile.rect, tile.resolution, value).into());
            Ok(())
        }
    }

    struct Setup {
        slow: Arc<Slow>,
        cluster_graph: Graph,
        cluster_node: NodeId,
        coordinator: Arc<ClusterCoordinator>,
        pool: Arc<WorkerPool>,
        tile_graph: Graph,
    }

    fn setup() -> Setup {
        let slow = Arc::new(Slow::default());
        let mut cluster_graph = Graph::new(9);
        let cluster_node = cluster_graph.add(slow.clone());
        cluster_graph.set_always_relevant(cluster_node, true).unwrap();
        let source = cluster_graph.node(cluster_node).unwrap().outlets[0].id;

        let pool = Arc::new(WorkerPool::new(2));
        let config = ClusterConfig {
            cell_size: 1000,
            resolution: 8,
            settings_version: 0,
        };
        let coordinator = Arc::new(ClusterCoordinator::new(
            Arc::new(cluster_graph.clone()),
            config,
            1,
            Duration::from_millis(2),
            pool.clone(),
            Vec::new(),
        ));

        let mut tile_graph = Graph::new(1);
        let input = tile_graph.add(ClusterInput::new(coordinator.clone(), source));
        let output = tile_graph.add(HeightOutput::new());
        let outlet = tile_graph.node(input).unwrap().outlets[0].id;
        let inlet = tile_graph.node(output).unwrap().inlets[0].id;
        tile_graph.link(outlet, inlet).unwrap();

        Setup {
            slow,
            cluster_graph,
            cluster_node,
            coordinator,
            pool,
            tile_graph,
        }
    }

    fn height(descriptor: &ApplyDescriptor) -> &Matrix {
        match descriptor {
            ApplyDescriptor::Height(m) => m,
            other => panic!("expected height, got {:?}", other),
        }
    }

    #[test]
    fn test_tiles_on_one_cell_share_one_cluster_run() {
        let s = setup();
        let config = EngineConfig {
            tile_size: 100,
            main_resolution: 4,
            draft_enabled: false,
            ..EngineConfig::default()
        };
        let main = Arc::new(MainQueue::new());
        let scheduler = TileScheduler::new(config, Arc::new(s.tile_graph.clone()), s.pool.clone(), main.clone());

        // Both tiles lie in cluster cell (0, 0)
        scheduler.start(TileCoord::new(0, 0));
        scheduler.start(TileCoord::new(1, 0));
        s.pool.wait_idle();

        let mut sink = RecordingSink::default();
        main.run_pending(&mut sink, None);

        assert_eq!(s.slow.runs.load(Ordering::SeqCst), 1);
        assert_eq!(sink.applied.len(), 2);
        for (_, _, descriptor) in &sink.applied {
            assert!(height(descriptor).data.iter().all(|&v| v == 7.0));
        }
    }

    #[test]
    fn test_concurrent_generation_from_two_threads() {
        let s = setup();
        let graph = Arc::new(s.tile_graph.clone());

        let handles: Vec<_> = [TileCoord::new(0, 0), TileCoord::new(3, 2)]
            .into_iter()
            .map(|coord| {
                let graph = graph.clone();
                std::thread::spawn(move || {
                    let mut context = test_context();
                    context.coord = coord;
                    context.rect = coord.rect(100);
                    let mut cache = TileData::new(context);
                    graph.generate(&mut cache, &StopToken::new()).unwrap();
                    cache.take_apply()
                })
            })
            .collect();

        for handle in handles {
            let applied = handle.join().unwrap();
            assert!(height(&applied[0]).data.iter().all(|&v| v == 7.0));
        }
        assert_eq!(s.slow.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cluster_edit_invalidates_tile() {
        let mut s = setup();
        let mut cache = TileData::new(test_context());
        s.tile_graph.generate(&mut cache, &StopToken::new()).unwrap();
        cache.take_apply();

        // Unchanged cluster: nothing to drop
        let dropped = s.tile_graph.clear_changed(&mut cache, &mut ClearOptions::default());
        assert_eq!(dropped, 0);

        s.cluster_graph.set_param(s.cluster_node, "value", 9.0).unwrap();
        s.coordinator.set_graph(Arc::new(s.cluster_graph.clone()));
        let dropped = s.tile_graph.clear_changed(&mut cache, &mut ClearOptions::default());
        assert_eq!(dropped, 2);

        s.tile_graph.generate(&mut cache, &StopToken::new()).unwrap();
        let applied = cache.take_apply();
        assert!(height(&applied[0]).data.iter().all(|&v| v == 9.0));
        assert_eq!(s.slow.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_total_rebuild_regenerates_cluster() {
        let s = setup();
        let cell = ClusterCoord::new(0, 0);
        let mut cache = TileData::new(test_context());
        s.tile_graph.generate(&mut cache, &StopToken::new()).unwrap();
        assert_eq!(s.coordinator.generated_revision(cell), Some(1));

        s.tile_graph.clear_changed(&mut cache, &mut ClearOptions::total_rebuild());
        assert_eq!(cache.ready_count(), 0);
        s.tile_graph.generate(&mut cache, &StopToken::new()).unwrap();

        assert_eq!(s.slow.runs.load(Ordering::SeqCst), 2);
        assert_eq!(s.coordinator.generated_revision(cell), Some(2));
        assert_eq!(cache.ready_count(), 2);
    }

    #[test]
    fn test_tiles_of_one_rebuild_regenerate_cluster_once() {
        let s = setup();
        let mut caches: Vec<TileData> = [TileCoord::new(0, 0), TileCoord::new(1, 1)]
            .into_iter()
            .map(|coord| {
                let mut context = test_context();
                context.coord = coord;
                context.rect = coord.rect(100);
                TileData::new(context)
            })
            .collect();
        for cache in &mut caches {
            s.tile_graph.generate(cache, &StopToken::new()).unwrap();
        }

        let epoch = next_rebuild_epoch();
        for cache in &mut caches {
            s.tile_graph.clear_changed(cache, &mut ClearOptions::rebuild(epoch));
            s.tile_graph.generate(cache, &StopToken::new()).unwrap();
        }
        assert_eq!(s.slow.runs.load(Ordering::SeqCst), 2);
        assert_eq!(s.coordinator.current_revision(), 2);
    }

    #[test]
    fn test_consumed_revision_lives_in_tile_cache() {
        let s = setup();
        let input = s.tile_graph.nodes().find(|n| n.generator.type_name() == "cluster_input").unwrap().id;
        let mut cache = TileData::new(test_context());
        s.tile_graph.generate(&mut cache, &StopToken::new()).unwrap();
        assert_eq!(cache.marker(input), Some(1));

        let mut edited = s.tile_graph.clone();
        edited.remove_node(input).unwrap();
        edited.clear_changed(&mut cache, &mut ClearOptions::default());
        assert_eq!(cache.marker_count(), 0);
    }
}
