//! Per-tile generation lifecycle: start, coalesced restart, stop, and the
//! hand-off of finished results to the main-thread apply queue.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use crate::core::error::Error;
use crate::core::types::{DetailLevel, Result, TileCoord, Vec2};
use crate::core::EngineConfig;
use crate::graph::{ClearOptions, Graph, NodeId, Value, next_rebuild_epoch};
use crate::runtime::{MainQueue, TaskId, TaskPriority, WorkerPool};

use super::data::{TileContext, TileData};
use super::stop::StopToken;

/// Lifecycle notifications for the host, drained with
/// [`TileScheduler::poll_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum TileEvent {
    Started { tile: TileCoord, detail: DetailLevel },
    /// A run ended with a restart pending and was queued again.
    Restarted { tile: TileCoord, detail: DetailLevel },
    /// Generation finished; the apply step is queued on the main thread.
    Completed { tile: TileCoord, detail: DetailLevel },
    Applied { tile: TileCoord, detail: DetailLevel },
    Cancelled { tile: TileCoord, detail: DetailLevel },
    Failed { tile: TileCoord, detail: DetailLevel, error: String },
}

/// Where a detail level of a tile currently is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LevelPhase {
    #[default]
    Idle,
    /// Waiting for the main-thread prepare pass
    Preparing,
    Queued,
    Running,
}

#[derive(Debug, Default)]
struct LevelState {
    phase: LevelPhase,
    task: Option<TaskId>,
    stop: StopToken,
    /// Bumped per run and on stop; results of other runs are dropped
    run_id: u64,
    /// Cache between runs, taken by the running task
    data: Option<TileData>,
    prepared: Vec<(NodeId, Value)>,
    /// Epoch of a total rebuild the next run must perform
    rebuild: Option<u64>,
    /// Latest result applied to the sink
    ready: bool,
}

#[derive(Debug, Default)]
struct TileState {
    levels: [LevelState; 2],
}

struct Shared {
    config: EngineConfig,
    pool: Arc<WorkerPool>,
    main: Arc<MainQueue>,
    graph: RwLock<Arc<Graph>>,
    tiles: Mutex<HashMap<TileCoord, TileState>>,
    viewer: Mutex<Vec2>,
    events: mpsc::UnboundedSender<TileEvent>,
}

impl Shared {
    fn graph(&self) -> Arc<Graph> {
        self.graph.read().unwrap().clone()
    }

    fn emit(&self, event: TileEvent) {
        // Host may have dropped the receiver
        let _ = self.events.send(event);
    }

    fn priority(&self, coord: TileCoord, detail: DetailLevel) -> TaskPriority {
        let center = coord.rect(self.config.tile_size).center();
        let distance = self.viewer.lock().unwrap().distance(center);
        TaskPriority::for_tile(distance, detail)
    }
}

fn tag(coord: TileCoord, detail: DetailLevel) -> String {
    format!("{} {:?}", coord, detail)
}

fn level_mut(
    tiles: &mut HashMap<TileCoord, TileState>,
    coord: TileCoord,
    detail: DetailLevel,
) -> Option<&mut LevelState> {
    tiles.get_mut(&coord).map(|t| &mut t.levels[detail.index()])
}

/// Schedules tile generation on the worker pool.
///
/// Each tile has one independent run per detail level. Starting a level that
/// is already running only flags a restart; the run re-queues itself with
/// the latest graph when it ends.
pub struct TileScheduler {
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<TileEvent>,
}

impl TileScheduler {
    pub fn new(config: EngineConfig, graph: Arc<Graph>, pool: Arc<WorkerPool>, main: Arc<MainQueue>) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let shared = Shared {
            config,
            pool,
            main,
            graph: RwLock::new(graph),
            tiles: Mutex::new(HashMap::new()),
            viewer: Mutex::new(Vec2::ZERO),
            events: events_tx,
        };
        Self {
            shared: Arc::new(shared),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn graph(&self) -> Arc<Graph> {
        self.shared.graph()
    }

    /// Start (or restart) every detail level of a tile.
    pub fn start(&self, coord: TileCoord) {
        let mut tiles = self.shared.tiles.lock().unwrap();
        let state = tiles.entry(coord).or_default();
        for &detail in self.shared.config.detail_levels() {
            start_level(&self.shared, &mut state.levels[detail.index()], coord, detail);
        }
    }

    /// Start one detail level of a tile.
    pub fn start_level(&self, coord: TileCoord, detail: DetailLevel) {
        let mut tiles = self.shared.tiles.lock().unwrap();
        let state = tiles.entry(coord).or_default();
        start_level(&self.shared, &mut state.levels[detail.index()], coord, detail);
    }

    /// Cancel queued work outright and stop running work. The cache is kept
    /// out of it: a later start begins from an empty cache.
    pub fn stop_tile(&self, coord: TileCoord) {
        let mut tiles = self.shared.tiles.lock().unwrap();
        if let Some(state) = tiles.get_mut(&coord) {
            for detail in DetailLevel::ALL {
                stop_level(&self.shared, &mut state.levels[detail.index()], coord, detail);
            }
        }
    }

    /// Stop a tile and forget it.
    pub fn remove_tile(&self, coord: TileCoord) {
        self.stop_tile(coord);
        self.shared.tiles.lock().unwrap().remove(&coord);
        log::debug!("Removed {}", coord);
    }

    /// Swap the graph snapshot and restart every known tile.
    pub fn set_graph(&self, graph: Arc<Graph>) {
        *self.shared.graph.write().unwrap() = graph;

        let mut tiles = self.shared.tiles.lock().unwrap();
        let count = tiles.len();
        for (&coord, state) in tiles.iter_mut() {
            for &detail in self.shared.config.detail_levels() {
                start_level(&self.shared, &mut state.levels[detail.index()], coord, detail);
            }
        }
        log::info!("Graph changed, restarting {} tiles", count);
    }

    /// Regenerate every known tile from scratch, shared cluster cells
    /// included. All tiles take part in one rebuild epoch, so each cluster
    /// coordinator is refreshed once.
    pub fn rebuild_all(&self) {
        let epoch = next_rebuild_epoch();
        let mut tiles = self.shared.tiles.lock().unwrap();
        let count = tiles.len();
        for (&coord, state) in tiles.iter_mut() {
            for &detail in self.shared.config.detail_levels() {
                let level = &mut state.levels[detail.index()];
                level.rebuild = Some(epoch);
                start_level(&self.shared, level, coord, detail);
            }
        }
        log::info!("Total rebuild {} of {} tiles", epoch, count);
    }

    /// Viewer position used for the priority of future runs.
    pub fn set_viewer(&self, pos: Vec2) {
        *self.shared.viewer.lock().unwrap() = pos;
    }

    /// Whether the latest result of a level has been applied.
    pub fn is_ready(&self, coord: TileCoord, detail: DetailLevel) -> bool {
        let tiles = self.shared.tiles.lock().unwrap();
        tiles.get(&coord).is_some_and(|t| t.levels[detail.index()].ready)
    }

    pub fn phase(&self, coord: TileCoord, detail: DetailLevel) -> Option<LevelPhase> {
        let tiles = self.shared.tiles.lock().unwrap();
        tiles.get(&coord).map(|t| t.levels[detail.index()].phase)
    }

    pub fn restart_requested(&self, coord: TileCoord, detail: DetailLevel) -> bool {
        let tiles = self.shared.tiles.lock().unwrap();
        tiles
            .get(&coord)
            .is_some_and(|t| t.levels[detail.index()].stop.is_restart_requested())
    }

    /// Whether any work for this level sits in the pool or the main queue.
    pub fn is_busy(&self, coord: TileCoord, detail: DetailLevel) -> bool {
        let tag = tag(coord, detail);
        self.shared.pool.is_working(&tag) || self.shared.main.is_tag_enqueued(&tag)
    }

    pub fn tile_count(&self) -> usize {
        self.shared.tiles.lock().unwrap().len()
    }

    /// Inspect a level's cache between runs.
    pub fn with_data<R>(&self, coord: TileCoord, detail: DetailLevel, f: impl FnOnce(&TileData) -> R) -> Option<R> {
        let tiles = self.shared.tiles.lock().unwrap();
        let data = tiles.get(&coord)?.levels[detail.index()].data.as_ref()?;
        Some(f(data))
    }

    /// Drain pending lifecycle events.
    pub fn poll_events(&mut self) -> Vec<TileEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn start_level(shared: &Arc<Shared>, level: &mut LevelState, coord: TileCoord, detail: DetailLevel) {
    match level.phase {
        LevelPhase::Preparing | LevelPhase::Queued => {
            // Run has not taken its graph snapshot yet
        }
        LevelPhase::Running => {
            level.stop.request_restart();
            log::debug!("{} {:?}: restart requested", coord, detail);
        }
        LevelPhase::Idle => {
            level.stop = StopToken::new();
            level.ready = false;
            if shared.graph().needs_prepare() {
                enqueue_prepare(shared, level, coord, detail);
            } else {
                enqueue_run(shared, level, coord, detail);
            }
        }
    }
}

fn stop_level(shared: &Shared, level: &mut LevelState, coord: TileCoord, detail: DetailLevel) {
    let was_active = level.phase != LevelPhase::Idle;

    if let Some(task) = level.task.take() {
        if shared.pool.try_dequeue(task) {
            log::trace!("{} {:?}: dequeued before start", coord, detail);
        }
    }
    level.stop.stop();
    level.run_id += 1;
    level.phase = LevelPhase::Idle;
    level.data = None;
    level.prepared.clear();
    level.rebuild = None;
    level.ready = false;
    shared.main.stop_tag(&tag(coord, detail));

    if was_active {
        log::debug!("{} {:?}: stopped", coord, detail);
        shared.emit(TileEvent::Cancelled { tile: coord, detail });
    }
}

fn enqueue_prepare(shared: &Arc<Shared>, level: &mut LevelState, coord: TileCoord, detail: DetailLevel) {
    level.run_id += 1;
    level.phase = LevelPhase::Preparing;
    let run_id = level.run_id;

    let worker = Arc::clone(shared);
    shared.main.enqueue(TaskPriority::PREPARE, tag(coord, detail), move |sink| {
        let graph = worker.graph();
        let context = TileContext::for_tile(coord, detail, &worker.config);
        let prepared = graph.prepare(&context, &*sink);

        let mut tiles = worker.tiles.lock().unwrap();
        let Some(level) = level_mut(&mut tiles, coord, detail) else {
            return;
        };
        if level.run_id != run_id || level.phase != LevelPhase::Preparing {
            return;
        }
        level.prepared = prepared;
        enqueue_run(&worker, level, coord, detail);
    });
}

fn enqueue_run(shared: &Arc<Shared>, level: &mut LevelState, coord: TileCoord, detail: DetailLevel) {
    level.run_id += 1;
    level.phase = LevelPhase::Queued;
    let run_id = level.run_id;
    let stop = level.stop.clone();

    let worker = Arc::clone(shared);
    let task = shared.pool.enqueue(
        shared.priority(coord, detail),
        format!("{} {:?} run {}", coord, detail, run_id),
        tag(coord, detail),
        move || run_level(&worker, coord, detail, run_id, stop),
    );
    level.task = Some(task);
}

fn run_level(shared: &Arc<Shared>, coord: TileCoord, detail: DetailLevel, run_id: u64, stop: StopToken) {
    let (graph, mut data, mut options) = {
        let mut tiles = shared.tiles.lock().unwrap();
        let Some(level) = level_mut(&mut tiles, coord, detail) else {
            return;
        };
        if level.run_id != run_id {
            return;
        }
        level.phase = LevelPhase::Running;
        level.task = None;

        let mut data = level
            .data
            .take()
            .unwrap_or_else(|| TileData::new(TileContext::for_tile(coord, detail, &shared.config)));
        for (node, value) in level.prepared.drain(..) {
            data.set_prepared(node, value);
        }
        let options = match level.rebuild.take() {
            Some(epoch) => ClearOptions::rebuild(epoch),
            None => ClearOptions::default(),
        };
        (shared.graph(), data, options)
    };

    shared.emit(TileEvent::Started { tile: coord, detail });
    log::debug!("{} {:?}: run {} started", coord, detail, run_id);

    let result = catch_unwind(AssertUnwindSafe(|| {
        graph.clear_changed(&mut data, &mut options);
        graph.generate(&mut data, &stop)
    }))
    .unwrap_or_else(|_| Err(Error::Generator(format!("{} {:?} generation panicked", coord, detail))));

    finish_level(shared, coord, detail, run_id, stop, data, result);
}

fn finish_level(
    shared: &Arc<Shared>,
    coord: TileCoord,
    detail: DetailLevel,
    run_id: u64,
    stop: StopToken,
    mut data: TileData,
    result: Result<()>,
) {
    let mut tiles = shared.tiles.lock().unwrap();
    let Some(level) = level_mut(&mut tiles, coord, detail) else {
        return;
    };
    if level.run_id != run_id {
        log::trace!("{} {:?}: dropped result of stale run {}", coord, detail, run_id);
        return;
    }

    if stop.take_restart() {
        level.data = Some(data);
        level.stop = StopToken::new();
        enqueue_run(shared, level, coord, detail);
        log::debug!("{} {:?}: restarting", coord, detail);
        shared.emit(TileEvent::Restarted { tile: coord, detail });
        return;
    }

    level.phase = LevelPhase::Idle;
    if let Err(e) = result {
        level.data = Some(data);
        log::error!("{} {:?}: generation failed: {}", coord, detail, e);
        shared.emit(TileEvent::Failed {
            tile: coord,
            detail,
            error: e.to_string(),
        });
        return;
    }
    if stop.is_stopped() {
        level.data = Some(data);
        shared.emit(TileEvent::Cancelled { tile: coord, detail });
        return;
    }

    let descriptors = data.take_apply();
    level.data = Some(data);
    drop(tiles);

    log::debug!("{} {:?}: run {} complete, {} to apply", coord, detail, run_id, descriptors.len());
    shared.emit(TileEvent::Completed { tile: coord, detail });

    let worker = Arc::clone(shared);
    shared.main.enqueue(TaskPriority::APPLY, tag(coord, detail), move |sink| {
        for descriptor in &descriptors {
            sink.apply(coord, detail, descriptor);
        }
        let mut tiles = worker.tiles.lock().unwrap();
        if let Some(level) = level_mut(&mut tiles, coord, detail) {
            if level.run_id == run_id {
                level.ready = true;
            }
        }
        drop(tiles);
        worker.emit(TileEvent::Applied { tile: coord, detail });
    });
}
