//! Revision coordinator for shared cluster cells.
//!
//! Many tiles read the same cluster cell. The coordinator makes sure at most
//! one generation per cell per revision is in flight; every other caller that
//! needs the cell waits on it instead of computing it again.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::core::error::Error;
use crate::core::types::{ClusterCoord, DetailLevel, Result, TileCoord};
use crate::core::ClusterConfig;
use crate::graph::{ClearOptions, Graph, PortId, Params, Value};
use crate::runtime::{TaskPriority, WorkerPool};
use crate::tile::{StopToken, TileContext, TileData};

use super::gen_info::{ClusterProducts, GenInfo};
use super::pause::{Obligation, PauseQueue};

/// Lifecycle notifications, delivered synchronously to listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterEvent {
    Started { coord: ClusterCoord, revision: u64 },
    Committed { coord: ClusterCoord, revision: u64 },
    /// A superseded or stopped attempt dropped its result.
    Discarded { coord: ClusterCoord, revision: u64 },
    Failed { coord: ClusterCoord, message: String },
}

pub type ClusterListener = Box<dyn Fn(&ClusterEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct RevisionState {
    fingerprint: Option<u64>,
    revision: u64,
    /// Revision of the last forced refresh; older cell caches are rebuilt
    forced_at: u64,
    /// Newest rebuild epoch that forced a refresh
    forced_epoch: u64,
}

/// Coordinates generation of the cluster graph per cell.
pub struct ClusterCoordinator {
    config: ClusterConfig,
    seed: u64,
    gate_poll: Duration,
    pool: Arc<WorkerPool>,
    graph: RwLock<Arc<Graph>>,
    settings_version: Mutex<u64>,
    revision: Mutex<RevisionState>,
    infos: Mutex<HashMap<ClusterCoord, Arc<GenInfo>>>,
    pause: PauseQueue,
    listeners: Vec<ClusterListener>,
}

impl std::fmt::Debug for ClusterCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCoordinator")
            .field("config", &self.config)
            .field("revision", &self.revision.lock().map(|r| r.revision).unwrap_or_default())
            .field("cells", &self.infos.lock().map(|i| i.len()).unwrap_or_default())
            .finish()
    }
}

impl ClusterCoordinator {
    pub fn new(
        graph: Arc<Graph>,
        config: ClusterConfig,
        seed: u64,
        gate_poll: Duration,
        pool: Arc<WorkerPool>,
        listeners: Vec<ClusterListener>,
    ) -> Self {
        Self {
            settings_version: Mutex::new(config.settings_version),
            config,
            seed,
            gate_poll,
            pool,
            graph: RwLock::new(graph),
            revision: Mutex::new(RevisionState::default()),
            infos: Mutex::new(HashMap::new()),
            pause: PauseQueue::new(),
            listeners,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn graph(&self) -> Arc<Graph> {
        self.graph.read().unwrap().clone()
    }

    /// Swap the cluster graph. The next revision check picks up the change.
    pub fn set_graph(&self, graph: Arc<Graph>) {
        *self.graph.write().unwrap() = graph;
    }

    pub fn set_settings_version(&self, version: u64) {
        *self.settings_version.lock().unwrap() = version;
    }

    /// Current revision, bumped first if the graph or settings changed since
    /// the last check.
    pub fn current_revision(&self) -> u64 {
        let settings = *self.settings_version.lock().unwrap();
        let fingerprint = self.graph().fingerprint().wrapping_add(settings << 32);

        let mut state = self.revision.lock().unwrap();
        if state.fingerprint != Some(fingerprint) {
            state.fingerprint = Some(fingerprint);
            state.revision += 1;
            log::debug!("Cluster revision {} (fingerprint {:016x})", state.revision, fingerprint);
        }
        state.revision
    }

    /// Bump the revision even though nothing visible changed, so every cell
    /// regenerates on next demand.
    pub fn force_refresh(&self) -> u64 {
        let mut state = self.revision.lock().unwrap();
        Self::force(&mut state)
    }

    /// Force a refresh on behalf of total rebuild `epoch`. Only the first
    /// call per epoch bumps the revision; later ones, and calls for an older
    /// epoch, return the current revision.
    pub fn force_refresh_for(&self, epoch: u64) -> u64 {
        let mut state = self.revision.lock().unwrap();
        if epoch <= state.forced_epoch {
            return state.revision;
        }
        state.forced_epoch = epoch;
        Self::force(&mut state)
    }

    fn force(state: &mut RevisionState) -> u64 {
        state.revision += 1;
        state.forced_at = state.revision;
        log::debug!("Cluster revision forced to {}", state.revision);
        state.revision
    }

    /// Last committed products of a cell.
    pub fn products(&self, coord: ClusterCoord) -> Option<Arc<ClusterProducts>> {
        let info = self.infos.lock().unwrap().get(&coord).cloned()?;
        let state = info.lock();
        state.products.clone()
    }

    pub fn product(&self, coord: ClusterCoord, outlet: PortId) -> Option<Value> {
        self.products(coord)?.get(&outlet).cloned()
    }

    pub fn generated_revision(&self, coord: ClusterCoord) -> Option<u64> {
        let info = self.infos.lock().unwrap().get(&coord).cloned()?;
        Some(info.lock().generated_revision)
    }

    pub fn is_in_progress(&self, coord: ClusterCoord) -> bool {
        let info = self.infos.lock().unwrap().get(&coord).cloned();
        info.is_some_and(|i| i.lock().in_progress)
    }

    fn info(&self, coord: ClusterCoord) -> Arc<GenInfo> {
        self.infos
            .lock()
            .unwrap()
            .entry(coord)
            .or_insert_with(|| Arc::new(GenInfo::new(coord)))
            .clone()
    }

    fn emit(&self, event: ClusterEvent) {
        for listener in &self.listeners {
            listener(&event);
        }
    }

    /// Make every cell in `coords` current, starting or joining generation as
    /// needed, and block until they are.
    ///
    /// Returns the revision the cells were brought to. If `requester` stops
    /// while waiting the call returns early with whatever is committed; the
    /// caller is expected to notice its own stop and discard.
    pub fn refresh_area(self: &Arc<Self>, coords: &[ClusterCoord], requester: &StopToken) -> Result<u64> {
        let revision = self.current_revision();

        let waits: Vec<Arc<GenInfo>> = coords
            .iter()
            .map(|&coord| self.info(coord))
            .filter(|info| self.schedule(info, revision))
            .collect();

        if waits.is_empty() || requester.is_stopped() {
            return Ok(revision);
        }

        self.pool.mark_paused();
        let waited = if let [info] = waits.as_slice() {
            info.wait(requester, self.gate_poll)
        } else {
            self.wait_all(&waits, revision, requester)
        };
        self.pool.mark_resumed();

        waited.map(|_| revision)
    }

    /// Decide what to do for one cell. Returns whether the caller must wait.
    fn schedule(self: &Arc<Self>, info: &Arc<GenInfo>, revision: u64) -> bool {
        let mut state = info.lock();
        if state.generated_revision >= revision {
            return false;
        }
        if state.in_progress {
            if state.started_revision >= revision {
                return true;
            }
            log::debug!(
                "{}: superseding revision {} with {}",
                info.coord,
                state.started_revision,
                revision
            );
            state.stop.stop();
            state.in_progress = false;
        }

        let stop = StopToken::new();
        state.stop = stop.clone();
        state.gate_open = false;
        state.in_progress = true;
        state.started_revision = revision;
        state.failure = None;
        state.attempt += 1;
        let attempt = state.attempt;
        drop(state);

        self.emit(ClusterEvent::Started {
            coord: info.coord,
            revision,
        });

        let coordinator = Arc::clone(self);
        let task_info = Arc::clone(info);
        self.pool.enqueue(
            TaskPriority::CLUSTER,
            format!("{} r{}", info.coord, revision),
            format!("{}", info.coord),
            move || coordinator.run_attempt(&task_info, attempt, revision, &stop),
        );
        true
    }

    fn wait_all(&self, waits: &[Arc<GenInfo>], revision: u64, requester: &StopToken) -> Result<bool> {
        let by_coord: HashMap<ClusterCoord, &Arc<GenInfo>> = waits.iter().map(|i| (i.coord, i)).collect();
        let obligations: Vec<(ClusterCoord, u64)> = waits.iter().map(|i| (i.coord, revision)).collect();

        let id = self.pause.register(&obligations, |coord, rev| {
            let Some(info) = by_coord.get(&coord) else {
                return Obligation::Done;
            };
            let state = info.lock();
            match &state.failure {
                Some(message) => Obligation::Failed(message.clone()),
                None if state.generated_revision >= rev => Obligation::Done,
                None => Obligation::Pending,
            }
        });
        self.pause.wait(id, requester, self.gate_poll)
    }

    fn context(&self, coord: ClusterCoord) -> TileContext {
        TileContext {
            coord: TileCoord::new(coord.x, coord.z),
            rect: coord.rect(self.config.cell_size),
            resolution: self.config.resolution,
            detail: DetailLevel::Main,
            seed: self.seed,
            globals: Params::new(),
        }
    }

    /// Body of a cluster generation task.
    fn run_attempt(&self, info: &GenInfo, attempt: u64, revision: u64, stop: &StopToken) {
        let graph = self.graph();
        let forced_at = self.revision.lock().unwrap().forced_at;
        let (mut options, mut cache) = match info.take_cache() {
            Some((built, cache)) if built >= forced_at => (ClearOptions::default(), cache),
            Some((_, cache)) => (ClearOptions::total_rebuild(), cache),
            None => (ClearOptions::default(), TileData::new(self.context(info.coord))),
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            graph.clear_changed(&mut cache, &mut options);
            graph.generate(&mut cache, stop)
        }));

        let result = match outcome {
            Ok(Ok(())) => {
                let products = Arc::new(cache.products().clone());
                let committed = self.commit(info, attempt, revision, stop, products);
                if !stop.is_stopped() {
                    info.return_cache(revision, cache);
                }
                committed
            }
            Ok(Err(e)) => {
                self.fail(info, attempt, e.to_string());
                return;
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "generator panicked".to_string());
                self.fail(info, attempt, message);
                return;
            }
        };

        if let Err(e) = result {
            log::error!("{}: {}", info.coord, e);
        }
    }

    /// Store an attempt's products if it still targets the newest revision.
    pub(crate) fn commit(
        &self,
        info: &GenInfo,
        attempt: u64,
        revision: u64,
        stop: &StopToken,
        products: Arc<ClusterProducts>,
    ) -> Result<()> {
        let coord = info.coord;
        let mut state = info.lock();

        if stop.is_stopped() || state.attempt != attempt {
            drop(state);
            log::debug!("{}: discarded superseded revision {}", coord, revision);
            self.emit(ClusterEvent::Discarded { coord, revision });
            return Ok(());
        }
        if state.generated_revision == revision {
            let error = Error::RevisionRace { coord, revision };
            let message = error.to_string();
            state.in_progress = false;
            state.failure = Some(message.clone());
            info.open_gate(state);

            self.pause.fail(coord, &message);
            self.emit(ClusterEvent::Failed { coord, message });
            return Err(error);
        }
        if state.generated_revision > revision {
            state.in_progress = false;
            info.open_gate(state);
            log::debug!("{}: kept newer revision over {}", coord, revision);
            self.emit(ClusterEvent::Discarded { coord, revision });
            return Ok(());
        }

        state.products = Some(products);
        state.generated_revision = revision;
        state.in_progress = false;
        info.open_gate(state);

        // Queue lock is only taken with the info lock released
        self.pause.complete(coord, revision);
        log::debug!("{}: committed revision {}", coord, revision);
        self.emit(ClusterEvent::Committed { coord, revision });
        Ok(())
    }

    /// Record a failed attempt, release its waiters and forget the cell so a
    /// later request starts from scratch.
    fn fail(&self, info: &GenInfo, attempt: u64, message: String) {
        let coord = info.coord;
        let mut state = info.lock();
        if state.attempt != attempt {
            return;
        }
        state.in_progress = false;
        state.failure = Some(message.clone());
        info.open_gate(state);

        {
            let mut infos = self.infos.lock().unwrap();
            if infos.get(&coord).is_some_and(|i| std::ptr::eq(Arc::as_ptr(i), info)) {
                infos.remove(&coord);
            }
        }
        self.pause.fail(coord, &message);

        log::error!("{}: generation failed: {}", coord, message);
        self.emit(ClusterEvent::Failed { coord, message });
    }
}
