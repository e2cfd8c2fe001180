//! Bounded priority worker pool with pause/resume capacity hand-off.
//!
//! Threads are spawned on demand up to `max_threads` *active* threads. A
//! worker that blocks on a shared resource calls [`WorkerPool::mark_paused`],
//! which frees its slot so another queued task can run meanwhile.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use super::priority::TaskPriority;

/// Work item run by the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle of an enqueued task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the pool owning the current thread, 0 outside any pool.
    static CURRENT_POOL: Cell<u64> = const { Cell::new(0) };
}

struct Task {
    id: TaskId,
    priority: TaskPriority,
    name: String,
    tag: String,
    job: Job,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then older task first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct PoolState {
    queue: BinaryHeap<Task>,
    /// Running task -> tag
    running: HashMap<TaskId, String>,
    threads: usize,
    idle: usize,
    paused: usize,
    next_id: u64,
    shutdown: bool,
}

impl PoolState {
    fn active_threads(&self) -> usize {
        self.threads.saturating_sub(self.paused)
    }
}

struct Shared {
    id: u64,
    max_threads: usize,
    state: Mutex<PoolState>,
    /// Signalled when work is queued or the pool shuts down
    work: Condvar,
    /// Signalled when a task finishes
    finished: Condvar,
}

/// Priority thread pool for tile and cluster generation.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(max_threads: usize) -> Self {
        let shared = Shared {
            id: NEXT_POOL_ID.fetch_add(1, AtomicOrdering::Relaxed),
            max_threads: max_threads.max(1),
            state: Mutex::new(PoolState {
                next_id: 1,
                ..PoolState::default()
            }),
            work: Condvar::new(),
            finished: Condvar::new(),
        };
        Self {
            shared: Arc::new(shared),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.shared.max_threads
    }

    /// Queue a job. `tag` groups tasks for [`WorkerPool::is_working`].
    pub fn enqueue(
        &self,
        priority: TaskPriority,
        name: impl Into<String>,
        tag: impl Into<String>,
        job: impl FnOnce() + Send + 'static,
    ) -> TaskId {
        let mut state = self.shared.state.lock().unwrap();
        let id = TaskId(state.next_id);
        state.next_id += 1;
        let name = name.into();
        log::trace!("Queued task {} '{}' at priority {:.3}", id.0, name, priority.0);
        state.queue.push(Task {
            id,
            priority,
            name,
            tag: tag.into(),
            job: Box::new(job),
        });

        let spawn = self.reserve_thread(&mut state);
        drop(state);

        self.shared.work.notify_one();
        if spawn {
            self.spawn_worker();
        }
        id
    }

    /// Remove a task that has not started yet. Returns false if it already
    /// started, finished or never existed.
    pub fn try_dequeue(&self, id: TaskId) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let before = state.queue.len();
        state.queue.retain(|t| t.id != id);
        let removed = state.queue.len() < before;
        drop(state);

        if removed {
            log::trace!("Dequeued task {}", id.0);
            self.shared.finished.notify_all();
        }
        removed
    }

    /// Whether a task with this tag is queued or running.
    pub fn is_working(&self, tag: &str) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.running.values().any(|t| t == tag) || state.queue.iter().any(|t| t.tag == tag)
    }

    /// Declare that the calling worker is about to block. No-op off-pool.
    pub fn mark_paused(&self) {
        if !self.is_pool_thread() {
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        state.paused += 1;
        let spawn = !state.queue.is_empty() && self.reserve_thread(&mut state);
        drop(state);

        if spawn {
            self.spawn_worker();
        }
    }

    /// Counterpart of [`WorkerPool::mark_paused`].
    pub fn mark_resumed(&self) {
        if !self.is_pool_thread() {
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        state.paused = state.paused.saturating_sub(1);
    }

    /// Whether the current thread belongs to this pool.
    pub fn is_pool_thread(&self) -> bool {
        CURRENT_POOL.with(|p| p.get()) == self.shared.id
    }

    pub fn queued_len(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    pub fn running_len(&self) -> usize {
        self.shared.state.lock().unwrap().running.len()
    }

    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().unwrap().threads
    }

    /// Block until nothing is queued or running.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !state.queue.is_empty() || !state.running.is_empty() {
            state = self.shared.finished.wait(state).unwrap();
        }
    }

    /// Drop queued tasks, let running ones finish and join every thread.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            let dropped = state.queue.len();
            state.queue.clear();
            if dropped > 0 {
                log::debug!("Pool shutdown dropped {} queued tasks", dropped);
            }
        }
        self.shared.work.notify_all();
        self.shared.finished.notify_all();

        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        let current = std::thread::current().id();
        for handle in handles {
            // The last owner may be a job running on one of our own threads
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("Worker thread panicked during shutdown");
            }
        }
    }

    /// Account for a new thread if no idle one can take the work.
    fn reserve_thread(&self, state: &mut PoolState) -> bool {
        if state.shutdown || state.idle > 0 || state.active_threads() >= self.shared.max_threads {
            return false;
        }
        state.threads += 1;
        true
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let index = shared.state.lock().unwrap().threads;
        let spawned = std::thread::Builder::new()
            .name(format!("terragraph-worker-{}", index))
            .spawn(move || worker_loop(shared));

        match spawned {
            Ok(handle) => self.handles.lock().unwrap().push(handle),
            Err(e) => {
                log::error!("Failed to spawn worker thread: {}", e);
                self.shared.state.lock().unwrap().threads -= 1;
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    CURRENT_POOL.with(|p| p.set(shared.id));

    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    state.threads -= 1;
                    return;
                }
                // Resumed waiters may leave us over capacity
                if state.active_threads() > shared.max_threads {
                    state.threads -= 1;
                    return;
                }
                if let Some(task) = state.queue.pop() {
                    state.running.insert(task.id, task.tag.clone());
                    break task;
                }
                state.idle += 1;
                state = shared.work.wait(state).unwrap();
                state.idle -= 1;
            }
        };

        let Task { id, name, job, .. } = task;
        log::trace!("Running task {} '{}'", id.0, name);
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!("Task {} '{}' panicked", id.0, name);
        }

        shared.state.lock().unwrap().running.remove(&id);
        shared.finished.notify_all();
    }
}
