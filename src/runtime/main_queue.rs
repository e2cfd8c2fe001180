//! Main-thread job queue.
//!
//! Workers push jobs that touch the terrain sink; the host drains them from
//! the thread owning the sink with [`MainQueue::run_pending`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use crate::tile::TerrainSink;

use super::priority::TaskPriority;

/// Job run on the main thread with exclusive access to the sink.
pub type MainJob = Box<dyn FnOnce(&mut dyn TerrainSink) + Send + 'static>;

/// Handle of an enqueued main-thread job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MainHandle(pub u64);

struct Entry {
    handle: MainHandle,
    priority: TaskPriority,
    tag: String,
    job: MainJob,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.handle.cmp(&self.handle))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    next: u64,
}

/// Priority queue of main-thread jobs, shared by reference with workers.
#[derive(Default)]
pub struct MainQueue {
    state: Mutex<QueueState>,
}

impl MainQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(
        &self,
        priority: TaskPriority,
        tag: impl Into<String>,
        job: impl FnOnce(&mut dyn TerrainSink) + Send + 'static,
    ) -> MainHandle {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let handle = MainHandle(state.next);
        state.heap.push(Entry {
            handle,
            priority,
            tag: tag.into(),
            job: Box::new(job),
        });
        handle
    }

    /// Drop a job that has not run yet.
    pub fn stop(&self, handle: MainHandle) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.heap.len();
        state.heap.retain(|e| e.handle != handle);
        state.heap.len() < before
    }

    /// Drop every job with this tag. Returns how many were removed.
    pub fn stop_tag(&self, tag: &str) -> usize {
        let mut state = self.state.lock().unwrap();
        let before = state.heap.len();
        state.heap.retain(|e| e.tag != tag);
        before - state.heap.len()
    }

    pub fn is_tag_enqueued(&self, tag: &str) -> bool {
        self.state.lock().unwrap().heap.iter().any(|e| e.tag == tag)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run up to `budget` jobs (all if `None`) in priority order.
    ///
    /// Jobs may enqueue more jobs; those run in the same call if the budget
    /// allows. Returns how many ran.
    pub fn run_pending(&self, sink: &mut dyn TerrainSink, budget: Option<usize>) -> usize {
        let mut ran = 0;
        while budget.is_none_or(|b| ran < b) {
            // Lock is released before the job runs
            let Some(entry) = self.state.lock().unwrap().heap.pop() else {
                break;
            };
            (entry.job)(&mut *sink);
            ran += 1;
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DetailLevel, TileCoord};
    use crate::graph::Transition;
    use crate::tile::{ApplyDescriptor, RecordingSink};
    use std::sync::Arc;

    fn objects_job(x: i32) -> impl FnOnce(&mut dyn TerrainSink) + Send + 'static {
        move |sink: &mut dyn TerrainSink| {
            sink.apply(
                TileCoord::new(x, 0),
                DetailLevel::Main,
                &ApplyDescriptor::Objects(Arc::new(Vec::<Transition>::new())),
            )
        }
    }

    #[test]
    fn test_runs_in_priority_order() {
        let queue = MainQueue::new();
        queue.enqueue(TaskPriority(1.0), "a", objects_job(1));
        queue.enqueue(TaskPriority(3.0), "b", objects_job(3));
        queue.enqueue(TaskPriority(2.0), "c", objects_job(2));

        let mut sink = RecordingSink::default();
        assert_eq!(queue.run_pending(&mut sink, None), 3);
        let order: Vec<i32> = sink.applied.iter().map(|(t, _, _)| t.x).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_stop_and_tags() {
        let queue = MainQueue::new();
        let a = queue.enqueue(TaskPriority(1.0), "tile-a", objects_job(1));
        queue.enqueue(TaskPriority(1.0), "tile-b", objects_job(2));
        queue.enqueue(TaskPriority(1.0), "tile-b", objects_job(3));

        assert!(queue.is_tag_enqueued("tile-a"));
        assert!(queue.stop(a));
        assert!(!queue.stop(a));
        assert!(!queue.is_tag_enqueued("tile-a"));
        assert_eq!(queue.stop_tag("tile-b"), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_budget_limits_jobs() {
        let queue = MainQueue::new();
        for i in 0..5 {
            queue.enqueue(TaskPriority(0.0), "t", objects_job(i));
        }
        let mut sink = RecordingSink::default();
        assert_eq!(queue.run_pending(&mut sink, Some(2)), 2);
        assert_eq!(queue.len(), 3);
    }
}
