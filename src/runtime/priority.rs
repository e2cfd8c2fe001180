//! Task priorities for the worker pool and the main-thread queue

use std::cmp::Ordering;

use crate::core::types::DetailLevel;

/// Scheduling priority. Higher runs first.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TaskPriority(pub f32);

impl TaskPriority {
    /// Shared cluster work preempts every per-tile task.
    pub const CLUSTER: TaskPriority = TaskPriority(1000.0);
    /// Main-thread prepare passes run before applies.
    pub const PREPARE: TaskPriority = TaskPriority(200.0);
    pub const APPLY: TaskPriority = TaskPriority(100.0);

    /// Tile priority: drafts first, then closer tiles first.
    pub fn for_tile(distance: f32, detail: DetailLevel) -> Self {
        let detail_bonus = match detail {
            DetailLevel::Draft => 10.0,
            DetailLevel::Main => 0.0,
        };
        // Distance term stays in (0, 1] so detail always dominates
        TaskPriority(detail_bonus + 1.0 / (distance.max(0.0) / 100.0 + 1.0))
    }
}

impl Eq for TaskPriority {}

impl Ord for TaskPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for TaskPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
