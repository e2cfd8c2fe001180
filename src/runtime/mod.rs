//! Execution collaborators: worker pool, main-thread queue and priorities.

pub mod priority;
pub mod pool;
pub mod main_queue;

pub use priority::TaskPriority;
pub use pool::{Job, TaskId, WorkerPool};
pub use main_queue::{MainHandle, MainJob, MainQueue};
