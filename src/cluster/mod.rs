//! Shared cluster cells: per-cell generation records, the pause queue and
//! the revision coordinator.

pub mod gen_info;
pub mod pause;
pub mod coordinator;

pub use gen_info::{ClusterProducts, GenInfo, GenState};
pub use pause::{Obligation, PauseQueue, WaiterId};
pub use coordinator::{ClusterCoordinator, ClusterEvent, ClusterListener};
