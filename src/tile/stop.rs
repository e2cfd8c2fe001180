//! Cooperative cancellation shared by a generation run and its owner.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct StopFlags {
    stop: AtomicBool,
    restart: AtomicBool,
}

/// `stop` abandons the run; `restart` asks for one more run with the latest
/// graph once the current one ends.
///
/// Clones share the same flags. Only the owner of a run sets them; the run
/// itself only polls.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    flags: Arc<StopFlags>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to return as soon as it reaches a checkpoint.
    pub fn stop(&self) {
        self.flags.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stop.load(Ordering::Acquire)
    }

    /// Ask for a fresh run after the current one finishes.
    pub fn request_restart(&self) {
        self.flags.restart.store(true, Ordering::Release);
    }

    pub fn is_restart_requested(&self) -> bool {
        self.flags.restart.load(Ordering::Acquire)
    }

    /// Clear the restart flag, returning whether it was set.
    pub fn take_restart(&self) -> bool {
        self.flags.restart.swap(false, Ordering::AcqRel)
    }

    /// Whether two tokens share the same flags.
    pub fn same_as(&self, other: &StopToken) -> bool {
        Arc::ptr_eq(&self.flags, &other.flags)
    }
}
