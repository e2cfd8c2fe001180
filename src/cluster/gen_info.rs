//! Per-coordinate generation record with a blocking gate.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::error::Error;
use crate::core::types::{ClusterCoord, Result};
use crate::graph::{PortId, Value};
use crate::tile::{StopToken, TileData};

/// Products of one cluster cell, keyed by outlet of the cluster graph.
pub type ClusterProducts = HashMap<PortId, Value>;

/// Mutable part of a [`GenInfo`], guarded by its lock.
///
/// `generated_revision <= started_revision` and neither ever decreases.
#[derive(Debug)]
pub struct GenState {
    pub started_revision: u64,
    pub generated_revision: u64,
    pub in_progress: bool,
    /// Token of the current attempt
    pub stop: StopToken,
    /// Open when no caller needs to wait
    pub gate_open: bool,
    /// Incremented per started attempt; older attempts compare unequal
    pub attempt: u64,
    pub failure: Option<String>,
    /// Last committed products
    pub products: Option<Arc<ClusterProducts>>,
}

/// Generation tracking for one cluster coordinate.
#[derive(Debug)]
pub struct GenInfo {
    pub coord: ClusterCoord,
    state: Mutex<GenState>,
    gate: Condvar,
    /// Private cache reused between attempts so unchanged nodes are skipped,
    /// with the revision it was last generated for
    cache: Mutex<Option<(u64, TileData)>>,
}

impl GenInfo {
    pub fn new(coord: ClusterCoord) -> Self {
        Self {
            coord,
            state: Mutex::new(GenState {
                started_revision: 0,
                generated_revision: 0,
                in_progress: false,
                stop: StopToken::new(),
                gate_open: true,
                attempt: 0,
                failure: None,
                products: None,
            }),
            gate: Condvar::new(),
            cache: Mutex::new(None),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, GenState> {
        self.state.lock().unwrap()
    }

    pub fn is_up_to_date(&self, revision: u64) -> bool {
        self.lock().generated_revision >= revision
    }

    /// Open the gate and wake every waiter. Takes the guard so the caller
    /// cannot forget to hold the lock while flipping the flag.
    pub fn open_gate(&self, mut state: MutexGuard<'_, GenState>) {
        state.gate_open = true;
        drop(state);
        self.gate.notify_all();
    }

    /// Block until the gate opens or `requester` is stopped.
    ///
    /// Returns `Ok(false)` if the requester gave up, and an error if the
    /// attempt that opened the gate failed.
    pub fn wait(&self, requester: &StopToken, poll: Duration) -> Result<bool> {
        let mut state = self.lock();
        while !state.gate_open {
            if requester.is_stopped() {
                return Ok(false);
            }
            state = self.gate.wait_timeout(state, poll).unwrap().0;
        }
        match &state.failure {
            Some(message) => Err(Error::ClusterFailed {
                coord: self.coord,
                message: message.clone(),
            }),
            None => Ok(true),
        }
    }

    pub(crate) fn take_cache(&self) -> Option<(u64, TileData)> {
        self.cache.lock().unwrap().take()
    }

    pub(crate) fn return_cache(&self, revision: u64, cache: TileData) {
        *self.cache.lock().unwrap() = Some((revision, cache));
    }
}
