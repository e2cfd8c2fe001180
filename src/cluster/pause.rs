//! Pause queue: waiters blocked on a set of `(coordinate, revision)`
//! obligations, resumed once every obligation is struck.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::core::error::Error;
use crate::core::types::{ClusterCoord, Result};
use crate::tile::StopToken;

/// Handle of a registered waiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

/// State of one obligation when a waiter registers.
#[derive(Clone, Debug, PartialEq)]
pub enum Obligation {
    Pending,
    Done,
    Failed(String),
}

#[derive(Debug)]
struct Waiter {
    /// coord -> minimum revision still needed
    obligations: Vec<(ClusterCoord, u64)>,
    failure: Option<(ClusterCoord, String)>,
}

#[derive(Debug, Default)]
struct PauseState {
    waiters: HashMap<WaiterId, Waiter>,
    next: u64,
}

/// Lock order: the queue lock is taken before any `GenInfo` lock, never
/// after. Completions release their `GenInfo` lock before calling in.
#[derive(Debug, Default)]
pub struct PauseQueue {
    state: Mutex<PauseState>,
    resumed: Condvar,
}

impl PauseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. `check` is asked, under the queue lock, whether an
    /// obligation is already settled, so a completion landing between the
    /// caller's scheduling and this call is never missed.
    pub fn register(
        &self,
        obligations: &[(ClusterCoord, u64)],
        check: impl Fn(ClusterCoord, u64) -> Obligation,
    ) -> WaiterId {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let id = WaiterId(state.next);

        let mut waiter = Waiter {
            obligations: Vec::with_capacity(obligations.len()),
            failure: None,
        };
        for &(coord, revision) in obligations {
            match check(coord, revision) {
                Obligation::Pending => waiter.obligations.push((coord, revision)),
                Obligation::Done => {}
                Obligation::Failed(message) => {
                    waiter.failure.get_or_insert((coord, message));
                }
            }
        }
        state.waiters.insert(id, waiter);
        id
    }

    /// Strike every obligation on `coord` satisfied by `revision` and wake
    /// waiters whose list became empty.
    pub fn complete(&self, coord: ClusterCoord, revision: u64) {
        let mut state = self.state.lock().unwrap();
        let mut released = 0;
        for waiter in state.waiters.values_mut() {
            let before = waiter.obligations.len();
            waiter.obligations.retain(|&(c, r)| c != coord || r > revision);
            if before > 0 && waiter.obligations.is_empty() {
                released += 1;
            }
        }
        drop(state);

        if released > 0 {
            log::trace!("{} at revision {} released {} waiters", coord, revision, released);
            self.resumed.notify_all();
        }
    }

    /// Fail every waiter holding an obligation on `coord`.
    pub fn fail(&self, coord: ClusterCoord, message: &str) {
        let mut state = self.state.lock().unwrap();
        for waiter in state.waiters.values_mut() {
            if waiter.obligations.iter().any(|&(c, _)| c == coord) {
                waiter.failure.get_or_insert((coord, message.to_string()));
            }
        }
        drop(state);
        self.resumed.notify_all();
    }

    /// Block until the waiter's obligations are all struck, it fails, or
    /// `requester` stops. The registration is removed in every case.
    pub fn wait(&self, id: WaiterId, requester: &StopToken, poll: Duration) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        loop {
            let Some(waiter) = state.waiters.get(&id) else {
                return Ok(false);
            };
            if let Some((coord, message)) = waiter.failure.clone() {
                state.waiters.remove(&id);
                return Err(Error::ClusterFailed { coord, message });
            }
            if waiter.obligations.is_empty() {
                state.waiters.remove(&id);
                return Ok(true);
            }
            if requester.is_stopped() {
                state.waiters.remove(&id);
                return Ok(false);
            }
            state = self.resumed.wait_timeout(state, poll).unwrap().0;
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().unwrap().waiters.len()
    }
}
