//! The resource manager.
//!
//! One [`parking_lot::Mutex`] guards the whole [`SystemState`] together with the
//! waiting map, and one [`Condvar`] is broadcast on every grant, release, finish
//! and abort. Grants and releases touch `available`, `alloc` and `need` in a
//! single critical section, so no other thread ever sees a half-applied
//! transition.
//!
//! Grant policy depends on [`Mode`]:
//!
//! - **Avoidance**: grant iff the request fits in `available` *and* the
//!   resulting state passes the Banker's safety check.
//! - **Detection**: grant iff the request fits in `available`.
//!
//! Grants are opportunistic, not FIFO: whichever waiter re-evaluates first after
//! a broadcast may take the units.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::events::{Event, EventSink, NullSink};
use crate::graph::WaitForGraph;
use crate::safety;
use crate::state::SystemState;
use crate::types::{Mode, ProcessId, ProcessStatus};

/// Outstanding (denied) request per blocked process.
pub type WaitingMap = BTreeMap<ProcessId, Vec<u32>>;

/// Result of a [`ResourceManager::request`] call that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// All requested units were granted atomically.
    Granted,
    /// The wait bound elapsed with no grant. Nothing changed; retry later.
    TimedOut,
    /// The process was aborted (before or while waiting).
    Aborted,
    /// The process was marked finished (before or while waiting).
    Finished,
}

impl RequestOutcome {
    /// Returns true for [`RequestOutcome::Granted`].
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Status and remaining need of one process, read under a single lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessView {
    /// Lifecycle status.
    pub status: ProcessStatus,
    /// Remaining need.
    pub need: Vec<u32>,
}

struct Inner {
    state: SystemState,
    waiting: WaitingMap,
}

/// Grants, blocks, releases and aborts on behalf of concurrent processes.
pub struct ResourceManager {
    mode: Mode,
    inner: Mutex<Inner>,
    changed: Condvar,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager").field("mode", &self.mode).finish_non_exhaustive()
    }
}

impl ResourceManager {
    /// Creates a manager over `total` units and the given maximum demands.
    ///
    /// # Errors
    ///
    /// Returns a construction error if the dimensions are malformed (see
    /// [`SystemState::new`]).
    pub fn new(total: Vec<u32>, max_demand: Vec<Vec<u32>>, mode: Mode) -> Result<Self> {
        Ok(Self::from_state(SystemState::new(total, max_demand)?, mode))
    }

    /// Wraps an already built state.
    #[must_use]
    pub fn from_state(state: SystemState, mode: Mode) -> Self {
        Self {
            mode,
            inner: Mutex::new(Inner { state, waiting: WaitingMap::new() }),
            changed: Condvar::new(),
            sink: Arc::new(NullSink),
        }
    }

    /// Sends events to `sink` instead of discarding them.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The grant policy in use.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Records an event on the manager's sink (used by the detector).
    pub fn record(&self, event: Event) {
        self.sink.record(event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    fn is_grantable(&self, state: &SystemState, pid: ProcessId, req: &[u32]) -> bool {
        match self.mode {
            Mode::Avoidance => {
                state.can_satisfy(req) && safety::is_safe_after_grant(state, pid, req)
            }
            Mode::Detection => state.can_satisfy(req),
        }
    }

    /// Requests `req` units for `pid`, waiting up to `timeout` (forever if
    /// `None` or too large to represent) for the request to become grantable.
    ///
    /// The request is granted as one atomic unit or not at all. While waiting
    /// the caller re-evaluates after every broadcast, and gives up as soon as
    /// the process is aborted or finished.
    ///
    /// # Errors
    ///
    /// Fails immediately, without blocking or changing state, if `pid` is
    /// unknown, `req` has the wrong length, or any entry exceeds the current
    /// need (`InvalidRequest`).
    pub fn request(
        &self,
        pid: ProcessId,
        req: &[u32],
        timeout: Option<Duration>,
    ) -> Result<RequestOutcome> {
        // A bound too large to represent as an instant waits forever.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut inner = self.lock();

        if let Err(err) = inner.state.validate_request(pid, req) {
            if let Error::InvalidRequest { request, need, .. } = &err {
                self.sink.record(Event::Rejected {
                    pid,
                    request: request.clone(),
                    need: need.clone(),
                });
            }
            crate::warn!("manager", "rejected request of P{pid}: {err}");
            return Err(err);
        }

        let mut announced = false;
        loop {
            match inner.state.status(pid) {
                ProcessStatus::Aborted => return Ok(RequestOutcome::Aborted),
                ProcessStatus::Finished => return Ok(RequestOutcome::Finished),
                ProcessStatus::Active => {}
            }

            if self.is_grantable(&inner.state, pid, req) {
                inner.state.apply_grant(pid, req);
                self.sink.record(Event::Granted {
                    mode: self.mode,
                    pid,
                    request: req.to_vec(),
                    allocation: inner.state.allocation(pid).to_vec(),
                    available: inner.state.available().to_vec(),
                });
                self.changed.notify_all();
                return Ok(RequestOutcome::Granted);
            }

            if !announced {
                announced = true;
                self.sink.record(Event::Blocked {
                    mode: self.mode,
                    pid,
                    request: req.to_vec(),
                    need: inner.state.need(pid).to_vec(),
                    available: inner.state.available().to_vec(),
                });
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        self.sink.record(Event::TimedOut { pid, request: req.to_vec() });
                        return Ok(RequestOutcome::TimedOut);
                    }
                    // A timed-out wait loops back for one last evaluation.
                    let _ = self.changed.wait_until(&mut inner, deadline);
                }
                None => self.changed.wait(&mut inner),
            }
        }
    }

    /// Returns everything `pid` holds to the free pool.
    ///
    /// Afterwards `alloc[pid]` is all zero and `need[pid] == max[pid]`. Wakes
    /// every waiter. Returns the released vector.
    ///
    /// # Errors
    ///
    /// `UnknownProcess` if `pid` is out of range.
    pub fn release_all(&self, pid: ProcessId) -> Result<Vec<u32>> {
        let mut inner = self.lock();
        Self::check_pid(&inner.state, pid)?;
        let released = self.release_locked(&mut inner, pid);
        self.changed.notify_all();
        Ok(released)
    }

    fn release_locked(&self, inner: &mut Inner, pid: ProcessId) -> Vec<u32> {
        let released = inner.state.release_allocation(pid);
        self.sink.record(Event::Released {
            pid,
            released: released.clone(),
            available: inner.state.available().to_vec(),
        });
        released
    }

    /// Marks `pid` finished and wakes every waiter.
    ///
    /// Resource counts are untouched; the caller releases before exiting.
    ///
    /// # Errors
    ///
    /// `UnknownProcess` if `pid` is out of range.
    pub fn mark_finished(&self, pid: ProcessId) -> Result<()> {
        let mut inner = self.lock();
        Self::check_pid(&inner.state, pid)?;
        self.mark_finished_locked(&mut inner, pid);
        self.changed.notify_all();
        Ok(())
    }

    fn mark_finished_locked(&self, inner: &mut Inner, pid: ProcessId) {
        if !inner.state.is_finished(pid) {
            inner.state.set_finished(pid);
            inner.waiting.remove(&pid);
            self.sink.record(Event::Finished { pid });
        }
    }

    /// The worker's exit path: marks `pid` finished, then releases everything
    /// it holds, in one critical section.
    ///
    /// Returns `false` and does nothing if `pid` was already aborted; the abort
    /// has performed the release.
    ///
    /// # Errors
    ///
    /// `UnknownProcess` if `pid` is out of range.
    pub fn finish(&self, pid: ProcessId) -> Result<bool> {
        let mut inner = self.lock();
        Self::check_pid(&inner.state, pid)?;
        if !inner.state.is_alive(pid) {
            return Ok(false);
        }
        self.mark_finished_locked(&mut inner, pid);
        self.release_locked(&mut inner, pid);
        self.changed.notify_all();
        Ok(true)
    }

    /// Forcibly terminates `pid`: clears `alive`, reclaims everything it holds
    /// (leaving `need == max`), drops its waiting entry and wakes every waiter.
    ///
    /// Idempotent: returns `Ok(false)` without effect if `pid` is already
    /// aborted or has finished. A process that finished between a detector
    /// scan and the abort keeps its `Finished` status.
    ///
    /// # Errors
    ///
    /// `UnknownProcess` if `pid` is out of range.
    pub fn abort(&self, pid: ProcessId) -> Result<bool> {
        let mut inner = self.lock();
        Self::check_pid(&inner.state, pid)?;
        if !inner.state.is_active(pid) {
            return Ok(false);
        }
        inner.state.set_aborted(pid);
        inner.waiting.remove(&pid);
        let released = inner.state.release_allocation(pid);
        self.sink.record(Event::Aborted {
            pid,
            released,
            available: inner.state.available().to_vec(),
        });
        crate::info!("manager", "aborted P{pid}");
        self.changed.notify_all();
        Ok(true)
    }

    fn check_pid(state: &SystemState, pid: ProcessId) -> Result<()> {
        if state.contains(pid) {
            Ok(())
        } else {
            Err(Error::UnknownProcess(pid))
        }
    }

    // ------------------------------------------------------------------
    // Waiting map
    // ------------------------------------------------------------------

    /// Records `req` as the outstanding request of a blocked `pid`.
    ///
    /// Ignored for processes that are no longer active.
    pub fn mark_waiting(&self, pid: ProcessId, req: Vec<u32>) {
        let mut inner = self.lock();
        if inner.state.contains(pid) && inner.state.is_active(pid) {
            inner.waiting.insert(pid, req);
        }
    }

    /// Removes the waiting entry of `pid`, if any.
    pub fn clear_waiting(&self, pid: ProcessId) {
        self.lock().waiting.remove(&pid);
    }

    /// Copy of the current waiting map.
    #[must_use]
    pub fn waiting_snapshot(&self) -> WaitingMap {
        self.lock().waiting.clone()
    }

    // ------------------------------------------------------------------
    // Wait-for graph
    // ------------------------------------------------------------------

    /// Builds the wait-for graph for the given blocked requests.
    ///
    /// For every waiting `i` that is still active and every resource type `k`
    /// with `req[k] > available[k]`, adds `i -> j` for each other active `j`
    /// holding any unit of `k`. This links a waiter to *every* holder of a scarce
    /// type, not only the one whose release would unblock it, so a real cycle is
    /// never missed at the cost of possible spurious edges. Every process is a
    /// node; nothing is carried over between calls.
    #[must_use]
    pub fn build_wait_for_graph(&self, waiting: &WaitingMap) -> WaitForGraph {
        let inner = self.lock();
        let state = &inner.state;
        let mut graph = WaitForGraph::with_nodes(state.num_processes());

        for (&i, req) in waiting {
            if !state.contains(i) || !state.is_active(i) {
                continue;
            }
            for (k, &wanted) in req.iter().enumerate().take(state.num_resources()) {
                if wanted <= state.available()[k] {
                    continue;
                }
                for j in state.processes() {
                    if j != i && state.is_active(j) && state.allocation(j)[k] > 0 {
                        graph.add_edge(i, j);
                    }
                }
            }
        }
        graph
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Status and need of `pid` read atomically.
    ///
    /// # Errors
    ///
    /// `UnknownProcess` if `pid` is out of range.
    pub fn process_view(&self, pid: ProcessId) -> Result<ProcessView> {
        let inner = self.lock();
        Self::check_pid(&inner.state, pid)?;
        Ok(ProcessView { status: inner.state.status(pid), need: inner.state.need(pid).to_vec() })
    }

    /// Clone of the full state.
    #[must_use]
    pub fn snapshot(&self) -> SystemState {
        self.lock().state.clone()
    }

    /// Total units held by `pid`, or 0 for an unknown id.
    #[must_use]
    pub fn total_allocation(&self, pid: ProcessId) -> u64 {
        let inner = self.lock();
        if inner.state.contains(pid) {
            inner.state.total_allocation(pid)
        } else {
            0
        }
    }

    /// Processes still alive and unfinished.
    #[must_use]
    pub fn unfinished(&self) -> Vec<ProcessId> {
        self.lock().state.unfinished()
    }

    /// True when every process has finished or been aborted.
    #[must_use]
    pub fn all_settled(&self) -> bool {
        self.lock().state.all_settled()
    }

    /// Number of processes.
    #[must_use]
    pub fn num_processes(&self) -> usize {
        self.lock().state.num_processes()
    }
}
