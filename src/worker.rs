//! Worker state machine: one per simulated process.
//!
//! ```text
//! RUNNING --denied--> WAITING --granted--> RUNNING
//!    |                   |
//!    +--need exhausted---+--> FINISHED
//!    +--aborted (any time)--> ABORTED
//! ```
//!
//! While need remains the worker sizes a bounded random request, asks the
//! manager, and pauses for a random think time. A denial in detection mode is
//! published to the waiting map so the detector can see it. When need reaches
//! zero the worker marks itself finished and releases everything, in that order.
//! An aborted worker exits at once without releasing: the abort already did.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::manager::{RequestOutcome, ResourceManager};
use crate::rng::RandomSource;
use crate::scenario::bounded_request;
use crate::types::{is_zero, ProcessId, ProcessStatus};

/// Tunables for a worker loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Upper bound on units of one type requested per step.
    pub step_cap: u32,
    /// Wait bound passed to every request.
    pub request_timeout: Duration,
    /// Think time after each attempt is drawn uniformly from this range.
    pub think_time: (Duration, Duration),
    /// Publish denied requests to the waiting map (detection mode).
    pub publish_waiting: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            step_cap: 2,
            request_timeout: Duration::from_millis(500),
            think_time: (Duration::from_millis(20), Duration::from_millis(60)),
            publish_waiting: false,
        }
    }
}

/// Where the worker is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Making progress.
    Running,
    /// Last request was denied.
    Waiting,
    /// Need exhausted, resources released.
    Finished,
    /// Forcibly terminated.
    Aborted,
}

/// Terminal outcome of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerOutcome {
    /// Completed voluntarily.
    Finished,
    /// Aborted by the resolver or the final sweep.
    Aborted,
}

/// What one worker did during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Process id.
    pub pid: ProcessId,
    /// How the worker ended.
    pub outcome: WorkerOutcome,
    /// Successful requests.
    pub grants: u64,
    /// Requests that timed out.
    pub denials: u64,
}

/// Drives one process against the manager.
pub struct Worker {
    pid: ProcessId,
    manager: Arc<ResourceManager>,
    rng: Box<dyn RandomSource>,
    settings: WorkerSettings,
    state: WorkerState,
    grants: u64,
    denials: u64,
}

impl Worker {
    /// Creates a worker for `pid`.
    pub fn new(
        pid: ProcessId,
        manager: Arc<ResourceManager>,
        rng: Box<dyn RandomSource>,
        settings: WorkerSettings,
    ) -> Self {
        Self { pid, manager, rng, settings, state: WorkerState::Running, grants: 0, denials: 0 }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs until the process finishes or is aborted.
    ///
    /// # Errors
    ///
    /// Propagates manager errors, which only occur if the process id is not
    /// known to the manager.
    pub fn run(mut self) -> Result<WorkerReport> {
        crate::debug!("worker", "P{} started", self.pid);
        loop {
            let view = self.manager.process_view(self.pid)?;
            match view.status {
                ProcessStatus::Aborted => return Ok(self.exit(WorkerOutcome::Aborted)),
                ProcessStatus::Finished => return Ok(self.exit(WorkerOutcome::Finished)),
                ProcessStatus::Active => {}
            }

            if is_zero(&view.need) {
                let outcome = if self.manager.finish(self.pid)? {
                    WorkerOutcome::Finished
                } else {
                    WorkerOutcome::Aborted
                };
                return Ok(self.exit(outcome));
            }

            let req = bounded_request(&view.need, self.settings.step_cap, self.rng.as_mut());
            match self.manager.request(self.pid, &req, Some(self.settings.request_timeout))? {
                RequestOutcome::Granted => {
                    self.grants += 1;
                    if self.state == WorkerState::Waiting && self.settings.publish_waiting {
                        self.manager.clear_waiting(self.pid);
                    }
                    self.state = WorkerState::Running;
                }
                RequestOutcome::TimedOut => {
                    self.denials += 1;
                    self.state = WorkerState::Waiting;
                    if self.settings.publish_waiting {
                        self.manager.mark_waiting(self.pid, req);
                    }
                }
                RequestOutcome::Aborted => return Ok(self.exit(WorkerOutcome::Aborted)),
                RequestOutcome::Finished => return Ok(self.exit(WorkerOutcome::Finished)),
            }
            self.think();
        }
    }

    fn think(&mut self) {
        let (lo, hi) = self.settings.think_time;
        let micros = self.rng.between(saturating_micros(lo), saturating_micros(hi));
        if micros > 0 {
            std::thread::sleep(Duration::from_micros(micros));
        }
    }

    fn exit(&mut self, outcome: WorkerOutcome) -> WorkerReport {
        self.state = match outcome {
            WorkerOutcome::Finished => WorkerState::Finished,
            WorkerOutcome::Aborted => WorkerState::Aborted,
        };
        crate::debug!(
            "worker",
            "P{} exiting {:?} after {} grants, {} denials",
            self.pid,
            outcome,
            self.grants,
            self.denials
        );
        WorkerReport { pid: self.pid, outcome, grants: self.grants, denials: self.denials }
    }
}

fn saturating_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
