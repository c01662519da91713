//! End-to-end run: build the state, start one thread per process (plus the
//! detector in detection mode), collect outcomes under a deadline, then
//! force-abort whatever is still unfinished.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::detector::{Detector, DetectorReport};
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::manager::ResourceManager;
use crate::rng::SplitMix64;
use crate::scenario::Scenario;
use crate::state::SystemState;
use crate::types::{Mode, ProcessId};
use crate::worker::{Worker, WorkerOutcome, WorkerReport};

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Grant policy used.
    pub mode: Mode,
    /// Inputs of the run.
    pub scenario: Scenario,
    /// One report per process, ordered by id.
    pub workers: Vec<WorkerReport>,
    /// Detector summary (detection mode only).
    pub detector: Option<DetectorReport>,
    /// Processes force-aborted by the final sweep.
    pub forced: Vec<ProcessId>,
    /// State after every thread was joined.
    pub final_state: SystemState,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

impl RunReport {
    /// Processes that finished voluntarily.
    #[must_use]
    pub fn finished(&self) -> Vec<ProcessId> {
        self.with_outcome(WorkerOutcome::Finished)
    }

    /// Processes that were aborted, by the resolver or the final sweep.
    #[must_use]
    pub fn aborted(&self) -> Vec<ProcessId> {
        self.with_outcome(WorkerOutcome::Aborted)
    }

    fn with_outcome(&self, outcome: WorkerOutcome) -> Vec<ProcessId> {
        self.workers.iter().filter(|w| w.outcome == outcome).map(|w| w.pid).collect()
    }

    /// True when every process finished voluntarily.
    #[must_use]
    pub fn all_finished(&self) -> bool {
        self.workers.iter().all(|w| w.outcome == WorkerOutcome::Finished)
    }

    /// True when every unit is back in the free pool.
    #[must_use]
    pub fn fully_reclaimed(&self) -> bool {
        self.final_state.available() == self.final_state.total()
    }
}

/// A configured, validated run.
#[derive(Debug, Clone)]
pub struct Simulation {
    config: Config,
    scenario: Scenario,
}

impl Simulation {
    /// Validates `config` and fixes the scenario (explicit or generated from
    /// the seed).
    ///
    /// # Errors
    ///
    /// Configuration errors, or a construction error if the demand matrix is
    /// malformed. Nothing is started on failure.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let scenario = match &config.max_demand {
            Some(rows) => Scenario::new(config.resources.clone(), rows.clone()),
            None => Scenario::generate(
                config.processes,
                config.resources.clone(),
                &mut SplitMix64::new(config.seed),
            ),
        };
        SystemState::new(scenario.total.clone(), scenario.max_demand.clone())?;
        Ok(Self { config, scenario })
    }

    /// The scenario that [`Simulation::run`] will execute.
    #[must_use]
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the scenario to completion, sending every event to `sink`.
    ///
    /// # Errors
    ///
    /// `Io` if a thread cannot be spawned (already running threads are
    /// aborted and joined first), `WorkerPanicked` / `DetectorPanicked` if a
    /// thread panics, or the final state failing its invariant check.
    pub fn run(&self, sink: Arc<dyn EventSink>) -> Result<RunReport> {
        crate::time_scope!("simulation", "run");
        let started = Instant::now();
        let mode = self.config.mode;
        let n = self.scenario.num_processes();
        let manager = Arc::new(
            ResourceManager::new(
                self.scenario.total.clone(),
                self.scenario.max_demand.clone(),
                mode,
            )?
            .with_sink(sink),
        );
        crate::info!("simulation", "{mode} run with {n} processes, seed {}", self.config.seed);

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let detector = if mode == Mode::Detection {
            let detector = Detector::new(Arc::clone(&manager), self.config.detector_settings());
            let spawned = thread::Builder::new()
                .name("detector".to_string())
                .spawn(move || detector.run(&stop_rx));
            Some(spawned?)
        } else {
            None
        };

        let (tx, rx) = mpsc::channel::<(ProcessId, Result<WorkerReport>)>();
        let mut handles: Vec<(ProcessId, JoinHandle<()>)> = Vec::with_capacity(n);
        for pid in 0..n {
            let worker = Worker::new(
                pid,
                Arc::clone(&manager),
                Box::new(SplitMix64::for_stream(self.config.seed, pid as u64)),
                self.config.worker_settings(),
            );
            let tx = tx.clone();
            let spawned = thread::Builder::new().name(format!("P{pid}")).spawn(move || {
                let _ = tx.send((pid, worker.run()));
            });
            match spawned {
                Ok(handle) => handles.push((pid, handle)),
                Err(err) => {
                    crate::error!("simulation", "could not spawn P{pid}: {err}");
                    for other in 0..n {
                        manager.abort(other)?;
                    }
                    let _ = stop_tx.send(());
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    if let Some(handle) = detector {
                        let _ = handle.join();
                    }
                    return Err(Error::Io(err));
                }
            }
        }
        drop(tx);

        let mut reports = BTreeMap::new();
        let deadline = started + self.config.join_deadline();
        while reports.len() < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((pid, report)) => {
                    reports.insert(pid, report);
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }

        let _ = stop_tx.send(());
        let detector_report = match detector {
            Some(handle) => Some(handle.join().map_err(|_| Error::DetectorPanicked)??),
            None => None,
        };

        let forced = manager.unfinished();
        if !forced.is_empty() {
            crate::warn!("simulation", "join deadline passed, force-aborting {forced:?}");
            manager.record(Event::FinalSweep { pids: forced.clone() });
            for &pid in &forced {
                manager.abort(pid)?;
            }
        }

        let mut panicked = None;
        for (pid, handle) in handles {
            if handle.join().is_err() {
                crate::error!("simulation", "P{pid} panicked");
                panicked.get_or_insert(pid);
            }
        }
        for (pid, report) in rx.try_iter() {
            reports.insert(pid, report);
        }
        if let Some(pid) = panicked {
            return Err(Error::WorkerPanicked(pid));
        }

        let mut workers = Vec::with_capacity(n);
        for pid in 0..n {
            match reports.remove(&pid) {
                Some(report) => workers.push(report?),
                None => return Err(Error::WorkerPanicked(pid)),
            }
        }

        let final_state = manager.snapshot();
        final_state.verify()?;
        let report = RunReport {
            mode,
            scenario: self.scenario.clone(),
            workers,
            detector: detector_report,
            forced,
            final_state,
            elapsed: started.elapsed(),
        };
        crate::info!(
            "simulation",
            "done in {:?}: finished {:?}, aborted {:?}",
            report.elapsed,
            report.finished(),
            report.aborted()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorConfig, WorkerConfig};
    use crate::events::{EventLog, NullSink};

    fn quick(mode: Mode) -> Config {
        Config {
            mode,
            worker: WorkerConfig {
                step_cap: 2,
                think_time_ms: [0, 2],
                request_timeout_ms: Some(10),
            },
            detector: DetectorConfig { interval_ms: 5, max_iterations: 2_000 },
            join_deadline_ms: 10_000,
            ..Config::default()
        }
    }

    #[test]
    fn test_new_rejects_bad_demand_before_running() {
        let config = Config {
            resources: vec![2],
            max_demand: Some(vec![vec![3]]),
            ..Config::default()
        };
        let err = Simulation::new(config).unwrap_err();
        assert!(err.is_construction_failure());
    }

    #[test]
    fn test_explicit_demand_is_used_verbatim() {
        let config = Config {
            resources: vec![3, 3, 2],
            max_demand: Some(vec![vec![3, 0, 0], vec![0, 3, 2]]),
            ..quick(Mode::Avoidance)
        };
        let sim = Simulation::new(config).unwrap();
        assert_eq!(sim.scenario().num_processes(), 2);
        assert_eq!(sim.scenario().max_demand[1], vec![0, 3, 2]);
    }

    #[test]
    fn test_avoidance_run_finishes_everyone() {
        let log = Arc::new(EventLog::new());
        let report = Simulation::new(quick(Mode::Avoidance)).unwrap().run(log.clone()).unwrap();

        assert_eq!(report.workers.len(), 5);
        assert!(report.all_finished(), "aborted: {:?}", report.aborted());
        assert!(report.forced.is_empty());
        assert!(report.detector.is_none());
        assert!(report.fully_reclaimed());
        assert_eq!(log.count("finish"), 5);
        assert_eq!(log.count("abort"), 0);
    }

    #[test]
    fn test_detection_run_settles_and_reclaims() {
        let report = Simulation::new(quick(Mode::Detection))
            .unwrap()
            .run(Arc::new(NullSink))
            .unwrap();

        assert_eq!(report.workers.len(), 5);
        assert!(report.final_state.all_settled());
        assert!(report.fully_reclaimed());
        let detector = report.detector.as_ref().unwrap();
        assert_eq!(detector.victims.len(), detector.cycles.len());
        for victim in &detector.victims {
            assert!(report.aborted().contains(victim));
        }
    }

    #[test]
    fn test_final_sweep_aborts_stragglers() {
        // Zero deadline: the sweep runs before workers can finish.
        let config = Config {
            join_deadline_ms: 0,
            worker: WorkerConfig {
                step_cap: 1,
                think_time_ms: [50, 50],
                request_timeout_ms: Some(10),
            },
            ..quick(Mode::Avoidance)
        };
        let log = Arc::new(EventLog::new());
        let report = Simulation::new(config).unwrap().run(log.clone()).unwrap();

        assert!(!report.forced.is_empty());
        assert_eq!(log.count("final"), 1);
        for pid in &report.forced {
            assert!(report.aborted().contains(pid));
        }
        assert!(report.fully_reclaimed());
    }
}
