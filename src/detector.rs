//! Detector/resolver loop (detection mode only).
//!
//! Every polling interval the detector snapshots the waiting map, asks the
//! manager for a fresh wait-for graph, and looks for a cycle. If it finds one it
//! aborts the member holding the most units, which releases them and wakes the
//! blocked workers. The loop is bounded by an iteration budget; running out of
//! budget, or finding nothing, just means no deadlock was observed.

use serde::Serialize;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::events::Event;
use crate::manager::ResourceManager;
use crate::types::ProcessId;

/// Tunables for the detector loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSettings {
    /// Sleep between scans.
    pub interval: Duration,
    /// Maximum number of scans before giving up.
    pub max_iterations: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self { interval: Duration::from_millis(500), max_iterations: 200 }
    }
}

/// Result of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Every process is finished or aborted; nothing left to watch.
    Idle,
    /// No cycle in the current wait-for graph.
    Clear,
    /// A cycle was found and `victim` aborted.
    Resolved {
        /// Cycle members in path order.
        cycle: Vec<ProcessId>,
        /// The aborted process.
        victim: ProcessId,
    },
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorExit {
    /// All processes settled.
    Idle,
    /// Iteration budget used up.
    Exhausted,
    /// Asked to stop by the caller.
    Shutdown,
}

/// Summary of a detector run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectorReport {
    /// Scans performed.
    pub iterations: usize,
    /// Cycles found, in order.
    pub cycles: Vec<Vec<ProcessId>>,
    /// Victims aborted, in order.
    pub victims: Vec<ProcessId>,
    /// Why the loop stopped.
    pub exit: DetectorExit,
}

/// Picks the cycle member with the largest total allocation.
///
/// Ties go to the lowest process id. Returns the victim and its allocation, or
/// `None` for an empty cycle.
pub fn choose_victim(
    cycle: &[ProcessId],
    allocation: impl Fn(ProcessId) -> u64,
) -> Option<(ProcessId, u64)> {
    cycle
        .iter()
        .map(|&pid| (pid, allocation(pid)))
        .max_by(|(a_pid, a_units), (b_pid, b_units)| a_units.cmp(b_units).then(b_pid.cmp(a_pid)))
}

/// Periodic deadlock detector bound to one manager.
pub struct Detector {
    manager: Arc<ResourceManager>,
    settings: DetectorSettings,
}

impl Detector {
    /// Creates a detector.
    #[must_use]
    pub fn new(manager: Arc<ResourceManager>, settings: DetectorSettings) -> Self {
        Self { manager, settings }
    }

    /// Performs one scan: stop if idle, otherwise detect and resolve one cycle.
    ///
    /// # Errors
    ///
    /// Propagates manager errors, which only occur for unknown process ids.
    pub fn tick(&self) -> Result<Tick> {
        if self.manager.all_settled() {
            return Ok(Tick::Idle);
        }

        let waiting = self.manager.waiting_snapshot();
        let graph = self.manager.build_wait_for_graph(&waiting);
        crate::trace!(
            "detector",
            "{} waiting, graph has {} edges",
            waiting.len(),
            graph.edge_count()
        );
        let Some(cycle) = graph.find_cycle() else {
            return Ok(Tick::Clear);
        };
        self.manager.record(Event::CycleDetected { cycle: cycle.clone() });

        let Some((victim, allocation)) =
            choose_victim(&cycle, |pid| self.manager.total_allocation(pid))
        else {
            return Ok(Tick::Clear);
        };
        self.manager.record(Event::VictimChosen { pid: victim, allocation });
        crate::info!("detector", "cycle {cycle:?}, aborting P{victim} ({allocation} units)");
        self.manager.abort(victim)?;

        Ok(Tick::Resolved { cycle, victim })
    }

    /// Scans every interval until idle, out of budget, or `shutdown` receives a
    /// message (or its sender is dropped).
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Detector::tick`].
    pub fn run(&self, shutdown: &Receiver<()>) -> Result<DetectorReport> {
        let mut report = DetectorReport {
            iterations: 0,
            cycles: Vec::new(),
            victims: Vec::new(),
            exit: DetectorExit::Exhausted,
        };

        while report.iterations < self.settings.max_iterations {
            match shutdown.recv_timeout(self.settings.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    report.exit = DetectorExit::Shutdown;
                    return Ok(report);
                }
            }
            report.iterations += 1;

            match self.tick()? {
                Tick::Idle => {
                    report.exit = DetectorExit::Idle;
                    return Ok(report);
                }
                Tick::Clear => {}
                Tick::Resolved { cycle, victim } => {
                    report.cycles.push(cycle);
                    report.victims.push(victim);
                }
            }
        }

        crate::warn!("detector", "iteration budget of {} used up", self.settings.max_iterations);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventLog, EventSink, NullSink};
    use crate::manager::RequestOutcome;
    use crate::types::Mode;
    use std::sync::mpsc;
    use std::thread;

    const NOW: Option<Duration> = Some(Duration::ZERO);

    /// P0 holds R0 and wants R1; P1 holds R1 and wants R0.
    fn two_way_deadlock() -> Arc<ResourceManager> {
        deadlock_with_sink(Arc::new(NullSink))
    }

    fn deadlock_with_sink(sink: Arc<dyn EventSink>) -> Arc<ResourceManager> {
        let rm = ResourceManager::new(vec![1, 1], vec![vec![1, 1], vec![1, 1]], Mode::Detection)
            .unwrap()
            .with_sink(sink);
        assert!(rm.request(0, &[1, 0], NOW).unwrap().is_granted());
        assert!(rm.request(1, &[0, 1], NOW).unwrap().is_granted());
        rm.mark_waiting(0, vec![0, 1]);
        rm.mark_waiting(1, vec![1, 0]);
        Arc::new(rm)
    }

    #[test]
    fn test_choose_victim_prefers_largest_allocation() {
        let alloc = |pid: ProcessId| [1u64, 5, 3][pid];
        assert_eq!(choose_victim(&[0, 1, 2], alloc), Some((1, 5)));
    }

    #[test]
    fn test_choose_victim_breaks_ties_by_lowest_id() {
        assert_eq!(choose_victim(&[2, 0, 1], |_| 4), Some((0, 4)));
        assert_eq!(choose_victim(&[], |_| 4), None);
    }

    #[test]
    fn test_tick_resolves_two_way_deadlock() {
        let log = Arc::new(EventLog::new());
        let rm = deadlock_with_sink(log.clone());
        let detector = Detector::new(Arc::clone(&rm), DetectorSettings::default());
        let tick = detector.tick().unwrap();
        assert_eq!(tick, Tick::Resolved { cycle: vec![0, 1], victim: 0 });
        let state = rm.snapshot();
        assert!(!state.is_alive(0));
        assert!(state.is_alive(1));
        assert_eq!(state.available(), &[1, 0]);

        let tags: Vec<&str> = log.events().iter().map(|e| e.tag()).collect();
        assert_eq!(&tags[tags.len() - 3..], &["cycle", "victim", "abort"]);

        // The survivor's pending request now fits.
        assert_eq!(rm.request(1, &[1, 0], NOW).unwrap(), RequestOutcome::Granted);
        assert_eq!(detector.tick().unwrap(), Tick::Clear);
    }

    #[test]
    fn test_blocked_survivor_is_woken_by_resolution() {
        let rm = two_way_deadlock();
        let survivor = {
            let rm = Arc::clone(&rm);
            thread::spawn(move || rm.request(1, &[1, 0], None).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        let detector = Detector::new(Arc::clone(&rm), DetectorSettings::default());
        assert!(matches!(detector.tick().unwrap(), Tick::Resolved { victim: 0, .. }));
        assert_eq!(survivor.join().unwrap(), RequestOutcome::Granted);
    }

    #[test]
    fn test_repeated_resolution_shrinks_blocked_set() {
        // Three-way ring: P0 -> P1 -> P2 -> P0.
        let rm = ResourceManager::new(
            vec![1, 1, 1],
            vec![vec![1, 1, 0], vec![0, 1, 1], vec![1, 0, 1]],
            Mode::Detection,
        )
        .unwrap();
        assert!(rm.request(0, &[1, 0, 0], NOW).unwrap().is_granted());
        assert!(rm.request(1, &[0, 1, 0], NOW).unwrap().is_granted());
        assert!(rm.request(2, &[0, 0, 1], NOW).unwrap().is_granted());
        rm.mark_waiting(0, vec![0, 1, 0]);
        rm.mark_waiting(1, vec![0, 0, 1]);
        rm.mark_waiting(2, vec![1, 0, 0]);
        let rm = Arc::new(rm);
        let detector = Detector::new(Arc::clone(&rm), DetectorSettings::default());

        let mut blocked = rm.waiting_snapshot().len();
        assert_eq!(blocked, 3);
        loop {
            match detector.tick().unwrap() {
                Tick::Resolved { cycle, victim } => {
                    assert_eq!(cycle.len(), 3);
                    assert_eq!(victim, 0);
                    let now = rm.waiting_snapshot().len();
                    assert!(now < blocked, "blocked set must shrink: {now} >= {blocked}");
                    blocked = now;
                }
                Tick::Clear => break,
                Tick::Idle => panic!("processes are still active"),
            }
        }
        assert_eq!(blocked, 2);
    }

    #[test]
    fn test_run_exits_idle_when_everything_settled() {
        let rm = Arc::new(
            ResourceManager::new(vec![1], vec![vec![1]], Mode::Detection).unwrap(),
        );
        rm.abort(0).unwrap();
        let (_tx, rx) = mpsc::channel();
        let detector = Detector::new(
            rm,
            DetectorSettings { interval: Duration::from_millis(1), max_iterations: 10 },
        );
        let report = detector.run(&rx).unwrap();
        assert_eq!(report.exit, DetectorExit::Idle);
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn test_run_stops_after_budget() {
        let rm = Arc::new(
            ResourceManager::new(vec![1], vec![vec![1]], Mode::Detection).unwrap(),
        );
        let (_tx, rx) = mpsc::channel();
        let detector = Detector::new(
            rm,
            DetectorSettings { interval: Duration::from_millis(1), max_iterations: 3 },
        );
        let report = detector.run(&rx).unwrap();
        assert_eq!(report.exit, DetectorExit::Exhausted);
        assert_eq!(report.iterations, 3);
        assert!(report.victims.is_empty());
    }

    #[test]
    fn test_run_resolves_and_honours_shutdown() {
        let rm = two_way_deadlock();
        let (tx, rx) = mpsc::channel();
        let handle = {
            let rm = Arc::clone(&rm);
            thread::spawn(move || {
                Detector::new(
                    rm,
                    DetectorSettings { interval: Duration::from_millis(2), max_iterations: 10_000 },
                )
                .run(&rx)
                .unwrap()
            })
        };
        thread::sleep(Duration::from_millis(50));
        tx.send(()).unwrap();
        let report = handle.join().unwrap();
        assert_eq!(report.exit, DetectorExit::Shutdown);
        assert_eq!(report.victims, vec![0]);
        assert_eq!(report.cycles, vec![vec![0, 1]]);
    }
}
