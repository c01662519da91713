//! The resource state model.
//!
//! Holds the `total`/`available` vectors and the per-process `max`/`alloc`/`need`
//! matrices plus the `alive`/`finished` flags. All mutation goes through the
//! crate-private methods used by [`ResourceManager`](crate::manager::ResourceManager),
//! which keep two invariants at every quiescent point:
//!
//! - conservation: `available[k] + Σ_i alloc[i][k] == total[k]`
//! - bounds: `alloc[i][k] <= max[i][k]` and `need[i][k] == max[i][k] - alloc[i][k]`

use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::{fits, is_zero, total_units, ProcessId, ProcessStatus};

/// Snapshot-able allocation state of the whole system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemState {
    total: Vec<u32>,
    available: Vec<u32>,
    max: Vec<Vec<u32>>,
    alloc: Vec<Vec<u32>>,
    need: Vec<Vec<u32>>,
    alive: Vec<bool>,
    finished: Vec<bool>,
}

impl SystemState {
    /// Builds the initial state: nothing allocated, every process alive.
    ///
    /// # Errors
    ///
    /// Returns a construction error if there are no resource types or no
    /// processes, if a max-demand row has the wrong length, exceeds `total`, or
    /// is all zero.
    pub fn new(total: Vec<u32>, max_demand: Vec<Vec<u32>>) -> Result<Self> {
        if total.is_empty() {
            return Err(Error::NoResourceTypes);
        }
        if max_demand.is_empty() {
            return Err(Error::NoProcesses);
        }
        for (process, row) in max_demand.iter().enumerate() {
            if row.len() != total.len() {
                return Err(Error::DemandShape {
                    process,
                    expected: total.len(),
                    found: row.len(),
                });
            }
            if let Some((resource, (&demand, &limit))) =
                row.iter().zip(&total).enumerate().find(|(_, (d, t))| d > t)
            {
                return Err(Error::DemandExceedsTotal { process, resource, demand, total: limit });
            }
            if is_zero(row) {
                return Err(Error::ZeroDemand { process });
            }
        }

        let n = max_demand.len();
        let m = total.len();
        Ok(Self {
            available: total.clone(),
            total,
            need: max_demand.clone(),
            max: max_demand,
            alloc: vec![vec![0; m]; n],
            alive: vec![true; n],
            finished: vec![false; n],
        })
    }

    /// Number of resource types (M).
    #[must_use]
    pub fn num_resources(&self) -> usize {
        self.total.len()
    }

    /// Number of processes (N).
    #[must_use]
    pub fn num_processes(&self) -> usize {
        self.max.len()
    }

    /// Iterator over all process ids.
    pub fn processes(&self) -> std::ops::Range<ProcessId> {
        0..self.num_processes()
    }

    /// Total units per resource type.
    #[must_use]
    pub fn total(&self) -> &[u32] {
        &self.total
    }

    /// Currently free units per resource type.
    #[must_use]
    pub fn available(&self) -> &[u32] {
        &self.available
    }

    /// Declared maximum demand of `pid`.
    #[must_use]
    pub fn max(&self, pid: ProcessId) -> &[u32] {
        &self.max[pid]
    }

    /// Units currently held by `pid`.
    #[must_use]
    pub fn allocation(&self, pid: ProcessId) -> &[u32] {
        &self.alloc[pid]
    }

    /// Remaining demand of `pid`.
    #[must_use]
    pub fn need(&self, pid: ProcessId) -> &[u32] {
        &self.need[pid]
    }

    pub(crate) fn allocation_matrix(&self) -> &[Vec<u32>] {
        &self.alloc
    }

    pub(crate) fn need_matrix(&self) -> &[Vec<u32>] {
        &self.need
    }

    /// Sum of units held by `pid` across all resource types.
    #[must_use]
    pub fn total_allocation(&self, pid: ProcessId) -> u64 {
        total_units(&self.alloc[pid])
    }

    /// False once `pid` has been aborted.
    #[must_use]
    pub fn is_alive(&self, pid: ProcessId) -> bool {
        self.alive[pid]
    }

    /// True once `pid` has finished voluntarily.
    #[must_use]
    pub fn is_finished(&self, pid: ProcessId) -> bool {
        self.finished[pid]
    }

    /// Alive and not finished.
    #[must_use]
    pub fn is_active(&self, pid: ProcessId) -> bool {
        self.alive[pid] && !self.finished[pid]
    }

    /// Lifecycle status of `pid`. Abortion takes precedence over finishing.
    #[must_use]
    pub fn status(&self, pid: ProcessId) -> ProcessStatus {
        if !self.alive[pid] {
            ProcessStatus::Aborted
        } else if self.finished[pid] {
            ProcessStatus::Finished
        } else {
            ProcessStatus::Active
        }
    }

    /// Returns true if `pid` names a process of this state.
    #[must_use]
    pub fn contains(&self, pid: ProcessId) -> bool {
        pid < self.num_processes()
    }

    /// Processes that are still alive and unfinished, in id order.
    #[must_use]
    pub fn unfinished(&self) -> Vec<ProcessId> {
        self.processes().filter(|&i| self.is_active(i)).collect()
    }

    /// True when every process has finished or been aborted.
    #[must_use]
    pub fn all_settled(&self) -> bool {
        self.processes().all(|i| !self.is_active(i))
    }

    /// Checks a request against the non-blocking preconditions.
    ///
    /// # Errors
    ///
    /// `UnknownProcess` for an out-of-range id, `RequestShape` for a vector of
    /// the wrong length, `InvalidRequest` if any entry exceeds the current need.
    pub fn validate_request(&self, pid: ProcessId, req: &[u32]) -> Result<()> {
        if !self.contains(pid) {
            return Err(Error::UnknownProcess(pid));
        }
        if req.len() != self.num_resources() {
            return Err(Error::RequestShape {
                process: pid,
                expected: self.num_resources(),
                found: req.len(),
            });
        }
        if !fits(req, &self.need[pid]) {
            return Err(Error::InvalidRequest {
                process: pid,
                request: req.to_vec(),
                need: self.need[pid].clone(),
            });
        }
        Ok(())
    }

    /// Returns true if `req` fits in the free units.
    #[must_use]
    pub fn can_satisfy(&self, req: &[u32]) -> bool {
        fits(req, &self.available)
    }

    /// Moves `req` from `available` into `alloc[pid]`.
    ///
    /// Callers must have validated the request and checked [`Self::can_satisfy`].
    pub(crate) fn apply_grant(&mut self, pid: ProcessId, req: &[u32]) {
        for (k, &units) in req.iter().enumerate() {
            self.available[k] -= units;
            self.alloc[pid][k] += units;
            self.need[pid][k] -= units;
        }
    }

    /// Returns every unit held by `pid` to `available`.
    ///
    /// Afterwards `alloc[pid]` is zero and `need[pid] == max[pid]`. Returns the
    /// released vector.
    pub(crate) fn release_allocation(&mut self, pid: ProcessId) -> Vec<u32> {
        let released = std::mem::replace(&mut self.alloc[pid], vec![0; self.total.len()]);
        for (k, &units) in released.iter().enumerate() {
            self.available[k] += units;
        }
        self.need[pid].clone_from(&self.max[pid]);
        released
    }

    pub(crate) fn set_finished(&mut self, pid: ProcessId) {
        self.finished[pid] = true;
    }

    pub(crate) fn set_aborted(&mut self, pid: ProcessId) {
        self.alive[pid] = false;
    }

    /// Verifies the conservation and bounds invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` describing the first broken invariant.
    pub fn verify(&self) -> Result<()> {
        for k in 0..self.num_resources() {
            let held: u64 = self.alloc.iter().map(|row| u64::from(row[k])).sum();
            let accounted = u64::from(self.available[k]) + held;
            if accounted != u64::from(self.total[k]) {
                return Err(Error::InvariantViolation(format!(
                    "R{k}: available {} + allocated {held} != total {}",
                    self.available[k], self.total[k]
                )));
            }
        }
        for i in self.processes() {
            for k in 0..self.num_resources() {
                let (alloc, max, need) = (self.alloc[i][k], self.max[i][k], self.need[i][k]);
                if alloc > max {
                    return Err(Error::InvariantViolation(format!(
                        "P{i} R{k}: allocation {alloc} exceeds max {max}"
                    )));
                }
                if need != max - alloc {
                    return Err(Error::InvariantViolation(format!(
                        "P{i} R{k}: need {need} != max {max} - allocation {alloc}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SystemState {
        SystemState::new(vec![3, 3, 2], vec![vec![3, 0, 0], vec![0, 3, 2]]).unwrap()
    }

    #[test]
    fn test_new_initial_state() {
        let state = sample();
        assert_eq!(state.num_resources(), 3);
        assert_eq!(state.num_processes(), 2);
        assert_eq!(state.available(), &[3, 3, 2]);
        assert_eq!(state.need(1), &[0, 3, 2]);
        assert_eq!(state.allocation(0), &[0, 0, 0]);
        assert!(state.is_active(0));
        assert!(state.verify().is_ok());
    }

    #[test]
    fn test_new_rejects_malformed_dimensions() {
        assert!(matches!(SystemState::new(vec![], vec![vec![]]), Err(Error::NoResourceTypes)));
        assert!(matches!(SystemState::new(vec![1], vec![]), Err(Error::NoProcesses)));
        assert!(matches!(
            SystemState::new(vec![1, 1], vec![vec![1]]),
            Err(Error::DemandShape { process: 0, expected: 2, found: 1 })
        ));
        assert!(matches!(
            SystemState::new(vec![1, 1], vec![vec![1, 0], vec![0, 2]]),
            Err(Error::DemandExceedsTotal { process: 1, resource: 1, demand: 2, total: 1 })
        ));
        assert!(matches!(
            SystemState::new(vec![1, 1], vec![vec![0, 0]]),
            Err(Error::ZeroDemand { process: 0 })
        ));
    }

    #[test]
    fn test_validate_request() {
        let state = sample();
        assert!(state.validate_request(0, &[2, 0, 0]).is_ok());
        assert!(state.validate_request(0, &[0, 0, 0]).is_ok());
        assert!(matches!(state.validate_request(0, &[4, 0, 0]), Err(Error::InvalidRequest { .. })));
        assert!(matches!(state.validate_request(0, &[0, 1, 0]), Err(Error::InvalidRequest { .. })));
        assert!(matches!(state.validate_request(0, &[1, 0]), Err(Error::RequestShape { .. })));
        assert!(matches!(state.validate_request(5, &[0, 0, 0]), Err(Error::UnknownProcess(5))));
    }

    #[test]
    fn test_grant_and_release_keep_invariants() {
        let mut state = sample();
        state.apply_grant(0, &[2, 0, 0]);
        assert_eq!(state.available(), &[1, 3, 2]);
        assert_eq!(state.allocation(0), &[2, 0, 0]);
        assert_eq!(state.need(0), &[1, 0, 0]);
        assert!(state.verify().is_ok());

        let released = state.release_allocation(0);
        assert_eq!(released, vec![2, 0, 0]);
        assert_eq!(state.available(), &[3, 3, 2]);
        assert_eq!(state.allocation(0), &[0, 0, 0]);
        assert_eq!(state.need(0), state.max(0));
        assert!(state.verify().is_ok());
    }

    #[test]
    fn test_status_precedence() {
        let mut state = sample();
        state.set_finished(0);
        assert_eq!(state.status(0), ProcessStatus::Finished);
        state.set_aborted(1);
        assert_eq!(state.status(1), ProcessStatus::Aborted);
        assert!(state.all_settled());
        assert!(state.unfinished().is_empty());
    }

    #[test]
    fn test_verify_detects_leak() {
        let mut state = sample();
        state.available[0] = 0;
        let err = state.verify().unwrap_err();
        assert!(err.to_string().contains("R0"));
    }
}

// ============================================================================
// Property-based tests with proptest
// ============================================================================
