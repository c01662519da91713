//! Banker's Algorithm safety check.
//!
//! A state is safe if some completion order exists in which every process that
//! is still alive and unfinished can obtain its remaining need from the free
//! units plus whatever the processes before it in the order hand back.
//! Finished and aborted processes start out marked complete and contribute no
//! units.

use crate::state::SystemState;
use crate::types::{fits, ProcessId};

/// Returns a completion order for the current state, or `None` if it is unsafe.
///
/// The order lists only processes that were still active.
#[must_use]
pub fn safe_sequence(state: &SystemState) -> Option<Vec<ProcessId>> {
    completion_order(
        state.available().to_vec(),
        state.allocation_matrix(),
        state.need_matrix(),
        initial_finish(state),
    )
}

/// Returns true if the current state is safe.
#[must_use]
pub fn is_safe(state: &SystemState) -> bool {
    safe_sequence(state).is_some()
}

/// Returns a completion order for the state that would result from granting
/// `req` to `pid`, or `None` if that state is unsafe or `req` does not fit in
/// the free units.
///
/// The state itself is not modified.
#[must_use]
pub fn safe_sequence_after_grant(
    state: &SystemState,
    pid: ProcessId,
    req: &[u32],
) -> Option<Vec<ProcessId>> {
    if !state.can_satisfy(req) || !fits(req, state.need(pid)) {
        return None;
    }

    let work: Vec<u32> = state.available().iter().zip(req).map(|(a, r)| a - r).collect();
    let mut alloc = state.allocation_matrix().to_vec();
    let mut need = state.need_matrix().to_vec();
    for (k, &units) in req.iter().enumerate() {
        alloc[pid][k] += units;
        need[pid][k] -= units;
    }

    completion_order(work, &alloc, &need, initial_finish(state))
}

/// Returns true if granting `req` to `pid` would leave the system safe.
#[must_use]
pub fn is_safe_after_grant(state: &SystemState, pid: ProcessId, req: &[u32]) -> bool {
    safe_sequence_after_grant(state, pid, req).is_some()
}

fn initial_finish(state: &SystemState) -> Vec<bool> {
    state.processes().map(|j| !state.is_active(j)).collect()
}

/// Repeated scan: any unfinished `j` whose need fits in `work` is marked finished
/// and its allocation folded back into `work`, until a pass makes no progress.
fn completion_order(
    mut work: Vec<u32>,
    alloc: &[Vec<u32>],
    need: &[Vec<u32>],
    mut finish: Vec<bool>,
) -> Option<Vec<ProcessId>> {
    let mut order = Vec::with_capacity(finish.len());
    let mut progress = true;
    while progress {
        progress = false;
        for j in 0..finish.len() {
            if finish[j] || !fits(&need[j], &work) {
                continue;
            }
            for (w, &held) in work.iter_mut().zip(&alloc[j]) {
                *w += held;
            }
            finish[j] = true;
            order.push(j);
            progress = true;
        }
    }
    finish.iter().all(|&done| done).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic() -> SystemState {
        // Silberschatz textbook instance, reached through grants from zero.
        let mut state = SystemState::new(
            vec![10, 5, 7],
            vec![
                vec![7, 5, 3],
                vec![3, 2, 2],
                vec![9, 0, 2],
                vec![2, 2, 2],
                vec![4, 3, 3],
            ],
        )
        .unwrap();
        state.apply_grant(0, &[0, 1, 0]);
        state.apply_grant(1, &[2, 0, 0]);
        state.apply_grant(2, &[3, 0, 2]);
        state.apply_grant(3, &[2, 1, 1]);
        state.apply_grant(4, &[0, 0, 2]);
        state
    }

    #[test]
    fn test_classic_state_is_safe() {
        let state = classic();
        assert_eq!(state.available(), &[3, 3, 2]);
        let order = safe_sequence(&state).unwrap();
        assert_eq!(order.len(), 5);
        // First pass in id order picks P1 then P3.
        assert_eq!(&order[..2], &[1, 3]);
    }

    #[test]
    fn test_classic_grant_to_p1_is_safe() {
        let state = classic();
        assert!(is_safe_after_grant(&state, 1, &[1, 0, 2]));
    }

    #[test]
    fn test_classic_grant_to_p0_is_unsafe() {
        let mut state = classic();
        state.apply_grant(1, &[1, 0, 2]);
        // available is now [2, 3, 0]
        assert!(!is_safe_after_grant(&state, 0, &[0, 2, 0]));
    }

    #[test]
    fn test_grant_exceeding_available_is_rejected() {
        let state = classic();
        assert!(safe_sequence_after_grant(&state, 0, &[4, 0, 0]).is_none());
    }

    #[test]
    fn test_check_does_not_mutate_state() {
        let state = classic();
        let before = state.clone();
        let _ = is_safe_after_grant(&state, 1, &[1, 0, 2]);
        assert_eq!(state, before);
    }

    #[test]
    fn test_inactive_processes_are_skipped() {
        let mut state = SystemState::new(vec![2], vec![vec![2], vec![2]]).unwrap();
        state.apply_grant(0, &[1]);
        // P0 holds 1 and needs 1 more; P1 needs 2. Granting 1 to P1 deadlocks both.
        assert!(!is_safe_after_grant(&state, 1, &[1]));
        // Once P0 is aborted (and its units returned) P1 alone is always safe.
        state.release_allocation(0);
        state.set_aborted(0);
        assert!(is_safe_after_grant(&state, 1, &[1]));
        assert_eq!(safe_sequence_after_grant(&state, 1, &[1]), Some(vec![1]));
    }

    #[test]
    fn test_finished_holder_is_not_counted_as_returning_units() {
        let mut state = SystemState::new(vec![2], vec![vec![1], vec![2]]).unwrap();
        state.apply_grant(0, &[1]);
        state.set_finished(0);
        // P0 is marked finished but has not released yet: its unit is unavailable.
        assert!(!is_safe(&state));
    }
}
