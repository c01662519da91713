//! Scenario generation and per-step request sizing.

use serde::Serialize;

use crate::rng::RandomSource;
use crate::types::is_zero;

/// Initial inputs of a run: total units and the declared maximum demands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    /// Total units per resource type.
    pub total: Vec<u32>,
    /// One declared maximum row per process.
    pub max_demand: Vec<Vec<u32>>,
}

impl Scenario {
    /// Uses an explicit demand matrix.
    #[must_use]
    pub fn new(total: Vec<u32>, max_demand: Vec<Vec<u32>>) -> Self {
        Self { total, max_demand }
    }

    /// Generates `n` random demand rows against `total`.
    pub fn generate(n: usize, total: Vec<u32>, rng: &mut dyn RandomSource) -> Self {
        let max_demand = generate_max_demand(n, &total, rng);
        Self { total, max_demand }
    }

    /// Number of processes.
    #[must_use]
    pub fn num_processes(&self) -> usize {
        self.max_demand.len()
    }
}

/// Generates a max-demand matrix with each entry uniform in `[0, total[k]]`.
///
/// A row that comes out all zero gets one unit of a random type that has any
/// units at all, so every process wants something. If `total` is all zero the
/// row stays zero and state construction will reject it.
pub fn generate_max_demand(n: usize, total: &[u32], rng: &mut dyn RandomSource) -> Vec<Vec<u32>> {
    let nonempty: Vec<usize> = (0..total.len()).filter(|&k| total[k] > 0).collect();
    (0..n)
        .map(|_| {
            let mut row: Vec<u32> =
                total.iter().map(|&t| rng.between(0, u64::from(t)) as u32).collect();
            if is_zero(&row) && !nonempty.is_empty() {
                let k = nonempty[rng.below(nonempty.len() as u64) as usize];
                row[k] = 1;
            }
            row
        })
        .collect()
}

/// Sizes the next request: each entry uniform in `[0, min(need[k], step_cap)]`.
///
/// If that draws all zeros while some need remains, one unit of a random type
/// with positive need is requested instead, so every step makes progress.
pub fn bounded_request(need: &[u32], step_cap: u32, rng: &mut dyn RandomSource) -> Vec<u32> {
    let mut req: Vec<u32> =
        need.iter().map(|&n| rng.between(0, u64::from(n.min(step_cap))) as u32).collect();
    if is_zero(&req) {
        let wanting: Vec<usize> = (0..need.len()).filter(|&k| need[k] > 0).collect();
        if !wanting.is_empty() {
            let k = wanting[rng.below(wanting.len() as u64) as usize];
            req[k] = 1;
        }
    }
    req
}
