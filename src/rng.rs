//! Seedable random source for demand generation and request sizing.
//!
//! Everything random in a run flows through [`RandomSource`], so tests can
//! substitute a fixed sequence and a seed reproduces a scenario exactly.

/// Source of uniformly distributed integers.
pub trait RandomSource: Send {
    /// Next raw 64-bit value.
    fn next_u64(&mut self) -> u64;

    /// Uniform value in `0..bound`. Returns 0 when `bound` is 0.
    fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        // Multiply-shift range reduction; bias is negligible for the small
        // bounds used here.
        ((u128::from(self.next_u64()) * u128::from(bound)) >> 64) as u64
    }

    /// Uniform value in `lo..=hi`. Returns `lo` when `hi <= lo`.
    fn between(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        match (hi - lo).checked_add(1) {
            Some(span) => lo + self.below(span),
            // Full u64 range.
            None => self.next_u64(),
        }
    }
}

/// SplitMix64 generator: tiny state, good distribution, fully deterministic.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    const GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

    /// Creates a generator from a seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Derives an independent stream for a numbered child (e.g. a worker).
    #[must_use]
    pub fn for_stream(seed: u64, stream: u64) -> Self {
        let mut mixer = Self::new(seed ^ stream.wrapping_add(1).wrapping_mul(Self::GAMMA));
        Self::new(mixer.next_u64())
    }
}

impl RandomSource for SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(Self::GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// Replays a fixed list of values, cycling when exhausted.
///
/// `below(bound)` on a replayed value `v` yields `v % bound`, so tests can
/// script exact choices.
#[derive(Debug, Clone)]
pub struct Sequence {
    values: Vec<u64>,
    pos: usize,
}

impl Sequence {
    /// Creates a replaying source. An empty list always yields 0.
    #[must_use]
    pub fn new(values: Vec<u64>) -> Self {
        Self { values, pos: 0 }
    }
}

impl RandomSource for Sequence {
    fn next_u64(&mut self) -> u64 {
        if self.values.is_empty() {
            return 0;
        }
        let v = self.values[self.pos % self.values.len()];
        self.pos += 1;
        v
    }

    fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }
}
