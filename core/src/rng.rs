//! Deterministic random number generation for demo data.
//!
//! RULE: Demo seeding never calls a platform RNG. All randomness flows
//! through DemoRng streams derived from one seed, so the same seed always
//! produces the same players, sessions and payments.
//!
//! Each stream is seeded from (seed XOR slot * golden-ratio constant):
//!   - Adding a new stream never changes existing streams.
//!   - Each stream is reproducible in isolation.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct DemoRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl DemoRng {
    pub fn new(seed: u64, slot: DemoSlot) -> Self {
        let derived = seed ^ (slot as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            name: slot.name(),
            inner: Pcg64Mcg::seed_from_u64(derived),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n). Returns 0 for n == 0.
    pub fn below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        self.inner.next_u64() % n
    }

    /// Roll an i64 in [lo, hi].
    pub fn between(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        lo + self.below((hi - lo) as u64 + 1) as i64
    }

    /// Bernoulli trial: true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.get(self.below(items.len() as u64) as usize)
    }

    /// `k` distinct indices from `0..n`, in ascending order.
    pub fn sample_indices(&mut self, n: usize, k: usize) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..n).collect();
        let k = k.min(n);
        for i in 0..k {
            let j = i + self.below((n - i) as u64) as usize;
            pool.swap(i, j);
        }
        let mut chosen = pool[..k].to_vec();
        chosen.sort_unstable();
        chosen
    }
}

/// Stable stream assignments.
/// NEVER reorder or remove entries. Only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum DemoSlot {
    Players = 0,
    Sessions = 1,
    Payments = 2,
}

impl DemoSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Players => "players",
            Self::Sessions => "sessions",
            Self::Payments => "payments",
        }
    }
}
