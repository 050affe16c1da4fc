//! Injected dependencies: time and randomness.
//!
//! Reducers never call `Utc::now()` or an RNG directly; they go through these traits
//! so tests can pin both.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::{Mutex, PoisonError};

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of uniform random subsets for the raffle draw.
///
/// Only statistical uniformity is required, not cryptographic unpredictability.
pub trait WinnerSampler: Send + Sync {
    /// Returns `min(amount, pool_len)` distinct indices in `0..pool_len`.
    ///
    /// Every subset of that size must be equally likely.
    fn sample_indices(&self, pool_len: usize, amount: usize) -> Vec<usize>;
}

/// Sampler backed by the thread-local RNG
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngSampler;

impl WinnerSampler for ThreadRngSampler {
    fn sample_indices(&self, pool_len: usize, amount: usize) -> Vec<usize> {
        let amount = amount.min(pool_len);
        rand::seq::index::sample(&mut rand::thread_rng(), pool_len, amount).into_vec()
    }
}

/// Reproducible sampler backed by a seeded `StdRng`
#[derive(Debug)]
pub struct SeededSampler {
    rng: Mutex<StdRng>,
}

impl SeededSampler {
    /// Creates a sampler from a fixed seed
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl WinnerSampler for SeededSampler {
    fn sample_indices(&self, pool_len: usize, amount: usize) -> Vec<usize> {
        let amount = amount.min(pool_len);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rand::seq::index::sample(&mut *rng, pool_len, amount).into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn samples_are_distinct_and_in_range() {
        let sampler = ThreadRngSampler;
        for _ in 0..100 {
            let picked = sampler.sample_indices(10, 4);
            assert_eq!(picked.len(), 4);
            let unique: HashSet<_> = picked.iter().copied().collect();
            assert_eq!(unique.len(), 4);
            assert!(picked.iter().all(|&i| i < 10));
        }
    }

    #[test]
    fn amount_is_capped_at_pool_size() {
        assert_eq!(ThreadRngSampler.sample_indices(3, 5).len(), 3);
        assert!(ThreadRngSampler.sample_indices(0, 5).is_empty());
    }

    #[test]
    fn seeded_sampler_is_reproducible() {
        let a = SeededSampler::new(7);
        let b = SeededSampler::new(7);
        for _ in 0..10 {
            assert_eq!(a.sample_indices(50, 5), b.sample_indices(50, 5));
        }
    }
}
