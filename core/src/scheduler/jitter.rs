//! Deterministic retry jitter (§4.1 "Retry logic", P2): a uniform sample in
//! `[0.8, 1.2]` seeded by `(task_name, consecutive_failures)` so replays with
//! the same inputs reproduce the same delay, unlike `rand::thread_rng()`.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use std::hash::{Hash, Hasher};

fn seed_for(task_name: &str, consecutive_failures: u32) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    task_name.hash(&mut hasher);
    consecutive_failures.hash(&mut hasher);
    hasher.finish()
}

/// Multiplier in `[0.8, 1.2]`, deterministic for a given `(task_name,
/// consecutive_failures)` pair.
pub fn jitter_multiplier(task_name: &str, consecutive_failures: u32) -> f64 {
    let mut rng = Pcg32::seed_from_u64(seed_for(task_name, consecutive_failures));
    rng.gen_range(0.8..=1.2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_reproduce_same_jitter() {
        let a = jitter_multiplier("daily_research", 2);
        let b = jitter_multiplier("daily_research", 2);
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_usually_differ() {
        let a = jitter_multiplier("daily_research", 1);
        let b = jitter_multiplier("daily_research", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn stays_within_bounds() {
        for n in 0..50 {
            let m = jitter_multiplier("task", n);
            assert!((0.8..=1.2).contains(&m));
        }
    }
}
