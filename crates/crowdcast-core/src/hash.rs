//! Deterministic sampling primitives.
//!
//! Every probabilistic decision in the platform is expressed as a comparison
//! against a Blake2b digest of a stable, colon-joined seed string. This keeps
//! persona behaviour reproducible across restarts and worker instances: the
//! same `(message_id, persona_id)` pair always lands on the same side of a
//! threshold, no matter which process evaluates it.

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};

/// 8-byte Blake2b digest of `seed`, interpreted big-endian.
fn digest_u64(seed: &str) -> u64 {
    let mut hasher = Blake2b::<U8>::new();
    hasher.update(seed.as_bytes());
    let digest: [u8; 8] = hasher.finalize().into();
    u64::from_be_bytes(digest)
}

/// Map a seed string to a value in `[0, 1)`.
pub fn unit_interval(seed: &str) -> f64 {
    digest_u64(seed) as f64 / 2f64.powi(64)
}

/// Map a seed string to an index in `[0, modulo)`. Returns 0 when `modulo` is 0.
pub fn index(seed: &str, modulo: usize) -> usize {
    if modulo == 0 {
        return 0;
    }
    (digest_u64(seed) % modulo as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_interval_is_in_range() {
        for seed in ["a", "msg-1:persona-1", "", "obs:room:demo:clipgoblin"] {
            let v = unit_interval(seed);
            assert!((0.0..1.0).contains(&v), "{seed} -> {v}");
        }
    }

    #[test]
    fn unit_interval_is_stable() {
        let a = unit_interval("msg-1:clipgoblin");
        let b = unit_interval("msg-1:clipgoblin");
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_diverge() {
        assert_ne!(unit_interval("msg-1:a"), unit_interval("msg-1:b"));
    }

    #[test]
    fn index_respects_modulo() {
        for m in 1..20 {
            assert!(index("seed", m) < m);
        }
        assert_eq!(index("seed", 0), 0);
    }
}
