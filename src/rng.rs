//! Per-slot random streams.
//!
//! Every (iteration, slot) pair gets its own `SmallRng`, seeded from a SipHash-1-3
//! digest of `(master_seed, iteration, slot)` with fixed zero keys. Streams are
//! reproducible for a given master seed whatever the executor, and a slot does
//! not restart from the same state in every iteration.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// Derives the seed of slot `slot` in iteration `iteration`.
pub fn derive_seed(master_seed: u64, iteration: usize, slot: usize) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_u64(iteration as u64);
    hasher.write_u64(slot as u64);
    hasher.finish()
}

pub(crate) fn slot_rng(master_seed: u64, iteration: usize, slot: usize) -> SmallRng {
    SmallRng::seed_from_u64(derive_seed(master_seed, iteration, slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn seeds_are_deterministic() {
        assert_eq!(derive_seed(42, 3, 7), derive_seed(42, 3, 7));
        let a: u64 = slot_rng(42, 1, 0).gen();
        let b: u64 = slot_rng(42, 1, 0).gen();
        assert_eq!(a, b);
    }

    #[test]
    fn seeds_differ_across_iterations_and_slots() {
        let base = derive_seed(42, 0, 0);
        assert_ne!(base, derive_seed(42, 1, 0));
        assert_ne!(base, derive_seed(42, 0, 1));
        assert_ne!(base, derive_seed(43, 0, 0));
        // (iteration, slot) must not collapse into their sum
        assert_ne!(derive_seed(42, 1, 2), derive_seed(42, 2, 1));
    }
}
