//! Counter-derived random streams.
//!
//! Epoch `e` shuffles the training indices with a ChaCha8 generator seeded
//! from the run seed on stream `e`, so the permutation depends only on
//! `(seed, epoch)`. Posterior noise for iteration `t` uses its own key on
//! stream `t`; posterior samples drawn after training use a third key.
//! None depends on how epochs are grouped into blocks.
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

const NOISE_KEY: u64 = 0x5eed_0f_9a55;
const SAMPLE_KEY: u64 = 0x5a3b_1e_c0de;

/// Permutation of `0..n` for `epoch`.
pub fn epoch_permutation(seed: u64, epoch: usize, n: usize) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(epoch as u64);
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut rng);
    order
}

/// Generator for the posterior noise drawn at `iteration`.
pub fn noise_rng(seed: u64, iteration: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ NOISE_KEY);
    rng.set_stream(iteration as u64);
    rng
}

/// Generator for the `index`-th posterior sample of a finalization pass or
/// width sweep, independent of the training noise streams.
pub fn sample_rng(seed: u64, index: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ SAMPLE_KEY);
    rng.set_stream(index as u64);
    rng
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scope
    // -----
    // Determinism and coverage of epoch permutations.

    #[test]
    // Purpose
    // -------
    // A permutation is reproducible, covers every index once, and changes
    // with the epoch.
    //
    // Given
    // -----
    // Seed 7, `n = 50`, epochs 0 and 1.
    //
    // Expect
    // ------
    // Equal repeats, sorted output `0..50`, different epochs differ.
    fn permutation_is_reproducible_and_complete() {
        let a = epoch_permutation(7, 0, 50);
        assert_eq!(a, epoch_permutation(7, 0, 50));
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_ne!(a, epoch_permutation(7, 1, 50));
    }
}
