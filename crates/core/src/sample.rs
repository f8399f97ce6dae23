use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;

/// Picks `sample_size` row indices out of `total` using systematic sampling
/// with a seeded random start, topping up with seeded random picks when the
/// stride does not yield enough. The seed makes review selections
/// reproducible.
pub fn sample_rows(total: usize, sample_size: usize, seed: u64) -> Vec<usize> {
    if sample_size == 0 {
        return Vec::new();
    }
    if total <= sample_size {
        return (0..total).collect();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let step = total / sample_size;
    let start = rng.gen_range(0..step);

    let mut chosen: Vec<usize> = Vec::with_capacity(sample_size);
    let mut taken: FxHashSet<usize> = FxHashSet::default();
    let mut idx = start;
    while idx < total && chosen.len() < sample_size {
        chosen.push(idx);
        taken.insert(idx);
        idx += step;
    }

    while chosen.len() < sample_size {
        let candidate = rng.gen_range(0..total);
        if taken.insert(candidate) {
            chosen.push(candidate);
        }
    }

    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_inputs_return_everything() {
        assert_eq!(sample_rows(3, 10, 42), vec![0, 1, 2]);
    }

    #[test]
    fn same_seed_same_selection() {
        let a = sample_rows(1000, 100, 7);
        let b = sample_rows(1000, 100, 7);
        assert_eq!(a, b);
        assert_eq!(a.len(), 100);
    }

    #[test]
    fn different_seeds_usually_differ() {
        let a = sample_rows(1000, 100, 7);
        let b = sample_rows(1000, 100, 8);
        assert_ne!(a, b);
    }

    #[test]
    fn indices_are_unique_and_in_range() {
        let picked = sample_rows(57, 20, 3);
        assert_eq!(picked.len(), 20);
        let unique: FxHashSet<usize> = picked.iter().copied().collect();
        assert_eq!(unique.len(), picked.len());
        assert!(picked.iter().all(|&i| i < 57));
    }
}
