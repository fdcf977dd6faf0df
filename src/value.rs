use rand::{Rng, SeedableRng, rngs::StdRng};

/// Source of the random choices a run makes (URL selection, randomized
/// batch sizes).
///
/// Implementations must be deterministic for a given seed so that two runs
/// with the same configuration pick the same URLs in the same order.
pub trait ValueProvider: Send {
    /// Returns a value in `0..upper`. An `upper` of zero yields zero.
    fn random_int(&mut self, upper: usize) -> usize;
}

/// The default [`ValueProvider`], backed by a seeded [`StdRng`].
#[derive(Debug, Clone)]
pub struct SeededValueProvider {
    rng: StdRng,
}

impl SeededValueProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ValueProvider for SeededValueProvider {
    fn random_int(&mut self, upper: usize) -> usize {
        if upper == 0 {
            return 0;
        }
        self.rng.random_range(0..upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SeededValueProvider::new(42);
        let mut b = SeededValueProvider::new(42);
        let xs: Vec<usize> = (0..64).map(|_| a.random_int(7)).collect();
        let ys: Vec<usize> = (0..64).map(|_| b.random_int(7)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn stays_below_upper_bound() {
        let mut values = SeededValueProvider::new(7);
        for upper in 1..20 {
            for _ in 0..50 {
                assert!(values.random_int(upper) < upper);
            }
        }
    }

    #[test]
    fn zero_upper_returns_zero() {
        let mut values = SeededValueProvider::new(1);
        assert_eq!(values.random_int(0), 0);
    }
}
