use rand::Rng;
use rand_distr::{Distribution, Uniform};

use super::{ParamGen, Result};

/// Draws every weight independently from `distribution`.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: R,
    distribution: D,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    pub fn new(rng: R, distribution: D) -> Self {
        Self { rng, distribution }
    }
}

impl<R: Rng> RandParamGen<R, Uniform<f32>> {
    /// Creates a new `RandParamGen` drawing from `[low, high)`.
    ///
    /// # Errors
    /// A `RandErr` if the range is empty or not finite.
    pub fn uniform(rng: R, low: f32, high: f32) -> Result<Self> {
        Ok(Self::new(rng, Uniform::new(low, high)?))
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn init(&mut self, weights: &mut [f32]) {
        for w in weights {
            *w = self.distribution.sample(&mut self.rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn seeded(seed: u64, low: f32, high: f32) -> Result<RandParamGen<StdRng, Uniform<f32>>> {
        RandParamGen::uniform(StdRng::seed_from_u64(seed), low, high)
    }

    #[test]
    fn stays_in_range() {
        let weights = seeded(42, -0.5, 0.5).unwrap().generate(100);

        assert_eq!(weights.len(), 100);
        assert!(weights.iter().all(|w| (-0.5..0.5).contains(w)));
    }

    #[test]
    fn same_seed_same_weights() {
        let generate = |seed| seeded(seed, 0., 1.).unwrap().generate(16);

        assert_eq!(generate(7), generate(7));
        assert_ne!(generate(7), generate(8));
    }

    #[test]
    fn empty_range_is_rejected() {
        assert!(seeded(0, 1., 1.).is_err());
    }
}
