use rand::distributions::Uniform;
use rand::prelude::*;
use rand::rngs::StdRng;

/// Seeded source of random long-only, fully-invested weight vectors.
///
/// Each vector is `n` independent draws from `Uniform[0, 1)` divided by their sum.
/// The generator is owned by the sampler, so two samplers built from the same seed
/// produce the same sequence of vectors.
#[derive(Debug, Clone)]
pub struct WeightSampler {
    rng: StdRng,
    uniform: Uniform<f64>,
}

impl WeightSampler {
    pub fn new(seed: u64) -> Self {
        WeightSampler {
            rng: StdRng::seed_from_u64(seed),
            uniform: Uniform::new(0., 1.),
        }
    }

    /// sample
    ///
    /// Returns a vector of `assets` non-negative weights summing to one.
    /// `assets` must be at least 1 (validated by the engine before sampling starts).
    pub fn sample(&mut self, assets: usize) -> Vec<f64> {
        loop {
            let mut weights = (&mut self.rng)
                .sample_iter(self.uniform)
                .take(assets)
                .collect::<Vec<f64>>();
            let magnitude = weights.iter().sum::<f64>();

            // all draws landed exactly on 0.0, nothing to normalize
            if magnitude <= 0. {
                continue;
            }

            weights.iter_mut().for_each(|x| *x /= magnitude);
            return weights;
        }
    }
}
