//! Seed resolution and seeded generators.
//!
//! A [`Seed`] fully determines the [`RandomGenerator`] that one stage call
//! consumes. The [`SeedController`] owns the ambient source used whenever a
//! fresh seed has to be drawn; that source keeps its state across requests.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256StarStar;

use crate::models::MAX_SEED;

pub type Seed = u32;

/// Deterministic stream bound to one seed.
///
/// The prior and decoder stages of one image share a single instance, so the
/// second stage continues the stream where the first left it.
pub struct RandomGenerator {
    seed: Seed,
    rng: Xoshiro256StarStar,
    calls_count: u64,
}

impl RandomGenerator {
    #[must_use]
    pub fn new(seed: Seed) -> Self {
        Self {
            seed,
            rng: Xoshiro256StarStar::seed_from_u64(u64::from(seed)),
            calls_count: 0,
        }
    }

    #[must_use]
    pub fn seed(&self) -> Seed {
        self.seed
    }

    /// Number of values drawn so far.
    #[must_use]
    pub fn calls_count(&self) -> u64 {
        self.calls_count
    }

    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.calls_count += 1;
        self.rng.gen_range(range)
    }

    /// One sample from N(0, 1).
    pub fn standard_normal(&mut self) -> f32 {
        self.calls_count += 1;
        self.rng.sample(StandardNormal)
    }

    pub fn fill_standard_normal(&mut self, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.standard_normal()).collect()
    }
}

pub struct SeedController {
    ambient: Box<dyn RngCore + Send>,
}

impl Default for SeedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedController {
    /// Controller drawing from an entropy-seeded source.
    pub fn new() -> Self {
        Self {
            ambient: Box::new(StdRng::from_entropy()),
        }
    }

    /// Controller whose draws are reproducible from `source_seed`.
    pub fn with_source_seed(source_seed: u64) -> Self {
        Self {
            ambient: Box::new(Xoshiro256StarStar::seed_from_u64(source_seed)),
        }
    }

    /// Returns `requested` unless `randomize` asks for a fresh draw.
    pub fn resolve(&mut self, requested: Seed, randomize: bool) -> Seed {
        if randomize {
            self.draw()
        } else {
            requested
        }
    }

    /// Uniform seed in `[0, MAX_SEED]`.
    pub fn draw(&mut self) -> Seed {
        self.ambient.gen_range(0..=MAX_SEED)
    }
}
