//! Contracts of the two external stages.
//!
//! The prior stage is started once per image and hands back a [`PriorSolver`],
//! a lazy sequence of solver states ending in an [`ImageEmbedding`]. The
//! decoder turns that embedding into pixels. Both stages draw from the same
//! [`RandomGenerator`] for one image.

pub mod synthetic;

use image::RgbImage;

use crate::error::Result;
use crate::models::{ImageEmbedding, LatentState, TimestepSchedule};
use crate::resources::ManagedStage;
use crate::seed::RandomGenerator;

#[derive(Debug, Clone)]
pub struct PriorParams<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub timesteps: &'a TimestepSchedule,
    pub guidance_scale: f32,
    pub num_images_per_prompt: u32,
}

#[derive(Debug, Clone)]
pub struct DecoderParams<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
}

/// In-flight prior solve. Not restartable: once a state has been yielded it is gone.
pub trait PriorSolver {
    /// Number of states the solver yields before finishing; must equal the schedule length.
    fn total_steps(&self) -> usize;

    /// Runs the next solver step. `None` once the schedule is exhausted.
    fn next_latent(&mut self) -> Result<Option<LatentState>>;

    /// Runs any remaining steps and returns the final embedding.
    fn finish(self: Box<Self>) -> Result<ImageEmbedding>;
}

pub trait PriorStage: ManagedStage {
    /// Implementations reject invalid dimensions with `ValidationError` and
    /// report device memory exhaustion as `ResourceExhausted`.
    fn start<'a>(
        &'a self,
        params: PriorParams<'a>,
        generator: &'a mut RandomGenerator,
    ) -> Result<Box<dyn PriorSolver + 'a>>;
}

pub trait DecoderStage: ManagedStage {
    /// Returns one image per embedding batch element.
    fn decode(
        &self,
        embedding: ImageEmbedding,
        params: DecoderParams<'_>,
        generator: &mut RandomGenerator,
    ) -> Result<Vec<RgbImage>>;
}
