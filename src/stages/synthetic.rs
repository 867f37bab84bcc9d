//! Deterministic stand-in stages.
//!
//! They honour the prior and decoder contracts without neural weights: the
//! prior walks seeded noise towards a prompt-derived target along the
//! schedule, the decoder colours and upsamples the embedding. Output depends
//! only on the prompt, the parameters and the generator stream, which makes
//! them suitable for dry runs and for exercising the orchestration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use super::{DecoderParams, DecoderStage, PriorParams, PriorSolver, PriorStage};
use crate::error::{CascadeError, Result};
use crate::models::{validate_dimensions, ImageEmbedding, LatentState, StageKind, Tensor4};
use crate::resources::{DeviceMemory, ManagedStage, StageDirective, StageStatus};
use crate::seed::RandomGenerator;

pub const LATENT_CHANNELS: usize = 16;
/// Pixels per latent cell along each axis.
pub const LATENT_COMPRESSION: u32 = 32;
const DECODER_NOISE_BLOCK: u32 = 8;

pub struct SyntheticPrior {
    status: StageStatus,
}

impl Default for SyntheticPrior {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticPrior {
    pub fn new() -> Self {
        Self {
            status: StageStatus::new(StageKind::Prior),
        }
    }
}

impl ManagedStage for SyntheticPrior {
    fn kind(&self) -> StageKind {
        StageKind::Prior
    }

    fn configure(&mut self, directive: StageDirective) -> Result<()> {
        self.status.record(directive)
    }

    fn status(&self) -> StageStatus {
        self.status.clone()
    }
}

impl PriorStage for SyntheticPrior {
    fn start<'a>(
        &'a self,
        params: PriorParams<'a>,
        generator: &'a mut RandomGenerator,
    ) -> Result<Box<dyn PriorSolver + 'a>> {
        validate_dimensions(params.width, params.height)?;
        if params.num_images_per_prompt == 0 {
            return Err(CascadeError::ValidationError(
                "num_images_per_prompt must be at least 1".into(),
            ));
        }
        if params.timesteps.is_empty() {
            return Err(CascadeError::ValidationError("empty timestep schedule".into()));
        }

        let shape = [
            params.num_images_per_prompt as usize,
            LATENT_CHANNELS,
            (params.height / LATENT_COMPRESSION) as usize,
            (params.width / LATENT_COMPRESSION) as usize,
        ];
        let noise = generator.fill_standard_normal(shape.iter().product());
        let target = conditioning(params.prompt, params.negative_prompt, params.guidance_scale);

        Ok(Box::new(SyntheticSolver {
            timesteps: params.timesteps.as_slice(),
            generator,
            shape,
            current: noise.clone(),
            noise,
            target,
            step: 0,
        }))
    }
}

struct SyntheticSolver<'a> {
    timesteps: &'a [f64],
    generator: &'a mut RandomGenerator,
    shape: [usize; 4],
    noise: Vec<f32>,
    current: Vec<f32>,
    target: Vec<f32>,
    step: usize,
}

impl PriorSolver for SyntheticSolver<'_> {
    fn total_steps(&self) -> usize {
        self.timesteps.len()
    }

    fn next_latent(&mut self) -> Result<Option<LatentState>> {
        let Some(&timestep) = self.timesteps.get(self.step) else {
            return Ok(None);
        };
        let t = timestep as f32;
        let plane = self.shape[2] * self.shape[3];

        for (idx, value) in self.current.iter_mut().enumerate() {
            let channel = (idx / plane) % LATENT_CHANNELS;
            let jitter = self.generator.standard_normal() * 0.05 * t;
            *value = t * self.noise[idx] + (1.0 - t) * self.target[channel] + jitter;
        }

        let state = LatentState {
            step: self.step,
            timestep,
            tensor: Tensor4::new(self.shape, self.current.clone())?,
        };
        self.step += 1;
        Ok(Some(state))
    }

    fn finish(mut self: Box<Self>) -> Result<ImageEmbedding> {
        while self.next_latent()?.is_some() {}
        Ok(ImageEmbedding {
            tensor: Tensor4::new(self.shape, std::mem::take(&mut self.current))?,
        })
    }
}

/// Per-channel target in [-1, 1], pushed away from the negative prompt by the guidance scale.
fn conditioning(prompt: &str, negative_prompt: &str, guidance_scale: f32) -> Vec<f32> {
    (0..LATENT_CHANNELS)
        .map(|c| {
            let positive = hash_unit(prompt, c);
            let negative = hash_unit(negative_prompt, c);
            (positive + guidance_scale * (positive - negative) * 0.1).clamp(-1.0, 1.0)
        })
        .collect()
}

fn hash_unit(text: &str, channel: usize) -> f32 {
    // FNV-1a, stable across builds.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes().chain((channel as u64).to_le_bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0
}

pub struct SyntheticDecoder {
    status: StageStatus,
    pixel_budget: Option<u64>,
}

impl Default for SyntheticDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDecoder {
    pub fn new() -> Self {
        Self {
            status: StageStatus::new(StageKind::Decoder),
            pixel_budget: None,
        }
    }

    /// Fails with `ResourceExhausted` when one call would produce more pixels than `budget`.
    pub fn with_pixel_budget(mut self, budget: u64) -> Self {
        self.pixel_budget = Some(budget);
        self
    }
}

impl ManagedStage for SyntheticDecoder {
    fn kind(&self) -> StageKind {
        StageKind::Decoder
    }

    fn configure(&mut self, directive: StageDirective) -> Result<()> {
        self.status.record(directive)
    }

    fn status(&self) -> StageStatus {
        self.status.clone()
    }
}

impl DecoderStage for SyntheticDecoder {
    fn decode(
        &self,
        embedding: ImageEmbedding,
        params: DecoderParams<'_>,
        generator: &mut RandomGenerator,
    ) -> Result<Vec<RgbImage>> {
        if params.num_inference_steps == 0 {
            return Err(CascadeError::ValidationError(
                "decoder needs at least one inference step".into(),
            ));
        }

        let tensor = &embedding.tensor;
        if tensor.channels() < 3 {
            return Err(CascadeError::StageError(format!(
                "embedding has {} channels, decoder needs at least 3",
                tensor.channels()
            )));
        }
        let (latent_w, latent_h) = (tensor.width() as u32, tensor.height() as u32);
        let (width, height) = (latent_w * LATENT_COMPRESSION, latent_h * LATENT_COMPRESSION);

        let pixels = tensor.batch() as u64 * u64::from(width) * u64::from(height);
        if let Some(budget) = self.pixel_budget {
            if pixels > budget {
                return Err(CascadeError::ResourceExhausted(format!(
                    "decoding {} pixels exceeds the device budget of {}",
                    pixels, budget
                )));
            }
        }

        let amplitude = 24.0 / params.num_inference_steps as f32 * (1.0 + params.guidance_scale * 0.1);
        let (blocks_w, blocks_h) = (width / DECODER_NOISE_BLOCK, height / DECODER_NOISE_BLOCK);

        let images = (0..tensor.batch())
            .map(|b| {
                let base = RgbImage::from_fn(latent_w, latent_h, |x, y| {
                    Rgb([0, 1, 2].map(|c| {
                        let v = tensor.get(b, c, y as usize, x as usize);
                        ((0.5 + 0.5 * v.tanh()) * 255.0).round() as u8
                    }))
                });
                let mut image = imageops::resize(&base, width, height, FilterType::Triangle);

                let grain = generator.fill_standard_normal((blocks_w * blocks_h) as usize);
                for (x, y, pixel) in image.enumerate_pixels_mut() {
                    let block = (y / DECODER_NOISE_BLOCK) * blocks_w + x / DECODER_NOISE_BLOCK;
                    let offset = grain[block as usize] * amplitude;
                    for channel in pixel.0.iter_mut() {
                        *channel = (f32::from(*channel) + offset).round().clamp(0.0, 255.0) as u8;
                    }
                }
                image
            })
            .collect();

        Ok(images)
    }
}

/// Device memory handle that only counts cache releases.
#[derive(Clone, Default)]
pub struct SyntheticDeviceMemory {
    releases: Arc<AtomicUsize>,
}

impl SyntheticDeviceMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl DeviceMemory for SyntheticDeviceMemory {
    fn release_cached(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        log::debug!("🧹 Released cached device memory");
        Ok(())
    }
}
