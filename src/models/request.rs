use serde::{Deserialize, Serialize};

use super::common::{
    IMAGE_SIZE_STEP, MAX_BATCH_SIZE, MAX_GUIDANCE_SCALE, MAX_IMAGES_PER_PROMPT, MAX_IMAGE_SIZE,
    MAX_INFERENCE_STEPS, MAX_SEED, MIN_IMAGE_SIZE,
};
use crate::error::{CascadeError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default)]
    pub seed: u32,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub prior_num_inference_steps: u32,
    #[serde(default = "default_prior_guidance")]
    pub prior_guidance_scale: f32,
    #[serde(default = "default_steps")]
    pub decoder_num_inference_steps: u32,
    #[serde(default)]
    pub decoder_guidance_scale: f32,
    #[serde(default = "default_one")]
    pub batch_size_per_prompt: u32,
    #[serde(default = "default_one")]
    pub number_of_images_per_prompt: u32,
}

fn default_dimension() -> u32 {
    1024
}

fn default_steps() -> u32 {
    20
}

fn default_prior_guidance() -> f32 {
    4.0
}

fn default_one() -> u32 {
    1
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            seed: 0,
            width: default_dimension(),
            height: default_dimension(),
            prior_num_inference_steps: default_steps(),
            prior_guidance_scale: default_prior_guidance(),
            decoder_num_inference_steps: default_steps(),
            decoder_guidance_scale: 0.0,
            batch_size_per_prompt: 1,
            number_of_images_per_prompt: 1,
        }
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = negative_prompt.into();
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_prior(mut self, steps: u32, guidance_scale: f32) -> Self {
        self.prior_num_inference_steps = steps;
        self.prior_guidance_scale = guidance_scale;
        self
    }

    pub fn with_decoder(mut self, steps: u32, guidance_scale: f32) -> Self {
        self.decoder_num_inference_steps = steps;
        self.decoder_guidance_scale = guidance_scale;
        self
    }

    pub fn with_batch(mut self, batch_size_per_prompt: u32, number_of_images_per_prompt: u32) -> Self {
        self.batch_size_per_prompt = batch_size_per_prompt;
        self.number_of_images_per_prompt = number_of_images_per_prompt;
        self
    }

    /// Total images a successful call returns.
    pub fn expected_images(&self) -> usize {
        self.batch_size_per_prompt as usize * self.number_of_images_per_prompt as usize
    }

    /// Checks every bound the request form enforces.
    pub fn validate(&self) -> Result<()> {
        validate_dimensions(self.width, self.height)?;
        check_range("seed", self.seed, 0, MAX_SEED)?;
        check_range("prior_num_inference_steps", self.prior_num_inference_steps, 1, MAX_INFERENCE_STEPS)?;
        check_range(
            "decoder_num_inference_steps",
            self.decoder_num_inference_steps,
            1,
            MAX_INFERENCE_STEPS,
        )?;
        check_guidance("prior_guidance_scale", self.prior_guidance_scale)?;
        check_guidance("decoder_guidance_scale", self.decoder_guidance_scale)?;
        check_range("batch_size_per_prompt", self.batch_size_per_prompt, 1, MAX_BATCH_SIZE)?;
        check_range(
            "number_of_images_per_prompt",
            self.number_of_images_per_prompt,
            1,
            MAX_IMAGES_PER_PROMPT,
        )?;
        Ok(())
    }
}

/// Width and height must each lie in [512, 2048] and be multiples of 64.
pub fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    for (name, value) in [("width", width), ("height", height)] {
        if !(MIN_IMAGE_SIZE..=MAX_IMAGE_SIZE).contains(&value) {
            return Err(CascadeError::ValidationError(format!(
                "{} {} outside [{}, {}]",
                name, value, MIN_IMAGE_SIZE, MAX_IMAGE_SIZE
            )));
        }
        if value % IMAGE_SIZE_STEP != 0 {
            return Err(CascadeError::ValidationError(format!(
                "{} {} is not a multiple of {}",
                name, value, IMAGE_SIZE_STEP
            )));
        }
    }
    Ok(())
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(CascadeError::ValidationError(format!(
            "{} {} outside [{}, {}]",
            name, value, min, max
        )))
    }
}

fn check_guidance(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && (0.0..=MAX_GUIDANCE_SCALE).contains(&value) {
        Ok(())
    } else {
        Err(CascadeError::ValidationError(format!(
            "{} {} outside [0, {}]",
            name, value, MAX_GUIDANCE_SCALE
        )))
    }
}
