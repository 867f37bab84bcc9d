use crate::error::{CascadeError, Result};
use crate::models::{GenerationRequest, ImageArtifact, TimestepSchedule};
use crate::preview::{PreviewExtractor, PreviewSink};
use crate::seed::{RandomGenerator, Seed};
use crate::stages::{DecoderParams, DecoderStage, PriorParams, PriorStage};

/// Runs prior then decoder for one seed.
pub struct StageInvoker<'a> {
    prior: &'a dyn PriorStage,
    decoder: &'a dyn DecoderStage,
    previewer: Option<&'a PreviewExtractor>,
    timesteps: &'a TimestepSchedule,
}

impl<'a> StageInvoker<'a> {
    pub fn new(
        prior: &'a dyn PriorStage,
        decoder: &'a dyn DecoderStage,
        previewer: Option<&'a PreviewExtractor>,
        timesteps: &'a TimestepSchedule,
    ) -> Self {
        Self {
            prior,
            decoder,
            previewer,
            timesteps,
        }
    }

    /// Produces `batch_size_per_prompt` images. Stage errors are returned untouched.
    pub fn run(
        &self,
        request: &GenerationRequest,
        seed: Seed,
        sink: &mut dyn PreviewSink,
    ) -> Result<Vec<ImageArtifact>> {
        // One generator for both stages; the decoder continues the prior's stream.
        let mut generator = RandomGenerator::new(seed);

        let prior_params = PriorParams {
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            width: request.width,
            height: request.height,
            num_inference_steps: request.prior_num_inference_steps,
            timesteps: self.timesteps,
            guidance_scale: request.prior_guidance_scale,
            num_images_per_prompt: request.batch_size_per_prompt,
        };

        let embedding = {
            let mut solver = self.prior.start(prior_params, &mut generator)?;
            let total = self.timesteps.len();
            if solver.total_steps() != total {
                return Err(CascadeError::StageError(format!(
                    "prior plans {} steps for a {}-step schedule",
                    solver.total_steps(),
                    total
                )));
            }
            if let Some(previewer) = self.previewer {
                for _ in 0..total {
                    let latent = solver.next_latent()?.ok_or_else(|| {
                        CascadeError::StageError(format!(
                            "prior ended before the {}-step schedule",
                            total
                        ))
                    })?;
                    sink.on_preview(previewer.project(&latent, total)?);
                }
                if solver.next_latent()?.is_some() {
                    return Err(CascadeError::StageError(format!(
                        "prior yielded more than the {}-step schedule",
                        total
                    )));
                }
            }
            solver.finish()?
        };
        log::debug!(
            "🧬 Prior produced embedding {:?} for seed {}",
            embedding.tensor.shape(),
            seed
        );

        let decoder_params = DecoderParams {
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            num_inference_steps: request.decoder_num_inference_steps,
            guidance_scale: request.decoder_guidance_scale,
        };
        let images = self.decoder.decode(embedding, decoder_params, &mut generator)?;

        Ok(images
            .into_iter()
            .map(|pixels| ImageArtifact::new(pixels, seed))
            .collect())
    }
}
