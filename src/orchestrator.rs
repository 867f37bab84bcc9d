use crate::error::Result;
use crate::logger;
use crate::models::{GenerationOutcome, GenerationRequest};
use crate::persist::OutputPersister;
use crate::preview::{LogPreviewSink, PreviewSink};
use crate::seed::{Seed, SeedController};
use crate::service::CascadeService;

/// Entry point for one "run" call: seeds, stages and persistence per image.
///
/// Only the first image of a call is tied to the resolved seed; every later
/// image draws a fresh seed from the controller, whatever `randomize_seed`
/// said.
pub struct GenerationOrchestrator<'s> {
    service: &'s CascadeService,
    seeds: SeedController,
    persister: OutputPersister,
}

impl<'s> GenerationOrchestrator<'s> {
    pub fn new(service: &'s CascadeService, seeds: SeedController, persister: OutputPersister) -> Self {
        Self {
            service,
            seeds,
            persister,
        }
    }

    pub fn run(&mut self, request: &GenerationRequest, randomize_seed: bool) -> Result<GenerationOutcome> {
        self.run_with_previews(request, randomize_seed, &mut LogPreviewSink)
    }

    pub fn run_with_previews(
        &mut self,
        request: &GenerationRequest,
        randomize_seed: bool,
        sink: &mut dyn PreviewSink,
    ) -> Result<GenerationOutcome> {
        let seed = self.seeds.resolve(request.seed, randomize_seed);
        self.generate(request, seed, sink)
    }

    /// Runs the per-image loop starting from an already resolved seed.
    pub fn generate(
        &mut self,
        request: &GenerationRequest,
        first_seed: Seed,
        sink: &mut dyn PreviewSink,
    ) -> Result<GenerationOutcome> {
        let _timer = logger::timer("generation request");
        let invoker = self.service.invoker()?;
        let mut outcome = GenerationOutcome::default();

        log::info!(
            "🎨 Generating {} x {} image(s) at {}x{} for prompt: {}",
            request.number_of_images_per_prompt,
            request.batch_size_per_prompt,
            request.width,
            request.height,
            request.prompt
        );

        let mut seed = first_seed;
        for i in 0..request.number_of_images_per_prompt {
            if i > 0 {
                seed = self.seeds.draw();
            }
            log::info!(
                "🌱 Image {}/{} with seed {}",
                i + 1,
                request.number_of_images_per_prompt,
                seed
            );

            let generated = invoker.run(request, seed, sink);
            let released = self.service.release_cached_memory();
            let images = generated?;
            released?;
            let files = self.persister.persist(&images)?;

            outcome.seeds.push(seed);
            outcome.files.extend(files);
            outcome.images.extend(images);
        }

        log::info!("✅ Generated {} image(s)", outcome.images.len());
        Ok(outcome)
    }
}
