use std::io::Cursor;
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use super::request::GenerationRequest;
use crate::error::Result;

/// A decoded image together with the seed of the iteration that produced it.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub pixels: RgbImage,
    pub seed: u32,
}

impl ImageArtifact {
    pub fn new(pixels: RgbImage, seed: u32) -> Self {
        Self { pixels, seed }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.pixels.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    pub fn to_base64_png(&self) -> Result<String> {
        Ok(STANDARD.encode(self.to_png_bytes()?))
    }
}

/// Low-resolution look at an in-flight prior step, one image per batch element.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub step: usize,
    pub total_steps: usize,
    pub timestep: f64,
    pub images: Vec<RgbImage>,
}

/// Everything one orchestrated call produced, in request order.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    pub images: Vec<ImageArtifact>,
    pub seeds: Vec<u32>,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    #[serde(flatten)]
    pub request: GenerationRequest,
    #[serde(default = "default_randomize")]
    pub randomize_seed: bool,
}

fn default_randomize() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub seed: u32,
    pub seeds: Vec<u32>,
    pub images: Vec<String>, // Base64 encoded PNG
    pub files: Vec<String>,
}

impl RunResponse {
    pub fn from_outcome(outcome: &GenerationOutcome) -> Result<Self> {
        let images = outcome
            .images
            .iter()
            .map(ImageArtifact::to_base64_png)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            seed: outcome.seeds.first().copied().unwrap_or_default(),
            seeds: outcome.seeds.clone(),
            images,
            files: outcome
                .files
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_encoding_signature() {
        let artifact = ImageArtifact::new(RgbImage::new(8, 4), 7);
        let bytes = artifact.to_png_bytes().unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(artifact.width(), 8);
        assert_eq!(artifact.height(), 4);
    }

    #[test]
    fn test_run_request_randomizes_by_default() {
        let run: RunRequest = serde_json::from_str(r#"{"prompt": "a red cube", "seed": 42}"#).unwrap();
        assert!(run.randomize_seed);
        assert_eq!(run.request.seed, 42);

        let run: RunRequest =
            serde_json::from_str(r#"{"prompt": "a red cube", "randomize_seed": false}"#).unwrap();
        assert!(!run.randomize_seed);
    }

    #[test]
    fn test_run_response_from_outcome() {
        let outcome = GenerationOutcome {
            images: vec![ImageArtifact::new(RgbImage::new(2, 2), 42)],
            seeds: vec![42],
            files: vec![PathBuf::from("outputs/a.png")],
        };
        let response = RunResponse::from_outcome(&outcome).unwrap();
        assert_eq!(response.seed, 42);
        assert_eq!(response.images.len(), 1);
        assert_eq!(response.files, vec!["outputs/a.png".to_string()]);
    }
}
