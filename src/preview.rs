//! Live previews of the prior solver.
//!
//! The previewer is a per-pixel linear projection from latent channels to RGB,
//! followed by an upscale. Its weights are loaded once and never change.

use std::fs;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::config::PreviewConfig;
use crate::error::{CascadeError, Result};
use crate::models::{LatentState, PreviewFrame};

/// Projection weights: one RGB row per latent channel, plus bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewerWeights {
    pub coefficients: Vec<[f32; 3]>,
    pub bias: [f32; 3],
    #[serde(default = "default_upscale")]
    pub upscale: u32,
}

/// Largest preview upscale factor accepted from a weights file.
pub const MAX_PREVIEW_UPSCALE: u32 = 64;

fn default_upscale() -> u32 {
    8
}

fn check_upscale(upscale: u32) -> Result<()> {
    if (1..=MAX_PREVIEW_UPSCALE).contains(&upscale) {
        Ok(())
    } else {
        Err(CascadeError::PreviewError(format!(
            "upscale {} outside [1, {}]",
            upscale, MAX_PREVIEW_UPSCALE
        )))
    }
}

impl Default for PreviewerWeights {
    /// Coefficients fitted for the 16-channel prior latent space.
    #[rustfmt::skip]
    fn default() -> Self {
        Self {
            coefficients: vec![
                [-0.0326, -0.0204, -0.0127],
                [-0.1592, -0.0427,  0.0216],
                [ 0.0873,  0.0638, -0.0020],
                [-0.0602,  0.0442,  0.1304],
                [ 0.0800, -0.0313, -0.1796],
                [-0.0810, -0.0638, -0.1581],
                [ 0.1791,  0.1180,  0.0967],
                [ 0.0740,  0.1416,  0.0432],
                [-0.1745, -0.1888, -0.1373],
                [ 0.2412,  0.1577,  0.0928],
                [ 0.1908,  0.0998,  0.0682],
                [ 0.0209,  0.0365, -0.0092],
                [ 0.0448, -0.0650, -0.1728],
                [-0.1658, -0.1045, -0.1308],
                [ 0.0542,  0.1545,  0.1325],
                [-0.0352, -0.1672, -0.2541],
            ],
            bias: [0.5, 0.5, 0.5],
            upscale: default_upscale(),
        }
    }
}

impl PreviewerWeights {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let weights: PreviewerWeights = serde_json::from_str(&raw)?;
        if weights.coefficients.is_empty() {
            return Err(CascadeError::PreviewError(format!(
                "{} holds no coefficients",
                path.display()
            )));
        }
        check_upscale(weights.upscale)?;
        Ok(weights)
    }

    pub fn channels(&self) -> usize {
        self.coefficients.len()
    }
}

pub struct PreviewExtractor {
    weights: PreviewerWeights,
}

impl PreviewExtractor {
    pub fn new(weights: PreviewerWeights) -> Self {
        Self { weights }
    }

    /// Builds the extractor the configuration asks for, or `None` when previews are off.
    pub fn from_config(config: &PreviewConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let weights = match &config.weights_path {
            Some(path) => {
                log::info!("🖼️  Loading previewer weights from {}", path.display());
                PreviewerWeights::load(path)?
            }
            None => PreviewerWeights::default(),
        };
        Ok(Some(Self::new(weights)))
    }

    pub fn weights(&self) -> &PreviewerWeights {
        &self.weights
    }

    pub fn project(&self, latent: &LatentState, total_steps: usize) -> Result<PreviewFrame> {
        let tensor = &latent.tensor;
        if tensor.channels() != self.weights.channels() {
            return Err(CascadeError::PreviewError(format!(
                "latent has {} channels, previewer expects {}",
                tensor.channels(),
                self.weights.channels()
            )));
        }

        let upscale = self.weights.upscale;
        check_upscale(upscale)?;
        let (width, height) = (tensor.width() as u32, tensor.height() as u32);
        let (out_width, out_height) = width
            .checked_mul(upscale)
            .zip(height.checked_mul(upscale))
            .ok_or_else(|| {
                CascadeError::PreviewError(format!(
                    "{}x{} latent cannot be upscaled {}x",
                    width, height, upscale
                ))
            })?;
        let images = (0..tensor.batch())
            .map(|b| {
                let small = RgbImage::from_fn(width, height, |x, y| {
                    let mut rgb = self.weights.bias;
                    for (c, coef) in self.weights.coefficients.iter().enumerate() {
                        let value = tensor.get(b, c, y as usize, x as usize);
                        for (out, k) in rgb.iter_mut().zip(coef) {
                            *out += value * k;
                        }
                    }
                    Rgb(rgb.map(to_channel))
                });
                if upscale > 1 {
                    imageops::resize(&small, out_width, out_height, FilterType::Triangle)
                } else {
                    small
                }
            })
            .collect();

        Ok(PreviewFrame {
            step: latent.step,
            total_steps,
            timestep: latent.timestep,
            images,
        })
    }
}

fn to_channel(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Receives preview frames while the prior solver runs.
pub trait PreviewSink {
    fn on_preview(&mut self, frame: PreviewFrame);
}

impl<F: FnMut(PreviewFrame)> PreviewSink for F {
    fn on_preview(&mut self, frame: PreviewFrame) {
        self(frame)
    }
}

/// Sink that only reports progress through the logger.
pub struct LogPreviewSink;

impl PreviewSink for LogPreviewSink {
    fn on_preview(&mut self, frame: PreviewFrame) {
        log::debug!(
            "🔎 Preview {}/{} (t={:.3}, {} image(s))",
            frame.step + 1,
            frame.total_steps,
            frame.timestep,
            frame.images.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tensor4;

    fn latent(channels: usize, fill: f32) -> LatentState {
        LatentState {
            step: 3,
            timestep: 0.5,
            tensor: Tensor4::new([2, channels, 4, 6], vec![fill; 2 * channels * 4 * 6]).unwrap(),
        }
    }

    #[test]
    fn test_zero_latent_projects_to_bias() {
        let extractor = PreviewExtractor::new(PreviewerWeights::default());
        let frame = extractor.project(&latent(16, 0.0), 30).unwrap();
        assert_eq!(frame.step, 3);
        assert_eq!(frame.total_steps, 30);
        assert_eq!(frame.images.len(), 2);
        assert_eq!(frame.images[0].dimensions(), (48, 32));

        let unscaled = PreviewExtractor::new(PreviewerWeights {
            upscale: 1,
            ..PreviewerWeights::default()
        });
        let frame = unscaled.project(&latent(16, 0.0), 30).unwrap();
        assert_eq!(frame.images[0].dimensions(), (6, 4));
        assert_eq!(frame.images[0].get_pixel(0, 0), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_output_is_clamped() {
        let weights = PreviewerWeights {
            coefficients: vec![[1.0, -1.0, 0.0]],
            bias: [0.0, 0.0, 0.25],
            upscale: 1,
        };
        let extractor = PreviewExtractor::new(weights);
        let frame = extractor.project(&latent(1, 10.0), 30).unwrap();
        assert_eq!(frame.images[1].get_pixel(5, 3), &Rgb([255, 0, 64]));
    }

    #[test]
    fn test_channel_mismatch() {
        let extractor = PreviewExtractor::new(PreviewerWeights::default());
        assert!(matches!(
            extractor.project(&latent(4, 0.0), 30),
            Err(CascadeError::PreviewError(_))
        ));
    }

    #[test]
    fn test_weights_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("previewer.json");
        fs::write(
            &path,
            r#"{"coefficients": [[0.1, 0.2, 0.3], [0.0, 0.0, 0.0]], "bias": [0.5, 0.5, 0.5]}"#,
        )
        .unwrap();

        let config = PreviewConfig::new().with_weights(&path);
        let extractor = PreviewExtractor::from_config(&config).unwrap().unwrap();
        assert_eq!(extractor.weights().channels(), 2);
        assert_eq!(extractor.weights().upscale, 8);

        assert!(PreviewExtractor::from_config(&PreviewConfig::disabled())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_upscale_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("previewer.json");
        fs::write(
            &path,
            r#"{"coefficients": [[0.1, 0.2, 0.3]], "bias": [0.5, 0.5, 0.5], "upscale": 4000000000}"#,
        )
        .unwrap();
        assert!(matches!(
            PreviewerWeights::load(&path),
            Err(CascadeError::PreviewError(_))
        ));

        let extractor = PreviewExtractor::new(PreviewerWeights {
            upscale: u32::MAX,
            ..PreviewerWeights::default()
        });
        assert!(matches!(
            extractor.project(&latent(16, 0.0), 30),
            Err(CascadeError::PreviewError(_))
        ));

        let extractor = PreviewExtractor::new(PreviewerWeights {
            upscale: MAX_PREVIEW_UPSCALE,
            ..PreviewerWeights::default()
        });
        let frame = extractor.project(&latent(16, 0.0), 30).unwrap();
        assert_eq!(frame.images[0].dimensions(), (6 * 64, 4 * 64));
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |frame: PreviewFrame| seen.push(frame.step);
            let extractor = PreviewExtractor::new(PreviewerWeights::default());
            sink.on_preview(extractor.project(&latent(16, 0.1), 30).unwrap());
        }
        assert_eq!(seen, vec![3]);
    }
}
