use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Largest seed a request may carry (the signed 32-bit maximum).
pub const MAX_SEED: u32 = i32::MAX as u32;
pub const MIN_IMAGE_SIZE: u32 = 512;
pub const MAX_IMAGE_SIZE: u32 = 2048;
pub const IMAGE_SIZE_STEP: u32 = 64;

pub const MAX_INFERENCE_STEPS: u32 = 100;
pub const MAX_GUIDANCE_SCALE: f32 = 20.0;
pub const MAX_BATCH_SIZE: u32 = 20;
pub const MAX_IMAGES_PER_PROMPT: u32 = 9_999_999;

/// Fixed prior-stage schedule: twenty points from 1.0 down to 2/3, then ten
/// more down to 0.0.
pub static PRIOR_TIMESTEPS: Lazy<TimestepSchedule> = Lazy::new(TimestepSchedule::stage_c_default);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Prior,
    Decoder,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Prior => write!(f, "prior"),
            StageKind::Decoder => write!(f, "decoder"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestepSchedule(Vec<f64>);

impl TimestepSchedule {
    pub fn new(timesteps: Vec<f64>) -> Self {
        Self(timesteps)
    }

    pub fn stage_c_default() -> Self {
        let two_thirds = 2.0 / 3.0;
        let mut timesteps = linspace(1.0, two_thirds, 20);
        timesteps.extend(linspace(two_thirds, 0.0, 11).into_iter().skip(1));
        Self(timesteps)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut points: Vec<f64> = (0..num).map(|i| start + step * i as f64).collect();
            points[num - 1] = stop;
            points
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_c_schedule_shape() {
        let schedule = TimestepSchedule::stage_c_default();
        assert_eq!(schedule.len(), 30);
        assert_eq!(schedule.as_slice()[0], 1.0);
        assert_eq!(schedule.as_slice()[29], 0.0);
        assert!((schedule.as_slice()[19] - 2.0 / 3.0).abs() < 1e-12);
        assert!(schedule.as_slice().windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_max_seed() {
        assert_eq!(MAX_SEED, 2_147_483_647);
    }
}
