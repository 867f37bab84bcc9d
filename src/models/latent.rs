use crate::error::{CascadeError, Result};

/// Dense `[batch, channels, height, width]` buffer shared by latents and embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor4 {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl Tensor4 {
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(CascadeError::InternalError(format!(
                "tensor of shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn batch(&self) -> usize {
        self.shape[0]
    }

    pub fn channels(&self) -> usize {
        self.shape[1]
    }

    pub fn height(&self) -> usize {
        self.shape[2]
    }

    pub fn width(&self) -> usize {
        self.shape[3]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, b: usize, c: usize, y: usize, x: usize) -> f32 {
        let [_, channels, height, width] = self.shape;
        self.data[((b * channels + c) * height + y) * width + x]
    }
}

/// Solver state after one prior step. Lives only for the step that produced it.
#[derive(Debug, Clone)]
pub struct LatentState {
    pub step: usize,
    pub timestep: f64,
    pub tensor: Tensor4,
}

/// Final prior output, consumed by exactly one decoder call.
#[derive(Debug, Clone)]
pub struct ImageEmbedding {
    pub tensor: Tensor4,
}

impl ImageEmbedding {
    pub fn batch_size(&self) -> usize {
        self.tensor.batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_indexing() {
        let data: Vec<f32> = (0..2 * 3 * 2 * 2).map(|v| v as f32).collect();
        let tensor = Tensor4::new([2, 3, 2, 2], data).unwrap();
        assert_eq!(tensor.get(0, 0, 0, 0), 0.0);
        assert_eq!(tensor.get(0, 1, 0, 0), 4.0);
        assert_eq!(tensor.get(1, 0, 1, 1), 15.0);
        assert_eq!(tensor.channels(), 3);
    }

    #[test]
    fn test_tensor_shape_mismatch() {
        assert!(Tensor4::new([1, 2, 2, 2], vec![0.0; 7]).is_err());
    }
}
