use ndarray::{Array2, ArrayD};
use rand::distributions::Uniform;
use rand::Rng;

use super::activation::Activation;
use crate::error::Result;

/// Batch-first tensor passed between layers.
pub type Tensor = ArrayD<f32>;

/// A trainable weight tensor and the gradient from the last backward pass.
#[derive(Debug, Clone)]
pub struct Param {
    pub value: Tensor,
    pub grad: Tensor,
}

impl Param {
    pub fn new(value: Tensor) -> Self {
        let grad = Tensor::zeros(value.raw_dim());
        Self { value, grad }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

pub trait Layer {
    fn name(&self) -> &'static str;

    /// Per-sample output shape for a per-sample input shape. Fails when the
    /// layer cannot accept `input`.
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>>;

    /// Inference pass. Leaves no state behind.
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Forward pass that keeps what `backward` needs.
    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Stores parameter gradients and returns the gradient with respect to
    /// the input of the last `forward_train`.
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor>;

    fn activation(&self) -> Activation {
        Activation::Linear
    }

    /// `backward` for a gradient already taken with respect to the
    /// pre-activation values. Identical to `backward` when there is no activation.
    fn backward_pre_activation(&mut self, grad: &Tensor) -> Result<Tensor> {
        self.backward(grad)
    }

    fn params(&self) -> Vec<&Param> {
        Vec::new()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        Vec::new()
    }

    fn param_count(&self) -> usize {
        self.params().iter().map(|param| param.len()).sum()
    }
}

/// Glorot/Xavier uniform initialisation, `U(-l, l)` with `l = sqrt(6 / (fan_in + fan_out))`.
pub fn glorot_uniform<R: Rng + ?Sized>(
    shape: (usize, usize),
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Array2<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    let distribution = Uniform::new_inclusive(-limit, limit);

    Array2::from_shape_simple_fn(shape, || rng.sample(distribution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn glorot_samples_stay_within_limit_and_are_seeded() {
        let limit = (6.0_f32 / 30.0).sqrt();
        let first = glorot_uniform((10, 20), 10, 20, &mut StdRng::seed_from_u64(7));
        let second = glorot_uniform((10, 20), 10, 20, &mut StdRng::seed_from_u64(7));

        assert!(first.iter().all(|w| w.abs() <= limit));
        assert_eq!(first, second);
    }
}
