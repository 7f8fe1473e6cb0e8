use ndarray::Zip;

use super::layer::{Param, Tensor};
use crate::error::{Error, Result};

/// Adam with Keras defaults. Moment buffers are created on the first step and
/// matched to parameters by position.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    iterations: i32,
    moments: Vec<(Tensor, Tensor)>,
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            iterations: 0,
            moments: Vec::new(),
        }
    }

    pub fn iterations(&self) -> i32 {
        self.iterations
    }

    pub fn step(&mut self, params: Vec<&mut Param>) -> Result<()> {
        if self.moments.is_empty() {
            self.moments = params
                .iter()
                .map(|param| {
                    (
                        Tensor::zeros(param.value.raw_dim()),
                        Tensor::zeros(param.value.raw_dim()),
                    )
                })
                .collect();
        }

        if self.moments.len() != params.len() {
            return Err(Error::Shape(format!(
                "optimizer tracks {} parameters, got {}",
                self.moments.len(),
                params.len()
            )));
        }

        self.iterations += 1;
        let correction1 = 1.0 - self.beta1.powi(self.iterations);
        let correction2 = 1.0 - self.beta2.powi(self.iterations);
        let step_size = self.learning_rate * correction2.sqrt() / correction1;
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        for (param, (m, v)) in params.into_iter().zip(&mut self.moments) {
            if param.grad.shape() != m.shape() {
                return Err(Error::Shape(format!(
                    "gradient {:?} does not match optimizer state {:?}",
                    param.grad.shape(),
                    m.shape()
                )));
            }

            Zip::from(&mut param.value)
                .and(&param.grad)
                .and(m)
                .and(v)
                .for_each(|w, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    *w -= step_size * *m / (v.sqrt() + epsilon);
                });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn first_step_moves_each_weight_by_the_learning_rate() {
        let mut param = Param::new(array![1.0, -1.0, 0.5].into_dyn());
        param.grad = array![0.3, -2.0, 0.0].into_dyn();

        let mut adam = Adam::new(0.01);
        adam.step(vec![&mut param]).unwrap();

        // bias-corrected first step is lr * sign(g)
        assert!((param.value[&[0][..]] - 0.99).abs() < 1e-5);
        assert!((param.value[&[1][..]] + 0.99).abs() < 1e-5);
        assert!((param.value[&[2][..]] - 0.5).abs() < 1e-6);
        assert_eq!(adam.iterations(), 1);
    }

    #[test]
    fn minimises_a_quadratic() {
        let mut param = Param::new(array![5.0, -3.0].into_dyn());
        let mut adam = Adam::new(0.1);

        for _ in 0..500 {
            param.grad = param.value.mapv(|w| 2.0 * w);
            adam.step(vec![&mut param]).unwrap();
        }

        assert!(param.value.iter().all(|w| w.abs() < 0.1));
    }

    #[test]
    fn parameter_count_change_is_rejected() {
        let mut first = Param::new(array![1.0].into_dyn());
        let mut second = Param::new(array![1.0].into_dyn());
        let mut adam = Adam::default();

        adam.step(vec![&mut first]).unwrap();
        assert!(adam.step(vec![&mut first, &mut second]).is_err());
    }
}
