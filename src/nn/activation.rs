use ndarray::{Array2, Zip};

/// Element-wise (or row-wise, for softmax) non-linearity applied by a layer.
/// Rows are samples, columns are units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Softmax,
}

impl Activation {
    pub fn apply(self, values: &mut Array2<f32>) {
        match self {
            Self::Linear => {}
            Self::Relu => values.mapv_inplace(|v| v.max(0.0)),
            Self::Softmax => {
                for mut row in values.rows_mut() {
                    let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|v| v / sum);
                }
            }
        }
    }

    /// Gradient with respect to the pre-activation values, given the
    /// activation `output` and the gradient flowing into it.
    pub fn backward(self, output: &Array2<f32>, grad: &Array2<f32>) -> Array2<f32> {
        match self {
            Self::Linear => grad.clone(),
            Self::Relu => {
                let mut result = grad.clone();
                Zip::from(&mut result).and(output).for_each(|g, &out| {
                    if out <= 0.0 {
                        *g = 0.0;
                    }
                });
                result
            }
            Self::Softmax => {
                // dz_i = a_i * (g_i - sum_j g_j a_j)
                let mut result = Array2::zeros(output.raw_dim());
                Zip::from(result.rows_mut())
                    .and(output.rows())
                    .and(grad.rows())
                    .for_each(|mut dz, a, g| {
                        let dot = a.dot(&g);
                        Zip::from(&mut dz)
                            .and(&a)
                            .and(&g)
                            .for_each(|dz, &a, &g| *dz = a * (g - dot));
                    });
                result
            }
        }
    }
}
