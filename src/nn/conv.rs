use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand::Rng;

use super::activation::Activation;
use super::layer::{glorot_uniform, Layer, Param, Tensor};
use crate::error::{Error, Result};

/// 2D convolution with stride 1 and no padding over `n x h x w x c` input.
///
/// Patches are unrolled into rows (im2col) so the convolution becomes a
/// single matrix product with the `(kh * kw * c) x filters` kernel.
#[derive(Debug)]
pub struct Conv2d {
    in_channels: usize,
    filters: usize,
    kernel: (usize, usize),
    activation: Activation,
    weights: Param,
    bias: Param,
    cache: Option<ConvCache>,
}

#[derive(Debug)]
struct ConvCache {
    input_dim: [usize; 4],
    patches: Array2<f32>,
    output: Array2<f32>,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        filters: usize,
        kernel: (usize, usize),
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let receptive_field = kernel.0 * kernel.1;
        let weights = glorot_uniform(
            (receptive_field * in_channels, filters),
            receptive_field * in_channels,
            receptive_field * filters,
            rng,
        );

        Self::with_weights(in_channels, kernel, activation, weights, Array1::zeros(filters))
    }

    /// `weights` is laid out as `(kh * kw * in_channels) x filters`, row index
    /// `(ky * kw + kx) * in_channels + c`.
    pub fn with_weights(
        in_channels: usize,
        kernel: (usize, usize),
        activation: Activation,
        weights: Array2<f32>,
        bias: Array1<f32>,
    ) -> Self {
        Self {
            in_channels,
            filters: weights.ncols(),
            kernel,
            activation,
            weights: Param::new(weights.into_dyn()),
            bias: Param::new(bias.into_dyn()),
            cache: None,
        }
    }

    fn input_dim(&self, input: &Tensor) -> Result<[usize; 4]> {
        let &[n, h, w, c] = input.shape() else {
            return Err(Error::Shape(format!(
                "conv2d expects n x h x w x c input, got {:?}",
                input.shape()
            )));
        };
        self.output_shape(&[h, w, c])?;

        Ok([n, h, w, c])
    }

    fn compute(&self, input: &Tensor) -> Result<(Array2<f32>, Array2<f32>, [usize; 4])> {
        let dim = self.input_dim(input)?;
        let input = input.as_standard_layout();
        let data = input
            .as_slice()
            .ok_or_else(|| Error::Shape("conv2d input is not contiguous".to_string()))?;

        let patches = im2col(data, dim, self.kernel)?;
        let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;

        let mut output = patches.dot(&weights);
        output += &self.bias.value.view().into_dimensionality::<Ix1>()?;
        self.activation.apply(&mut output);

        Ok((patches, output, dim))
    }

    fn to_tensor(&self, output: Array2<f32>, [n, h, w, _]: [usize; 4]) -> Result<Tensor> {
        let (out_h, out_w) = (h - self.kernel.0 + 1, w - self.kernel.1 + 1);
        Ok(output
            .into_shape_with_order((n, out_h, out_w, self.filters))?
            .into_dyn())
    }
}

impl Layer for Conv2d {
    fn name(&self) -> &'static str {
        "conv2d"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match *input {
            [h, w, c] if c == self.in_channels && h >= self.kernel.0 && w >= self.kernel.1 => {
                Ok(vec![h - self.kernel.0 + 1, w - self.kernel.1 + 1, self.filters])
            }
            _ => Err(Error::Shape(format!(
                "conv2d with {} input channels and {:?} kernel cannot take {input:?}",
                self.in_channels, self.kernel
            ))),
        }
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (_, output, dim) = self.compute(input)?;
        self.to_tensor(output, dim)
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor> {
        let (patches, output, dim) = self.compute(input)?;
        let tensor = self.to_tensor(output.clone(), dim)?;

        self.cache = Some(ConvCache {
            input_dim: dim,
            patches,
            output,
        });

        Ok(tensor)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(Error::MissingForwardPass("conv2d backward"))?;
        let grad = grad_output
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(cache.output.raw_dim())?;

        let grad = self.activation.backward(&cache.output, &grad);
        self.backward_pre_activation(&grad.into_dyn())
    }

    fn activation(&self) -> Activation {
        self.activation
    }

    fn backward_pre_activation(&mut self, grad: &Tensor) -> Result<Tensor> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(Error::MissingForwardPass("conv2d backward"))?;
        let grad = grad
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(cache.output.raw_dim())?;

        let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;
        let grad_patches = grad.dot(&weights.t());
        let grad_input = col2im(&grad_patches, cache.input_dim, self.kernel)?;

        self.weights.grad = cache.patches.t().dot(&grad).into_dyn();
        self.bias.grad = grad.sum_axis(Axis(0)).into_dyn();

        Ok(grad_input)
    }

    fn params(&self) -> Vec<&Param> {
        vec![&self.weights, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weights, &mut self.bias]
    }
}

fn im2col(input: &[f32], [n, h, w, c]: [usize; 4], (kh, kw): (usize, usize)) -> Result<Array2<f32>> {
    let (out_h, out_w) = (h - kh + 1, w - kw + 1);
    let columns = kh * kw * c;
    let mut patches = vec![0.0; n * out_h * out_w * columns];

    for (row, patch) in patches.chunks_exact_mut(columns).enumerate() {
        let sample = row / (out_h * out_w);
        let y = (row / out_w) % out_h;
        let x = row % out_w;

        for ky in 0..kh {
            for kx in 0..kw {
                let src = ((sample * h + y + ky) * w + x + kx) * c;
                let dst = (ky * kw + kx) * c;
                patch[dst..dst + c].copy_from_slice(&input[src..src + c]);
            }
        }
    }

    Ok(Array2::from_shape_vec((n * out_h * out_w, columns), patches)?)
}

fn col2im(
    patches: &Array2<f32>,
    [n, h, w, c]: [usize; 4],
    (kh, kw): (usize, usize),
) -> Result<Tensor> {
    let (out_h, out_w) = (h - kh + 1, w - kw + 1);
    let mut image = vec![0.0; n * h * w * c];

    for (row, patch) in patches.rows().into_iter().enumerate() {
        let sample = row / (out_h * out_w);
        let y = (row / out_w) % out_h;
        let x = row % out_w;

        for ky in 0..kh {
            for kx in 0..kw {
                let dst = ((sample * h + y + ky) * w + x + kx) * c;
                let src = (ky * kw + kx) * c;
                for channel in 0..c {
                    image[dst + channel] += patch[src + channel];
                }
            }
        }
    }

    Ok(Tensor::from_shape_vec(vec![n, h, w, c], image)?)
}
