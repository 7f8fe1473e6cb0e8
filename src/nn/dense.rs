use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand::Rng;

use super::activation::Activation;
use super::layer::{glorot_uniform, Layer, Param, Tensor};
use crate::error::{Error, Result};

/// Fully connected layer, `activation(x . W + b)` with `W` shaped `inputs x units`.
#[derive(Debug)]
pub struct Dense {
    inputs: usize,
    units: usize,
    activation: Activation,
    weights: Param,
    bias: Param,
    cache: Option<DenseCache>,
}

#[derive(Debug)]
struct DenseCache {
    input: Array2<f32>,
    output: Array2<f32>,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        inputs: usize,
        units: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let weights = glorot_uniform((inputs, units), inputs, units, rng);
        Self::with_weights(weights, Array1::zeros(units), activation)
    }

    pub fn with_weights(weights: Array2<f32>, bias: Array1<f32>, activation: Activation) -> Self {
        Self {
            inputs: weights.nrows(),
            units: weights.ncols(),
            activation,
            weights: Param::new(weights.into_dyn()),
            bias: Param::new(bias.into_dyn()),
            cache: None,
        }
    }

    fn compute(&self, input: &Tensor) -> Result<(Array2<f32>, Array2<f32>)> {
        let input = input.view().into_dimensionality::<Ix2>().map_err(|_| {
            Error::Shape(format!("dense expects n x features input, got {:?}", input.shape()))
        })?;
        if input.ncols() != self.inputs {
            return Err(Error::Shape(format!(
                "dense expects {} features, got {}",
                self.inputs,
                input.ncols()
            )));
        }

        let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;
        let mut output = input.dot(&weights);
        output += &self.bias.value.view().into_dimensionality::<Ix1>()?;
        self.activation.apply(&mut output);

        Ok((input.to_owned(), output))
    }
}

impl Layer for Dense {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        if input == [self.inputs] {
            Ok(vec![self.units])
        } else {
            Err(Error::Shape(format!(
                "dense with {} inputs cannot take {input:?}",
                self.inputs
            )))
        }
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(self.compute(input)?.1.into_dyn())
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor> {
        let (input, output) = self.compute(input)?;
        let tensor = output.clone().into_dyn();
        self.cache = Some(DenseCache { input, output });
        Ok(tensor)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(Error::MissingForwardPass("dense backward"))?;
        let grad = grad_output.view().into_dimensionality::<Ix2>()?.to_owned();

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
            .ok_or(Error::MissingForwardPass("dense backward"))?;
        let grad = grad.view().into_dimensionality::<Ix2>()?;
        if grad.dim() != cache.output.dim() {
            return Err(Error::Shape(format!(
                "dense gradient is {:?}, expected {:?}",
                grad.dim(),
                cache.output.dim()
            )));
        }

        let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;
        let grad_input = grad.dot(&weights.t());

        self.weights.grad = cache.input.t().dot(&grad).into_dyn();
        self.bias.grad = grad.sum_axis(Axis(0)).into_dyn();

        Ok(grad_input.into_dyn())
    }

    fn params(&self) -> Vec<&Param> {
        vec![&self.weights, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weights, &mut self.bias]
    }
}
