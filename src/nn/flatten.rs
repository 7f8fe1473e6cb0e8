use super::layer::{Layer, Tensor};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct Flatten {
    input_shape: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Flatten {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        Ok(vec![input.iter().product()])
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let Some((&n, rest)) = input.shape().split_first() else {
            return Err(Error::Shape("flatten needs a batch axis".to_string()));
        };
        let features: usize = rest.iter().product();

        Ok(input
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(vec![n, features])?)
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor> {
        self.input_shape = Some(input.shape().to_vec());
        self.forward(input)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let shape = self
            .input_shape
            .clone()
            .ok_or(Error::MissingForwardPass("flatten backward"))?;

        Ok(grad_output
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(shape)?)
    }
}
