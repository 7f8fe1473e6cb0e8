use super::layer::{Layer, Tensor};
use crate::error::{Error, Result};

/// Max pooling with stride equal to the pool size. Trailing rows and
/// columns that do not fill a window are dropped.
#[derive(Debug)]
pub struct MaxPool2d {
    pool: (usize, usize),
    cache: Option<PoolCache>,
}

#[derive(Debug)]
struct PoolCache {
    input_dim: [usize; 4],
    // flat input offset of the winner for every output element
    argmax: Vec<usize>,
}

impl MaxPool2d {
    pub fn new(pool: (usize, usize)) -> Self {
        Self { pool, cache: None }
    }

    fn compute(&self, input: &Tensor) -> Result<(Tensor, PoolCache)> {
        let &[n, h, w, c] = input.shape() else {
            return Err(Error::Shape(format!(
                "max_pooling2d expects n x h x w x c input, got {:?}",
                input.shape()
            )));
        };
        let out = self.output_shape(&[h, w, c])?;
        let (out_h, out_w) = (out[0], out[1]);

        let input = input.as_standard_layout();
        let data = input
            .as_slice()
            .ok_or_else(|| Error::Shape("max_pooling2d input is not contiguous".to_string()))?;

        let mut output = Vec::with_capacity(n * out_h * out_w * c);
        let mut argmax = Vec::with_capacity(output.capacity());

        for sample in 0..n {
            for y in 0..out_h {
                for x in 0..out_w {
                    for channel in 0..c {
                        let mut best = f32::NEG_INFINITY;
                        let mut best_offset = 0;

                        for py in 0..self.pool.0 {
                            for px in 0..self.pool.1 {
                                let row = y * self.pool.0 + py;
                                let col = x * self.pool.1 + px;
                                let offset = ((sample * h + row) * w + col) * c + channel;
                                if data[offset] > best {
                                    best = data[offset];
                                    best_offset = offset;
                                }
                            }
                        }

                        output.push(best);
                        argmax.push(best_offset);
                    }
                }
            }
        }

        let output = Tensor::from_shape_vec(vec![n, out_h, out_w, c], output)?;
        Ok((
            output,
            PoolCache {
                input_dim: [n, h, w, c],
                argmax,
            },
        ))
    }
}

impl Layer for MaxPool2d {
    fn name(&self) -> &'static str {
        "max_pooling2d"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match *input {
            [h, w, c] if h >= self.pool.0 && w >= self.pool.1 => {
                Ok(vec![h / self.pool.0, w / self.pool.1, c])
            }
            _ => Err(Error::Shape(format!(
                "max_pooling2d with pool {:?} cannot take {input:?}",
                self.pool
            ))),
        }
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(self.compute(input)?.0)
    }

    fn forward_train(&mut self, input: &Tensor) -> Result<Tensor> {
        let (output, cache) = self.compute(input)?;
        self.cache = Some(cache);
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(Error::MissingForwardPass("max_pooling2d backward"))?;

        if grad_output.len() != cache.argmax.len() {
            return Err(Error::Shape(format!(
                "max_pooling2d gradient has {} elements, expected {}",
                grad_output.len(),
                cache.argmax.len()
            )));
        }

        let grad_output = grad_output.as_standard_layout();
        let mut grad_input = vec![0.0; cache.input_dim.iter().product()];
        for (&offset, &grad) in cache.argmax.iter().zip(grad_output.iter()) {
            grad_input[offset] += grad;
        }

        Ok(Tensor::from_shape_vec(cache.input_dim.to_vec(), grad_input)?)
    }
}
