use std::fmt;

use ndarray::{concatenate, Array, Array2, ArrayView2, ArrayViewD, Axis, Dimension, Ix2, Slice};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::{debug, info};

use super::activation::Activation;
use super::layer::{Layer, Param, Tensor};
use super::loss::{categorical_crossentropy, categorical_crossentropy_grad, softmax_crossentropy_grad};
use super::optimizer::Adam;
use crate::config::TrainConfig;
use crate::error::{Error, Result};

/// Batch size used by `evaluate` and `predict`.
pub const INFERENCE_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct LayerSummary {
    pub name: &'static str,
    pub output_shape: Vec<usize>,
    pub params: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub layers: Vec<LayerSummary>,
}

impl Summary {
    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|layer| layer.params).sum()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<20}{:<24}{:>10}", "Layer (type)", "Output Shape", "Param #")?;
        for layer in &self.layers {
            let dims: Vec<String> = layer.output_shape.iter().map(ToString::to_string).collect();
            let shape = format!("(None, {})", dims.join(", "));
            writeln!(f, "{:<20}{:<24}{:>10}", layer.name, shape, layer.params)?;
        }
        write!(f, "Total params: {}", self.total_params())
    }
}

#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of rows taken from the end of the training data before
    /// shuffling and used only for validation.
    pub validation_split: f64,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self::from(&TrainConfig::default())
    }
}

impl From<&TrainConfig> for FitOptions {
    fn from(config: &TrainConfig) -> Self {
        Self {
            epochs: config.epochs,
            batch_size: config.batch_size,
            validation_split: config.validation_split,
            shuffle: true,
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f64,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
}

impl History {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// A linear stack of layers ending in a flat `n x classes` output.
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
    input_shape: Vec<usize>,
    summary: Summary,
    optimizer: Option<Adam>,
}

impl Sequential {
    /// Walks `input_shape` through every layer; any mismatch is an error.
    pub fn new(input_shape: &[usize], layers: Vec<Box<dyn Layer>>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::Shape("a model needs at least one layer".to_string()));
        }

        let mut shape = input_shape.to_vec();
        let mut summary = Summary::default();
        for layer in &layers {
            shape = layer.output_shape(&shape)?;
            summary.layers.push(LayerSummary {
                name: layer.name(),
                output_shape: shape.clone(),
                params: layer.param_count(),
            });
        }

        if shape.len() != 1 {
            return Err(Error::Shape(format!(
                "model output must be flat, got {shape:?}"
            )));
        }

        Ok(Self {
            layers,
            input_shape: input_shape.to_vec(),
            summary,
            optimizer: None,
        })
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn output_width(&self) -> usize {
        self.summary
            .layers
            .last()
            .and_then(|layer| layer.output_shape.first().copied())
            .unwrap_or(0)
    }

    pub fn compile(&mut self, optimizer: Adam) {
        self.optimizer = Some(optimizer);
    }

    pub fn fit<D: Dimension>(
        &mut self,
        x: &Array<f32, D>,
        y: &Array2<f32>,
        options: &FitOptions,
    ) -> Result<History> {
        if self.optimizer.is_none() {
            return Err(Error::NotCompiled);
        }
        if options.batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be positive".to_string()));
        }

        let x = x.view().into_dyn();
        self.check_inputs(&x, y)?;

        let samples = y.nrows();
        let train_len = split_point(samples, options.validation_split)?;
        let x_train = x.slice_axis(Axis(0), Slice::from(..train_len));
        let y_train = y.slice_axis(Axis(0), Slice::from(..train_len));
        let x_val = x.slice_axis(Axis(0), Slice::from(train_len..));
        let y_val = y.slice_axis(Axis(0), Slice::from(train_len..));

        info!(
            train = train_len,
            validation = samples - train_len,
            epochs = options.epochs,
            batch_size = options.batch_size,
            "starting training"
        );

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut order: Vec<usize> = (0..train_len).collect();
        let mut history = History::default();

        for epoch in 1..=options.epochs {
            if options.shuffle {
                order.shuffle(&mut rng);
            }

            let mut loss_sum = 0.0;
            let mut correct = 0;
            for (batch, rows) in order.chunks(options.batch_size).enumerate() {
                let x_batch = x_train.select(Axis(0), rows);
                let y_batch = y_train.select(Axis(0), rows);

                let (loss, hits) = self.train_step(&x_batch, &y_batch)?;
                loss_sum += loss * rows.len() as f32;
                correct += hits;

                if batch % 100 == 0 {
                    debug!(epoch, batch, loss, "training");
                }
            }

            let loss = loss_sum / train_len as f32;
            let accuracy = correct as f64 / train_len as f64;
            let (val_loss, val_accuracy) = if x_val.len_of(Axis(0)) > 0 {
                let (val_loss, val_accuracy) = self.evaluate_views(&x_val, &y_val)?;
                (Some(val_loss), Some(val_accuracy))
            } else {
                (None, None)
            };

            info!(
                epoch,
                loss,
                accuracy,
                val_loss = ?val_loss,
                val_accuracy = ?val_accuracy,
                "epoch {epoch}/{}",
                options.epochs
            );

            history.epochs.push(EpochMetrics {
                epoch,
                loss,
                accuracy,
                val_loss,
                val_accuracy,
            });
        }

        Ok(history)
    }

    /// Mean loss and accuracy over `x`.
    pub fn evaluate<D: Dimension>(&self, x: &Array<f32, D>, y: &Array2<f32>) -> Result<(f32, f64)> {
        let x = x.view().into_dyn();
        self.check_inputs(&x, y)?;
        self.evaluate_views(&x, &y.view())
    }

    /// Class probabilities, one row per sample.
    pub fn predict<D: Dimension>(&self, x: &Array<f32, D>) -> Result<Array2<f32>> {
        let x = x.view().into_dyn();
        self.check_samples(&x)?;

        let samples = x.len_of(Axis(0));
        let mut outputs = Vec::new();
        for start in (0..samples).step_by(INFERENCE_BATCH_SIZE) {
            let end = (start + INFERENCE_BATCH_SIZE).min(samples);
            let batch = x.slice_axis(Axis(0), Slice::from(start..end)).to_owned();
            outputs.push(self.forward(&batch)?);
        }

        if outputs.is_empty() {
            return Ok(Array2::zeros((0, self.output_width())));
        }

        let views: Vec<ArrayView2<f32>> = outputs.iter().map(Array2::view).collect();
        Ok(concatenate(Axis(0), &views)?)
    }

    fn evaluate_views(&self, x: &ArrayViewD<f32>, y: &ArrayView2<f32>) -> Result<(f32, f64)> {
        let samples = y.nrows();
        if samples == 0 {
            return Err(Error::EmptyDataset);
        }

        let mut loss_sum = 0.0;
        let mut correct = 0;
        for start in (0..samples).step_by(INFERENCE_BATCH_SIZE) {
            let end = (start + INFERENCE_BATCH_SIZE).min(samples);
            let batch = x.slice_axis(Axis(0), Slice::from(start..end)).to_owned();
            let targets = y.slice_axis(Axis(0), Slice::from(start..end));

            let predictions = self.forward(&batch)?;
            loss_sum += categorical_crossentropy(&predictions.view(), &targets)? * (end - start) as f32;
            correct += correct_count(&predictions.view(), &targets);
        }

        Ok((loss_sum / samples as f32, correct as f64 / samples as f64))
    }

    fn forward(&self, batch: &Tensor) -> Result<Array2<f32>> {
        let mut output = batch.clone();
        for layer in &self.layers {
            output = layer.forward(&output)?;
        }
        Ok(output.into_dimensionality::<Ix2>()?)
    }

    fn train_step(&mut self, x: &Tensor, y: &Array2<f32>) -> Result<(f32, usize)> {
        let mut output = x.clone();
        for layer in &mut self.layers {
            output = layer.forward_train(&output)?;
        }
        let predictions = output.into_dimensionality::<Ix2>()?;

        let loss = categorical_crossentropy(&predictions.view(), &y.view())?;
        let hits = correct_count(&predictions.view(), &y.view());

        let Some((last, rest)) = self.layers.split_last_mut() else {
            return Err(Error::Shape("a model needs at least one layer".to_string()));
        };

        let mut grad = if last.activation() == Activation::Softmax {
            let grad = softmax_crossentropy_grad(&predictions.view(), &y.view())?;
            last.backward_pre_activation(&grad.into_dyn())?
        } else {
            let grad = categorical_crossentropy_grad(&predictions.view(), &y.view())?;
            last.backward(&grad.into_dyn())?
        };
        for layer in rest.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }

        let optimizer = self.optimizer.as_mut().ok_or(Error::NotCompiled)?;
        let params: Vec<&mut Param> = self
            .layers
            .iter_mut()
            .flat_map(|layer| layer.params_mut())
            .collect();
        optimizer.step(params)?;

        Ok((loss, hits))
    }

    fn check_samples(&self, x: &ArrayViewD<f32>) -> Result<()> {
        if x.ndim() == 0 || x.shape()[1..] != self.input_shape[..] {
            return Err(Error::Shape(format!(
                "expected samples shaped {:?}, got {:?}",
                self.input_shape,
                x.shape()
            )));
        }
        Ok(())
    }

    fn check_inputs(&self, x: &ArrayViewD<f32>, y: &Array2<f32>) -> Result<()> {
        self.check_samples(x)?;

        if y.nrows() != x.len_of(Axis(0)) {
            return Err(Error::Shape(format!(
                "{} samples but {} targets",
                x.len_of(Axis(0)),
                y.nrows()
            )));
        }
        if y.ncols() != self.output_width() {
            return Err(Error::Shape(format!(
                "targets have width {}, model outputs {}",
                y.ncols(),
                self.output_width()
            )));
        }
        Ok(())
    }
}

/// Number of leading rows kept for training when the trailing
/// `validation_split` fraction is held out.
pub fn split_point(samples: usize, validation_split: f64) -> Result<usize> {
    if !(0.0..1.0).contains(&validation_split) {
        return Err(Error::InvalidArgument(format!(
            "validation split must be in [0, 1), got {validation_split}"
        )));
    }

    let train_len = (samples as f64 * (1.0 - validation_split)).floor() as usize;
    if train_len == 0 {
        return Err(Error::EmptyDataset);
    }
    Ok(train_len)
}

/// Index of the largest value in each row; ties go to the first.
pub fn argmax(rows: &ArrayView2<f32>) -> Vec<usize> {
    rows.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, max), (index, &value)| {
                    if value > max {
                        (index, value)
                    } else {
                        (best, max)
                    }
                })
                .0
        })
        .collect()
}

fn correct_count(predictions: &ArrayView2<f32>, targets: &ArrayView2<f32>) -> usize {
    argmax(predictions)
        .into_iter()
        .zip(argmax(targets))
        .filter(|(predicted, expected)| predicted == expected)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Conv2d, Dense, Flatten, MaxPool2d};
    use ndarray::{array, Array4};

    /// Class 0 lights the top half of a 4x4 image, class 1 the bottom half.
    fn halves_dataset(samples: usize) -> (Array4<f32>, Array2<f32>) {
        let mut images = Array4::zeros((samples, 4, 4, 1));
        let mut labels = Array2::zeros((samples, 2));

        for sample in 0..samples {
            let class = sample % 2;
            labels[(sample, class)] = 1.0;
            for y in 0..4 {
                for x in 0..4 {
                    let lit = (y < 2) == (class == 0);
                    let noise = ((sample * 7 + y * 3 + x) % 5) as f32 * 0.05;
                    images[(sample, y, x, 0)] = if lit { 0.8 + noise } else { noise };
                }
            }
        }

        (images, labels)
    }

    fn linear_model(seed: u64) -> Sequential {
        let mut rng = StdRng::seed_from_u64(seed);
        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(Flatten::new()),
            Box::new(Dense::new(16, 2, Activation::Softmax, &mut rng)),
        ];
        let mut model = Sequential::new(&[4, 4, 1], layers).unwrap();
        model.compile(Adam::new(0.05));
        model
    }

    fn options(epochs: usize) -> FitOptions {
        FitOptions {
            epochs,
            batch_size: 8,
            validation_split: 0.25,
            shuffle: true,
            seed: 42,
        }
    }

    #[test]
    fn training_lowers_loss_on_separable_data() {
        let (images, labels) = halves_dataset(64);
        let mut model = linear_model(1);

        let history = model.fit(&images, &labels, &options(30)).unwrap();

        assert_eq!(history.epochs.len(), 30);
        let first = &history.epochs[0];
        let last = history.last().unwrap();
        assert!(last.loss < first.loss);
        assert!(last.accuracy > 0.9);
        assert!(last.val_accuracy.unwrap() > 0.9);
    }

    #[test]
    fn fitting_is_reproducible_for_a_seed() {
        let (images, labels) = halves_dataset(32);

        let mut first = linear_model(5);
        let mut second = linear_model(5);

        let first = first.fit(&images, &labels, &options(3)).unwrap();
        let second = second.fit(&images, &labels, &options(3)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn conv_stack_trains_end_to_end() {
        let (images, labels) = halves_dataset(16);
        let mut rng = StdRng::seed_from_u64(9);
        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(Conv2d::new(1, 2, (3, 3), Activation::Relu, &mut rng)),
            Box::new(MaxPool2d::new((2, 2))),
            Box::new(Flatten::new()),
            Box::new(Dense::new(2, 2, Activation::Softmax, &mut rng)),
        ];
        let mut model = Sequential::new(&[4, 4, 1], layers).unwrap();
        model.compile(Adam::default());

        let history = model.fit(&images, &labels, &options(2)).unwrap();

        assert!(history.epochs.iter().all(|epoch| epoch.loss.is_finite()));
        assert_eq!(model.predict(&images).unwrap().dim(), (16, 2));
    }

    #[test]
    fn fit_requires_compile() {
        let (images, labels) = halves_dataset(8);
        let mut rng = StdRng::seed_from_u64(0);
        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(Flatten::new()),
            Box::new(Dense::new(16, 2, Activation::Softmax, &mut rng)),
        ];
        let mut model = Sequential::new(&[4, 4, 1], layers).unwrap();

        assert!(matches!(
            model.fit(&images, &labels, &options(1)),
            Err(Error::NotCompiled)
        ));
    }

    #[test]
    fn mismatched_inputs_and_targets_are_rejected() {
        let mut model = linear_model(0);
        let (images, labels) = halves_dataset(8);

        let wrong_images = Array4::<f32>::zeros((8, 5, 4, 1));
        assert!(matches!(model.predict(&wrong_images), Err(Error::Shape(_))));

        let wrong_labels = Array2::<f32>::zeros((8, 3));
        assert!(matches!(
            model.fit(&images, &wrong_labels, &options(1)),
            Err(Error::Shape(_))
        ));
        assert!(matches!(
            model.evaluate(&images, &labels.slice_axis(Axis(0), Slice::from(..4)).to_owned()),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn layers_must_chain() {
        let mut rng = StdRng::seed_from_u64(0);
        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(Flatten::new()),
            Box::new(Dense::new(15, 2, Activation::Softmax, &mut rng)),
        ];
        assert!(Sequential::new(&[4, 4, 1], layers).is_err());
        assert!(Sequential::new(&[4, 4, 1], Vec::new()).is_err());
    }

    #[test]
    fn validation_rows_are_the_disjoint_tail() {
        assert_eq!(split_point(100, 0.1).unwrap(), 90);
        assert_eq!(split_point(60_000, 0.1).unwrap(), 54_000);
        assert_eq!(split_point(7, 0.0).unwrap(), 7);
        assert_eq!(split_point(15, 0.1).unwrap(), 13);
        assert!(split_point(10, 1.0).is_err());
        assert!(split_point(1, 0.5).is_err());

        let train = 0..split_point(25, 0.2).unwrap();
        let validation = train.end..25;
        assert_eq!(train.len() + validation.len(), 25);
        assert!(train.end <= validation.start);
    }

    #[test]
    fn argmax_picks_first_maximum() {
        let rows = array![[0.1, 0.7, 0.2], [0.5, 0.5, 0.0], [0.0, 0.0, 1.0]];
        assert_eq!(argmax(&rows.view()), vec![1, 0, 2]);
    }

    #[test]
    fn summary_lists_shapes_and_params() {
        let model = linear_model(0);
        let summary = model.summary();

        assert_eq!(summary.layers[0].output_shape, vec![16]);
        assert_eq!(summary.total_params(), 16 * 2 + 2);
        assert!(summary.to_string().contains("(None, 2)"));
        assert_eq!(model.output_width(), 2);
    }
}
