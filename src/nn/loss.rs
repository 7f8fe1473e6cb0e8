use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{Error, Result};

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before the log.
pub const EPSILON: f32 = 1e-7;

fn check_shapes(predictions: &ArrayView2<f32>, targets: &ArrayView2<f32>) -> Result<()> {
    if predictions.dim() != targets.dim() {
        return Err(Error::Shape(format!(
            "predictions {:?} do not match targets {:?}",
            predictions.dim(),
            targets.dim()
        )));
    }
    if predictions.nrows() == 0 {
        return Err(Error::EmptyDataset);
    }
    Ok(())
}

/// Mean over the batch of `-sum(y * ln(p))`.
pub fn categorical_crossentropy(
    predictions: &ArrayView2<f32>,
    targets: &ArrayView2<f32>,
) -> Result<f32> {
    check_shapes(predictions, targets)?;

    let mut total = 0.0;
    Zip::from(predictions).and(targets).for_each(|&p, &y| {
        total -= y * p.clamp(EPSILON, 1.0 - EPSILON).ln();
    });

    Ok(total / predictions.nrows() as f32)
}

/// Gradient of [`categorical_crossentropy`] with respect to the probabilities.
pub fn categorical_crossentropy_grad(
    predictions: &ArrayView2<f32>,
    targets: &ArrayView2<f32>,
) -> Result<Array2<f32>> {
    check_shapes(predictions, targets)?;

    let batch = predictions.nrows() as f32;
    let mut grad = Array2::zeros(predictions.raw_dim());
    Zip::from(&mut grad)
        .and(predictions)
        .and(targets)
        .for_each(|g, &p, &y| *g = -y / p.clamp(EPSILON, 1.0 - EPSILON) / batch);

    Ok(grad)
}

/// Gradient of softmax followed by cross-entropy with respect to the logits,
/// `(p - y) / batch`. Stays informative when a probability underflows.
pub fn softmax_crossentropy_grad(
    predictions: &ArrayView2<f32>,
    targets: &ArrayView2<f32>,
) -> Result<Array2<f32>> {
    check_shapes(predictions, targets)?;

    let batch = predictions.nrows() as f32;
    Ok((predictions - targets) / batch)
}
