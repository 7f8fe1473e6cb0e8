//! Binary classification metrics with class 1 as the positive class.
//!
//! A ratio whose denominator is zero evaluates to 0.0 and logs a warning,
//! so a degenerate test split still produces a report.

use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    /// Rows are the true label, columns the predicted one.
    pub fn as_array(&self) -> [[usize; 2]; 2] {
        [
            [self.true_negative, self.false_positive],
            [self.false_negative, self.true_positive],
        ]
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

pub fn confusion_matrix(truth: &[u8], predicted: &[u8]) -> Result<ConfusionMatrix> {
    if truth.len() != predicted.len() {
        return Err(Error::Shape(format!(
            "{} true labels but {} predictions",
            truth.len(),
            predicted.len()
        )));
    }
    if truth.is_empty() {
        return Err(Error::EmptyDataset);
    }

    let mut matrix = ConfusionMatrix::default();
    for (&actual, &guess) in truth.iter().zip(predicted) {
        match (actual, guess) {
            (0, 0) => matrix.true_negative += 1,
            (0, 1) => matrix.false_positive += 1,
            (1, 0) => matrix.false_negative += 1,
            (1, 1) => matrix.true_positive += 1,
            (0 | 1, label) | (label, _) => return Err(Error::InvalidLabel(label.to_string())),
        }
    }

    Ok(matrix)
}

fn ratio(numerator: usize, denominator: usize, metric: &str) -> f64 {
    if denominator == 0 {
        warn!("{metric} is ill-defined with no relevant samples; using 0.0");
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

pub fn accuracy(truth: &[u8], predicted: &[u8]) -> Result<f64> {
    let matrix = confusion_matrix(truth, predicted)?;
    Ok(ratio(
        matrix.true_positive + matrix.true_negative,
        matrix.total(),
        "accuracy",
    ))
}

/// TP / (TP + FP)
pub fn precision(truth: &[u8], predicted: &[u8]) -> Result<f64> {
    let matrix = confusion_matrix(truth, predicted)?;
    Ok(ratio(
        matrix.true_positive,
        matrix.true_positive + matrix.false_positive,
        "precision",
    ))
}

/// TP / (TP + FN)
pub fn recall(truth: &[u8], predicted: &[u8]) -> Result<f64> {
    let matrix = confusion_matrix(truth, predicted)?;
    Ok(ratio(
        matrix.true_positive,
        matrix.true_positive + matrix.false_negative,
        "recall",
    ))
}

pub fn f1_score(truth: &[u8], predicted: &[u8]) -> Result<f64> {
    let precision = precision(truth, predicted)?;
    let recall = recall(truth, predicted)?;

    if precision + recall == 0.0 {
        return Ok(0.0);
    }
    Ok(2.0 * precision * recall / (precision + recall))
}
