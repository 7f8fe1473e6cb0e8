use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Axis, Slice};
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub enum Solver {
    /// Full Newton steps with a backtracking line search. Stops once the
    /// largest gradient component is at most `tolerance`.
    Newton {
        max_iterations: usize,
        tolerance: f64,
    },
    /// Fixed-rate full-batch descent on the per-sample averaged objective.
    GradientDescent { learning_rate: f64, epochs: usize },
}

impl Default for Solver {
    fn default() -> Self {
        Self::Newton {
            max_iterations: 100,
            tolerance: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSummary {
    pub iterations: usize,
    pub converged: bool,
    pub gradient_norm: f64,
}

/// Binary logistic regression with an L2 penalty on the coefficients (not
/// the intercept). Minimises `C * sum(log_loss) + ||w||^2 / 2`.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    /// Inverse regularisation strength `C`.
    pub regularization: f64,
    pub solver: Solver,
    // intercept first, then one weight per feature
    weights: Option<Array1<f64>>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(1.0, Solver::default())
    }
}

const ARMIJO: f64 = 1e-4;
const MIN_STEP: f64 = 1e-10;
const GRADIENT_DESCENT_TOLERANCE: f64 = 1e-4;

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

// ln(1 + e^z) without overflow
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

struct Objective<'a> {
    // X with a leading column of ones
    design: &'a DMatrix<f64>,
    targets: &'a DVector<f64>,
    regularization: f64,
}

impl Objective<'_> {
    fn penalty(weights: &DVector<f64>) -> DVector<f64> {
        let mut penalty = weights.clone();
        penalty[0] = 0.0;
        penalty
    }

    fn value(&self, weights: &DVector<f64>) -> f64 {
        let margins = self.design * weights;
        let log_loss: f64 = margins
            .iter()
            .zip(self.targets.iter())
            .map(|(&z, &y)| softplus(z) - y * z)
            .sum();

        self.regularization * log_loss + 0.5 * Self::penalty(weights).norm_squared()
    }

    fn gradient(&self, weights: &DVector<f64>) -> DVector<f64> {
        let residual = (self.design * weights).map(sigmoid) - self.targets;
        self.design.tr_mul(&residual) * self.regularization + Self::penalty(weights)
    }

    fn hessian(&self, weights: &DVector<f64>) -> DMatrix<f64> {
        let probabilities = (self.design * weights).map(sigmoid);

        let mut weighted = self.design.clone();
        for (mut row, &p) in weighted.row_iter_mut().zip(probabilities.iter()) {
            row *= self.regularization * p * (1.0 - p);
        }

        let mut hessian = self.design.tr_mul(&weighted);
        for j in 1..hessian.nrows() {
            hessian[(j, j)] += 1.0;
        }
        hessian
    }
}

impl LogisticRegression {
    pub fn new(regularization: f64, solver: Solver) -> Self {
        Self {
            regularization,
            solver,
            weights: None,
        }
    }

    pub fn intercept(&self) -> Option<f64> {
        self.weights.as_ref().map(|weights| weights[0])
    }

    pub fn coefficients(&self) -> Option<Array1<f64>> {
        self.weights
            .as_ref()
            .map(|weights| weights.slice_axis(Axis(0), Slice::from(1..)).to_owned())
    }

    pub fn fit(&mut self, features: &Array2<f64>, labels: &[u8]) -> Result<FitSummary> {
        let (rows, columns) = features.dim();
        if rows == 0 {
            return Err(Error::EmptyDataset);
        }
        if labels.len() != rows {
            return Err(Error::Shape(format!("{rows} rows but {} labels", labels.len())));
        }
        if let Some(label) = labels.iter().find(|&&label| label > 1) {
            return Err(Error::InvalidLabel(label.to_string()));
        }
        if labels.iter().all(|&label| label == labels[0]) {
            return Err(Error::SingleClass(labels[0]));
        }
        if self.regularization <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "regularization must be positive, got {}",
                self.regularization
            )));
        }

        // X
        let design = DMatrix::from_fn(rows, columns + 1, |i, j| {
            if j == 0 {
                1.0
            } else {
                features[(i, j - 1)]
            }
        });
        // y
        let targets = DVector::from_iterator(rows, labels.iter().map(|&label| f64::from(label)));

        let objective = Objective {
            design: &design,
            targets: &targets,
            regularization: self.regularization,
        };

        let (weights, summary) = match self.solver {
            Solver::Newton {
                max_iterations,
                tolerance,
            } => newton(&objective, columns + 1, max_iterations, tolerance)?,
            Solver::GradientDescent {
                learning_rate,
                epochs,
            } => gradient_descent(&objective, columns + 1, learning_rate, epochs),
        };

        if summary.converged {
            debug!(
                iterations = summary.iterations,
                gradient_norm = summary.gradient_norm,
                "logistic regression converged"
            );
        } else {
            warn!(
                iterations = summary.iterations,
                gradient_norm = summary.gradient_norm,
                "logistic regression did not converge; scaling the features may help"
            );
        }

        self.weights = Some(Array1::from(weights.as_slice().to_vec()));
        Ok(summary)
    }

    pub fn decision_function(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        let weights = self.weights.as_ref().ok_or(Error::NotFitted)?;
        if features.ncols() + 1 != weights.len() {
            return Err(Error::Shape(format!(
                "classifier was fitted on {} features, got {}",
                weights.len() - 1,
                features.ncols()
            )));
        }

        Ok(features.dot(&weights.slice_axis(Axis(0), Slice::from(1..))) + weights[0])
    }

    /// Probability of the positive class for each row.
    pub fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.decision_function(features)?.mapv(sigmoid))
    }

    pub fn predict(&self, features: &Array2<f64>) -> Result<Vec<u8>> {
        Ok(self
            .decision_function(features)?
            .iter()
            .map(|&score| u8::from(score > 0.0))
            .collect())
    }
}

fn newton(
    objective: &Objective<'_>,
    dimensions: usize,
    max_iterations: usize,
    tolerance: f64,
) -> Result<(DVector<f64>, FitSummary)> {
    let mut weights = DVector::zeros(dimensions);

    for iteration in 0..max_iterations {
        let gradient = objective.gradient(&weights);
        let gradient_norm = gradient.amax();
        if gradient_norm <= tolerance {
            return Ok((
                weights,
                FitSummary {
                    iterations: iteration,
                    converged: true,
                    gradient_norm,
                },
            ));
        }

        let hessian = objective.hessian(&weights);
        let direction = match hessian.clone().cholesky() {
            Some(cholesky) => cholesky.solve(&gradient),
            None => hessian
                .lu()
                .solve(&gradient)
                .ok_or_else(|| Error::Linalg("singular hessian".to_string()))?,
        };

        let current = objective.value(&weights);
        let slope = gradient.dot(&direction);
        let mut step = 1.0;
        loop {
            let candidate = &weights - &direction * step;
            if objective.value(&candidate) <= current - ARMIJO * step * slope || step < MIN_STEP {
                weights = candidate;
                break;
            }
            step *= 0.5;
        }
    }

    let gradient_norm = objective.gradient(&weights).amax();
    Ok((
        weights,
        FitSummary {
            iterations: max_iterations,
            converged: gradient_norm <= tolerance,
            gradient_norm,
        },
    ))
}

fn gradient_descent(
    objective: &Objective<'_>,
    dimensions: usize,
    learning_rate: f64,
    epochs: usize,
) -> (DVector<f64>, FitSummary) {
    let scale = objective.regularization * objective.targets.len() as f64;
    let mut weights = DVector::zeros(dimensions);

    for _ in 0..epochs {
        let gradient = objective.gradient(&weights) / scale;
        weights -= gradient * learning_rate;
    }

    let gradient_norm = objective.gradient(&weights).amax() / scale;
    (
        weights,
        FitSummary {
            iterations: epochs,
            converged: gradient_norm <= GRADIENT_DESCENT_TOLERANCE,
            gradient_norm,
        },
    )
}
