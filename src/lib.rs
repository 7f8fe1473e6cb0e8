//! Two small classifiers: a convolutional network for MNIST digits and a
//! logistic regression for spam features, with the data loading, metrics
//! and plots they need.

pub mod config;
pub mod digits;
pub mod error;
pub mod logging;
pub mod nn;
pub mod plot;
pub mod report;
pub mod spam;

pub use error::{Error, Result};
