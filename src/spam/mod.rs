pub mod dataset;
pub mod logistic_regression;
pub mod metrics;
pub mod split;
