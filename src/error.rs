use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid idx file {path}: {reason}")]
    InvalidIdx { path: PathBuf, reason: String },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("column `{0}` not found")]
    MissingColumn(String),

    #[error("non-numeric value {value:?} in column `{column}` at row {row}")]
    NonNumeric {
        column: String,
        row: usize,
        value: String,
    },

    #[error("invalid label {0:?}")]
    InvalidLabel(String),

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("training labels contain a single class ({0})")]
    SingleClass(u8),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} called before a training forward pass")]
    MissingForwardPass(&'static str),

    #[error("model must be compiled before training")]
    NotCompiled,

    #[error("classifier must be fitted before predicting")]
    NotFitted,

    #[error("linear algebra failure: {0}")]
    Linalg(String),

    #[error("plot failed: {0}")]
    Plot(String),
}

impl From<ndarray::ShapeError> for Error {
    fn from(error: ndarray::ShapeError) -> Self {
        Self::Shape(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
