use std::path::PathBuf;

use thiserror::Error;

/// Failures caused by the content of the dataset rather than by I/O.
#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("no rows found in {0:?}")]
    Empty(PathBuf),

    #[error("unknown breed {0:?}")]
    UnknownBreed(String),

    #[error("shape mismatch: {what} has {got} rows, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("cannot normalize: standard deviation is {0}")]
    DegenerateNormalizer(f64),

    #[error("invalid split of {n} samples with validation fraction {fraction}")]
    InvalidSplit { n: usize, fraction: f64 },
}
