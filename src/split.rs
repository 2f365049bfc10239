use crate::error::DatasetError;
use crate::utils::shuffled_indices;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
}

/// Shuffles `0..n` with `seed` and holds out `ceil(valid_fraction * n)`
/// samples for validation.
pub fn train_valid_split(n: usize, valid_fraction: f64, seed: u64) -> Result<Split, DatasetError> {
    let invalid = || DatasetError::InvalidSplit { n, fraction: valid_fraction };
    if !(valid_fraction > 0.0 && valid_fraction < 1.0) {
        return Err(invalid());
    }
    let n_valid = (valid_fraction * n as f64).ceil() as usize;
    if n_valid == 0 || n_valid >= n {
        return Err(invalid());
    }

    let mut indices = shuffled_indices(n, seed);
    let valid = indices.split_off(n - n_valid);
    Ok(Split { train: indices, valid })
}
