use tch::{Kind, Tensor};

use crate::model::TransferNet;

/// Softmax class probabilities for precomputed backbone features, `[N, k]`.
pub fn predict_proba(net: &TransferNet, features: &Tensor, batch_size: usize) -> Tensor {
    let batch_size = batch_size.max(1) as i64;
    let chunks: Vec<Tensor> = tch::no_grad(|| {
        features
            .split(batch_size, 0)
            .iter()
            .map(|xs| net.head_t(xs, false).softmax(-1, Kind::Float))
            .collect()
    });
    Tensor::cat(&chunks, 0)
}
