use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tch::vision::image as tch_img;
use tch::{Kind, Tensor};

use crate::error::DatasetError;

type Transform = Arc<dyn Fn(Tensor) -> Result<Tensor> + Send + Sync>;

/// Ordered per-image transforms, applied to `[C, H, W]` tensors.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    transforms: Vec<Transform>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Square resize followed by a cast to float, the preprocessing every
    /// image goes through before normalization.
    pub fn resize_to_float(size: i64) -> Self {
        let mut pipeline = Self::new();
        pipeline.add_transform(Arc::new(move |img| resize(img, size, size)));
        pipeline.add_transform(Arc::new(|img| Ok(to_float(img))));
        pipeline
    }

    pub fn add_transform(&mut self, transform: Transform) {
        self.transforms.push(transform);
    }

    pub fn transform(&self, img: Tensor) -> Result<Tensor> {
        self.transforms
            .iter()
            .try_fold(img, |output, transform| (transform.as_ref())(output))
    }
}

pub fn resize(img: Tensor, w: i64, h: i64) -> Result<Tensor> {
    Ok(tch_img::resize(&img, w, h)?)
}

pub fn to_float(img: Tensor) -> Tensor {
    img.to_kind(Kind::Float)
}

/// Global pixel statistics of the training images. The same values are
/// reused for the test images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub mean: f64,
    pub std: f64,
}

impl Normalizer {
    pub fn fit(images: &Tensor) -> Result<Self, DatasetError> {
        let mean = images.mean(Kind::Float).double_value(&[]);
        let std = images.std(false).double_value(&[]);
        Self::new(mean, std)
    }

    pub fn new(mean: f64, std: f64) -> Result<Self, DatasetError> {
        if !std.is_finite() || std <= f64::EPSILON {
            return Err(DatasetError::DegenerateNormalizer(std));
        }
        Ok(Self { mean, std })
    }

    pub fn apply(&self, images: &Tensor) -> Tensor {
        (images - self.mean) / self.std
    }
}
