use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::debug;
use rayon::prelude::*;
use tch::Tensor;

use crate::error::DatasetError;
use crate::transform_pipeline::TransformPipeline;
use crate::utils::{index_tensor, rgb_image_to_tensor, shuffled_indices};

pub fn image_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.jpg"))
}

fn load_image(path: &Path, pipeline: &TransformPipeline) -> Result<Tensor> {
    let image = image::open(path)
        .with_context(|| format!("decoding {path:?}"))?
        .to_rgb8();
    pipeline
        .transform(rgb_image_to_tensor(&image))
        .with_context(|| format!("transforming {path:?}"))
}

pub fn progress_bar(len: u64, what: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::with_template("{msg:>10} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})")
    {
        pb.set_style(style);
    }
    pb.set_message(what.to_string());
    pb
}

/// Loads `<dir>/<id>.jpg` for every id, in parallel, keeping the order of `ids`.
/// Returns a `[N, C, H, W]` tensor.
pub fn load_images<S: AsRef<str> + Sync>(
    dir: &Path,
    ids: &[S],
    pipeline: &TransformPipeline,
) -> Result<Tensor> {
    if ids.is_empty() {
        return Err(DatasetError::Empty(dir.to_path_buf()).into());
    }
    let pb = progress_bar(ids.len() as u64, "loading");
    let images = ids
        .par_iter()
        .progress_with(pb.clone())
        .map(|id| load_image(&image_path(dir, id.as_ref()), pipeline))
        .collect::<Result<Vec<Tensor>>>()?;
    pb.finish_and_clear();

    let images = Tensor::stack(&images, 0);
    debug!("loaded {:?} from {dir:?}", images.size());
    Ok(images)
}

#[derive(Debug)]
pub struct Batch {
    pub index: usize,
    pub images: Tensor,
    pub labels: Tensor,
}

/// Iterates mini-batches over in-memory tensors. Each sample is visited once
/// per pass, the last batch may be shorter than `batch_size`.
#[derive(Debug)]
pub struct BatchLoader {
    images: Tensor,
    labels: Tensor,
    batch_size: usize,
    order: Vec<usize>,
    current_batch: usize,
}

impl BatchLoader {
    pub fn new(images: &Tensor, labels: &Tensor, batch_size: usize) -> Result<Self, DatasetError> {
        let n = images.size()[0] as usize;
        let n_labels = labels.size()[0] as usize;
        if n_labels != n {
            return Err(DatasetError::ShapeMismatch { what: "labels", got: n_labels, expected: n });
        }
        Ok(Self {
            images: images.shallow_clone(),
            labels: labels.shallow_clone(),
            batch_size: batch_size.max(1),
            order: (0..n).collect(),
            current_batch: 0,
        })
    }

    /// Reorders the samples, seeded so that a run is reproducible.
    pub fn shuffle(mut self, seed: u64) -> Self {
        self.order = shuffled_indices(self.order.len(), seed);
        self
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

impl Iterator for BatchLoader {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.current_batch * self.batch_size;
        if start >= self.order.len() {
            return None;
        }
        let end = (start + self.batch_size).min(self.order.len());
        let idx = index_tensor(&self.order[start..end]).to_device(self.images.device());

        let batch = Batch {
            index: self.current_batch,
            images: self.images.index_select(0, &idx),
            labels: self.labels.index_select(0, &idx.to_device(self.labels.device())),
        };
        self.current_batch += 1;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tch::{Device, Kind};

    #[test]
    fn batches_cover_every_sample_once() {
        let xs = Tensor::arange(10, (Kind::Float, Device::Cpu)).view([10, 1]);
        let ys = Tensor::arange(10, (Kind::Int64, Device::Cpu));
        let loader = BatchLoader::new(&xs, &ys, 4).unwrap().shuffle(3);
        assert_eq!(loader.len(), 10);

        let mut seen = Vec::new();
        let mut sizes = Vec::new();
        for batch in loader {
            sizes.push(batch.images.size()[0]);
            let x = Vec::<f32>::try_from(&batch.images.view([-1])).unwrap();
            let y = Vec::<i64>::try_from(&batch.labels).unwrap();
            assert_eq!(x.iter().map(|&v| v as i64).collect::<Vec<_>>(), y);
            seen.extend(y);
        }
        assert_eq!(sizes, [4, 4, 2]);
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn mismatched_labels_are_rejected() {
        let xs = Tensor::zeros([3, 2], (Kind::Float, Device::Cpu));
        let ys = Tensor::zeros([2], (Kind::Int64, Device::Cpu));
        assert_eq!(
            BatchLoader::new(&xs, &ys, 2).unwrap_err(),
            DatasetError::ShapeMismatch { what: "labels", got: 2, expected: 3 }
        );
    }

    #[test]
    fn loads_jpegs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for (id, value) in [("a", 20u8), ("b", 220u8)] {
            let img = RgbImage::from_pixel(30, 20, Rgb([value, value, value]));
            img.save(image_path(dir.path(), id)).unwrap();
        }

        let pipeline = TransformPipeline::resize_to_float(8);
        let xs = load_images(dir.path(), &["b", "a"], &pipeline).unwrap();
        assert_eq!(xs.size(), [2, 3, 8, 8]);
        let first = xs.get(0).mean(Kind::Float).double_value(&[]);
        let second = xs.get(1).mean(Kind::Float).double_value(&[]);
        assert!(first > 200.0 && second < 40.0, "{first} {second}");
    }

    #[test]
    fn missing_image_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TransformPipeline::resize_to_float(8);
        let err = load_images(dir.path(), &["nope"], &pipeline).unwrap_err();
        assert!(format!("{err:#}").contains("nope.jpg"));
    }
}
