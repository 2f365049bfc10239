use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tch::Tensor;

/// `h * w * 3` bytes => `[3, h, w]` uint8 tensor.
pub fn rgb_image_to_tensor(image: &RgbImage) -> Tensor {
    let (w, h) = image.dimensions();
    Tensor::from_slice(image.as_raw())
        .view([h as i64, w as i64, 3])
        .permute([2, 0, 1])
        .contiguous()
}

/// Returns `0..n` in an order fixed by `seed`.
pub fn shuffled_indices(n: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    indices
}

pub fn index_tensor(indices: &[usize]) -> Tensor {
    let indices: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_slice(&indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn image_to_chw() {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(3, 1, Rgb([10, 20, 30]));
        let t = rgb_image_to_tensor(&img);
        assert_eq!(t.size(), [3, 2, 4]);
        assert_eq!(t.int64_value(&[0, 1, 3]), 10);
        assert_eq!(t.int64_value(&[1, 1, 3]), 20);
        assert_eq!(t.int64_value(&[2, 1, 3]), 30);
        assert_eq!(t.int64_value(&[2, 0, 0]), 0);
    }

    #[test]
    fn shuffle_is_seeded() {
        let a = shuffled_indices(50, 7);
        assert_eq!(a, shuffled_indices(50, 7));
        assert_ne!(a, shuffled_indices(50, 8));
        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }
}
