use anyhow::{ensure, Result};
use edgesam_core::Tensor;

use crate::{BinaryMask, Size};

/// Converts `B x C x H x W` mask logits into a mask of `target` size.
///
/// Plane 0 is used. Logits are resized first and thresholded second; a pixel is
/// foreground when its logit is strictly positive.
pub fn logits_to_mask(logits: &Tensor, target: Size) -> Result<BinaryMask> {
    let dims = logits.shape().dims();
    ensure!(dims.len() == 4, "mask logits must have rank 4, got {}", logits.shape());
    ensure!(
        dims.iter().all(|d| *d > 0),
        "mask logits are empty: {}",
        logits.shape()
    );

    let source = Size::new(dims[3] as u32, dims[2] as u32);
    let values = logits.to_f32_vec()?;
    let plane = &values[..source.area()];

    let mask = if source == target {
        threshold(plane, target)
    } else {
        threshold(&resize_bilinear(plane, source, target), target)
    };
    Ok(mask)
}

pub fn threshold(logits: &[f32], size: Size) -> BinaryMask {
    let data = logits
        .iter()
        .map(|v| {
            if *v > 0.0 {
                BinaryMask::FOREGROUND
            } else {
                BinaryMask::BACKGROUND
            }
        })
        .collect();
    BinaryMask::from_raw(size, data)
}

/// Bilinear resize of a single row-major plane using pixel-centre alignment.
pub fn resize_bilinear(src: &[f32], src_size: Size, dst_size: Size) -> Vec<f32> {
    let (sw, sh) = (src_size.width as usize, src_size.height as usize);
    let (dw, dh) = (dst_size.width as usize, dst_size.height as usize);
    let xs = sample_positions(sw, dw);
    let ys = sample_positions(sh, dh);

    let mut dst = Vec::with_capacity(dw * dh);
    for &(y0, y1, fy) in &ys {
        let row0 = &src[y0 * sw..(y0 + 1) * sw];
        let row1 = &src[y1 * sw..(y1 + 1) * sw];
        for &(x0, x1, fx) in &xs {
            let top = lerp(row0[x0], row0[x1], fx);
            let bottom = lerp(row1[x0], row1[x1], fx);
            dst.push(lerp(top, bottom, fy));
        }
    }
    dst
}

// An exact sample ignores its neighbour, so an infinite neighbour cannot turn it into NaN.
fn lerp(a: f32, b: f32, weight: f32) -> f32 {
    if weight == 0.0 {
        a
    } else {
        a * (1.0 - weight) + b * weight
    }
}

// (lower index, upper index, weight of the upper index) for each destination pixel.
fn sample_positions(src: usize, dst: usize) -> Vec<(usize, usize, f32)> {
    let scale = src as f32 / dst as f32;
    (0..dst)
        .map(|d| {
            let pos = (d as f32 + 0.5) * scale - 0.5;
            let lower = pos.floor();
            let mut frac = pos - lower;
            let mut i0 = lower as isize;
            if i0 < 0 {
                i0 = 0;
                frac = 0.0;
            }
            let mut i0 = i0 as usize;
            if i0 >= src - 1 {
                i0 = src - 1;
                frac = 0.0;
            }
            let i1 = (i0 + 1).min(src - 1);
            (i0, i1, frac)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgesam_core::Shape;

    #[test]
    fn negative_and_positive_logits_map_to_background_and_foreground() {
        let logits = Tensor::from_f32(Shape::from_slice(&[1, 1, 1, 2]), &[-1.0, 1.0]).unwrap();
        let mask = logits_to_mask(&logits, Size::new(2, 1)).unwrap();
        assert_eq!(mask.as_raw(), &[0, 255]);
    }

    #[test]
    fn zero_logit_is_background() {
        let mask = threshold(&[0.0, -0.0, f32::MIN_POSITIVE], Size::new(3, 1));
        assert_eq!(mask.as_raw(), &[0, 0, 255]);
    }

    #[test]
    fn resizes_before_thresholding() {
        // Thresholding first and interpolating the binary mask would mark the
        // third pixel as foreground; the interpolated logit there is exactly 0.
        let logits = Tensor::from_f32(Shape::from_slice(&[1, 1, 1, 2]), &[-3.0, 1.0]).unwrap();
        let mask = logits_to_mask(&logits, Size::new(4, 1)).unwrap();
        assert_eq!(mask.as_raw(), &[0, 0, 0, 255]);
    }

    #[test]
    fn exact_samples_survive_infinite_neighbours() {
        let logits =
            Tensor::from_f32(Shape::from_slice(&[1, 1, 1, 2]), &[f32::INFINITY, f32::NEG_INFINITY])
                .unwrap();
        let mask = logits_to_mask(&logits, Size::new(4, 1)).unwrap();
        assert_eq!(mask.get(0, 0), BinaryMask::FOREGROUND);
        assert_eq!(mask.get(3, 0), BinaryMask::BACKGROUND);

        let out = resize_bilinear(&[f32::INFINITY, 1.0], Size::new(2, 1), Size::new(2, 2));
        assert_eq!(out, vec![f32::INFINITY, 1.0, f32::INFINITY, 1.0]);
    }

    #[test]
    fn bilinear_upscale_matches_pixel_centre_sampling() {
        let out = resize_bilinear(&[-1.0, 3.0], Size::new(2, 1), Size::new(4, 1));
        assert_eq!(out, vec![-1.0, 0.0, 2.0, 3.0]);
    }

    #[test]
    fn bilinear_downscale_averages_neighbours() {
        let src = [0.0, 2.0, 4.0, 6.0];
        let out = resize_bilinear(&src, Size::new(4, 1), Size::new(2, 1));
        assert_eq!(out, vec![1.0, 5.0]);
    }

    #[test]
    fn uses_first_plane_of_multimask_output() {
        let logits = Tensor::from_f32(
            Shape::from_slice(&[1, 2, 1, 2]),
            &[1.0, -1.0, -1.0, 1.0],
        )
        .unwrap();
        let mask = logits_to_mask(&logits, Size::new(2, 1)).unwrap();
        assert_eq!(mask.as_raw(), &[255, 0]);
    }

    #[test]
    fn rejects_rank_three_logits() {
        let logits = Tensor::from_f32(Shape::from_slice(&[1, 1, 2]), &[1.0, 1.0]).unwrap();
        assert!(logits_to_mask(&logits, Size::new(2, 1)).is_err());
    }
}
