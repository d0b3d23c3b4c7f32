use distinct_frames_common::frame::Frame;
use image::{GrayImage, Luma, RgbImage};
use tracing::warn;

use super::traits::{DifferenceMetric, FrameDiff};

/// Luma of an absolute RGB difference.
///
/// Fixed-point BT.601 weights (0.299, 0.587, 0.114) scaled by 2^14 with rounding,
/// the same conversion common decoders use for RGB→gray.
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13)) >> 14) as u8
}

/// Absolute-difference metric.
///
/// Algorithm:
/// 1. Per-channel `|A - B|` for every pixel
/// 2. Collapse the difference to one luma channel
/// 3. `mean_diff = mean(luma) / 255`
/// 4. Mask pixels whose luma difference exceeds `mask_threshold`
pub struct LumaAbsDiff {
    mask_threshold: u8,
}

impl LumaAbsDiff {
    pub fn new(mask_threshold: u8) -> Self {
        Self { mask_threshold }
    }
}

impl Default for LumaAbsDiff {
    fn default() -> Self {
        Self::new(25)
    }
}

impl DifferenceMetric for LumaAbsDiff {
    fn compare(&self, representative: &Frame, candidate: &Frame) -> FrameDiff {
        let (a, b) = (&representative.image, &candidate.image);
        if a.dimensions() != b.dimensions() {
            warn!(
                representative = ?a.dimensions(),
                candidate = ?b.dimensions(),
                frame_idx = candidate.index,
                "frame dimensions differ, treating as maximal difference"
            );
            return FrameDiff {
                mean_diff: 1.0,
                mask: GrayImage::new(a.width(), a.height()),
            };
        }

        let (width, height) = a.dimensions();
        let mut mask = GrayImage::new(width, height);
        let pixel_count = width as u64 * height as u64;
        if pixel_count == 0 {
            return FrameDiff {
                mean_diff: 0.0,
                mask,
            };
        }

        let mut sum: u64 = 0;
        for ((pa, pb), out) in a.pixels().zip(b.pixels()).zip(mask.pixels_mut()) {
            let d = luma(
                pa[0].abs_diff(pb[0]),
                pa[1].abs_diff(pb[1]),
                pa[2].abs_diff(pb[2]),
            );
            sum += d as u64;
            if d > self.mask_threshold {
                *out = Luma([255]);
            }
        }

        FrameDiff {
            mean_diff: sum as f64 / pixel_count as f64 / 255.0,
            mask,
        }
    }

    fn name(&self) -> &str {
        "luma-absdiff"
    }
}

/// Keep the candidate's pixels where `mask` is set, black elsewhere.
pub fn apply_mask(candidate: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = RgbImage::new(candidate.width(), candidate.height());
    if candidate.dimensions() != mask.dimensions() {
        return out;
    }
    for ((src, m), dst) in candidate.pixels().zip(mask.pixels()).zip(out.pixels_mut()) {
        if m[0] != 0 {
            *dst = *src;
        }
    }
    out
}
