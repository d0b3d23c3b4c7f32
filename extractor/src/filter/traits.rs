use distinct_frames_common::frame::Frame;
use image::GrayImage;

/// Outcome of comparing a candidate frame against a segment's representative.
#[derive(Debug, Clone)]
pub struct FrameDiff {
    /// Mean per-pixel luma difference, normalized to `[0, 1]`.
    pub mean_diff: f64,
    /// 255 where the pixel changed significantly, 0 elsewhere. Visualization only.
    pub mask: GrayImage,
}

/// Pairwise frame dissimilarity used to decide segment boundaries.
///
/// Implementations must be pure and symmetric in `mean_diff`: comparing A to B
/// yields the same score as B to A.
pub trait DifferenceMetric: Send + Sync {
    fn compare(&self, representative: &Frame, candidate: &Frame) -> FrameDiff;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
