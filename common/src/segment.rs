use serde::{Deserialize, Serialize};

/// Metadata record written next to every segment's representative image.
///
/// Field names and rounding are consumed by the annotation tooling and must stay
/// stable:
///
/// ```json
/// {
///   "name": "frame_00003.png",
///   "width": 1920,
///   "height": 1080,
///   "duration": 1.2,
///   "start_frame_idx": 40,
///   "end_frame_idx": 70,
///   "start_frame_sec": 1.333,
///   "end_frame_sec": 2.333,
///   "mean_diff": 0.0132
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub start_frame_idx: u64,
    pub end_frame_idx: u64,
    pub start_frame_sec: f64,
    pub end_frame_sec: f64,
    pub mean_diff: f64,
}

impl SegmentMetadata {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        width: u32,
        height: u32,
        start_frame_idx: u64,
        end_frame_idx: u64,
        start_frame_sec: f64,
        end_frame_sec: f64,
        mean_diff: f64,
    ) -> Self {
        Self {
            name,
            width,
            height,
            duration: round3(end_frame_sec - start_frame_sec),
            start_frame_idx,
            end_frame_idx,
            start_frame_sec: round3(start_frame_sec),
            end_frame_sec: round3(end_frame_sec),
            mean_diff,
        }
    }

    pub fn frame_span(&self) -> u64 {
        self.end_frame_idx - self.start_frame_idx + 1
    }
}

/// Round to three decimals (millisecond precision for timestamps).
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
