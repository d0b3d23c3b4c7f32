use image::RgbImage;
use std::path::PathBuf;

/// One decoded video frame in RGB order.
///
/// Frames are immutable once read; the segmentation engine keeps at most one of
/// them (the open segment's representative) alive at a time.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub timestamp_sec: f64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, timestamp_sec: f64, image: RgbImage) -> Self {
        Self {
            index,
            timestamp_sec,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Container-level metadata of an opened video, fixed for the lifetime of a source.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Frame count as reported by the container. Zero when unknown.
    pub frame_count: u64,
    pub fps: f64,
}

impl VideoInfo {
    /// Presentation time of frame `index`: `index / fps`, or 0.0 when fps is unknown.
    pub fn timestamp_for(&self, index: u64) -> f64 {
        timestamp_for(index, self.fps)
    }

    pub fn duration_sec(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }

    /// Bytes of one packed RGB24 frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

pub fn timestamp_for(index: u64, fps: f64) -> f64 {
    if fps > 0.0 {
        index as f64 / fps
    } else {
        0.0
    }
}
