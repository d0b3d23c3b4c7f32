pub mod ffmpeg;

use std::path::PathBuf;

use distinct_frames_common::frame::{Frame, VideoInfo};

pub use ffmpeg::FfmpegSource;

/// An opened, ordered stream of frames for one video.
///
/// Implementations own their decoder resources exclusively and release them on
/// drop, whichever way the read loop ends.
pub trait FrameSource {
    fn info(&self) -> &VideoInfo;

    /// Next frame in presentation order, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("video not found: {0}")]
    NotFound(PathBuf),
    #[error("video {path} is unreadable: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("failed to read frame {index}: {reason}")]
    Read { index: u64, reason: String },
}
