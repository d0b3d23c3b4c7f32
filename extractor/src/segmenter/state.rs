use std::sync::atomic::{AtomicBool, Ordering};

use distinct_frames_common::config::{ExtractionConfig, MeanDiffMode};
use distinct_frames_common::frame::{Frame, VideoInfo};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::emitter::{EmitError, Emitter};
use crate::filter::absdiff::apply_mask;
use crate::filter::traits::DifferenceMetric;
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationConfig {
    /// A candidate whose mean diff against the representative is `>= sensitivity`
    /// starts a new segment.
    pub sensitivity: f64,
    pub mean_diff_mode: MeanDiffMode,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self::from(&ExtractionConfig::default())
    }
}

impl From<&ExtractionConfig> for SegmentationConfig {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            mean_diff_mode: config.mean_diff_mode,
        }
    }
}

/// The open segment: a representative frame and the span of frames that still
/// compare as identical to it.
#[derive(Debug, Clone)]
pub struct SegmentState {
    sequence: u64,
    representative: Frame,
    first_index: u64,
    last_index: u64,
    first_time: f64,
    last_time: f64,
    /// Diagnostic value of the most recent comparison against the representative.
    mean_diff: f64,
    /// Largest below-threshold diff absorbed into this segment.
    max_interior_diff: f64,
}

/// A finalized segment, ready to be emitted. Immutable.
#[derive(Debug, Clone)]
pub struct ClosedSegment {
    pub sequence: u64,
    pub representative: Frame,
    /// Triggering frame masked by the changed pixels; all black for the final segment.
    pub diff_image: RgbImage,
    pub first_index: u64,
    pub last_index: u64,
    pub first_time: f64,
    pub last_time: f64,
    pub mean_diff: f64,
}

/// Result of feeding one frame to an open segment.
#[derive(Debug)]
pub enum Transition {
    /// The frame matched the representative; the segment now ends at it.
    Extended(SegmentState),
    /// The frame is distinct: the old segment is closed and a new one is seeded
    /// from the frame, in one step.
    Split {
        closed: ClosedSegment,
        opened: SegmentState,
    },
}

impl SegmentState {
    pub fn open(frame: Frame, sequence: u64) -> Self {
        Self {
            sequence,
            first_index: frame.index,
            last_index: frame.index,
            first_time: frame.timestamp_sec,
            last_time: frame.timestamp_sec,
            representative: frame,
            mean_diff: 0.0,
            max_interior_diff: 0.0,
        }
    }

    pub fn advance(
        self,
        frame: Frame,
        metric: &dyn DifferenceMetric,
        config: &SegmentationConfig,
    ) -> Transition {
        let diff = metric.compare(&self.representative, &frame);

        if diff.mean_diff < config.sensitivity {
            return Transition::Extended(Self {
                last_index: frame.index,
                last_time: frame.timestamp_sec,
                mean_diff: diff.mean_diff,
                max_interior_diff: self.max_interior_diff.max(diff.mean_diff),
                ..self
            });
        }

        debug!(
            frame_idx = frame.index,
            mean_diff = format!("{:.6}", diff.mean_diff),
            sequence = self.sequence,
            "distinct change"
        );

        let mean_diff = match config.mean_diff_mode {
            MeanDiffMode::Boundary => diff.mean_diff,
            MeanDiffMode::Interior => self.max_interior_diff,
        };
        let diff_image = apply_mask(&frame.image, &diff.mask);
        let next_sequence = self.sequence + 1;

        Transition::Split {
            closed: ClosedSegment {
                sequence: self.sequence,
                representative: self.representative,
                diff_image,
                first_index: self.first_index,
                last_index: self.last_index,
                first_time: self.first_time,
                last_time: self.last_time,
                mean_diff,
            },
            opened: Self::open(frame, next_sequence),
        }
    }

    /// Close the segment because no further frame follows it.
    pub fn close(self, mode: MeanDiffMode) -> ClosedSegment {
        let mean_diff = match mode {
            MeanDiffMode::Boundary => self.mean_diff,
            MeanDiffMode::Interior => self.max_interior_diff,
        };
        let (w, h) = self.representative.image.dimensions();
        ClosedSegment {
            sequence: self.sequence,
            diff_image: RgbImage::new(w, h),
            representative: self.representative,
            first_index: self.first_index,
            last_index: self.last_index,
            first_time: self.first_time,
            last_time: self.last_time,
            mean_diff,
        }
    }
}

/// Per-video segmentation state: empty before the first frame, then one open
/// segment, then closed after `finish`.
pub struct SegmentationSession<'m> {
    /// None before the first frame and after `finish`.
    state: Option<SegmentState>,
    finished: bool,
    metric: &'m dyn DifferenceMetric,
    config: SegmentationConfig,
}

impl<'m> SegmentationSession<'m> {
    pub fn new(metric: &'m dyn DifferenceMetric, config: SegmentationConfig) -> Self {
        Self {
            state: None,
            finished: false,
            metric,
            config,
        }
    }

    /// Feed the next frame. Returns the segment it closed, if any.
    pub fn push(&mut self, frame: Frame) -> Option<ClosedSegment> {
        if self.finished {
            warn!(frame_idx = frame.index, "frame pushed after session finished, ignoring");
            return None;
        }

        let Some(open) = self.state.take() else {
            self.state = Some(SegmentState::open(frame, 0));
            return None;
        };

        match open.advance(frame, self.metric, &self.config) {
            Transition::Extended(state) => {
                self.state = Some(state);
                None
            }
            Transition::Split { closed, opened } => {
                self.state = Some(opened);
                Some(closed)
            }
        }
    }

    /// End of input: close the open segment, if there is one.
    pub fn finish(&mut self) -> Option<ClosedSegment> {
        self.finished = true;
        self.state
            .take()
            .map(|open| open.close(self.config.mean_diff_mode))
    }
}

/// Why a run stopped reading frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Exhausted,
    /// The source failed mid-stream; handled exactly like exhaustion.
    ReadFailure,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_read: u64,
    pub segments_emitted: u64,
    pub end: StreamEnd,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to emit segment {sequence} after {frames_read} frames: {source}")]
pub struct EngineError {
    pub sequence: u64,
    pub frames_read: u64,
    #[source]
    pub source: EmitError,
}

/// Drives a [`FrameSource`] through a [`SegmentationSession`] and hands every
/// closed segment to an [`Emitter`], in sequence order.
pub struct SegmentationEngine<M> {
    metric: M,
    config: SegmentationConfig,
}

impl<M: DifferenceMetric> SegmentationEngine<M> {
    pub fn new(metric: M, config: SegmentationConfig) -> Self {
        Self { metric, config }
    }

    /// Segment one video. Stops at the first emit failure; segments emitted before
    /// it stay emitted. `cancel` is polled before every frame read.
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        emitter: &mut dyn Emitter,
        cancel: &AtomicBool,
    ) -> Result<RunSummary, EngineError> {
        let mut session = SegmentationSession::new(&self.metric, self.config);
        let mut frames_read: u64 = 0;
        let mut segments_emitted: u64 = 0;
        let info = source.info().clone();
        debug!(
            path = %info.path.display(),
            metric = self.metric.name(),
            sensitivity = self.config.sensitivity,
            "segmentation started"
        );

        let end = loop {
            if cancel.load(Ordering::Relaxed) {
                info!(
                    path = %info.path.display(),
                    frames_read,
                    "cancelled, finalizing open segment"
                );
                break StreamEnd::Cancelled;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StreamEnd::Exhausted,
                Err(e) => {
                    warn!(
                        path = %info.path.display(),
                        error = %e,
                        frames_read,
                        "read failure, treating as end of stream"
                    );
                    break StreamEnd::ReadFailure;
                }
            };
            frames_read += 1;

            if let Some(closed) = session.push(frame) {
                emit(emitter, &info, &closed, frames_read)?;
                segments_emitted += 1;
            }
        };

        if let Some(last) = session.finish() {
            emit(emitter, &info, &last, frames_read)?;
            segments_emitted += 1;
        }

        Ok(RunSummary {
            frames_read,
            segments_emitted,
            end,
        })
    }
}

fn emit(
    emitter: &mut dyn Emitter,
    info: &VideoInfo,
    segment: &ClosedSegment,
    frames_read: u64,
) -> Result<(), EngineError> {
    emitter.emit(info, segment).map_err(|source| EngineError {
        sequence: segment.sequence,
        frames_read,
        source,
    })
}
