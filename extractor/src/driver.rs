use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use distinct_frames_common::catalog::{CatalogDb, VideoStatus};
use distinct_frames_common::config::ExtractionConfig;
use tracing::{info, warn};

use crate::emitter::{EmitError, FsEmitter};
use crate::filter::absdiff::LumaAbsDiff;
use crate::segmenter::keys::output_folder;
use crate::segmenter::state::{
    EngineError, RunSummary, SegmentationConfig, SegmentationEngine, StreamEnd,
};
use crate::source::{FfmpegSource, FrameSource, SourceError};

/// Present in an output folder while its video is being processed.
pub const IN_PROGRESS_MARKER: &str = ".in_progress";

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to prepare output folder {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Emitter(#[from] EmitError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// How one video's run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoOutcome {
    /// Output folder already holds a finished run.
    Skipped,
    Completed(RunSummary),
    /// Segments up to the cancellation point were emitted; the video stays pending.
    Cancelled(RunSummary),
}

/// All videos under `config.video_dir` with a recognized extension, sorted by path.
/// A missing `video_dir` yields an empty batch.
pub fn discover(config: &ExtractionConfig) -> std::io::Result<Vec<PathBuf>> {
    if !config.video_dir.is_dir() {
        warn!(
            video_dir = %config.video_dir.display(),
            "video directory does not exist, nothing to process"
        );
        return Ok(Vec::new());
    }
    let mut videos = Vec::new();
    walk(&config.video_dir, config, &mut videos)?;
    videos.sort();
    Ok(videos)
}

fn walk(dir: &Path, config: &ExtractionConfig, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, config, out)?;
        } else if config.is_video(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// A folder counts as processed when it exists and no run is pending in it.
pub fn is_processed(folder: &Path) -> bool {
    folder.is_dir() && !folder.join(IN_PROGRESS_MARKER).exists()
}

/// Segment one video end to end. Blocking; run it on a blocking thread.
pub fn process_video(
    config: &ExtractionConfig,
    video: &Path,
    catalog: Option<Arc<CatalogDb>>,
    cancel: &AtomicBool,
) -> Result<VideoOutcome, VideoError> {
    let folder = output_folder(&config.video_dir, &config.output_dir, video);
    if is_processed(&folder) {
        info!(video = %video.display(), folder = %folder.display(), "already processed, skipping");
        return Ok(VideoOutcome::Skipped);
    }

    let mut source = FfmpegSource::open(video, &config.ffmpeg_path, &config.ffprobe_path)?;
    process_source(config, &mut source, &folder, catalog, cancel)
}

/// Run the engine over an opened source, writing into `folder`.
///
/// The folder and its in-progress marker are created here, after the source
/// opened successfully. The marker is only removed when the stream ran to its end.
pub fn process_source(
    config: &ExtractionConfig,
    source: &mut dyn FrameSource,
    folder: &Path,
    catalog: Option<Arc<CatalogDb>>,
    cancel: &AtomicBool,
) -> Result<VideoOutcome, VideoError> {
    let info = source.info().clone();
    info!(
        video = %info.path.display(),
        resolution = format!("{}x{}", info.width, info.height),
        fps = format!("{:.2}", info.fps),
        frame_count = info.frame_count,
        duration_sec = format!("{:.1}", info.duration_sec()),
        "processing video"
    );

    let mut emitter = FsEmitter::new(folder, &config.frame_prefix, &config.image_format)?;

    let marker = folder.join(IN_PROGRESS_MARKER);
    std::fs::create_dir_all(folder)
        .and_then(|_| std::fs::write(&marker, b""))
        .map_err(|source| VideoError::Output {
            path: folder.to_path_buf(),
            source,
        })?;

    let video_id = catalog.as_ref().and_then(|db| match db.begin_video(&info, folder) {
        Ok(id) => Some((db.clone(), id)),
        Err(e) => {
            warn!(error = %e, video = %info.path.display(), "catalog unavailable for video");
            None
        }
    });

    if let Some((db, id)) = &video_id {
        emitter = emitter.with_catalog(db.clone(), *id);
    }

    let engine = SegmentationEngine::new(
        LumaAbsDiff::new(config.mask_threshold),
        SegmentationConfig::from(config),
    );

    let result = engine.run(source, &mut emitter, cancel);

    let (status, frames_read, error) = match &result {
        Ok(summary) if summary.end == StreamEnd::Cancelled => {
            (VideoStatus::Cancelled, summary.frames_read, None)
        }
        Ok(summary) => (VideoStatus::Complete, summary.frames_read, None),
        Err(e) => (VideoStatus::Failed, e.frames_read, Some(e.to_string())),
    };
    if let Some((db, id)) = &video_id {
        if let Err(e) = db.finish_video(*id, status, frames_read, error.as_deref()) {
            warn!(error = %e, video_id = *id, "failed to record video status in catalog");
        }
    }

    let summary = result?;
    if summary.end == StreamEnd::Cancelled {
        return Ok(VideoOutcome::Cancelled(summary));
    }

    std::fs::remove_file(&marker).map_err(|source| VideoError::Output {
        path: marker.clone(),
        source,
    })?;

    info!(
        video = %info.path.display(),
        frames_read = summary.frames_read,
        segments = summary.segments_emitted,
        ended_by = ?summary.end,
        "video complete"
    );
    Ok(VideoOutcome::Completed(summary))
}
