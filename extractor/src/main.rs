mod driver;
mod emitter;
mod filter;
mod segmenter;
mod source;

use distinct_frames_common::catalog::CatalogDb;
use distinct_frames_common::config::{Config, ExtractionConfig};
use driver::VideoOutcome;
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct BatchTally {
    completed: u64,
    skipped: u64,
    cancelled: u64,
    failed: u64,
    segments: u64,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let extraction = Arc::new(config.extraction.clone());
    info!(
        video_dir = %extraction.video_dir.display(),
        output_dir = %extraction.output_dir.display(),
        sensitivity = extraction.sensitivity,
        mask_threshold = extraction.mask_threshold,
        mean_diff_mode = ?extraction.mean_diff_mode,
        max_concurrent_videos = extraction.max_concurrent_videos,
        "starting distinct-frames extractor"
    );

    source::ffmpeg::check_tools_available(&extraction.ffmpeg_path, &extraction.ffprobe_path)
        .await;

    let catalog = if config.database.enabled {
        match CatalogDb::open(&config.database.path) {
            Ok(db) => Some(Arc::new(db)),
            Err(e) => {
                error!(error = %e, "failed to open catalog; segments will only be written to disk");
                None
            }
        }
    } else {
        None
    };

    let videos = match driver::discover(&extraction) {
        Ok(v) => v,
        Err(e) => {
            error!(
                error = %e,
                video_dir = %extraction.video_dir.display(),
                "failed to scan video directory"
            );
            std::process::exit(1);
        }
    };
    info!(count = videos.len(), "videos discovered");

    // Finish the open segment of every running video on Ctrl-C.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finalizing videos in progress");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let tally = run_batch(videos, extraction, catalog, cancel).await;
    info!(
        completed = tally.completed,
        skipped = tally.skipped,
        cancelled = tally.cancelled,
        failed = tally.failed,
        segments = tally.segments,
        "batch finished"
    );
}

async fn run_batch(
    videos: Vec<PathBuf>,
    extraction: Arc<ExtractionConfig>,
    catalog: Option<Arc<CatalogDb>>,
    cancel: Arc<AtomicBool>,
) -> BatchTally {
    let limit = extraction.max_concurrent_videos.max(1);

    let mut results = futures_util::stream::iter(videos)
        .map(|video| {
            let extraction = Arc::clone(&extraction);
            let catalog = catalog.clone();
            let cancel = Arc::clone(&cancel);
            async move {
                if cancel.load(Ordering::Relaxed) {
                    debug!(video = %video.display(), "not started, batch cancelled");
                    return (video, None);
                }
                let task_video = video.clone();
                let result = tokio::task::spawn_blocking(move || {
                    driver::process_video(&extraction, &task_video, catalog, &cancel)
                })
                .await;
                (video, Some(result))
            }
        })
        .buffer_unordered(limit);

    let mut tally = BatchTally::default();
    while let Some((video, result)) = results.next().await {
        match result {
            None => tally.cancelled += 1,
            Some(Ok(Ok(VideoOutcome::Skipped))) => tally.skipped += 1,
            Some(Ok(Ok(VideoOutcome::Completed(summary)))) => {
                tally.completed += 1;
                tally.segments += summary.segments_emitted;
            }
            Some(Ok(Ok(VideoOutcome::Cancelled(summary)))) => {
                info!(
                    video = %video.display(),
                    frames_read = summary.frames_read,
                    segments = summary.segments_emitted,
                    "video cancelled, will be retried on next run"
                );
                tally.cancelled += 1;
                tally.segments += summary.segments_emitted;
            }
            Some(Ok(Err(e))) => {
                error!(video = %video.display(), error = %e, "video failed");
                tally.failed += 1;
            }
            Some(Err(e)) => {
                error!(video = %video.display(), error = %e, "spawn_blocking failed");
                tally.failed += 1;
            }
        }
    }
    tally
}
