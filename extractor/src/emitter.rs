use std::path::{Path, PathBuf};
use std::sync::Arc;

use distinct_frames_common::catalog::CatalogDb;
use distinct_frames_common::frame::VideoInfo;
use distinct_frames_common::segment::SegmentMetadata;
use image::{ImageFormat, RgbImage};
use tracing::{debug, warn};

use crate::segmenter::keys::{artifact_names, ArtifactNames};
use crate::segmenter::state::ClosedSegment;

/// Persists closed segments. Called once per segment, in sequence order.
pub trait Emitter {
    fn emit(&mut self, info: &VideoInfo, segment: &ClosedSegment) -> Result<(), EmitError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to serialize metadata for {name}: {source}")]
    Metadata {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

/// Writes the representative image, diff image and metadata JSON of each segment
/// into one video's output folder, optionally indexing them in the catalog.
///
/// Writing the same sequence number again overwrites the same three files.
pub struct FsEmitter {
    folder: PathBuf,
    prefix: String,
    extension: String,
    format: ImageFormat,
    catalog: Option<(Arc<CatalogDb>, i64)>,
}

impl FsEmitter {
    pub fn new(folder: &Path, prefix: &str, image_format: &str) -> Result<Self, EmitError> {
        let extension = image_format.trim_start_matches('.').to_ascii_lowercase();
        let format = ImageFormat::from_extension(&extension)
            .ok_or_else(|| EmitError::UnsupportedFormat(image_format.to_string()))?;
        Ok(Self {
            folder: folder.to_path_buf(),
            prefix: prefix.to_string(),
            extension,
            format,
            catalog: None,
        })
    }

    /// Also upsert every emitted segment into `catalog` under `video_id`.
    pub fn with_catalog(mut self, catalog: Arc<CatalogDb>, video_id: i64) -> Self {
        self.catalog = Some((catalog, video_id));
        self
    }

    fn save_image(&self, image: &RgbImage, name: &str) -> Result<(), EmitError> {
        let path = self.folder.join(name);
        image
            .save_with_format(&path, self.format)
            .map_err(|source| EmitError::Image { path, source })
    }
}

impl Emitter for FsEmitter {
    fn emit(&mut self, info: &VideoInfo, segment: &ClosedSegment) -> Result<(), EmitError> {
        let ArtifactNames {
            image,
            diff,
            metadata,
        } = artifact_names(&self.prefix, segment.sequence, &self.extension);

        self.save_image(&segment.representative.image, &image)?;
        self.save_image(&segment.diff_image, &diff)?;

        let meta = SegmentMetadata::new(
            image.clone(),
            info.width,
            info.height,
            segment.first_index,
            segment.last_index,
            segment.first_time,
            segment.last_time,
            segment.mean_diff,
        );
        let json = serde_json::to_string_pretty(&meta).map_err(|source| EmitError::Metadata {
            name: image.clone(),
            source,
        })?;
        let meta_path = self.folder.join(&metadata);
        std::fs::write(&meta_path, json).map_err(|source| EmitError::Io {
            path: meta_path,
            source,
        })?;

        debug!(
            name = image,
            sequence = segment.sequence,
            start_frame_idx = segment.first_index,
            end_frame_idx = segment.last_index,
            frames = meta.frame_span(),
            mean_diff = format!("{:.6}", segment.mean_diff),
            "segment emitted"
        );

        if let Some((catalog, video_id)) = &self.catalog {
            if let Err(e) = catalog.upsert_segment(*video_id, segment.sequence, &meta) {
                warn!(
                    error = %e,
                    video_id,
                    sequence = segment.sequence,
                    "catalog upsert failed, artifacts on disk are unaffected"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distinct_frames_common::frame::Frame;
    use image::Rgb;

    fn info() -> VideoInfo {
        VideoInfo {
            path: PathBuf::from("cam.mp4"),
            width: 4,
            height: 2,
            frame_count: 30,
            fps: 3.0,
        }
    }

    fn segment(sequence: u64, first: u64, last: u64) -> ClosedSegment {
        let image = RgbImage::from_pixel(4, 2, Rgb([200, 10, 10]));
        ClosedSegment {
            sequence,
            representative: Frame::new(first, first as f64 / 3.0, image),
            diff_image: RgbImage::new(4, 2),
            first_index: first,
            last_index: last,
            first_time: first as f64 / 3.0,
            last_time: last as f64 / 3.0,
            mean_diff: 0.0123,
        }
    }

    #[test]
    fn test_writes_three_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut emitter = FsEmitter::new(dir.path(), "frame", "png").unwrap();
        emitter.emit(&info(), &segment(3, 1, 8)).unwrap();

        assert!(dir.path().join("frame_00003.png").is_file());
        assert!(dir.path().join("frame_00003_diff.png").is_file());

        let raw = std::fs::read_to_string(dir.path().join("frame_00003.json")).unwrap();
        assert!(raw.starts_with("{\n  \"name\": \"frame_00003.png\""));
        let meta: SegmentMetadata = serde_json::from_str(&raw).unwrap();
        assert_eq!(meta.width, 4);
        assert_eq!(meta.height, 2);
        assert_eq!(meta.start_frame_idx, 1);
        assert_eq!(meta.end_frame_idx, 8);
        assert_eq!(meta.start_frame_sec, 0.333);
        assert_eq!(meta.end_frame_sec, 2.667);
        assert_eq!(meta.duration, 2.333);
        assert_eq!(meta.mean_diff, 0.0123);

        let img = image::open(dir.path().join("frame_00003.png")).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0), &Rgb([200, 10, 10]));
    }

    #[test]
    fn test_reemit_overwrites_same_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut emitter = FsEmitter::new(dir.path(), "frame", "png").unwrap();
        emitter.emit(&info(), &segment(0, 0, 5)).unwrap();
        emitter.emit(&info(), &segment(0, 0, 9)).unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
        let raw = std::fs::read_to_string(dir.path().join("frame_00000.json")).unwrap();
        let meta: SegmentMetadata = serde_json::from_str(&raw).unwrap();
        assert_eq!(meta.end_frame_idx, 9);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut emitter = FsEmitter::new(&dir.path().join("gone"), "frame", "png").unwrap();
        let err = emitter.emit(&info(), &segment(0, 0, 0)).unwrap_err();
        assert!(matches!(err, EmitError::Image { .. }));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let err = FsEmitter::new(Path::new("."), "frame", "xyz").err().unwrap();
        assert!(matches!(err, EmitError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_jpg_extension_and_catalog_index() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(CatalogDb::open_in_memory().unwrap());
        let video_id = catalog.begin_video(&info(), dir.path()).unwrap();

        let mut emitter = FsEmitter::new(dir.path(), "shot", ".JPG")
            .unwrap()
            .with_catalog(catalog.clone(), video_id);
        emitter.emit(&info(), &segment(0, 0, 2)).unwrap();
        emitter.emit(&info(), &segment(1, 3, 29)).unwrap();

        assert!(dir.path().join("shot_00001.jpg").is_file());
        assert!(dir.path().join("shot_00001_diff.jpg").is_file());
        let rows = catalog.list_segments(video_id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "shot_00001.jpg");
    }
}
