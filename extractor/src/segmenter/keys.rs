use std::path::{Path, PathBuf};

/// File names of the three artifacts written for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    /// Representative frame, e.g. `frame_00003.png`. Also the metadata `name`.
    pub image: String,
    /// Masked diff image, e.g. `frame_00003_diff.png`.
    pub diff: String,
    /// Metadata record, e.g. `frame_00003.json`.
    pub metadata: String,
}

/// Names for segment `sequence`: `{prefix}_{sequence:05}[_diff].{ext}` and `.json`.
pub fn artifact_names(prefix: &str, sequence: u64, image_ext: &str) -> ArtifactNames {
    let stem = format!("{prefix}_{sequence:05}");
    ArtifactNames {
        image: format!("{stem}.{image_ext}"),
        diff: format!("{stem}_diff.{image_ext}"),
        metadata: format!("{stem}.json"),
    }
}

/// Output folder of a video: its path relative to `video_dir`, minus the
/// extension, placed under `output_dir`.
///
/// e.g. `data/raw/videos/site_a/cam1.mp4` → `data/frames/site_a/cam1`
pub fn output_folder(video_dir: &Path, output_dir: &Path, video: &Path) -> PathBuf {
    let relative = video.strip_prefix(video_dir).unwrap_or(video);
    output_dir.join(relative.with_extension(""))
}
