use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_video_dir")]
    pub video_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Normalized mean luma difference at or above which two frames are distinct.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
    /// Per-pixel luma difference (0..=255) above which a pixel is marked as changed.
    #[serde(default = "default_mask_threshold")]
    pub mask_threshold: u8,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_frame_prefix")]
    pub frame_prefix: String,
    #[serde(default = "default_image_format")]
    pub image_format: String,
    #[serde(default)]
    pub mean_diff_mode: MeanDiffMode,
    #[serde(default = "default_max_concurrent_videos")]
    pub max_concurrent_videos: usize,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

/// Which comparison a closed segment reports as its `mean_diff`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeanDiffMode {
    /// The comparison that closed the segment (the diff toward the next segment's
    /// first frame). Matches metadata written by earlier versions of the tool.
    #[default]
    Boundary,
    /// The largest below-threshold diff seen inside the segment.
    Interior,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_output_dir")]
    pub frames_path: PathBuf,
    #[serde(default = "default_annotations_path")]
    pub annotations_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_enabled")]
    pub enabled: bool,
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            video_dir: default_video_dir(),
            output_dir: default_output_dir(),
            sensitivity: default_sensitivity(),
            mask_threshold: default_mask_threshold(),
            extensions: default_extensions(),
            frame_prefix: default_frame_prefix(),
            image_format: default_image_format(),
            mean_diff_mode: MeanDiffMode::default(),
            max_concurrent_videos: default_max_concurrent_videos(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            frames_path: default_output_dir(),
            annotations_path: default_annotations_path(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: default_database_enabled(),
            path: default_database_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.extraction.validate()?;
        Ok(config)
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sensitivity > 0.0 && self.sensitivity <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "extraction.sensitivity must be in (0, 1], got {}",
                self.sensitivity
            )));
        }
        if self.extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "extraction.extensions must not be empty".into(),
            ));
        }
        if self.max_concurrent_videos == 0 {
            return Err(ConfigError::Invalid(
                "extraction.max_concurrent_videos must be at least 1".into(),
            ));
        }
        if !matches!(
            self.image_format.to_ascii_lowercase().as_str(),
            "png" | "jpg" | "jpeg" | "bmp"
        ) {
            return Err(ConfigError::Invalid(format!(
                "extraction.image_format must be png, jpg, jpeg or bmp, got {:?}",
                self.image_format
            )));
        }
        Ok(())
    }

    /// True if `path` has one of the configured video extensions (case-insensitive,
    /// with or without a leading dot in the config).
    pub fn is_video(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_video_dir() -> PathBuf {
    PathBuf::from("data/raw/videos")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/frames")
}
fn default_sensitivity() -> f64 {
    0.00002
}
fn default_mask_threshold() -> u8 {
    25
}
fn default_extensions() -> Vec<String> {
    ["mp4", "mov", "avi", "mkv"].iter().map(|e| e.to_string()).collect()
}
fn default_frame_prefix() -> String {
    "frame".into()
}
fn default_image_format() -> String {
    "png".into()
}
fn default_max_concurrent_videos() -> usize {
    1
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}
fn default_ffprobe_path() -> String {
    "ffprobe".into()
}
fn default_port() -> u16 {
    8000
}
fn default_annotations_path() -> PathBuf {
    PathBuf::from("data/annotations")
}
fn default_database_enabled() -> bool {
    true
}
fn default_database_path() -> PathBuf {
    PathBuf::from("data/catalog")
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.extraction.sensitivity, 0.00002);
        assert_eq!(config.extraction.mask_threshold, 25);
        assert_eq!(config.extraction.frame_prefix, "frame");
        assert_eq!(config.extraction.mean_diff_mode, MeanDiffMode::Boundary);
        assert_eq!(config.extraction.max_concurrent_videos, 1);
        assert_eq!(config.api.port, 8000);
        assert_eq!(config.api.frames_path, PathBuf::from("data/frames"));
        assert!(config.database.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            [extraction]
            sensitivity = 0.01
            mean_diff_mode = "interior"

            [api]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.extraction.sensitivity, 0.01);
        assert_eq!(config.extraction.mean_diff_mode, MeanDiffMode::Interior);
        assert_eq!(config.extraction.extensions.len(), 4);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.annotations_path, PathBuf::from("data/annotations"));
    }

    #[test]
    fn rejects_out_of_range_sensitivity() {
        let err = Config::parse("[extraction]\nsensitivity = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::parse("[extraction]\nsensitivity = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_image_format() {
        let err = Config::parse("[extraction]\nimage_format = \"webp\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = Config::parse("[extraction]\nmax_concurrent_videos = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn video_extension_match_is_case_insensitive() {
        let mut extraction = ExtractionConfig::default();
        extraction.extensions.push(".webm".into());
        assert!(extraction.is_video(Path::new("a/b/clip.MP4")));
        assert!(extraction.is_video(Path::new("clip.mkv")));
        assert!(extraction.is_video(Path::new("clip.webm")));
        assert!(!extraction.is_video(Path::new("notes.txt")));
        assert!(!extraction.is_video(Path::new("no_extension")));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }
}
