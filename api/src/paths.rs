use std::path::{Component, Path, PathBuf};

use axum::http::header::{self, HeaderName};

use crate::error::ApiError;

/// Image extensions the frame browser lists.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff"];

pub const NO_CACHE: [(HeaderName, &str); 3] = [
    (
        header::CACHE_CONTROL,
        "no-store, no-cache, must-revalidate, max-age=0",
    ),
    (header::PRAGMA, "no-cache"),
    (header::EXPIRES, "0"),
];

/// Validate a client-supplied path relative to a data root.
///
/// `None` and `""` mean the root itself. Absolute paths, drive prefixes and `..`
/// components are rejected.
pub fn relative(path: Option<&str>) -> Result<PathBuf, ApiError> {
    let raw = path.unwrap_or("");
    let mut clean = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ApiError::BadPath(raw.to_string()));
            }
        }
    }
    Ok(clean)
}

/// `a/b/frame_00001.png` → `a/b/frame_00001.json`
pub fn annotation_path(relative: &Path) -> PathBuf {
    relative.with_extension("json")
}

/// Lowercased extension without the dot, `""` if there is none.
pub fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn is_image(path: &Path) -> bool {
    IMAGE_EXTENSIONS.contains(&extension(path).as_str())
}

/// `application/json` for `.json`, otherwise `image/<ext>` with the extension as written.
pub fn content_type(path: &Path) -> String {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext.eq_ignore_ascii_case("json") {
        "application/json".to_string()
    } else {
        format!("image/{ext}")
    }
}

/// Sorted entry names of `dir` accepted by `keep(path, is_dir)`.
pub fn list_dir<F>(dir: &Path, keep: F) -> Result<Vec<String>, ApiError>
where
    F: Fn(&Path, bool) -> bool,
{
    let mut items = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| ApiError::io(dir, e))? {
        let entry = entry.map_err(|e| ApiError::io(dir, e))?;
        let path = entry.path();
        let is_dir = path.is_dir();
        if keep(&path, is_dir) {
            items.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    items.sort();
    Ok(items)
}

pub fn not_found(path: &Path) -> ApiError {
    ApiError::NotFound(format!("Path '{}' does not exist.", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_accepts_nested_paths() {
        assert_eq!(relative(None).unwrap(), PathBuf::new());
        assert_eq!(relative(Some("")).unwrap(), PathBuf::new());
        assert_eq!(
            relative(Some("site_a/./cam1/frame_00001.png")).unwrap(),
            PathBuf::from("site_a/cam1/frame_00001.png")
        );
    }

    #[test]
    fn test_relative_rejects_escapes() {
        for bad in ["../secret", "a/../../b", "/etc/passwd"] {
            assert!(
                matches!(relative(Some(bad)), Err(ApiError::BadPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_content_type_and_filters() {
        assert_eq!(content_type(Path::new("a/f.png")), "image/png");
        assert_eq!(content_type(Path::new("a/f.JSON")), "application/json");
        assert!(is_image(Path::new("f.TIFF")));
        assert!(!is_image(Path::new("f.json")));
        assert_eq!(
            annotation_path(Path::new("a/frame_00001.png")),
            PathBuf::from("a/frame_00001.json")
        );
    }
}
