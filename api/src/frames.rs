use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{blocking, ApiError};
use crate::paths::{self, NO_CACHE};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RequiredPath {
    pub path: String,
}

/// Annotation entry created from a frame.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DatasetEntry {
    /// The frame's segment metadata (if any) plus its relative `path`.
    pub frame: Map<String, Value>,
    pub name: String,
    pub keywords: Vec<String>,
    pub annotations: Vec<Value>,
}

/// GET /frames/list?path=: folders and not-yet-converted frames under `path`
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    let rel = paths::relative(q.path.as_deref())?;
    let frames_root = state.frames_root.clone();
    let annotations_root = state.annotations_root.clone();

    let listing = blocking(move || {
        let target = frames_root.join(&rel);
        if !target.exists() {
            return Err(paths::not_found(&target));
        }
        if target.is_file() {
            return Ok(json!(""));
        }
        let items = paths::list_dir(&target, |path, is_dir| {
            if is_dir {
                return true;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            if !paths::is_image(path) || name.contains("_diff") {
                return false;
            }
            let converted = annotations_root
                .join(&rel)
                .join(paths::annotation_path(Path::new(name)));
            !converted.exists()
        })?;
        Ok(json!(items))
    })
    .await?;

    Ok(Json(listing))
}

/// GET /frames/file?path=: raw image bytes
pub async fn file(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let rel = paths::relative(q.path.as_deref())?;
    let target = state.frames_root.join(rel);
    serve_file(target).await
}

/// Bytes of `target` with an `image/<ext>` (or JSON) content type; `""` for a directory.
pub async fn serve_file(target: PathBuf) -> Result<Response, ApiError> {
    let loaded = blocking(move || {
        if !target.exists() {
            return Err(paths::not_found(&target));
        }
        if target.is_dir() {
            return Ok(None);
        }
        let bytes = std::fs::read(&target).map_err(|e| ApiError::io(&target, e))?;
        let disposition = format!(
            "attachment; filename=\"{}\"",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        Ok(Some((paths::content_type(&target), disposition, bytes)))
    })
    .await?;

    Ok(match loaded {
        Some((content_type, disposition, bytes)) => (
            NO_CACHE,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            bytes,
        )
            .into_response(),
        None => (NO_CACHE, Json(json!(""))).into_response(),
    })
}

/// POST /frames/convert?path=: start an annotation entry for a frame
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RequiredPath>,
) -> Result<Json<Value>, ApiError> {
    let rel = paths::relative(Some(&q.path))?;
    let frames_root = state.frames_root.clone();
    let annotations_root = state.annotations_root.clone();

    let dest = blocking(move || convert_frame(&rel, &frames_root, &annotations_root)).await?;
    info!(path = q.path, dest = %dest.display(), "frame converted to dataset entry");

    Ok(Json(json!({
        "message": format!("Converted '{}' to dataset successfully.", q.path)
    })))
}

/// Write `annotations_root/<rel without ext>.json` seeded from the frame's metadata.
pub fn convert_frame(
    rel: &Path,
    frames_root: &Path,
    annotations_root: &Path,
) -> Result<PathBuf, ApiError> {
    let src_image = frames_root.join(rel);
    if !src_image.is_file() {
        return Err(ApiError::NotFound(format!(
            "Source image '{}' not found.",
            src_image.display()
        )));
    }

    let json_rel = paths::annotation_path(rel);
    let src_json = frames_root.join(&json_rel);
    let mut frame = if src_json.is_file() {
        let raw = std::fs::read_to_string(&src_json).map_err(|e| ApiError::io(&src_json, e))?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(source) => {
                return Err(ApiError::Json {
                    path: src_json.display().to_string(),
                    source,
                })
            }
        }
    } else {
        Map::new()
    };
    frame.insert(
        "path".to_string(),
        Value::String(rel.to_string_lossy().replace('\\', "/")),
    );

    let entry = DatasetEntry {
        frame,
        name: stem(rel),
        keywords: keywords(rel),
        annotations: Vec::new(),
    };

    let dest = annotations_root.join(&json_rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ApiError::io(parent, e))?;
    }
    let body = serde_json::to_string_pretty(&entry).map_err(|source| ApiError::Json {
        path: dest.display().to_string(),
        source,
    })?;
    std::fs::write(&dest, body).map_err(|e| ApiError::io(&dest, e))?;
    Ok(dest)
}

fn stem(rel: &Path) -> String {
    rel.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Folder names leading to the frame plus the frame's own name, minus purely
/// numeric entries such as dates or camera indices.
pub fn keywords(rel: &Path) -> Vec<String> {
    let mut words: Vec<String> = rel
        .parent()
        .into_iter()
        .flat_map(|dir| dir.iter())
        .map(|part| part.to_string_lossy().into_owned())
        .collect();
    words.push(stem(rel));
    words
        .into_iter()
        .filter(|w| !w.is_empty() && !w.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{call, get, post, TestData};
    use axum::http::StatusCode;

    #[test]
    fn test_keywords_skip_numeric_parts() {
        assert_eq!(
            keywords(Path::new("warehouse/2024/cam_a/frame_00012.png")),
            vec!["warehouse", "cam_a", "frame_00012"]
        );
        assert_eq!(keywords(Path::new("frame_00001.png")), vec!["frame_00001"]);
        assert_eq!(keywords(Path::new("12/0007.png")), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_list_hides_diffs_and_converted_frames() {
        let data = TestData::new();
        data.frame("site/cam1/frame_00000.png");
        data.frame("site/cam1/frame_00000_diff.png");
        data.frame("site/cam1/frame_00001.png");
        data.frame("site/cam1/frame_00001.json");
        data.frame("site/cam1/frame_00002.png");
        data.frame("site/cam1/notes.txt");
        data.frame("site/cam1/extra/frame_00000.png");
        data.annotation("site/cam1/frame_00002.json", "{}");

        let (status, _, body) = call(data.app(), get("/frames/list?path=site/cam1")).await;
        assert_eq!(status, StatusCode::OK);
        let items: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items, vec!["extra", "frame_00000.png", "frame_00001.png"]);
    }

    #[tokio::test]
    async fn test_list_root_file_and_missing() {
        let data = TestData::new();
        data.frame("cam1/frame_00000.png");

        let (status, _, body) = call(data.app(), get("/frames/list")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Vec<String>>(&body).unwrap(), vec!["cam1"]);

        let (status, _, body) =
            call(data.app(), get("/frames/list?path=cam1/frame_00000.png")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<String>(&body).unwrap(), "");

        let (status, _, body) = call(data.app(), get("/frames/list?path=nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert!(err["detail"].as_str().unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let data = TestData::new();
        let (status, _, body) = call(data.app(), get("/frames/file?path=../secret.png")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert!(err["detail"].is_string());
    }

    #[tokio::test]
    async fn test_file_serves_bytes_without_caching() {
        let data = TestData::new();
        data.write_frame("cam1/frame_00003.png", b"\x89PNG fake");

        let (status, headers, body) =
            call(data.app(), get("/frames/file?path=cam1/frame_00003.png")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::PRAGMA], "no-cache");
        assert_eq!(headers[header::EXPIRES], "0");
        assert_eq!(&body[..], b"\x89PNG fake");

        let (status, _, body) = call(data.app(), get("/frames/file?path=cam1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<String>(&body).unwrap(), "");
    }

    #[tokio::test]
    async fn test_convert_seeds_entry_from_metadata() {
        let data = TestData::new();
        data.frame("dock/2024/frame_00004.png");
        data.write_frame(
            "dock/2024/frame_00004.json",
            br#"{"name": "frame_00004.png", "start_frame_idx": 40, "mean_diff": 0.5}"#,
        );

        let (status, _, body) = call(
            data.app(),
            post("/frames/convert?path=dock/2024/frame_00004.png", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let msg: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            msg["message"],
            "Converted 'dock/2024/frame_00004.png' to dataset successfully."
        );

        let raw = data.read_annotation("dock/2024/frame_00004.json");
        let entry: DatasetEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.name, "frame_00004");
        assert_eq!(entry.keywords, vec!["dock", "frame_00004"]);
        assert!(entry.annotations.is_empty());
        assert_eq!(entry.frame["path"], "dock/2024/frame_00004.png");
        assert_eq!(entry.frame["start_frame_idx"], 40);
        assert!(raw.starts_with("{\n  \"frame\""));

        // Converted frames drop out of the listing.
        let (_, _, body) = call(data.app(), get("/frames/list?path=dock/2024")).await;
        let items: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_convert_without_metadata_and_missing_source() {
        let data = TestData::new();
        data.frame("cam/frame_00000.jpg");

        let (status, _, _) =
            call(data.app(), post("/frames/convert?path=cam/frame_00000.jpg", None)).await;
        assert_eq!(status, StatusCode::OK);
        let entry: DatasetEntry =
            serde_json::from_str(&data.read_annotation("cam/frame_00000.json")).unwrap();
        assert_eq!(entry.frame.len(), 1);

        let (status, _, _) =
            call(data.app(), post("/frames/convert?path=cam/missing.png", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
