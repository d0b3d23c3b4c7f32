use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{blocking, ApiError};
use crate::frames::{serve_file, PathQuery, RequiredPath};
use crate::paths::{self, NO_CACHE};
use crate::AppState;

/// GET /datasets/list?path=: folders and annotation files under `path`
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let rel = paths::relative(q.path.as_deref())?;
    let target = state.annotations_root.join(rel);

    let items = blocking(move || {
        if !target.is_dir() {
            return Err(paths::not_found(&target));
        }
        paths::list_dir(&target, |path, is_dir| {
            is_dir || paths::extension(path) == "json"
        })
    })
    .await?;

    Ok((NO_CACHE, Json(items)).into_response())
}

/// GET /datasets/file?path=: annotation JSON, or the frame image it points at
pub async fn file(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let rel = paths::relative(q.path.as_deref())?;
    let root = if paths::extension(&rel) == "json" || rel.as_os_str().is_empty() {
        &state.annotations_root
    } else {
        &state.frames_root
    };
    serve_file(root.join(rel)).await
}

/// POST /datasets/annotations?path=: overwrite the annotation file of a frame
pub async fn save(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RequiredPath>,
    Json(annotations): Json<Map<String, Value>>,
) -> Result<Response, ApiError> {
    let rel = paths::relative(Some(&q.path))?;
    let dest = state.annotations_root.join(paths::annotation_path(&rel));

    blocking(move || {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApiError::io(parent, e))?;
        }
        let body = serde_json::to_string_pretty(&annotations).map_err(|source| ApiError::Json {
            path: dest.display().to_string(),
            source,
        })?;
        std::fs::write(&dest, body).map_err(|e| ApiError::io(&dest, e))?;
        debug!(path = %dest.display(), "annotations saved");
        Ok(())
    })
    .await?;

    Ok((
        NO_CACHE,
        Json(json!({ "message": "Annotations saved successfully." })),
    )
        .into_response())
}
