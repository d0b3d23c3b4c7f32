use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::Json;
use distinct_frames_common::catalog::{SegmentRow, VideoRow};

use crate::error::{blocking, ApiError};
use crate::AppState;

/// GET /videos: every video in the catalog with its status and counts
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<VideoRow>>, ApiError> {
    let catalog = state.catalog.clone().ok_or(ApiError::CatalogDisabled)?;
    let videos = blocking(move || Ok(catalog.list_videos()?)).await?;
    Ok(Json(videos))
}

/// GET /videos/:id/segments: segments of one video in sequence order
pub async fn segments(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Vec<SegmentRow>>, ApiError> {
    let catalog = state.catalog.clone().ok_or(ApiError::CatalogDisabled)?;
    let segments = blocking(move || {
        if catalog.get_video(id)?.is_none() {
            return Err(ApiError::NotFound(format!("Video {id} not found.")));
        }
        Ok(catalog.list_segments(id)?)
    })
    .await?;
    Ok(Json(segments))
}
