use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use distinct_frames_common::catalog::CatalogError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid path '{0}': must be relative and stay inside the data root")]
    BadPath(String),
    #[error("{0}")]
    NotFound(String),
    #[error("catalog is disabled")]
    CatalogDisabled,
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ApiError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadPath(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::CatalogDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Io { .. } | ApiError::Json { .. } | ApiError::Catalog(_) | ApiError::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Errors render as `{"detail": "..."}`, the shape the annotation frontend reads.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Run blocking filesystem or SQLite work off the async runtime.
pub async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
