mod datasets;
mod error;
mod frames;
mod paths;
mod videos;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use distinct_frames_common::catalog::CatalogDb;
use distinct_frames_common::config::Config;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub frames_root: PathBuf,
    pub annotations_root: PathBuf,
    pub catalog: Option<Arc<CatalogDb>>,
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello from the distinct-frames annotation backend!" }))
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/frames/list", get(frames::list))
        .route("/frames/file", get(frames::file))
        .route("/frames/convert", post(frames::convert))
        .route("/datasets/list", get(datasets::list))
        .route("/datasets/file", get(datasets::file))
        .route("/datasets/annotations", post(datasets::save))
        .route("/videos", get(videos::list))
        .route("/videos/:id/segments", get(videos::segments))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

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

    let catalog = if config.database.enabled {
        match CatalogDb::open(&config.database.path) {
            Ok(db) => Some(Arc::new(db)),
            Err(e) => {
                error!(error = %e, "failed to open catalog; /videos routes will be unavailable");
                None
            }
        }
    } else {
        None
    };

    let state = Arc::new(AppState {
        frames_root: config.api.frames_path.clone(),
        annotations_root: config.api.annotations_path.clone(),
        catalog,
    });

    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(
        addr,
        frames_path = %config.api.frames_path.display(),
        annotations_path = %config.api.annotations_path.display(),
        "distinct-frames API server starting"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
