mod routes;
mod state;

pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::AppConfig;

/// Largest accepted model weights upload.
const MODEL_UPLOAD_LIMIT: usize = 512 * 1024 * 1024;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let results = ServeDir::new(state.store.dir());
    Router::new()
        .route("/", get(routes::index))
        .route("/api/info", get(routes::info))
        .route("/upload", post(routes::upload))
        .route("/upload-url", post(routes::upload_url))
        .route(
            "/model",
            post(routes::upload_model).layer(DefaultBodyLimit::max(MODEL_UPLOAD_LIMIT)),
        )
        .nest_service("/results", results)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until the process stops.
pub async fn serve(config: &AppConfig, state: AppState) -> std::io::Result<()> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("food detection server listening on http://{addr}");
    tracing::info!(results = %state.store.dir().display(), "annotated images served under /results");
    axum::serve(listener, router(state)).await
}
