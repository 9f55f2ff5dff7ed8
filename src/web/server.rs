//! Probe server

use anyhow::Result;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{handlers, AppState};

pub async fn start_web_server(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Probe server running on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub(crate) fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(handlers::liveness))
        .route("/health/stats", get(handlers::scheduler_stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
