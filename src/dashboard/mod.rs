//! Dashboard: Axum JSON API in front of the scan pipeline.
//!
//! Exposes the license gate, the session counter and the scanner over HTTP.
//! CORS enabled for local front-end development, including the session
//! token header.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use routes::{AppState, DashboardState, ScanDefaults};

/// Bind `port` and serve until the process is stopped.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    axum::serve(listener, app).await.context("API server error")?;
    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(routes::SESSION_HEADER)]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/session", get(routes::get_session))
        .route("/api/license", post(routes::post_license))
        .route("/api/scan", post(routes::post_scan))
        .route("/api/scan/export", post(routes::post_scan_export))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
