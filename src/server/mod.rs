pub mod error;
pub mod routes;
pub mod validate;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::state::AppState;

/// Body limit sized for ~5MB base64 images plus JSON framing.
const BODY_LIMIT_BYTES: usize = 16 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let allow_origin = match state.config.frontend_origin.parse::<HeaderValue>() {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(_) => {
            warn!(
                "Invalid FRONTEND_URL '{}'; allowing any origin.",
                state.config.frontend_origin
            );
            AllowOrigin::any()
        }
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/v1/styles", get(routes::list_styles))
        .route("/api/v1/sessions", post(routes::create_session))
        .route("/api/v1/sessions/{id}/redesign", post(routes::redesign))
        .route("/api/v1/sessions/{id}/chat", post(routes::chat))
        .route(
            "/api/v1/sessions/{id}",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/api/v1/generate", post(routes::generate))
        .route("/api/v1/projects/{id}", get(routes::get_project))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Lumina Interiors API listening on http://{addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
