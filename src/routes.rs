// routes.rs
use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use tower_http::trace::TraceLayer;
use serde_json::json;

use crate::{
    handler::negotiation::negotiation_handler,
    middleware::auth,
    AppState,
};

// Health check handler
async fn health_check(Extension(app_state): Extension<Arc<AppState>>) -> impl IntoResponse {
    match app_state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "message": "Server is running",
                "cache": app_state.cache_status
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "fail",
                    "message": "Negotiation store is unavailable"
                })),
            )
        }
    }
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let negotiation_routes = Router::new()
        .route("/health", get(health_check))
        .merge(negotiation_handler().layer(middleware::from_fn(auth)));

    let api_route = Router::new()
        .nest("/negotiations", negotiation_routes)
        .layer(TraceLayer::new_for_http());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
        .layer(Extension(app_state))
}
