use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

use super::handlers;
use super::AppState;

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/interactions", post(handlers::record_interaction))
        .route(
            "/users/:user_id/recommendations",
            get(handlers::get_recommendations),
        )
        .route("/users/:user_id/feed/refresh", post(handlers::refresh_feed))
        .route("/users/:user_id/interests", get(handlers::get_interests))
        .route("/similarity", get(handlers::get_similarity))
        .route("/stats", get(handlers::get_stats))
}
