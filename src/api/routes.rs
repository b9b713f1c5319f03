use crate::{
    api::{health, limits},
    limiter::{rate_limit_middleware, RateLimitState},
    observability::HealthChecker,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub rate_limit: RateLimitState,
    pub health_checker: Arc<HealthChecker>,
}

pub fn create_router(state: AppState) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let rate_limit = state.rate_limit.clone();

    Router::new()
        // Health endpoints
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/health/startup", get(health::startup))
        .route("/metrics", get(health::metrics))
        // API v1 routes
        .nest("/v1", v1_routes())
        // Every route passes the limiter; probes are exempted inside
        .layer(middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}

fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/check", post(limits::check))
        .route("/status", get(limits::status))
}
