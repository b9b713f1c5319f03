use crate::api::AppState;
use crate::errors::{AppError, Result};
use crate::keys::derive_keys;
use crate::limiter::RateLimitDecision;
use crate::registry::LimitPolicy;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub subject_identity: Option<String>,
    pub remote_addr: Option<String>,
    pub endpoint_name: String,
    pub override_policy: Option<LimitPolicy>,
}

/// POST /v1/check - the check boundary for sidecar-style callers.
/// Denials come back as a decision with `allowed = false`, not as an error.
#[tracing::instrument(skip(state, request))]
pub async fn check(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<RateLimitDecision>> {
    if request.endpoint_name.trim().is_empty() {
        return Err(AppError::Validation(
            "endpoint_name must not be empty".to_string(),
        ));
    }

    let policy = state
        .rate_limit
        .registry
        .resolve(&request.endpoint_name, request.override_policy);
    let keys = derive_keys(
        request.subject_identity.as_deref(),
        request.remote_addr.as_deref(),
        &request.endpoint_name,
    );

    let decision = state
        .rate_limit
        .counter
        .check(&keys.subject, &keys.endpoint, &policy)
        .await;

    Ok(Json(decision))
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub subject: Option<String>,
    pub ip: Option<String>,
    pub endpoint: String,
}

/// GET /v1/status - non-mutating window inspection for dashboards.
/// Reads the current counts; nothing is recorded or refreshed.
#[tracing::instrument(skip(state))]
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<RateLimitDecision>> {
    if params.endpoint.trim().is_empty() {
        return Err(AppError::Validation(
            "endpoint must not be empty".to_string(),
        ));
    }

    let policy = state.rate_limit.registry.resolve(&params.endpoint, None);
    let keys = derive_keys(
        params.subject.as_deref(),
        params.ip.as_deref(),
        &params.endpoint,
    );

    let decision = state
        .rate_limit
        .counter
        .status(&keys.subject, &keys.endpoint, &policy)
        .await;

    Ok(Json(decision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::config::RedisConfig;
    use crate::limiter::{CountMode, RateLimitState, SlidingWindowCounter};
    use crate::observability::HealthChecker;
    use crate::registry::LimitRegistry;
    use crate::store::{create_client, RedisStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_check_endpoint_round_trip() {
        let config = RedisConfig {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connection_timeout_seconds: 5,
        };

        let manager = create_client(&config).await.unwrap();
        let store = Arc::new(RedisStore::new(
            manager.clone(),
            Duration::from_millis(250),
        ));
        let registry = Arc::new(LimitRegistry::new(
            LimitPolicy::new(100, 3600),
            HashMap::new(),
        ));
        let counter = Arc::new(SlidingWindowCounter::new(store, CountMode::ExcludeCurrent));

        let app = create_router(AppState {
            rate_limit: RateLimitState::new(counter, registry),
            health_checker: Arc::new(HealthChecker::new(manager)),
        });

        let body = serde_json::json!({
            "subject_identity": "api-test-subject",
            "endpoint_name": "orders.create",
            "override_policy": { "max_requests": 5, "window_seconds": 60 }
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/check")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let decision: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decision["allowed"], true);
        assert_eq!(decision["window_seconds"], 60);
    }
}
