use limitd::{
    api::{create_router, AppState},
    config::Config,
    limiter::{RateLimitState, SlidingWindowCounter},
    observability::{init_tracing, HealthChecker},
    registry::LimitRegistry,
    store::{create_client, RedisStore},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.observability);

    tracing::info!("Starting limitd service");

    // Create Redis connection
    let redis_manager = create_client(&config.redis).await?;
    tracing::info!("Redis connection established");

    // Assemble the limiter: store adapter, policy table, counter
    let store = Arc::new(RedisStore::new(
        redis_manager.clone(),
        Duration::from_millis(config.rate_limit.store_timeout_ms),
    ));
    let registry = Arc::new(LimitRegistry::from_config(&config.rate_limit));
    let counter = Arc::new(SlidingWindowCounter::new(
        store,
        config.rate_limit.count_mode,
    ));

    let state = AppState {
        rate_limit: RateLimitState::new(counter, registry),
        health_checker: Arc::new(HealthChecker::new(redis_manager)),
    };

    // Create router
    let app = create_router(state);

    // Bind server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("limitd service is ready to accept requests");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
