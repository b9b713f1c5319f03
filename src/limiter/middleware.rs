use crate::keys::{derive_keys, AuthenticatedSubject};
use crate::limiter::counter::{RateLimitDecision, SlidingWindowCounter};
use crate::observability::MetricsRecorder;
use crate::registry::{LimitPolicy, LimitRegistry};
use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Shared handles the interceptors need: the counter and the policy table.
/// Constructed once at startup and cloned into each layer.
#[derive(Clone)]
pub struct RateLimitState {
    pub counter: Arc<SlidingWindowCounter>,
    pub registry: Arc<LimitRegistry>,
}

impl RateLimitState {
    pub fn new(counter: Arc<SlidingWindowCounter>, registry: Arc<LimitRegistry>) -> Self {
        Self { counter, registry }
    }
}

// Probes and metrics scrapes never count against anyone's quota
const EXEMPT_PREFIXES: &[&str] = &["/health"];
const EXEMPT_PATHS: &[&str] = &["/metrics"];

/// Router-wide rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let endpoint = endpoint_name(&request);
    let policy = state.registry.resolve(&endpoint, None);
    let keys = derive_keys(
        client_identity(&request).as_deref(),
        client_address(&request).as_deref(),
        &endpoint,
    );

    let decision = state
        .counter
        .check(&keys.subject, &keys.endpoint, &policy)
        .await;
    record_decision(&endpoint, &decision);

    if !decision.allowed {
        tracing::warn!(
            subject_key = %keys.subject,
            endpoint = %endpoint,
            limit = policy.max_requests,
            "rate limit exceeded"
        );
        return rejection(&endpoint, &policy, &decision);
    }

    let mut response = next.run(request).await;
    add_rate_limit_headers(response.headers_mut(), &policy, &decision);
    response
}

/// Per-route rate limiting with an explicit endpoint name and an optional
/// inline policy, for handlers that need tighter limits than the router-wide
/// table provides.
#[derive(Clone)]
pub struct RateLimitLayer {
    state: RateLimitState,
    endpoint: String,
    policy: Option<LimitPolicy>,
}

impl RateLimitLayer {
    pub fn new(state: RateLimitState, endpoint: impl Into<String>) -> Self {
        Self {
            state,
            endpoint: endpoint.into(),
            policy: None,
        }
    }

    /// Inline policy override for this one route
    pub fn with_policy(mut self, policy: LimitPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
            endpoint: self.endpoint.clone(),
            policy: self.policy,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: RateLimitState,
    endpoint: String,
    policy: Option<LimitPolicy>,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), S::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let state = self.state.clone();
        let endpoint = self.endpoint.clone();
        let policy_override = self.policy;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let policy = state.registry.resolve(&endpoint, policy_override);
            let keys = derive_keys(
                client_identity(&request).as_deref(),
                client_address(&request).as_deref(),
                &endpoint,
            );

            let decision = state
                .counter
                .check(&keys.subject, &keys.endpoint, &policy)
                .await;
            record_decision(&endpoint, &decision);

            if !decision.allowed {
                tracing::warn!(
                    subject_key = %keys.subject,
                    endpoint = %endpoint,
                    limit = policy.max_requests,
                    "rate limit exceeded"
                );
                return Ok(rejection(&endpoint, &policy, &decision));
            }

            let mut response = inner.call(request).await?;
            add_rate_limit_headers(response.headers_mut(), &policy, &decision);
            Ok(response)
        })
    }
}

fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path) || EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Logical endpoint name: method plus the matched route template, so
/// `/v1/things/42` and `/v1/things/7` collapse to one endpoint. The raw
/// path is only used when no route matched.
fn endpoint_name(request: &Request) -> String {
    match request.extensions().get::<MatchedPath>() {
        Some(matched) => format!("{}:{}", request.method(), matched.as_str()),
        None => format!("{}:{}", request.method(), request.uri().path()),
    }
}

/// Identity placed in the request extensions by the upstream auth layer
fn client_identity(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<AuthenticatedSubject>()
        .map(|subject| subject.0.clone())
}

/// Caller network address: proxy headers first, then the peer address
fn client_address(request: &Request) -> Option<String> {
    let headers = request.headers();

    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded_for.to_str() {
            let ip = value.split(',').next().unwrap_or("").trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str() {
            return Some(ip.to_string());
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip().to_string())
}

/// Add rate limit headers to a response
fn add_rate_limit_headers(
    headers: &mut HeaderMap,
    policy: &LimitPolicy,
    decision: &RateLimitDecision,
) {
    if let Ok(value) = HeaderValue::from_str(&policy.max_requests.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), value);
    }

    if let Ok(value) = HeaderValue::from_str(&decision.client_remaining.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), value);
    }

    if let Ok(value) = HeaderValue::from_str(&decision.reset_time.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-reset"), value);
    }
}

fn rejection(endpoint: &str, policy: &LimitPolicy, decision: &RateLimitDecision) -> Response {
    let body = Json(json!({
        "error": "Rate limit exceeded",
        "endpoint": endpoint,
        "remaining": {
            "client": decision.client_remaining,
            "endpoint": decision.endpoint_remaining,
        },
        "retry_after": decision.reset_time,
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    add_rate_limit_headers(response.headers_mut(), policy, decision);

    if let Ok(value) = HeaderValue::from_str(&decision.retry_after().to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("retry-after"), value);
    }

    response
}

fn record_decision(endpoint: &str, decision: &RateLimitDecision) {
    let outcome = if decision.error.is_some() {
        "fail_open"
    } else if decision.allowed {
        "allowed"
    } else {
        "denied"
    };
    MetricsRecorder::record_decision(endpoint, outcome);
}
