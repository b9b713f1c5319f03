use crate::observability::MetricsRecorder;
use crate::registry::LimitPolicy;
use crate::store::{CounterStore, StoreError, WindowCounts};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Headroom between one client's limit and the shared endpoint-wide limit,
/// so no single client can exhaust an endpoint's budget alone.
pub const ENDPOINT_LIMIT_FACTOR: u64 = 10;

/// How the admission comparison treats the request being recorded.
///
/// `ExcludeCurrent` compares the count of *prior* requests against the
/// limit, which admits `max_requests + 1` requests per window before the
/// first denial. `IncludeCurrent` counts the current request too and denies
/// at exactly `max_requests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountMode {
    #[default]
    ExcludeCurrent,
    IncludeCurrent,
}

/// Outcome of a rate limit check. Produced fresh per call, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub client_remaining: u64,
    pub endpoint_remaining: u64,
    pub window_seconds: u64,
    /// Unix timestamp when the window ends
    pub reset_time: u64,
    /// Set when the store was unreachable and the check failed open;
    /// the remaining fields then carry the full limits, not real counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RateLimitDecision {
    /// Seconds until the window resets, for the Retry-After header
    pub fn retry_after(&self) -> u64 {
        self.reset_time.saturating_sub(unix_now())
    }
}

/// Sliding window rate limiter over a shared counter store.
///
/// Both `check` and `status` cost one store round trip and never return an
/// error: store failures degrade to an allow decision with an error marker.
pub struct SlidingWindowCounter {
    store: Arc<dyn CounterStore>,
    count_mode: CountMode,
}

impl SlidingWindowCounter {
    pub fn new(store: Arc<dyn CounterStore>, count_mode: CountMode) -> Self {
        Self { store, count_mode }
    }

    /// Check whether a request may proceed, recording it against both keys.
    pub async fn check(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        policy: &LimitPolicy,
    ) -> RateLimitDecision {
        self.check_at(unix_now(), subject_key, endpoint_key, policy)
            .await
    }

    /// Read the current window state without recording anything.
    pub async fn status(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        policy: &LimitPolicy,
    ) -> RateLimitDecision {
        self.status_at(unix_now(), subject_key, endpoint_key, policy)
            .await
    }

    async fn check_at(
        &self,
        now: u64,
        subject_key: &str,
        endpoint_key: &str,
        policy: &LimitPolicy,
    ) -> RateLimitDecision {
        let started = Instant::now();
        let result = self
            .store
            .record(subject_key, endpoint_key, now, policy.window_seconds)
            .await;
        MetricsRecorder::record_store_call("record", started.elapsed().as_secs_f64());

        match result {
            Ok(counts) => {
                let decision = self.decide(now, policy, counts, true);
                tracing::debug!(
                    subject_key = %subject_key,
                    endpoint_key = %endpoint_key,
                    allowed = decision.allowed,
                    client_count = counts.subject,
                    endpoint_count = counts.endpoint,
                    "rate limit check"
                );
                decision
            }
            Err(e) => self.fail_open(now, policy, e),
        }
    }

    async fn status_at(
        &self,
        now: u64,
        subject_key: &str,
        endpoint_key: &str,
        policy: &LimitPolicy,
    ) -> RateLimitDecision {
        let started = Instant::now();
        let result = self
            .store
            .observe(subject_key, endpoint_key, now, policy.window_seconds)
            .await;
        MetricsRecorder::record_store_call("observe", started.elapsed().as_secs_f64());

        match result {
            Ok(counts) => self.decide(now, policy, counts, false),
            Err(e) => self.fail_open(now, policy, e),
        }
    }

    /// Render counts into a decision. `recorded` says whether the current
    /// request was written to the store; the admission comparison always
    /// uses the pre-record counts, but the remaining quota charges the
    /// recorded entry.
    fn decide(
        &self,
        now: u64,
        policy: &LimitPolicy,
        counts: WindowCounts,
        recorded: bool,
    ) -> RateLimitDecision {
        let endpoint_limit = policy.max_requests.saturating_mul(ENDPOINT_LIMIT_FACTOR);

        let (client_allowed, endpoint_allowed) = match self.count_mode {
            CountMode::ExcludeCurrent => (
                counts.subject <= policy.max_requests,
                counts.endpoint <= endpoint_limit,
            ),
            CountMode::IncludeCurrent => (
                counts.subject < policy.max_requests,
                counts.endpoint < endpoint_limit,
            ),
        };

        let spent = if recorded { 1 } else { 0 };

        RateLimitDecision {
            allowed: client_allowed && endpoint_allowed,
            client_remaining: policy.max_requests.saturating_sub(counts.subject + spent),
            endpoint_remaining: endpoint_limit.saturating_sub(counts.endpoint + spent),
            window_seconds: policy.window_seconds,
            reset_time: now + policy.window_seconds,
            error: None,
        }
    }

    /// A rate limiter outage must not become a service outage: allow the
    /// request and mark the decision instead of propagating the failure.
    fn fail_open(&self, now: u64, policy: &LimitPolicy, error: StoreError) -> RateLimitDecision {
        tracing::warn!(
            error = %error,
            "rate limit store unavailable, failing open"
        );
        MetricsRecorder::record_store_error(error.kind());

        let endpoint_limit = policy.max_requests.saturating_mul(ENDPOINT_LIMIT_FACTOR);

        RateLimitDecision {
            allowed: true,
            client_remaining: policy.max_requests,
            endpoint_remaining: endpoint_limit,
            window_seconds: policy.window_seconds,
            reset_time: now + policy.window_seconds,
            error: Some(error.to_string()),
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    const SUBJECT: &str = "rate_limit:user:alice";
    const ENDPOINT: &str = "rate_limit:endpoint:GET:/v1/things";

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn record(
            &self,
            _subject_key: &str,
            _endpoint_key: &str,
            _now: u64,
            _window_seconds: u64,
        ) -> Result<WindowCounts, StoreError> {
            Err(StoreError::Timeout(250))
        }

        async fn observe(
            &self,
            _subject_key: &str,
            _endpoint_key: &str,
            _now: u64,
            _window_seconds: u64,
        ) -> Result<WindowCounts, StoreError> {
            Err(StoreError::Timeout(250))
        }
    }

    fn counter(mode: CountMode) -> SlidingWindowCounter {
        SlidingWindowCounter::new(Arc::new(MemoryStore::new()), mode)
    }

    #[tokio::test]
    async fn test_exclude_current_admits_limit_plus_one() {
        let counter = counter(CountMode::ExcludeCurrent);
        let policy = LimitPolicy::new(5, 60);
        let now = 1_000;

        // Counts seen are 0..=5, each within the limit
        for i in 1..=6 {
            let decision = counter.check_at(now, SUBJECT, ENDPOINT, &policy).await;
            assert!(decision.allowed, "request {} should be allowed", i);
        }

        // The seventh request sees a count of 6 and is denied
        let decision = counter.check_at(now, SUBJECT, ENDPOINT, &policy).await;
        assert!(!decision.allowed);
        assert_eq!(decision.client_remaining, 0);
    }

    #[tokio::test]
    async fn test_include_current_denies_at_limit() {
        let counter = counter(CountMode::IncludeCurrent);
        let policy = LimitPolicy::new(5, 60);
        let now = 1_000;

        for i in 1..=5 {
            let decision = counter.check_at(now, SUBJECT, ENDPOINT, &policy).await;
            assert!(decision.allowed, "request {} should be allowed", i);
        }

        let decision = counter.check_at(now, SUBJECT, ENDPOINT, &policy).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_window_expiry_frees_quota() {
        let counter = counter(CountMode::ExcludeCurrent);
        let policy = LimitPolicy::new(5, 60);

        for _ in 0..7 {
            counter.check_at(1_000, SUBJECT, ENDPOINT, &policy).await;
        }

        // Past the window everything is pruned; the fresh request is charged
        let decision = counter
            .check_at(1_000 + 61, SUBJECT, ENDPOINT, &policy)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.client_remaining, policy.max_requests - 1);
    }

    #[tokio::test]
    async fn test_endpoint_quota_aggregates_across_subjects() {
        let counter = counter(CountMode::ExcludeCurrent);
        let policy = LimitPolicy::new(1, 60);
        let now = 1_000;

        // Endpoint budget is 1 * 10. Each subject sends a single request,
        // staying within its own limit; the 12th sees an endpoint count of
        // 11 and is denied on the shared dimension alone.
        for i in 0..11 {
            let subject = format!("rate_limit:user:subject-{}", i);
            let decision = counter.check_at(now, &subject, ENDPOINT, &policy).await;
            assert!(decision.allowed, "subject {} should be allowed", i);
        }

        let decision = counter
            .check_at(now, "rate_limit:user:subject-11", ENDPOINT, &policy)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.endpoint_remaining, 0);
        // Its own client window is untouched apart from this request
        assert_eq!(decision.client_remaining, 0);
    }

    #[tokio::test]
    async fn test_endpoint_remaining_decreases_independently() {
        let counter = counter(CountMode::ExcludeCurrent);
        let policy = LimitPolicy::new(5, 60);
        let now = 1_000;

        let first = counter
            .check_at(now, "rate_limit:user:a", ENDPOINT, &policy)
            .await;
        let second = counter
            .check_at(now, "rate_limit:user:b", ENDPOINT, &policy)
            .await;

        assert_eq!(first.client_remaining, 4);
        assert_eq!(second.client_remaining, 4);
        assert_eq!(first.endpoint_remaining, 49);
        assert_eq!(second.endpoint_remaining, 48);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let counter = SlidingWindowCounter::new(Arc::new(FailingStore), CountMode::ExcludeCurrent);
        let policy = LimitPolicy::new(5, 60);

        let decision = counter.check_at(1_000, SUBJECT, ENDPOINT, &policy).await;
        assert!(decision.allowed);
        assert!(decision.error.is_some());
        assert_eq!(decision.client_remaining, 5);

        let decision = counter.status_at(1_000, SUBJECT, ENDPOINT, &policy).await;
        assert!(decision.allowed);
        assert!(decision.error.is_some());
    }

    #[tokio::test]
    async fn test_status_is_idempotent() {
        let counter = counter(CountMode::ExcludeCurrent);
        let policy = LimitPolicy::new(5, 60);
        let now = 1_000;

        counter.check_at(now, SUBJECT, ENDPOINT, &policy).await;
        counter.check_at(now, SUBJECT, ENDPOINT, &policy).await;

        let first = counter.status_at(now, SUBJECT, ENDPOINT, &policy).await;
        let second = counter.status_at(now, SUBJECT, ENDPOINT, &policy).await;

        assert_eq!(first.client_remaining, 3);
        assert_eq!(second.client_remaining, 3);
        assert_eq!(first.endpoint_remaining, second.endpoint_remaining);
    }

    #[tokio::test]
    async fn test_reset_time_tracks_the_call_instant() {
        let counter = counter(CountMode::ExcludeCurrent);
        let policy = LimitPolicy::new(5, 60);

        let first = counter.check_at(1_000, SUBJECT, ENDPOINT, &policy).await;
        assert_eq!(first.reset_time, 1_060);

        // Non-decreasing across calls within the same window
        let second = counter.check_at(1_010, SUBJECT, ENDPOINT, &policy).await;
        assert_eq!(second.reset_time, 1_070);
        assert!(second.reset_time >= first.reset_time);
    }

    #[tokio::test]
    async fn test_denied_requests_still_consume_quota() {
        let counter = counter(CountMode::ExcludeCurrent);
        let policy = LimitPolicy::new(2, 60);
        let now = 1_000;

        for _ in 0..3 {
            counter.check_at(now, SUBJECT, ENDPOINT, &policy).await;
        }

        // The three recorded entries are all visible to status
        let status = counter.status_at(now, SUBJECT, ENDPOINT, &policy).await;
        assert!(!status.allowed);
        assert_eq!(status.client_remaining, 0);
    }
}
