use crate::config::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fallback for endpoints with no configured policy
pub const DEFAULT_MAX_REQUESTS: u64 = 100;
pub const DEFAULT_WINDOW_SECONDS: u64 = 3600;

/// A resolved rate limit: at most `max_requests` per `window_seconds`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    pub max_requests: u64,
    pub window_seconds: u64,
}

impl LimitPolicy {
    pub fn new(max_requests: u64, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.max_requests > 0 && self.window_seconds > 0
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_seconds: DEFAULT_WINDOW_SECONDS,
        }
    }
}

/// Static endpoint-name -> policy table, fixed at startup
#[derive(Debug, Clone, Default)]
pub struct LimitRegistry {
    default: LimitPolicy,
    endpoints: HashMap<String, LimitPolicy>,
}

impl LimitRegistry {
    pub fn new(default: LimitPolicy, endpoints: HashMap<String, LimitPolicy>) -> Self {
        let default = if default.is_valid() {
            default
        } else {
            tracing::warn!(
                max_requests = default.max_requests,
                window_seconds = default.window_seconds,
                "invalid default limit policy, using built-in default"
            );
            LimitPolicy::default()
        };

        let endpoints = endpoints
            .into_iter()
            .filter(|(endpoint, policy)| {
                if policy.is_valid() {
                    true
                } else {
                    tracing::warn!(
                        endpoint = %endpoint,
                        "dropping invalid limit policy for endpoint"
                    );
                    false
                }
            })
            .collect();

        Self { default, endpoints }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            LimitPolicy::new(config.default_max_requests, config.default_window_seconds),
            config.endpoints.clone(),
        )
    }

    /// Resolve the policy for an endpoint. A valid override wins, then the
    /// static table, then the default. Never fails.
    pub fn resolve(&self, endpoint: &str, override_policy: Option<LimitPolicy>) -> LimitPolicy {
        if let Some(policy) = override_policy {
            if policy.is_valid() {
                return policy;
            }
            tracing::warn!(
                endpoint = %endpoint,
                max_requests = policy.max_requests,
                window_seconds = policy.window_seconds,
                "ignoring invalid limit override"
            );
        }

        self.endpoints.get(endpoint).copied().unwrap_or(self.default)
    }
}
