use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChecks {
    pub store: ComponentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: String,
    pub message: Option<String>,
}

pub struct HealthChecker {
    redis_manager: ConnectionManager,
}

impl HealthChecker {
    pub fn new(redis_manager: ConnectionManager) -> Self {
        Self { redis_manager }
    }

    /// Liveness check - is the service running?
    pub async fn liveness(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                store: ComponentStatus {
                    status: "unknown".to_string(),
                    message: None,
                },
            },
        }
    }

    /// Readiness check - can the service handle requests? A store outage
    /// degrades readiness even though checks themselves fail open.
    pub async fn readiness(&self) -> HealthStatus {
        let store_status = self.check_store().await;

        let overall_status = if store_status.status == "ok" {
            "ok"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                store: store_status,
            },
        }
    }

    /// Startup check - has the service finished initializing?
    pub async fn startup(&self) -> HealthStatus {
        self.readiness().await
    }

    async fn check_store(&self) -> ComponentStatus {
        let mut manager = self.redis_manager.clone();
        match crate::store::health_check(&mut manager).await {
            Ok(_) => ComponentStatus {
                status: "ok".to_string(),
                message: None,
            },
            Err(e) => ComponentStatus {
                status: "error".to_string(),
                message: Some(format!("Store check failed: {}", e)),
            },
        }
    }
}
