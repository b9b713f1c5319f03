pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::{create_client, health_check, RedisStore};

use async_trait::async_trait;
use thiserror::Error;

/// Entry counts observed for one check, taken before the current request
/// is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounts {
    pub subject: u64,
    pub endpoint: u64,
}

/// Store-level failures. The counter treats every variant the same way:
/// log, fail open. Keeping malformed replies as their own variant makes
/// that an explicit policy rather than a catch-all.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(#[from] ::redis::RedisError),

    #[error("store call timed out after {0}ms")]
    Timeout(u64),

    #[error("unexpected store response: {0}")]
    MalformedResponse(String),
}

impl StoreError {
    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "connection",
            StoreError::Timeout(_) => "timeout",
            StoreError::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// Executes the per-check window operations against the shared store.
///
/// Both methods cover the subject and endpoint keys in a single network
/// round trip. `record` must count *before* inserting, so the returned
/// counts never include the request being recorded.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Prune expired entries from both windows, count what remains, record
    /// the current request into both, and refresh both key TTLs.
    async fn record(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        now: u64,
        window_seconds: u64,
    ) -> Result<WindowCounts, StoreError>;

    /// Prune and count only. No entry is written and no TTL is refreshed.
    async fn observe(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        now: u64,
        window_seconds: u64,
    ) -> Result<WindowCounts, StoreError>;
}
