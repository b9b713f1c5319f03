// Limitd Library

pub mod api;
pub mod config;
pub mod errors;
pub mod keys;
pub mod limiter;
pub mod observability;
pub mod registry;
pub mod store;

pub use config::Config;
pub use errors::{AppError, Result};
pub use keys::{derive_keys, AuthenticatedSubject, RequestKeys};
pub use limiter::{
    rate_limit_middleware, CountMode, RateLimitDecision, RateLimitLayer, RateLimitState,
    SlidingWindowCounter,
};
pub use registry::{LimitPolicy, LimitRegistry};
