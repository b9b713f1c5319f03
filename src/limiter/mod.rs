pub mod counter;
pub mod middleware;

pub use counter::{
    CountMode, RateLimitDecision, SlidingWindowCounter, ENDPOINT_LIMIT_FACTOR,
};
pub use middleware::{rate_limit_middleware, RateLimitLayer, RateLimitService, RateLimitState};
