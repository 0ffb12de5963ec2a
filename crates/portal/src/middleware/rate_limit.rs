//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use campus_common::{
    config::RateLimitConfig,
    errors::{AppError, Result},
};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Limiter plus the quota it enforces, for error reporting
pub struct CredentialLimiter {
    limiter: GlobalRateLimiter,
    per_second: u32,
}

impl CredentialLimiter {
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Create a new rate limiter
pub fn create_rate_limiter(config: &RateLimitConfig) -> Result<Arc<CredentialLimiter>> {
    let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.requests_per_second must be positive".to_string(),
    })?;
    let burst = NonZeroU32::new(config.burst).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.burst must be positive".to_string(),
    })?;

    Ok(Arc::new(CredentialLimiter {
        limiter: RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst)),
        per_second: config.requests_per_second,
    }))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<CredentialLimiter>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    if limiter.check() {
        return Ok(next.run(request).await);
    }
    tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
    Err(AppError::RateLimited { limit: limiter.per_second })
}
