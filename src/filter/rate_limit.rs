//! Rate-limit stage: exclusions first, then the per-IP counter.

use super::{FilterFuture, GatewayFilter, Verdict, order};
use crate::context::ClientContext;
use crate::error::GatewayError;
use crate::rate_limit::{Admission, RateLimiter};

/// Denies with 429 once a client exceeds its per-window ceiling.
#[derive(Debug, Clone)]
pub struct RateLimitFilter {
    limiter: RateLimiter,
}

impl RateLimitFilter {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

impl GatewayFilter for RateLimitFilter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn order(&self) -> i32 {
        order::RATE_LIMIT
    }

    fn apply<'a>(&'a self, ctx: &'a ClientContext) -> FilterFuture<'a> {
        Box::pin(async move {
            match self.limiter.admit(ctx).await {
                Admission::Allow => Verdict::forward(),
                Admission::Deny { .. } => Verdict::Deny(GatewayError::RateLimitExceeded {
                    retry_after: self.limiter.window().as_secs().max(1),
                    limit: self.limiter.limit(),
                }),
            }
        })
    }
}
